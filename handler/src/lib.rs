//    This file is part of tm-rs.
//
//    tm-rs is free software: you can redistribute it and/or modify
//    it under the terms of the GNU General Public License as published by
//    the Free Software Foundation, either version 3 of the License, or
//    (at your option) any later version.
//
//    tm-rs is distributed in the hope that it will be useful,
//    but WITHOUT ANY WARRANTY; without even the implied warranty of
//    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//    GNU General Public License for more details.
//
//    You should have received a copy of the GNU General Public License
//    along with tm-rs.  If not, see <https://www.gnu.org/licenses/>.

//! Line-indexed text buffer and the Oniguruma pattern primitive.
//!
//! Everything position-related in the engine speaks `Pos`, a
//! `(line, column)` pair with the column counted in characters. The
//! buffer is loaded once per parse; the only mutable state is the
//! `anchor` cursor consulted by `\G` patterns.

mod handler;
mod pattern;

pub use crate::handler::{ContentHandler, Group, HandlerError, Matching};
pub use crate::pattern::{ByteMatch, Pattern, PatternError};

/// A `(line, column)` position in the buffer. Columns count characters,
/// not bytes. Ordering is lexicographic.
pub type Pos = (usize, usize);

/// An absolute `(start, end)` pair of positions, end exclusive.
pub type Span = (Pos, Pos);
