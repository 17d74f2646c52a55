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

use thiserror::Error;

/// Fatal grammar and parsing failures.
///
/// Ordinary no-matches are not errors: parsers report those as `None`.
/// A capture mismatch is handled locally as a no-match and never
/// surfaces here.
#[derive(Debug, Error)]
pub enum Error {
    /// An `include` reference that the repository cannot resolve,
    /// raised eagerly while the repository initializes.
    #[error("included parser not found: <{0}>")]
    IncludedParserNotFound(String),

    /// The capture map names a group the expression does not define.
    #[error("capture map refers to group {0}, which the expression does not define")]
    RegexGroupsMismatch(usize),

    /// A capture map key that is not a group index.
    #[error("capture key {0:?} is not a group index")]
    InvalidCaptureGroup(String),

    /// An include slot was reached while parsing, meaning
    /// `initialize_repository` never ran for this grammar.
    #[error("include <{0}> used before the repository was initialized")]
    UninitializedInclude(String),

    #[error(transparent)]
    Pattern(#[from] handler::PatternError),

    #[error(transparent)]
    Handler(#[from] handler::HandlerError),
}
