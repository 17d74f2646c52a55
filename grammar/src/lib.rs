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

//! A TextMate-grammar interpreter.
//!
//! Feed [`Language::new`] a grammar (a tree of regex-driven rules),
//! initialize its repository, and run it over a [`ContentHandler`]: the
//! result is a tree of elements annotating spans of the input with
//! scope names.
//!
//! ```no_run
//! use tm_grammar::{grammars, Language};
//!
//! let language = Language::new(grammars::matlab().unwrap()).unwrap();
//! language.initialize_repository().unwrap();
//! for element in language.parse_string("import module.*").unwrap() {
//!     println!("{}", element.to_dict(true));
//! }
//! ```

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate strum_macros;

extern crate strum;

mod captures;
pub mod elements;
pub mod errors;
pub mod grammar;
pub mod grammars;
pub mod language;
pub mod parser;

pub use crate::elements::{ContentBlockElement, ContentElement, Element};
pub use crate::errors::Error;
pub use crate::grammar::RawRule;
pub use crate::language::Language;
pub use crate::parser::{ParseOptions, Parser};
pub use handler::{ContentHandler, Pos, Span};
