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

//! Capture group resolution.

use std::collections::BTreeMap;
use std::rc::Rc;

use handler::{ContentHandler, Matching};

use crate::elements::{ContentElement, Element};
use crate::errors::Error;
use crate::parser::{ChildSlot, ParseOptions};

/// Turns the capture groups of a match into child elements.
///
/// A parser on group 0 short-circuits: the whole match becomes a single
/// element carrying that parser's token, with no children. Otherwise
/// each mapped group, in ascending index order, is handed to its parser
/// restricted to the group's span; empty and unmatched groups are
/// skipped. `Ok(None)` is the capture mismatch verdict: some parser
/// failed on a non-empty group, so the enclosing match must be
/// rejected.
pub(crate) fn resolve(
    handler: &ContentHandler,
    matching: &Matching,
    parsers: &BTreeMap<usize, ChildSlot>,
    depth: usize,
) -> Result<Option<Vec<Element>>, Error> {
    if let Some(slot) = parsers.get(&0) {
        let parser = slot.parser()?;
        return Ok(Some(vec![Element::Content(ContentElement {
            token: parser.token.clone(),
            grammar: Rc::clone(&parser.grammar),
            content: matching.text.clone(),
            span: matching.span,
            captures: vec![],
        })]));
    }

    let mut elements = Vec::new();
    for (&index, slot) in parsers {
        let parser = slot.parser()?;
        if index >= matching.groups.len() {
            return Err(Error::RegexGroupsMismatch(index));
        }
        let group = match &matching.groups[index] {
            Some(group) => group,
            None => continue,
        };
        if group.span.0 == group.span.1 {
            continue;
        }
        let options = ParseOptions {
            find_one: false,
            injections: false,
            allow_leading_all: false,
            depth: depth + 1,
        };
        match parser.parse(handler, group.span.0, Some(group.span.1), options)? {
            Some((group_elements, _span)) => elements.extend(group_elements),
            None => return Ok(None),
        }
    }
    Ok(Some(elements))
}
