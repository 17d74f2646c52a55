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

use std::fmt;

use onig::{Regex, Region, SearchOptions};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("cannot compile expression {expression:?}: {source}")]
    Compile {
        expression: String,
        source: onig::Error,
    },
}

/// A compiled Oniguruma expression.
///
/// TextMate grammars lean on features the standard regex engines lack:
/// `\G` (valid only at the position the search started from), look-behind
/// of arbitrary shape, and backreferences. Compilation happens once, when
/// the grammar is turned into a parser tree.
pub struct Pattern {
    regex: Regex,
    source: String,
    anchored: bool,
}

/// One match of a [`Pattern`], with byte spans relative to the subject
/// passed to [`Pattern::search`]. Index 0 is the whole match; unmatched
/// groups are `None`.
pub struct ByteMatch {
    pub groups: Vec<Option<(usize, usize)>>,
}

impl Pattern {
    pub fn new(expression: &str) -> Result<Pattern, PatternError> {
        let regex = Regex::new(expression).map_err(|source| PatternError::Compile {
            expression: expression.to_string(),
            source,
        })?;
        Ok(Pattern {
            regex,
            source: expression.to_string(),
            anchored: expression.contains("\\G"),
        })
    }

    /// Whether the expression contains `\G` and is therefore only valid
    /// at the handler's anchor.
    pub fn anchored(&self) -> bool {
        self.anchored
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Finds the leftmost match in `subject` starting at byte offset
    /// `from` or later. The full subject stays visible to the engine, so
    /// look-behind may inspect text before `from`; `\G` asserts exactly
    /// at `from`.
    pub fn search(&self, subject: &str, from: usize) -> Option<ByteMatch> {
        let mut region = Region::new();
        self.regex.search_with_options(
            subject,
            from,
            subject.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        let groups = (0..region.len()).map(|i| region.pos(i)).collect();
        Some(ByteMatch { groups })
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Pattern({:?})", self.source)
    }
}

#[cfg(test)]
mod test {
    use super::Pattern;

    #[test]
    fn plain_search() {
        let pattern = Pattern::new(r"\d+").unwrap();
        let m = pattern.search("abc 123 def", 0).unwrap();
        assert_eq!(Some((4, 7)), m.groups[0]);
    }

    #[test]
    fn search_from_offset() {
        let pattern = Pattern::new("a").unwrap();
        let m = pattern.search("a a", 1).unwrap();
        assert_eq!(Some((2, 3)), m.groups[0]);
    }

    #[test]
    fn lookbehind_sees_before_offset() {
        // The characters before `from` are part of the subject, so the
        // assertion can inspect them even though the match cannot start
        // before the offset.
        let pattern = Pattern::new(r"(?<=\()\w+").unwrap();
        let m = pattern.search("(abc)", 1).unwrap();
        assert_eq!(Some((1, 4)), m.groups[0]);
    }

    #[test]
    fn unmatched_group_is_none() {
        let pattern = Pattern::new("(a)|(b)").unwrap();
        let m = pattern.search("b", 0).unwrap();
        assert_eq!(None, m.groups[1]);
        assert_eq!(Some((0, 1)), m.groups[2]);
    }

    #[test]
    fn anchor_flag() {
        assert!(Pattern::new(r"\G\w+").unwrap().anchored());
        assert!(!Pattern::new(r"\w+").unwrap().anchored());
    }

    #[test]
    fn bad_expression() {
        assert!(Pattern::new("(unclosed").is_err());
    }
}
