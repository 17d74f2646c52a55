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

use std::cell::Cell;

use memchr::memchr;
use thiserror::Error;

use crate::pattern::Pattern;
use crate::{Pos, Span};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("impossible span ({0:?}, {1:?})")]
    ImpossibleSpan(Pos, Pos),
}

/// One capture group of a [`Matching`], in absolute positions.
#[derive(Debug, Clone)]
pub struct Group {
    pub span: Span,
    pub text: String,
}

/// A successful [`ContentHandler::search`]: the whole match plus its
/// capture groups. `groups[0]` covers the whole match; a group the
/// expression did not populate is `None`.
#[derive(Debug, Clone)]
pub struct Matching {
    pub span: Span,
    pub text: String,
    pub groups: Vec<Option<Group>>,
}

/// Line-indexed text buffer with `(line, column)` position arithmetic
/// and bounded regex search.
///
/// Every stored line, the last one included, carries a terminating
/// `"\n"`; grammars expect the line terminator to be visible to the
/// expression they match against. The buffer is immutable after
/// loading. The only mutable state is `anchor`, the position `\G`
/// patterns assert against, which every successful search advances to
/// its match end.
pub struct ContentHandler {
    lines: Vec<String>,
    line_lengths: Vec<usize>,
    pub anchor: Cell<Pos>,
}

/// Byte offset of character column `col` in `line`, clamped to the end.
fn byte_offset(line: &str, col: usize) -> usize {
    line.char_indices()
        .nth(col)
        .map(|(offset, _)| offset)
        .unwrap_or_else(|| line.len())
}

/// Character column of byte offset `offset` in `line`.
fn char_col(line: &str, offset: usize) -> usize {
    line[..offset].chars().count()
}

impl ContentHandler {
    pub fn new(content: &str) -> ContentHandler {
        let bytes = content.as_bytes();
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(found) = memchr(b'\n', &bytes[start..]) {
            lines.push(content[start..start + found + 1].to_string());
            start += found + 1;
        }
        lines.push(format!("{}\n", &content[start..]));
        let line_lengths = lines.iter().map(|line| line.chars().count()).collect();
        ContentHandler {
            lines,
            line_lengths,
            anchor: Cell::new((0, 0)),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line_length(&self, line: usize) -> usize {
        self.line_lengths[line]
    }

    /// The position just past the final character of the buffer, used as
    /// the default boundary wherever none is given.
    pub fn last_pos(&self) -> Pos {
        (self.lines.len() - 1, self.line_lengths[self.lines.len() - 1])
    }

    fn clamp(&self, pos: Pos) -> Pos {
        if pos >= self.last_pos() {
            self.last_pos()
        } else if pos.1 > self.line_lengths[pos.0] {
            (pos.0, self.line_lengths[pos.0])
        } else {
            pos
        }
    }

    /// One character forward, crossing the line boundary. Stepping past
    /// the final line yields the start of the (non-existent) next line,
    /// which compares greater than every valid position.
    pub fn next(&self, pos: Pos) -> Pos {
        if pos.0 >= self.lines.len() {
            return pos;
        }
        if pos.1 + 1 >= self.line_lengths[pos.0] {
            (pos.0 + 1, 0)
        } else {
            (pos.0, pos.1 + 1)
        }
    }

    /// One character backward, crossing the line boundary.
    pub fn prev(&self, pos: Pos) -> Pos {
        if pos.1 == 0 {
            if pos.0 == 0 {
                (0, 0)
            } else {
                (pos.0 - 1, self.line_lengths[pos.0 - 1].saturating_sub(1))
            }
        } else {
            (pos.0, pos.1 - 1)
        }
    }

    /// The verbatim text between two positions.
    pub fn read_pos(&self, start: Pos, end: Pos) -> Result<String, HandlerError> {
        let end = self.clamp(end);
        if start > end || start.0 >= self.lines.len() {
            return Err(HandlerError::ImpossibleSpan(start, end));
        }
        if start.0 == end.0 {
            let line = &self.lines[start.0];
            return Ok(line[byte_offset(line, start.1)..byte_offset(line, end.1)].to_string());
        }
        let mut out = String::new();
        let first = &self.lines[start.0];
        out.push_str(&first[byte_offset(first, start.1)..]);
        for line in &self.lines[start.0 + 1..end.0] {
            out.push_str(line);
        }
        let last = &self.lines[end.0];
        out.push_str(&last[..byte_offset(last, end.1)]);
        Ok(out)
    }

    /// The remainder of the line at `pos`, including its newline.
    pub fn read_line(&self, pos: Pos) -> String {
        if pos.0 >= self.lines.len() {
            return String::new();
        }
        let line = &self.lines[pos.0];
        line[byte_offset(line, pos.1)..].to_string()
    }

    /// The next `length` characters from `pos`. With `skip_newline`,
    /// newline characters are carried along but do not count towards
    /// `length`.
    pub fn read_length(&self, pos: Pos, length: usize, skip_newline: bool) -> String {
        let mut out = String::new();
        let mut count = 0;
        let mut pos = pos;
        while count < length && pos.0 < self.lines.len() {
            let line = &self.lines[pos.0];
            if pos.1 >= self.line_lengths[pos.0] {
                pos = (pos.0 + 1, 0);
                continue;
            }
            for ch in line[byte_offset(line, pos.1)..].chars() {
                out.push(ch);
                if !(skip_newline && ch == '\n') {
                    count += 1;
                }
                if count >= length {
                    break;
                }
            }
            pos = (pos.0 + 1, 0);
        }
        out
    }

    /// Every character position in `[start, end)`.
    pub fn range(&self, start: Pos, end: Pos) -> Vec<Pos> {
        let mut positions = Vec::new();
        let mut pos = start;
        while pos < end && pos.0 < self.lines.len() {
            positions.push(pos);
            pos = self.next(pos);
        }
        positions
    }

    /// Searches `pattern` between `starting` and `boundary` (inclusive;
    /// defaults to the end of the buffer).
    ///
    /// With `allow_leading_all` unset the match must lie on the starting
    /// line and begin at `starting` itself or after nothing but
    /// whitespace; set, the search walks the buffer line by line up to
    /// the boundary and any leading text is acceptable. On the boundary
    /// line the subject is cut at the boundary column, so neither the
    /// match nor its look-ahead can see past it.
    ///
    /// `\G` expressions are only attempted when `starting` equals the
    /// anchor, and only on the starting line, with the search origin
    /// placed so that `\G` asserts exactly there.
    ///
    /// A successful search moves the anchor to the end of the match.
    /// Failure returns `None` and never errors.
    pub fn search(
        &self,
        pattern: &Pattern,
        starting: Pos,
        boundary: Option<Pos>,
        allow_leading_all: bool,
    ) -> Option<Matching> {
        let boundary = self.clamp(boundary.unwrap_or_else(|| self.last_pos()));
        if starting > boundary || starting.0 >= self.lines.len() {
            return None;
        }
        if pattern.anchored() && self.anchor.get() != starting {
            return None;
        }

        let last_line = if allow_leading_all && !pattern.anchored() {
            boundary.0
        } else {
            starting.0
        };

        for lineno in starting.0..=last_line {
            let line = &self.lines[lineno];
            let base = if lineno == starting.0 { starting.1 } else { 0 };
            let window = if lineno == boundary.0 {
                boundary.1.min(self.line_lengths[lineno])
            } else {
                self.line_lengths[lineno]
            };
            if base > window {
                continue;
            }

            let subject = &line[..byte_offset(line, window)];
            let from = byte_offset(subject, base);
            let found = match pattern.search(subject, from) {
                Some(found) => found,
                None => continue,
            };

            let (match_start, match_end) = found.groups[0]?;
            let start_col = char_col(subject, match_start);
            if !allow_leading_all && start_col != base {
                let gap = &subject[from..match_start];
                if !gap.chars().all(char::is_whitespace) {
                    return None;
                }
            }

            let span = (
                (lineno, start_col),
                (lineno, char_col(subject, match_end)),
            );
            let groups = found
                .groups
                .iter()
                .map(|group| {
                    group.map(|(group_start, group_end)| Group {
                        span: (
                            (lineno, char_col(subject, group_start)),
                            (lineno, char_col(subject, group_end)),
                        ),
                        text: subject[group_start..group_end].to_string(),
                    })
                })
                .collect();

            self.anchor.set(span.1);
            return Some(Matching {
                span,
                text: subject[match_start..match_end].to_string(),
                groups,
            });
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::ContentHandler;
    use crate::pattern::Pattern;

    #[test]
    fn lines_keep_their_terminator() {
        let handler = ContentHandler::new("one\ntwo");
        assert_eq!(2, handler.line_count());
        assert_eq!("one\n", handler.read_line((0, 0)));
        assert_eq!("two\n", handler.read_line((1, 0)));
        assert_eq!((1, 4), handler.last_pos());

        let handler = ContentHandler::new("one\n");
        assert_eq!(2, handler.line_count());
        assert_eq!("\n", handler.read_line((1, 0)));
    }

    #[test]
    fn step_arithmetic() {
        let handler = ContentHandler::new("ab\ncd");
        assert_eq!((0, 1), handler.next((0, 0)));
        assert_eq!((0, 2), handler.next((0, 1)));
        assert_eq!((1, 0), handler.next((0, 2)));
        assert_eq!((1, 0), handler.next((0, 3)));
        assert_eq!((0, 2), handler.prev((1, 0)));
        assert_eq!((0, 0), handler.prev((0, 0)));
    }

    #[test]
    fn read_pos_across_lines() {
        let handler = ContentHandler::new("ab\ncd\nef");
        assert_eq!("b\ncd\ne", handler.read_pos((0, 1), (2, 1)).unwrap());
        assert_eq!("ab", handler.read_pos((0, 0), (0, 2)).unwrap());
        assert_eq!("", handler.read_pos((1, 1), (1, 1)).unwrap());
        assert!(handler.read_pos((1, 1), (0, 0)).is_err());
    }

    #[test]
    fn read_length_characters() {
        let handler = ContentHandler::new("ab\ncd");
        assert_eq!("b\nc", handler.read_length((0, 1), 3, false));
        assert_eq!("b\ncd", handler.read_length((0, 1), 3, true));
        assert_eq!("\n", handler.read_length((0, 2), 1, false));
    }

    #[test]
    fn range_covers_half_open_span() {
        let handler = ContentHandler::new("ab\ncd");
        assert_eq!(
            vec![(0, 1), (0, 2), (1, 0)],
            handler.range((0, 1), (1, 1))
        );
        assert!(handler.range((1, 1), (1, 1)).is_empty());
    }

    #[test]
    fn wide_characters_count_as_one_column() {
        let handler = ContentHandler::new("два slova");
        let pattern = Pattern::new("slova").unwrap();
        let matching = handler.search(&pattern, (0, 0), None, true).unwrap();
        assert_eq!(((0, 4), (0, 9)), matching.span);
        assert_eq!("slova", matching.text);
        assert_eq!("два", handler.read_pos((0, 0), (0, 3)).unwrap());
    }

    #[test]
    fn leading_whitespace_rules() {
        let handler = ContentHandler::new("  word junk word");
        let pattern = Pattern::new("word").unwrap();

        // Whitespace between the starting point and the match is fine.
        let matching = handler.search(&pattern, (0, 0), None, false).unwrap();
        assert_eq!(((0, 2), (0, 6)), matching.span);

        // Anything else requires allow_leading_all.
        let junk = Pattern::new("junk").unwrap();
        assert!(handler.search(&junk, (0, 0), None, false).is_none());
        let matching = handler.search(&junk, (0, 0), None, true).unwrap();
        assert_eq!(((0, 7), (0, 11)), matching.span);
    }

    #[test]
    fn strict_search_stays_on_the_starting_line() {
        let handler = ContentHandler::new("none\nword");
        let pattern = Pattern::new("word").unwrap();
        assert!(handler.search(&pattern, (0, 0), None, false).is_none());
        let matching = handler.search(&pattern, (0, 0), None, true).unwrap();
        assert_eq!(((1, 0), (1, 4)), matching.span);
    }

    #[test]
    fn boundary_cuts_the_subject() {
        let handler = ContentHandler::new("word word");
        let pattern = Pattern::new("word").unwrap();
        assert!(handler
            .search(&pattern, (0, 5), Some((0, 8)), true)
            .is_none());
        // A look-ahead cannot peek past the boundary either.
        let peeking = Pattern::new(r"wor(?=d)").unwrap();
        assert!(handler
            .search(&peeking, (0, 5), Some((0, 8)), true)
            .is_none());
        assert!(handler.search(&peeking, (0, 5), Some((0, 9)), true).is_some());
    }

    #[test]
    fn anchored_patterns_respect_the_anchor() {
        let handler = ContentHandler::new("abab");
        let pattern = Pattern::new(r"\Gab").unwrap();

        // Fresh handler: anchor is at the origin.
        let matching = handler.search(&pattern, (0, 0), None, false).unwrap();
        assert_eq!(((0, 0), (0, 2)), matching.span);
        assert_eq!((0, 2), handler.anchor.get());

        // Valid immediately after the previous match, and nowhere else.
        assert!(handler.search(&pattern, (0, 1), None, false).is_none());
        let matching = handler.search(&pattern, (0, 2), None, false).unwrap();
        assert_eq!(((0, 2), (0, 4)), matching.span);
    }

    #[test]
    fn search_collects_groups() {
        let handler = ContentHandler::new("key = value");
        let pattern = Pattern::new(r"(\w+)\s*(=)\s*(\w+)?(!)?").unwrap();
        let matching = handler.search(&pattern, (0, 0), None, false).unwrap();
        let key = matching.groups[1].as_ref().unwrap();
        assert_eq!("key", key.text);
        assert_eq!(((0, 0), (0, 3)), key.span);
        let value = matching.groups[3].as_ref().unwrap();
        assert_eq!("value", value.text);
        assert!(matching.groups[4].is_none());
    }

    #[test]
    fn empty_match_is_a_match() {
        let handler = ContentHandler::new("ab");
        let pattern = Pattern::new("(?=b)").unwrap();
        let matching = handler.search(&pattern, (0, 0), None, true).unwrap();
        assert_eq!(((0, 1), (0, 1)), matching.span);
    }
}
