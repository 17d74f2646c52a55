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

//! The grammar interpreter: one tagged parser node per grammar rule,
//! and the recursive matching machinery that walks them.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use handler::{ContentHandler, Pattern, Pos, Span};

use crate::captures;
use crate::elements::{ContentBlockElement, ContentElement, Element};
use crate::errors::Error;
use crate::grammar::RawRule;

pub type ParserRef = Rc<Parser>;

/// A child position in a parser: either a still-unresolved `include`
/// reference, or the parser it resolved to. After
/// `initialize_repository` no `Unresolved` slot remains reachable.
#[derive(Debug, Clone)]
pub enum ChildSlot {
    Unresolved(String),
    Parser(ParserRef),
}

impl ChildSlot {
    pub fn parser(&self) -> Result<&ParserRef, Error> {
        match self {
            ChildSlot::Parser(parser) => Ok(parser),
            ChildSlot::Unresolved(name) => Err(Error::UninitializedInclude(name.clone())),
        }
    }
}

/// Options threaded explicitly through every parse call. Each parser
/// consumes only the fields it recognizes; `depth` merely indents the
/// log lines.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Stop at the first successful child (patterns parsers only).
    pub find_one: bool,
    /// Include the injected patterns in the search set.
    pub injections: bool,
    /// Allow arbitrary text between the starting point and the match.
    pub allow_leading_all: bool,
    pub depth: usize,
}

impl Default for ParseOptions {
    fn default() -> ParseOptions {
        ParseOptions {
            find_one: false,
            injections: false,
            allow_leading_all: false,
            depth: 0,
        }
    }
}

/// Lookup context for `include` resolution, owned by the language root
/// and passed down by reference.
pub struct Resolver<'a> {
    pub root: &'a ParserRef,
    pub repository: &'a HashMap<String, ParserRef>,
}

impl<'a> Resolver<'a> {
    fn lookup(&self, include: &str) -> Result<ParserRef, Error> {
        if include == "$self" || include == "$base" {
            return Ok(Rc::clone(self.root));
        }
        if let Some(name) = include.strip_prefix('#') {
            return self
                .repository
                .get(name)
                .cloned()
                .ok_or_else(|| Error::IncludedParserNotFound(name.to_string()));
        }
        // scope.name references another registered grammar; external
        // grammars are not part of this engine.
        Err(Error::IncludedParserNotFound(include.to_string()))
    }
}

#[derive(Debug)]
pub struct MatchData {
    pub exp_match: Pattern,
    pub parsers: RefCell<BTreeMap<usize, ChildSlot>>,
}

#[derive(Debug)]
pub struct PatternsData {
    pub patterns: RefCell<Vec<ChildSlot>>,
}

#[derive(Debug)]
pub struct BeginEndData {
    pub patterns: RefCell<Vec<ChildSlot>>,
    pub exp_begin: Pattern,
    pub exp_end: Pattern,
    pub parsers_begin: RefCell<BTreeMap<usize, ChildSlot>>,
    pub parsers_end: RefCell<BTreeMap<usize, ChildSlot>>,
    /// The grammar supplied `contentName`: the emitted span covers only
    /// the material between the begin and end matches.
    pub between_content: bool,
    pub apply_end_pattern_last: bool,
}

#[derive(Debug)]
pub struct BeginWhileData {
    pub patterns: RefCell<Vec<ChildSlot>>,
    pub exp_begin: Pattern,
    pub exp_while: Pattern,
    pub parsers_begin: RefCell<BTreeMap<usize, ChildSlot>>,
    pub parsers_while: RefCell<BTreeMap<usize, ChildSlot>>,
    pub between_content: bool,
}

#[derive(Debug, EnumDiscriminants)]
#[strum_discriminants(name(ParserT))]
pub enum ParserKind {
    Token,
    Match(MatchData),
    Patterns(PatternsData),
    BeginEnd(BeginEndData),
    BeginWhile(BeginWhileData),
}

/// One node of the parser tree. The header is shared by every kind;
/// `kind` carries the pattern-specific state. Nodes are held through
/// `Rc` handles; grammar cycles live in the `patterns` lists, never in
/// ownership.
#[derive(Debug)]
pub struct Parser {
    pub grammar: Rc<RawRule>,
    /// Repository key, for diagnostics.
    pub key: String,
    pub token: String,
    pub comment: String,
    pub disabled: bool,
    pub initialized: Cell<bool>,
    /// The driving expression contains `\G`.
    pub anchored: bool,
    pub injected_patterns: RefCell<Vec<ChildSlot>>,
    pub kind: ParserKind,
}

impl fmt::Display for Parser {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = ParserT::from(&self.kind);
        if !self.token.is_empty() {
            write!(f, "{:?}Parser:{}", kind, self.token)
        } else if !self.key.is_empty() {
            write!(f, "{:?}Parser:<{}>", kind, self.key)
        } else {
            write!(f, "{:?}Parser:<_>", kind)
        }
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

/// Builds the capture-group parser map of a grammar node.
fn init_captures(
    captures: &BTreeMap<String, Rc<RawRule>>,
) -> Result<BTreeMap<usize, ChildSlot>, Error> {
    let mut parsers = BTreeMap::new();
    for (group, rule) in captures {
        let index: usize = group
            .parse()
            .map_err(|_| Error::InvalidCaptureGroup(group.clone()))?;
        parsers.insert(index, Parser::initialize(rule, "")?);
    }
    Ok(parsers)
}

fn resolve_list(slots: &RefCell<Vec<ChildSlot>>, resolver: &Resolver) -> Result<(), Error> {
    for slot in slots.borrow_mut().iter_mut() {
        if let ChildSlot::Unresolved(name) = slot {
            *slot = ChildSlot::Parser(resolver.lookup(name)?);
        }
    }
    Ok(())
}

fn resolve_map(
    slots: &RefCell<BTreeMap<usize, ChildSlot>>,
    resolver: &Resolver,
) -> Result<(), Error> {
    for slot in slots.borrow_mut().values_mut() {
        if let ChildSlot::Unresolved(name) = slot {
            *slot = ChildSlot::Parser(resolver.lookup(name)?);
        }
    }
    Ok(())
}

/// The enabled parsers of a slot list, in declaration order.
fn enabled(slots: &RefCell<Vec<ChildSlot>>) -> Result<Vec<ParserRef>, Error> {
    let mut parsers = Vec::new();
    for slot in slots.borrow().iter() {
        let parser = slot.parser()?;
        if !parser.disabled {
            parsers.push(Rc::clone(parser));
        }
    }
    Ok(parsers)
}

impl Parser {
    /// Turns a grammar node into a parser, dispatching on the keys it
    /// carries. An `include` node stays an unresolved slot until
    /// `initialize_repository` rewrites it.
    pub fn initialize(grammar: &Rc<RawRule>, key: &str) -> Result<ChildSlot, Error> {
        if let Some(include) = &grammar.include {
            return Ok(ChildSlot::Unresolved(include.clone()));
        }

        let name = grammar.name.clone().unwrap_or_default();
        let mut token = name.clone();
        let mut anchored = false;
        let mut between_content = false;
        let mut initialized = false;

        let kind = if let Some(expression) = &grammar.match_ {
            anchored = expression.contains("\\G");
            ParserKind::Match(MatchData {
                exp_match: Pattern::new(expression)?,
                parsers: RefCell::new(init_captures(&grammar.captures)?),
            })
        } else if let (Some(begin), Some(end)) = (&grammar.begin, &grammar.end) {
            anchored = begin.contains("\\G");
            if let Some(content_name) = &grammar.content_name {
                token = content_name.clone();
                between_content = true;
            }
            ParserKind::BeginEnd(BeginEndData {
                patterns: RefCell::new(init_patterns(&grammar.patterns)?),
                exp_begin: Pattern::new(begin)?,
                exp_end: Pattern::new(end)?,
                parsers_begin: RefCell::new(init_captures(&grammar.begin_captures)?),
                parsers_end: RefCell::new(init_captures(&grammar.end_captures)?),
                between_content,
                apply_end_pattern_last: grammar.apply_end_pattern_last,
            })
        } else if let (Some(begin), Some(while_)) = (&grammar.begin, &grammar.while_) {
            anchored = begin.contains("\\G");
            if let Some(content_name) = &grammar.content_name {
                token = content_name.clone();
                between_content = true;
            }
            ParserKind::BeginWhile(BeginWhileData {
                patterns: RefCell::new(init_patterns(&grammar.patterns)?),
                exp_begin: Pattern::new(begin)?,
                exp_while: Pattern::new(while_)?,
                parsers_begin: RefCell::new(init_captures(&grammar.begin_captures)?),
                parsers_while: RefCell::new(init_captures(&grammar.while_captures)?),
                between_content,
            })
        } else if !grammar.patterns.is_empty() {
            ParserKind::Patterns(PatternsData {
                patterns: RefCell::new(init_patterns(&grammar.patterns)?),
            })
        } else {
            // A bare name (or nothing at all) still tokenizes the span
            // it is handed.
            initialized = true;
            ParserKind::Token
        };

        Ok(ChildSlot::Parser(Rc::new(Parser {
            grammar: Rc::clone(grammar),
            key: key.to_string(),
            token,
            comment: grammar.comment.clone().unwrap_or_default(),
            disabled: grammar.disabled,
            initialized: Cell::new(initialized),
            anchored,
            injected_patterns: RefCell::new(Vec::new()),
            kind,
        })))
    }

    /// Rewrites every unresolved include slot reachable from this
    /// parser into a parser reference, exactly once. The `initialized`
    /// flag doubles as the visited set, which makes the walk cycle-safe
    /// and the whole operation idempotent.
    pub fn initialize_repository(&self, resolver: &Resolver) -> Result<(), Error> {
        if self.initialized.get() {
            return Ok(());
        }
        self.initialized.set(true);

        resolve_list(&self.injected_patterns, resolver)?;
        match &self.kind {
            ParserKind::Token => {}
            ParserKind::Match(data) => resolve_map(&data.parsers, resolver)?,
            ParserKind::Patterns(data) => resolve_list(&data.patterns, resolver)?,
            ParserKind::BeginEnd(data) => {
                resolve_list(&data.patterns, resolver)?;
                resolve_map(&data.parsers_begin, resolver)?;
                resolve_map(&data.parsers_end, resolver)?;
            }
            ParserKind::BeginWhile(data) => {
                resolve_list(&data.patterns, resolver)?;
                resolve_map(&data.parsers_begin, resolver)?;
                resolve_map(&data.parsers_while, resolver)?;
            }
        }

        for child in self.children() {
            child.initialize_repository(resolver)?;
        }

        self.flatten_patterns();
        Ok(())
    }

    /// Every resolved child parser, across pattern lists and capture
    /// maps.
    fn children(&self) -> Vec<ParserRef> {
        let mut children = Vec::new();
        push_list(&self.injected_patterns, &mut children);
        match &self.kind {
            ParserKind::Token => {}
            ParserKind::Match(data) => push_map(&data.parsers, &mut children),
            ParserKind::Patterns(data) => push_list(&data.patterns, &mut children),
            ParserKind::BeginEnd(data) => {
                push_list(&data.patterns, &mut children);
                push_map(&data.parsers_begin, &mut children);
                push_map(&data.parsers_end, &mut children);
            }
            ParserKind::BeginWhile(data) => {
                push_list(&data.patterns, &mut children);
                push_map(&data.parsers_begin, &mut children);
                push_map(&data.parsers_while, &mut children);
            }
        }
        children
    }

    /// Splices the patterns of any direct patterns-kind child in place,
    /// so the ordered disjunction search sees a single flat list. Runs
    /// after the children have been initialized (and flattened
    /// themselves). A parser is never spliced into itself.
    fn flatten_patterns(&self) {
        let list = match &self.kind {
            ParserKind::Patterns(data) => &data.patterns,
            ParserKind::BeginEnd(data) => &data.patterns,
            ParserKind::BeginWhile(data) => &data.patterns,
            _ => return,
        };
        let flattened = {
            let slots = list.borrow();
            let mut flattened = Vec::with_capacity(slots.len());
            for slot in slots.iter() {
                if let ChildSlot::Parser(child) = slot {
                    if !std::ptr::eq(child.as_ref(), self) {
                        if let ParserKind::Patterns(inner) = &child.kind {
                            flattened.extend(inner.patterns.borrow().iter().cloned());
                            continue;
                        }
                    }
                }
                flattened.push(slot.clone());
            }
            flattened
        };
        *list.borrow_mut() = flattened;
    }

    /// Parses the handler from `starting`, bounded by `boundary`
    /// (defaulting to the end of the buffer). `Ok(None)` is an ordinary
    /// no-match; errors are grammar mistakes.
    pub fn parse(
        &self,
        handler: &ContentHandler,
        starting: Pos,
        boundary: Option<Pos>,
        options: ParseOptions,
    ) -> Result<Option<(Vec<Element>, Span)>, Error> {
        match &self.kind {
            ParserKind::Token => self.parse_token(handler, starting, boundary, options),
            ParserKind::Match(data) => self.parse_match(data, handler, starting, boundary, options),
            ParserKind::Patterns(data) => {
                self.parse_patterns(data, handler, starting, boundary, options)
            }
            ParserKind::BeginEnd(data) => {
                self.parse_begin_end(data, handler, starting, boundary, options)
            }
            ParserKind::BeginWhile(data) => {
                self.parse_begin_while(data, handler, starting, boundary, options)
            }
        }
    }

    /// Runs `pattern` and resolves its capture groups in one step. A
    /// capture mismatch rejects the whole match and rewinds the anchor,
    /// surfacing as an ordinary no-match.
    fn match_and_capture(
        &self,
        handler: &ContentHandler,
        pattern: &Pattern,
        starting: Pos,
        boundary: Option<Pos>,
        parsers: &RefCell<BTreeMap<usize, ChildSlot>>,
        allow_leading_all: bool,
        depth: usize,
    ) -> Result<Option<(Span, String, Vec<Element>)>, Error> {
        let rewind = handler.anchor.get();
        let matching = match handler.search(pattern, starting, boundary, allow_leading_all) {
            Some(matching) => matching,
            None => return Ok(None),
        };
        let parsers = parsers.borrow();
        match captures::resolve(handler, &matching, &parsers, depth)? {
            Some(elements) => Ok(Some((matching.span, matching.text, elements))),
            None => {
                log::debug!(
                    "{}{}: capture mismatch at ({}, {})",
                    indent(depth),
                    self,
                    starting.0,
                    starting.1
                );
                handler.anchor.set(rewind);
                Ok(None)
            }
        }
    }

    /// No expression at all: the element spans whatever it was handed,
    /// verbatim.
    fn parse_token(
        &self,
        handler: &ContentHandler,
        starting: Pos,
        boundary: Option<Pos>,
        options: ParseOptions,
    ) -> Result<Option<(Vec<Element>, Span)>, Error> {
        let boundary = boundary.unwrap_or_else(|| handler.last_pos());
        let content = handler.read_pos(starting, boundary)?;
        log::info!(
            "{}{}: found <{}>",
            indent(options.depth),
            self,
            content.escape_debug()
        );
        let element = Element::Content(ContentElement {
            token: self.token.clone(),
            grammar: Rc::clone(&self.grammar),
            content,
            span: (starting, boundary),
            captures: Vec::new(),
        });
        handler.anchor.set(boundary);
        Ok(Some((vec![element], (starting, boundary))))
    }

    fn parse_match(
        &self,
        data: &MatchData,
        handler: &ContentHandler,
        starting: Pos,
        boundary: Option<Pos>,
        options: ParseOptions,
    ) -> Result<Option<(Vec<Element>, Span)>, Error> {
        let found = self.match_and_capture(
            handler,
            &data.exp_match,
            starting,
            boundary,
            &data.parsers,
            options.allow_leading_all,
            options.depth,
        )?;
        let (span, text, captures) = match found {
            Some(found) => found,
            None => {
                log::debug!(
                    "{}{}: no match at ({}, {})",
                    indent(options.depth),
                    self,
                    starting.0,
                    starting.1
                );
                return Ok(None);
            }
        };
        log::info!(
            "{}{}: found <{}>",
            indent(options.depth),
            self,
            text.escape_debug()
        );

        let elements = if self.token.is_empty() {
            // Token-transparent: the children stand in for the match.
            captures
        } else {
            vec![Element::Content(ContentElement {
                token: self.token.clone(),
                grammar: Rc::clone(&self.grammar),
                content: text,
                span,
                captures,
            })]
        };
        Ok(Some((elements, span)))
    }

    /// Ordered disjunction at a moving cursor: first child to match
    /// wins, the cursor advances to its span end, repeat. A full round
    /// without a match retries once allowing leading text, then the
    /// walk ends.
    fn parse_patterns(
        &self,
        data: &PatternsData,
        handler: &ContentHandler,
        starting: Pos,
        boundary: Option<Pos>,
        options: ParseOptions,
    ) -> Result<Option<(Vec<Element>, Span)>, Error> {
        let boundary = boundary.unwrap_or_else(|| handler.last_pos());

        let mut patterns = enabled(&data.patterns)?;
        if options.find_one || options.injections {
            patterns.extend(enabled(&self.injected_patterns)?);
        }

        let mut elements: Vec<Element> = Vec::new();
        let mut current = starting;

        while current < boundary {
            let iteration_start = current;
            let mut matched = false;

            let phases: &[bool] = if options.allow_leading_all {
                &[true]
            } else {
                &[false, true]
            };
            'phases: for &leading in phases {
                for parser in &patterns {
                    let child_options = ParseOptions {
                        find_one: true,
                        injections: false,
                        allow_leading_all: leading,
                        depth: options.depth + 1,
                    };
                    if let Some((captures, span)) =
                        parser.parse(handler, current, Some(boundary), child_options)?
                    {
                        if options.find_one {
                            log::info!(
                                "{}{}: found single element",
                                indent(options.depth),
                                self
                            );
                            return Ok(Some((captures, span)));
                        }
                        elements.extend(captures);
                        current = span.1;
                        matched = true;
                        break 'phases;
                    }
                }
                if options.find_one {
                    break;
                }
            }

            if !matched {
                break;
            }
            if current == iteration_start {
                log::warn!(
                    "{}{}: handler did not move after a search round at ({}, {})",
                    indent(options.depth),
                    self,
                    current.0,
                    current.1
                );
                break;
            }
        }

        if elements.is_empty() {
            Ok(None)
        } else {
            Ok(Some((elements, (starting, current))))
        }
    }

    /// A begin/end region. After the begin match, inner patterns and
    /// the end expression compete for every stretch of input; the
    /// arbitration rules decide which one consumes it and when the
    /// block closes.
    fn parse_begin_end(
        &self,
        data: &BeginEndData,
        handler: &ContentHandler,
        starting: Pos,
        boundary: Option<Pos>,
        options: ParseOptions,
    ) -> Result<Option<(Vec<Element>, Span)>, Error> {
        let begin = self.match_and_capture(
            handler,
            &data.exp_begin,
            starting,
            boundary,
            &data.parsers_begin,
            options.allow_leading_all,
            options.depth,
        )?;
        let (begin_span, _begin_text, begin_elements) = match begin {
            Some(begin) => begin,
            None => {
                log::debug!(
                    "{}{}: no begin match at ({}, {})",
                    indent(options.depth),
                    self,
                    starting.0,
                    starting.1
                );
                return Ok(None);
            }
        };
        log::info!("{}{}: found begin", indent(options.depth), self);

        let boundary = boundary.unwrap_or_else(|| handler.last_pos());
        let mut current = begin_span.1;

        let mut mid_elements: Vec<Element> = Vec::new();
        let mut end_elements: Vec<Element> = Vec::new();
        let mut closed: Option<(Pos, Pos)> = None; // (closing, end span end)
        let mut patterns = enabled(&data.patterns)?;
        let mut first_run = true;

        let child_options = |leading: bool| ParseOptions {
            find_one: true,
            injections: false,
            allow_leading_all: leading,
            depth: options.depth + 1,
        };
        let close_at = |end_span: Span| {
            if data.between_content {
                (end_span.0, end_span.1)
            } else {
                (end_span.1, end_span.1)
            }
        };

        while current <= boundary {
            // Recursion through the own rule means the end pattern must
            // be applied last this round, otherwise the enclosing level
            // would claim the same span as its end.
            let mut recursed = false;

            // Try the inner patterns, strict about leading text.
            let mut capture: Option<(Vec<Element>, Span)> = None;
            for parser in &patterns {
                if let Some(found) =
                    parser.parse(handler, current, Some(boundary), child_options(false))?
                {
                    if std::ptr::eq(parser.as_ref(), self) {
                        recursed = true;
                    }
                    capture = Some(found);
                    break;
                }
            }

            // Try the end expression, equally strict.
            let mut end = self.match_and_capture(
                handler,
                &data.exp_end,
                current,
                Some(boundary),
                &data.parsers_end,
                false,
                options.depth,
            )?;

            // Neither matched: same again, allowing leading text.
            if capture.is_none() && end.is_none() {
                for parser in &patterns {
                    if let Some(found) =
                        parser.parse(handler, current, Some(boundary), child_options(true))?
                    {
                        if std::ptr::eq(parser.as_ref(), self) {
                            recursed = true;
                        }
                        capture = Some(found);
                        break;
                    }
                }
                end = self.match_and_capture(
                    handler,
                    &data.exp_end,
                    current,
                    Some(boundary),
                    &data.parsers_end,
                    true,
                    options.depth,
                )?;
            }

            match (capture, end) {
                (Some((capture_elements, capture_span)), Some((end_span, _, end_elems))) => {
                    // When the capture ends on a newline, either side of
                    // it counts as the capture's closing position.
                    let capture_before_end = handler.prev(capture_span.1);
                    let pattern_at_end =
                        if handler.read_length(capture_before_end, 1, false) == "\n" {
                            end_span.1 == capture_before_end || end_span.1 == capture_span.1
                        } else {
                            end_span.1 == capture_span.1
                        };
                    let end_before_pattern = end_span.0 <= capture_span.0;
                    let empty_span_end = end_span.0 == end_span.1;

                    if pattern_at_end && (end_before_pattern || empty_span_end) {
                        if empty_span_end {
                            log::debug!(
                                "{}{}: capture+end: both accepted, break",
                                indent(options.depth),
                                self
                            );
                            mid_elements.extend(capture_elements);
                            closed = Some(close_at(end_span));
                            end_elements = end_elems;
                            break;
                        } else if !data.apply_end_pattern_last && !recursed {
                            log::debug!(
                                "{}{}: capture+end: end prioritized, break",
                                indent(options.depth),
                                self
                            );
                            closed = Some(close_at(end_span));
                            end_elements = end_elems;
                            break;
                        } else {
                            log::debug!(
                                "{}{}: capture+end: capture prioritized, continue",
                                indent(options.depth),
                                self
                            );
                            mid_elements.extend(capture_elements);
                            current = capture_span.1;
                        }
                    } else if capture_span.0 < end_span.0 {
                        log::debug!(
                            "{}{}: capture before end, continue",
                            indent(options.depth),
                            self
                        );
                        mid_elements.extend(capture_elements);
                        current = capture_span.1;
                    } else {
                        log::debug!(
                            "{}{}: end before capture, break",
                            indent(options.depth),
                            self
                        );
                        closed = Some(close_at(end_span));
                        end_elements = end_elems;
                        break;
                    }
                }
                (None, Some((end_span, _, end_elems))) => {
                    log::debug!("{}{}: end, break", indent(options.depth), self);
                    closed = Some(close_at(end_span));
                    end_elements = end_elems;
                    break;
                }
                (Some((capture_elements, capture_span)), None) => {
                    mid_elements.extend(capture_elements);
                    if handler.read_length(capture_span.1, 1, false) == "\n" {
                        // The capture stops just short of a newline. If
                        // the end could close right there, stay put;
                        // otherwise skip the newline for the next round.
                        let peek = self.match_and_capture(
                            handler,
                            &data.exp_end,
                            capture_span.1,
                            Some(boundary),
                            &data.parsers_end,
                            false,
                            options.depth,
                        )?;
                        current = match peek {
                            Some((peek_span, _, _))
                                if peek_span.1 <= handler.next(capture_span.1) =>
                            {
                                capture_span.1
                            }
                            _ => handler.next(capture_span.1),
                        };
                    } else {
                        current = capture_span.1;
                    }
                }
                (None, None) => {
                    let line = handler.read_line(current);
                    if !line.trim().is_empty() {
                        log::warn!(
                            "{}{}: no patterns found in line, skipping <{}>",
                            indent(options.depth),
                            self,
                            line.escape_debug()
                        );
                    }
                    current = handler.next((current.0, handler.line_length(current.0)));
                }
            }

            if recursed {
                current = handler.next(current);
            }
            if first_run {
                // Anchored children were only valid immediately after
                // the begin match.
                patterns.retain(|parser| !parser.anchored);
                first_run = false;
            }
        }

        let (closing, end_close) = closed.unwrap_or_else(|| {
            log::warn!(
                "{}{}: end pattern not found, closing at ({}, {})",
                indent(options.depth),
                self,
                boundary.0,
                boundary.1
            );
            end_elements = Vec::new();
            (boundary, boundary)
        });

        let start = if data.between_content {
            begin_span.1
        } else {
            begin_span.0
        };
        let content = handler.read_pos(start, closing)?;
        log::info!(
            "{}{}: found <{}>",
            indent(options.depth),
            self,
            content.escape_debug()
        );

        let elements = if self.token.is_empty() {
            let mut elements = begin_elements;
            elements.extend(mid_elements);
            elements.extend(end_elements);
            elements
        } else {
            vec![Element::Block(ContentBlockElement {
                token: self.token.clone(),
                grammar: Rc::clone(&self.grammar),
                content,
                span: (start, closing),
                captures: mid_elements,
                begin: begin_elements,
                end: end_elements,
            })]
        };
        Ok(Some((elements, (begin_span.0, end_close))))
    }

    /// A begin/while region: after the begin match, each following line
    /// must open with the `while` expression for the region to go on;
    /// the pattern list tokenizes the remainder of each such line. The
    /// first line failing the guard ends the block, which is emitted
    /// like a begin/end block without an end match.
    fn parse_begin_while(
        &self,
        data: &BeginWhileData,
        handler: &ContentHandler,
        starting: Pos,
        boundary: Option<Pos>,
        options: ParseOptions,
    ) -> Result<Option<(Vec<Element>, Span)>, Error> {
        let begin = self.match_and_capture(
            handler,
            &data.exp_begin,
            starting,
            boundary,
            &data.parsers_begin,
            options.allow_leading_all,
            options.depth,
        )?;
        let (begin_span, _begin_text, begin_elements) = match begin {
            Some(begin) => begin,
            None => {
                log::debug!(
                    "{}{}: no begin match at ({}, {})",
                    indent(options.depth),
                    self,
                    starting.0,
                    starting.1
                );
                return Ok(None);
            }
        };
        log::info!("{}{}: found begin", indent(options.depth), self);

        let boundary = boundary.unwrap_or_else(|| handler.last_pos());
        let patterns = enabled(&data.patterns)?;
        let mut mid_elements: Vec<Element> = Vec::new();
        let mut closing = begin_span.1;

        let (begin_line, _) = begin_span.1;
        let mut lineno = begin_line + 1;
        while lineno <= boundary.0 && lineno < handler.line_count() {
            let line_end = if lineno == boundary.0 {
                (lineno, boundary.1.min(handler.line_length(lineno)))
            } else {
                (lineno, handler.line_length(lineno))
            };
            let guarded = self.match_and_capture(
                handler,
                &data.exp_while,
                (lineno, 0),
                Some(line_end),
                &data.parsers_while,
                false,
                options.depth,
            )?;
            let (while_span, _, while_elements) = match guarded {
                Some(guarded) => guarded,
                None => break,
            };
            mid_elements.extend(while_elements);

            let mut current = while_span.1;
            while current < line_end {
                let iteration_start = current;
                let mut matched = false;
                'phases: for &leading in &[false, true] {
                    for parser in &patterns {
                        let child_options = ParseOptions {
                            find_one: true,
                            injections: false,
                            allow_leading_all: leading,
                            depth: options.depth + 1,
                        };
                        if let Some((elements, span)) =
                            parser.parse(handler, current, Some(line_end), child_options)?
                        {
                            mid_elements.extend(elements);
                            current = span.1;
                            matched = true;
                            break 'phases;
                        }
                    }
                }
                if !matched || current == iteration_start {
                    break;
                }
            }

            closing = line_end;
            lineno += 1;
        }

        let start = if data.between_content {
            begin_span.1
        } else {
            begin_span.0
        };
        let content = handler.read_pos(start, closing)?;
        log::info!(
            "{}{}: found <{}>",
            indent(options.depth),
            self,
            content.escape_debug()
        );

        let elements = if self.token.is_empty() {
            let mut elements = begin_elements;
            elements.extend(mid_elements);
            elements
        } else {
            vec![Element::Block(ContentBlockElement {
                token: self.token.clone(),
                grammar: Rc::clone(&self.grammar),
                content,
                span: (start, closing),
                captures: mid_elements,
                begin: begin_elements,
                end: Vec::new(),
            })]
        };
        Ok(Some((elements, (begin_span.0, closing))))
    }
}

fn init_patterns(patterns: &[Rc<RawRule>]) -> Result<Vec<ChildSlot>, Error> {
    patterns
        .iter()
        .map(|rule| Parser::initialize(rule, ""))
        .collect()
}

fn push_list(slots: &RefCell<Vec<ChildSlot>>, children: &mut Vec<ParserRef>) {
    for slot in slots.borrow().iter() {
        if let ChildSlot::Parser(parser) = slot {
            children.push(Rc::clone(parser));
        }
    }
}

fn push_map(slots: &RefCell<BTreeMap<usize, ChildSlot>>, children: &mut Vec<ParserRef>) {
    for slot in slots.borrow().values() {
        if let ChildSlot::Parser(parser) = slot {
            children.push(Rc::clone(parser));
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ChildSlot, ParserKind, ParserT};
    use crate::grammar::RawRule;
    use crate::language::Language;
    use crate::parser::Parser;
    use serde_json::json;

    fn kind_of(value: serde_json::Value) -> ParserT {
        let rule = RawRule::from_value(value).unwrap();
        match Parser::initialize(&rule, "").unwrap() {
            ChildSlot::Parser(parser) => ParserT::from(&parser.kind),
            ChildSlot::Unresolved(_) => panic!("expected a parser"),
        }
    }

    fn language(value: serde_json::Value) -> Language {
        let language = Language::new(RawRule::from_value(value).unwrap()).unwrap();
        language.initialize_repository().unwrap();
        language
    }

    #[test]
    fn factory_dispatch() {
        assert_eq!(ParserT::Match, kind_of(json!({ "match": "a" })));
        assert_eq!(
            ParserT::BeginEnd,
            kind_of(json!({ "begin": "a", "end": "b" }))
        );
        assert_eq!(
            ParserT::BeginWhile,
            kind_of(json!({ "begin": "a", "while": "b" }))
        );
        assert_eq!(
            ParserT::Patterns,
            kind_of(json!({ "patterns": [ { "match": "a" } ] }))
        );
        assert_eq!(ParserT::Token, kind_of(json!({ "name": "plain" })));

        let include = RawRule::from_value(json!({ "include": "#other" })).unwrap();
        match Parser::initialize(&include, "").unwrap() {
            ChildSlot::Unresolved(name) => assert_eq!("#other", name),
            ChildSlot::Parser(_) => panic!("an include must stay unresolved"),
        }
    }

    #[test]
    fn begin_end_prefers_content_name() {
        let rule = RawRule::from_value(json!({
            "name": "outer",
            "contentName": "inner",
            "begin": "a",
            "end": "b",
        }))
        .unwrap();
        match Parser::initialize(&rule, "").unwrap() {
            ChildSlot::Parser(parser) => assert_eq!("inner", parser.token),
            ChildSlot::Unresolved(_) => panic!("expected a parser"),
        }
    }

    #[test]
    fn missing_include_is_fatal() {
        let language = Language::new(
            RawRule::from_value(json!({
                "scopeName": "source.test",
                "patterns": [ { "include": "#absent" } ],
            }))
            .unwrap(),
        )
        .unwrap();
        let error = language.initialize_repository().unwrap_err();
        assert!(error.to_string().contains("absent"));
    }

    #[test]
    fn nested_patterns_flatten_one_level() {
        let language = language(json!({
            "scopeName": "source.test",
            "patterns": [ { "include": "#group" }, { "match": "c", "name": "c" } ],
            "repository": {
                "group": { "patterns": [
                    { "match": "a", "name": "a" },
                    { "match": "b", "name": "b" },
                ] },
            },
        }));
        match &language.root().kind {
            ParserKind::Patterns(data) => assert_eq!(3, data.patterns.borrow().len()),
            _ => panic!("the root must be a patterns parser"),
        }
        let elements = language.parse_string("cab").unwrap();
        let tokens: Vec<&str> = elements.iter().map(|element| element.token()).collect();
        assert_eq!(vec!["c", "a", "b"], tokens);
    }

    #[test]
    fn no_progress_terminates_with_a_warning() {
        let language = language(json!({
            "scopeName": "source.test",
            "patterns": [ { "match": "(?=x)", "name": "peek" } ],
        }));
        let elements = language.parse_string("x").unwrap();
        assert_eq!(1, elements.len());
        assert_eq!("peek", elements[0].token());
    }

    #[test]
    fn end_wins_over_a_capture_closing_at_the_same_spot() {
        let language = language(json!({
            "scopeName": "source.test",
            "patterns": [ { "include": "#block" } ],
            "repository": {
                "block": {
                    "name": "block",
                    "begin": "\\[",
                    "end": "ab",
                    "patterns": [ { "match": "ab", "name": "inner" } ],
                },
            },
        }));
        let elements = language.parse_string("[ab").unwrap();
        assert_eq!(1, elements.len());
        assert!(elements[0].captures().is_empty());
        assert_eq!("[ab", elements[0].content());
    }

    #[test]
    fn apply_end_pattern_last_keeps_the_capture() {
        let language = language(json!({
            "scopeName": "source.test",
            "patterns": [ { "include": "#block" } ],
            "repository": {
                "block": {
                    "name": "block",
                    "begin": "\\[",
                    "end": "ab",
                    "applyEndPatternLast": 1,
                    "patterns": [ { "match": "ab", "name": "inner" } ],
                },
            },
        }));
        let elements = language.parse_string("[ab").unwrap();
        assert_eq!(1, elements.len());
        let captures = elements[0].captures();
        assert_eq!(1, captures.len());
        assert_eq!("inner", captures[0].token());
    }

    #[test]
    fn self_recursion_applies_the_end_pattern_last() {
        let language = language(json!({
            "scopeName": "source.test",
            "patterns": [ { "include": "#pair" } ],
            "repository": {
                "pair": {
                    "name": "pair",
                    "begin": "<",
                    "end": ">",
                    "patterns": [ { "include": "#pair" } ],
                },
            },
        }));
        let elements = language.parse_string("<<x> >").unwrap();
        assert_eq!(1, elements.len());
        assert_eq!("<<x> >", elements[0].content());
        let captures = elements[0].captures();
        assert_eq!(1, captures.len());
        assert_eq!("pair", captures[0].token());
        assert_eq!("<x>", captures[0].content());
    }

    #[test]
    fn anchored_children_only_fire_right_after_begin() {
        let language = language(json!({
            "scopeName": "source.test",
            "patterns": [ { "include": "#block" } ],
            "repository": {
                "block": {
                    "name": "block",
                    "begin": "a",
                    "end": "b",
                    "patterns": [
                        { "match": "\\Gx", "name": "anchored.x" },
                        { "match": "x", "name": "plain.x" },
                    ],
                },
            },
        }));
        let elements = language.parse_string("axxb").unwrap();
        let tokens: Vec<&str> = elements[0]
            .captures()
            .iter()
            .map(|element| element.token())
            .collect();
        assert_eq!(vec!["anchored.x", "plain.x"], tokens);
    }

    #[test]
    fn begin_while_consumes_guarded_lines() {
        let language = language(json!({
            "scopeName": "source.test",
            "patterns": [ { "include": "#quote" } ],
            "repository": {
                "quote": {
                    "name": "quote.block",
                    "begin": "---",
                    "while": ">",
                    "whileCaptures": { "0": { "name": "punctuation.quote" } },
                    "patterns": [ { "match": "[a-z]+", "name": "word" } ],
                },
            },
        }));
        let elements = language.parse_string("---\n> alpha\n> beta\nrest").unwrap();
        let block = &elements[0];
        assert_eq!("quote.block", block.token());
        assert_eq!("---\n> alpha\n> beta\n", block.content());
        let tokens: Vec<&str> = block
            .captures()
            .iter()
            .map(|element| element.token())
            .collect();
        assert_eq!(
            vec!["punctuation.quote", "word", "punctuation.quote", "word"],
            tokens
        );
    }

    #[test]
    fn initialization_is_idempotent() {
        let language = language(json!({
            "scopeName": "source.test",
            "patterns": [ { "include": "#word" } ],
            "repository": {
                "word": { "match": "\\w+", "name": "word" },
            },
        }));
        let first = language.parse_string("one two").unwrap();
        language.initialize_repository().unwrap();
        let second = language.parse_string("one two").unwrap();
        assert_eq!(
            first.iter().map(|e| e.to_dict(true)).collect::<Vec<_>>(),
            second.iter().map(|e| e.to_dict(true)).collect::<Vec<_>>(),
        );
    }
}
