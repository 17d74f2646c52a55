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

//! The language root: a patterns parser over the grammar's top-level
//! rules, the named repository, and the ordered injection list.

use std::collections::HashMap;
use std::rc::Rc;

use handler::ContentHandler;

use crate::elements::Element;
use crate::errors::Error;
use crate::grammar::RawRule;
use crate::parser::{ChildSlot, ParseOptions, Parser, ParserRef, Resolver};

pub struct Language {
    name: String,
    scope: String,
    root: ParserRef,
    repository: HashMap<String, ParserRef>,
}

impl Language {
    /// Builds the parser tree for a grammar. Includes stay unresolved
    /// until [`Language::initialize_repository`] runs.
    pub fn new(grammar: Rc<RawRule>) -> Result<Language, Error> {
        let root = match Parser::initialize(&grammar, "")? {
            ChildSlot::Parser(parser) => parser,
            ChildSlot::Unresolved(name) => return Err(Error::IncludedParserNotFound(name)),
        };

        let mut repository = HashMap::new();
        let mut aliases: Vec<(String, String)> = Vec::new();
        for (key, rule) in &grammar.repository {
            match Parser::initialize(rule, key)? {
                ChildSlot::Parser(parser) => {
                    repository.insert(key.clone(), parser);
                }
                ChildSlot::Unresolved(target) => aliases.push((key.clone(), target)),
            }
        }
        // A repository entry may be a bare include of another entry;
        // chains of those must land on a real parser eventually.
        while !aliases.is_empty() {
            let before = aliases.len();
            aliases.retain(|(key, target)| {
                let resolved = if target == "$self" || target == "$base" {
                    Some(Rc::clone(&root))
                } else {
                    target
                        .strip_prefix('#')
                        .and_then(|name| repository.get(name).cloned())
                };
                match resolved {
                    Some(parser) => {
                        repository.insert(key.clone(), parser);
                        false
                    }
                    None => true,
                }
            });
            if aliases.len() == before {
                return Err(Error::IncludedParserNotFound(aliases.remove(0).1));
            }
        }

        let injected = grammar
            .injections
            .iter()
            .map(|rule| Parser::initialize(rule, ""))
            .collect::<Result<Vec<ChildSlot>, Error>>()?;
        *root.injected_patterns.borrow_mut() = injected;

        Ok(Language {
            name: grammar.name.clone().unwrap_or_default(),
            scope: grammar.scope_name.clone().unwrap_or_default(),
            root,
            repository,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The grammar-level scope, e.g. `source.matlab`.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn root(&self) -> &ParserRef {
        &self.root
    }

    pub fn repository(&self) -> &HashMap<String, ParserRef> {
        &self.repository
    }

    /// Resolves every include in the parser tree against the
    /// repository. Must run once before parsing; further calls are
    /// no-ops.
    pub fn initialize_repository(&self) -> Result<(), Error> {
        let resolver = Resolver {
            root: &self.root,
            repository: &self.repository,
        };
        self.root.initialize_repository(&resolver)?;
        for parser in self.repository.values() {
            parser.initialize_repository(&resolver)?;
        }
        Ok(())
    }

    /// Tokenizes the whole buffer with the root patterns plus the
    /// injected ones.
    pub fn parse(&self, handler: &ContentHandler) -> Result<Vec<Element>, Error> {
        let options = ParseOptions {
            find_one: false,
            injections: true,
            allow_leading_all: false,
            depth: 0,
        };
        match self.root.parse(handler, (0, 0), None, options)? {
            Some((elements, _span)) => Ok(elements),
            None => Ok(Vec::new()),
        }
    }

    pub fn parse_string(&self, content: &str) -> Result<Vec<Element>, Error> {
        self.parse(&ContentHandler::new(content))
    }
}
