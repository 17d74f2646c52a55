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

//! The raw, declarative form of a grammar.
//!
//! A grammar file is a nested mapping; every node, the root included,
//! shares one shape. Which keys are present decides what kind of parser
//! the node becomes (see `parser::Parser::initialize`).

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::{Deserialize, Deserializer};

/// One node of a grammar, deserialized as-is.
///
/// Capture maps (`captures`, `beginCaptures`, `endCaptures`,
/// `whileCaptures`) are keyed by the stringified group index. The
/// `repository` and `injections` keys are only meaningful on the root.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub comment: Option<String>,
    #[serde(deserialize_with = "flag")]
    pub disabled: bool,
    pub include: Option<String>,
    #[serde(rename = "match")]
    pub match_: Option<String>,
    pub begin: Option<String>,
    pub end: Option<String>,
    #[serde(rename = "while")]
    pub while_: Option<String>,
    #[serde(deserialize_with = "flag")]
    pub apply_end_pattern_last: bool,
    pub captures: BTreeMap<String, Rc<RawRule>>,
    pub begin_captures: BTreeMap<String, Rc<RawRule>>,
    pub end_captures: BTreeMap<String, Rc<RawRule>>,
    pub while_captures: BTreeMap<String, Rc<RawRule>>,
    pub patterns: Vec<Rc<RawRule>>,
    pub repository: HashMap<String, Rc<RawRule>>,
    pub injections: Vec<Rc<RawRule>>,
    pub scope_name: Option<String>,
}

impl RawRule {
    pub fn from_json(text: &str) -> Result<Rc<RawRule>, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Rc<RawRule>, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Grammars in the wild spell their flags both as booleans and as 0/1.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(u64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
    })
}
