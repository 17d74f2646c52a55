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

//! The tokenized output tree.

use std::rc::Rc;

use handler::Span;
use serde_json::{Map, Value};

use crate::grammar::RawRule;

/// A node of the output tree. Plain elements come from token and match
/// parsers; block elements add the begin and end child lists of a
/// begin/end (or begin/while) region. Immutable once constructed.
#[derive(Debug, Clone)]
pub enum Element {
    Content(ContentElement),
    Block(ContentBlockElement),
}

#[derive(Debug, Clone)]
pub struct ContentElement {
    /// Scope name; may be empty, in which case the element is a bare
    /// span of text (a token parser without a name still emits one).
    pub token: String,
    /// The grammar node this element was produced from.
    pub grammar: Rc<RawRule>,
    /// Verbatim text between `span.0` and `span.1`.
    pub content: String,
    pub span: Span,
    pub captures: Vec<Element>,
}

#[derive(Debug, Clone)]
pub struct ContentBlockElement {
    pub token: String,
    pub grammar: Rc<RawRule>,
    pub content: String,
    pub span: Span,
    pub captures: Vec<Element>,
    /// Elements resolved from the begin match's capture groups.
    pub begin: Vec<Element>,
    /// Elements resolved from the end match's capture groups.
    pub end: Vec<Element>,
}

impl Element {
    pub fn token(&self) -> &str {
        match self {
            Element::Content(element) => &element.token,
            Element::Block(element) => &element.token,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Element::Content(element) => &element.content,
            Element::Block(element) => &element.content,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Element::Content(element) => element.span,
            Element::Block(element) => element.span,
        }
    }

    pub fn captures(&self) -> &[Element] {
        match self {
            Element::Content(element) => &element.captures,
            Element::Block(element) => &element.captures,
        }
    }

    /// Dictionary form with the stable key order
    /// `token, begin, end, content, captures`; empty fields are left
    /// out. `content` can be suppressed wholesale by the caller; a
    /// block that carries captures drops it on its own, since the
    /// captures already cover the span.
    pub fn to_dict(&self, content: bool) -> Value {
        let mut dict = Map::new();
        dict.insert("token".to_string(), Value::from(self.token()));
        if let Element::Block(block) = self {
            if !block.begin.is_empty() {
                dict.insert("begin".to_string(), list_to_dict(&block.begin, content));
            }
            if !block.end.is_empty() {
                dict.insert("end".to_string(), list_to_dict(&block.end, content));
            }
        }
        let suppress = match self {
            Element::Block(block) => !block.captures.is_empty(),
            Element::Content(_) => false,
        };
        if content && !suppress && !self.content().is_empty() {
            dict.insert("content".to_string(), Value::from(self.content()));
        }
        if !self.captures().is_empty() {
            dict.insert(
                "captures".to_string(),
                list_to_dict(self.captures(), content),
            );
        }
        Value::Object(dict)
    }
}

fn list_to_dict(elements: &[Element], content: bool) -> Value {
    Value::Array(
        elements
            .iter()
            .map(|element| element.to_dict(content))
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use super::{ContentBlockElement, ContentElement, Element};
    use crate::grammar::RawRule;
    use serde_json::json;
    use std::rc::Rc;

    fn leaf(token: &str, content: &str) -> Element {
        Element::Content(ContentElement {
            token: token.to_string(),
            grammar: Rc::new(RawRule::default()),
            content: content.to_string(),
            span: ((0, 0), (0, content.len())),
            captures: vec![],
        })
    }

    #[test]
    fn dict_key_order_is_stable() {
        let element = Element::Block(ContentBlockElement {
            token: "outer".to_string(),
            grammar: Rc::new(RawRule::default()),
            content: "(x)".to_string(),
            span: ((0, 0), (0, 3)),
            captures: vec![],
            begin: vec![leaf("punct.begin", "(")],
            end: vec![leaf("punct.end", ")")],
        });
        assert_eq!(
            json!({
                "token": "outer",
                "begin": [{ "token": "punct.begin", "content": "(" }],
                "end": [{ "token": "punct.end", "content": ")" }],
                "content": "(x)",
            }),
            element.to_dict(true)
        );
        let dict = element.to_dict(true);
        let keys: Vec<String> = dict.as_object().unwrap().keys().cloned().collect();
        assert_eq!(vec!["token", "begin", "end", "content"], keys);
    }

    #[test]
    fn block_with_captures_omits_content() {
        let element = Element::Block(ContentBlockElement {
            token: "outer".to_string(),
            grammar: Rc::new(RawRule::default()),
            content: "a b".to_string(),
            span: ((0, 0), (0, 3)),
            captures: vec![leaf("word", "a"), leaf("word", "b")],
            begin: vec![],
            end: vec![],
        });
        let dict = element.to_dict(true);
        assert!(dict.get("content").is_none());
        assert_eq!(2, dict["captures"].as_array().unwrap().len());
    }

    #[test]
    fn plain_element_keeps_content_next_to_captures() {
        let element = Element::Content(ContentElement {
            token: "name".to_string(),
            grammar: Rc::new(RawRule::default()),
            content: "ab".to_string(),
            span: ((0, 0), (0, 2)),
            captures: vec![leaf("", "ab")],
        });
        assert_eq!(
            json!({
                "token": "name",
                "content": "ab",
                "captures": [{ "token": "", "content": "ab" }],
            }),
            element.to_dict(true)
        );
    }

    #[test]
    fn content_can_be_disabled() {
        let element = leaf("word", "a");
        assert_eq!(json!({ "token": "word" }), element.to_dict(false));
    }
}
