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

//! Bundled grammar data.
//!
//! A compact MATLAB subset: property validator definitions, imports,
//! single-quoted strings, line comments, numbers and plain read/write
//! identifiers. Grammar data is exactly that, data; the engine knows
//! nothing about MATLAB.

use std::rc::Rc;

use serde_json::{json, Value};

use crate::grammar::RawRule;

lazy_static! {
    static ref MATLAB_GRAMMAR: Value = json!({
        "name": "MATLAB",
        "scopeName": "source.matlab",
        "patterns": [
            { "include": "#comment" },
            { "include": "#import" },
            { "include": "#string" },
            { "include": "#readwrite_operations" },
            { "include": "#number" },
        ],
        "repository": {
            "comment": {
                "name": "comment.line.percentage.matlab",
                "match": "%[^\\n]*",
            },
            "number": {
                "name": "constant.numeric.decimal.matlab",
                "match": "\\d+(\\.\\d+)?",
            },
            "string": {
                "name": "string.quoted.single.matlab",
                "begin": "'",
                "end": "'",
                "beginCaptures": {
                    "0": { "name": "punctuation.definition.string.begin.matlab" },
                },
                "endCaptures": {
                    "0": { "name": "punctuation.definition.string.end.matlab" },
                },
            },
            // A dotted identifier path being read from or written to. A
            // segment followed by a parenthesis is a call, not part of
            // the operand.
            "readwrite_operations": {
                "name": "readwrite_operations",
                "match": "([a-zA-Z][a-zA-Z0-9_]*(?:\\.[a-zA-Z][a-zA-Z0-9_]*(?![a-zA-Z0-9_(]))*)",
                "captures": {
                    "1": { "patterns": [ { "include": "#readwrite_variable" } ] },
                },
            },
            "readwrite_variable": {
                "comment": "variable, property, or field path",
            },
            "import": {
                "name": "meta.import.matlab",
                "begin": "\\b(import)\\b[ \\t]*",
                "beginCaptures": {
                    "1": { "name": "keyword.other.import.matlab" },
                },
                "end": "(?=\\n|;|%)",
                "patterns": [ { "include": "#namespace" } ],
            },
            "namespace": {
                "name": "entity.name.namespace.matlab",
                "match": "((?:[a-zA-Z][a-zA-Z0-9_]*)(?:\\.[a-zA-Z][a-zA-Z0-9_]*)*(?:\\.\\*)?)",
                "captures": {
                    "1": { "patterns": [
                        { "name": "entity.name.module.matlab", "match": "[a-zA-Z][a-zA-Z0-9_]*" },
                        { "name": "punctuation.separator.matlab", "match": "\\." },
                        { "name": "variable.language.wildcard.matlab", "match": "\\*" },
                    ] },
                },
            },
            // One `argument (dims) type {validators} = default;` style
            // property definition, terminated by the assignment, the
            // semicolon, the line end or a trailing comment.
            "validators": {
                "name": "meta.assignment.definition.property.matlab",
                "begin": "\\s*([a-zA-Z][a-zA-Z0-9_]*)[ \\t]*",
                "beginCaptures": {
                    "1": { "name": "variable.object.property.matlab" },
                },
                "end": "(=)|(;)|(?=\\n|%)",
                "endCaptures": {
                    "1": { "name": "keyword.operator.assignment.matlab" },
                    "2": { "name": "punctuation.terminator.semicolon.matlab" },
                },
                "patterns": [
                    { "name": "punctuation.section.parens.begin.matlab", "match": "\\(" },
                    { "include": "#size" },
                    { "name": "punctuation.section.parens.end.matlab", "match": "\\)" },
                    { "include": "#validation_block" },
                    {
                        "name": "storage.type.matlab",
                        "match": "\\b(?:double|single|logical|char|string|cell|struct|table|datetime|int8|uint8|int16|uint16|int32|uint32|int64|uint64)\\b",
                    },
                ],
            },
            "size": {
                "contentName": "meta.parens.size.matlab",
                "begin": "(?<=\\()",
                "end": "(?=\\))",
                "patterns": [
                    { "name": "constant.numeric.decimal.matlab", "match": "\\d+" },
                    { "name": "punctuation.separator.comma.matlab", "match": "," },
                    { "name": "keyword.operator.vector.colon.matlab", "match": ":" },
                ],
            },
            "validation_block": {
                "contentName": "meta.block.validation.matlab",
                "begin": "\\{",
                "end": "\\}",
                "beginCaptures": {
                    "0": { "name": "punctuation.section.block.begin.matlab" },
                },
                "endCaptures": {
                    "0": { "name": "punctuation.section.block.end.matlab" },
                },
                "patterns": [
                    { "include": "#validation_block" },
                    { "include": "#string" },
                ],
            },
        },
    });
}

/// The bundled MATLAB subset grammar.
pub fn matlab() -> Result<Rc<RawRule>, serde_json::Error> {
    RawRule::from_value(MATLAB_GRAMMAR.clone())
}

#[cfg(test)]
mod test {
    use super::matlab;

    #[test]
    fn grammar_deserializes() {
        let grammar = matlab().unwrap();
        assert_eq!(Some("source.matlab".to_string()), grammar.scope_name);
        assert_eq!(5, grammar.patterns.len());
        assert!(grammar.repository.contains_key("validators"));
    }
}
