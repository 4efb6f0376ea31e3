//! Turns raw transformer output into a body-replacement directive.
//!
//! The transformer talks back only through markers in its output:
//!
//! ```text
//! @BODY { name: "value", other: "value" }          request phase
//! @RESPONSE { "name": "value", count: 2 }          response phase
//! ```
//!
//! Everything here is total. Missing markers, unbalanced braces and broken
//! JSON all end up as [`Directive::NoDirective`].

use std::fmt;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use log::debug;

pub const REQUEST_MARKER: &str = "@BODY";
pub const RESPONSE_MARKER: &str = "@RESPONSE";

lazy_static! {
    static ref PAIR_PATTERN: Regex = Regex::new(r#""?([A-Za-z0-9_]+)"?\s*:\s*"([^"]*)""#)
        .expect("Cannot compile key-value pattern");
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Request,
    Response
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Request => "request",
            Phase::Response => "response"
        }
    }

    fn marker(&self) -> &'static str {
        match self {
            Phase::Request => REQUEST_MARKER,
            Phase::Response => RESPONSE_MARKER
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    NoDirective,
    ReplaceBody(Map<String, Value>)
}

impl Directive {
    /// Serialized replacement body, `None` when the body must stay untouched
    pub fn replacement_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Directive::NoDirective => None,
            Directive::ReplaceBody(map) => serde_json::to_vec(map).ok()
        }
    }
}

// ---------------------------------------------------------------------------------------------- //

pub fn extract(output: &str, phase: Phase) -> Directive {
    let block = match balanced_block_after(output, phase.marker()) {
        Some(block) => block,
        None => {
            debug!("No complete {} block in transformer output", phase.marker());
            return Directive::NoDirective;
        }
    };

    return match phase {
        Phase::Request => Directive::ReplaceBody(extract_pairs(block)),
        Phase::Response => {
            let repaired = repair_json(block);
            match serde_json::from_str::<Value>(&repaired) {
                Ok(Value::Object(map)) => Directive::ReplaceBody(map),
                Ok(_) => {
                    debug!("{} block is not a JSON object", RESPONSE_MARKER);
                    Directive::NoDirective
                },
                Err(err) => {
                    debug!("{} block is not valid JSON after repair: {}", RESPONSE_MARKER, err);
                    Directive::NoDirective
                }
            }
        }
    };
}

/// Finds the first `marker` that is followed by a `{ ... }` block (whitespace allowed in
/// between) and returns that block, ending at the brace that really closes it. Bare
/// mentions of the marker are skipped. Braces inside double-quoted strings do not count.
pub(crate) fn balanced_block_after<'a>(input: &'a str, marker: &str) -> Option<&'a str> {
    let start = input
        .match_indices(marker)
        .map(|(pos, _)| pos + marker.len())
        .find_map(|after_marker| {
            let rest = &input[after_marker..];
            let open = rest.len() - rest.trim_start().len();
            rest[open..].starts_with('{').then(|| after_marker + open)
        })?;

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in input[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            }
            else if c == '\\' {
                escaped = true;
            }
            else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..=start + i]);
                }
            },
            _ => {}
        }
    }

    None
}

fn extract_pairs(block: &str) -> Map<String, Value> {
    let mut result = Map::new();
    for cap in PAIR_PATTERN.captures_iter(block) {
        result.insert(cap[1].to_string(), Value::String(cap[2].to_string()));
    }

    result
}

/// Best-effort repair of a JavaScript-ish object literal into JSON: bare identifiers
/// followed by `:` get quoted and trailing commas before `}`/`]` are dropped.
/// String literals are copied through untouched.
pub(crate) fn repair_json(block: &str) -> String {
    let chars: Vec<char> = block.chars().collect();
    let mut out = String::with_capacity(block.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' {
            out.push(c);
            i += 1;
            while i < chars.len() {
                out.push(chars[i]);
                if chars[i] == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                i += 1;
                if chars[i - 1] == '"' {
                    break;
                }
            }
            continue;
        }

        if c.is_ascii_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();

            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }

            if j < chars.len() && chars[j] == ':' {
                out.push('"');
                out.push_str(&ident);
                out.push('"');
            }
            else {
                out.push_str(&ident);
            }
            continue;
        }

        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    out.trim().to_string()
}

// ---------------------------------------------------------------------------------------------- //
