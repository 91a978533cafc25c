// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Decoding raw model replies into structured values.
//!
//! The encoding is sniffed from the start of the reply, first match wins:
//!
//! 1. ```` ```yaml ```` fence: YAML
//! 2. ```` ```markdown ```` fence: the fenced Markdown text
//! 3. ```` ```diff ```` fence: the fenced unified diff
//! 4. ```` ```xml ```` fence, or a reply shaped `<...>`: XML
//! 5. ```` ```json ```` fence, or a reply starting with `{`: JSON
//! 6. anything else: the trimmed text, unchanged
//!
//! Every decoder produces a [`serde_json::Value`], so callers can turn it into
//! their own types with [`ResponseDecoder::parse_as`].
//!
//! XML has no notion of lists, so a single `<item>` would otherwise decode to
//! a scalar. Callers declare list-valued tags in [`DecodeOptions::array_tags`].

use crate::utils::error::ForgeError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

const TEXT_KEY: &str = "#text";
const ATTRIBUTE_PREFIX: &str = "@_";

static FENCE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```[ \t]*$").expect("fence pattern is invalid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Yaml,
    Markdown,
    Diff,
    Xml,
    Json,
    Text,
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseFormat::Yaml => "yaml",
            ResponseFormat::Markdown => "markdown",
            ResponseFormat::Diff => "diff",
            ResponseFormat::Xml => "xml",
            ResponseFormat::Json => "json",
            ResponseFormat::Text => "text",
        };
        f.write_str(name)
    }
}

/// Options for XML decoding. Other formats ignore them.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Tags that always decode to arrays. Entries match either a bare tag
    /// name (`item`) or a dotted path from the document root
    /// (`result.items.item`).
    pub array_tags: HashSet<String>,
    /// Drop attributes. When false they appear as `@_name` keys.
    pub ignore_attributes: bool,
    /// Turn numeric and boolean text into numbers and booleans.
    pub parse_tag_values: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            array_tags: HashSet::new(),
            ignore_attributes: true,
            parse_tag_values: true,
        }
    }
}

impl DecodeOptions {
    pub fn with_array_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.array_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn keep_attributes(mut self) -> Self {
        self.ignore_attributes = false;
        self
    }

    fn is_array(&self, name: &str, path: &str) -> bool {
        self.array_tags.contains(name) || self.array_tags.contains(path)
    }
}

/// A decoded reply and the encoding it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub format: ResponseFormat,
    pub value: Value,
}

/// Sniff the encoding of a raw reply.
pub fn detect_format(raw: &str) -> ResponseFormat {
    let text = raw.trim();
    if text.starts_with("```yaml") {
        ResponseFormat::Yaml
    } else if text.starts_with("```markdown") {
        ResponseFormat::Markdown
    } else if text.starts_with("```diff") {
        ResponseFormat::Diff
    } else if text.starts_with("```xml") || (text.starts_with('<') && text.ends_with('>')) {
        ResponseFormat::Xml
    } else if text.starts_with("```json") || text.starts_with('{') {
        ResponseFormat::Json
    } else {
        ResponseFormat::Text
    }
}

/// Body of a fenced block that opens with ```` ```lang ````. The closing fence
/// must start a line, so indented fences inside YAML block scalars survive.
/// An unterminated fence (a truncated reply) yields everything after the
/// opening line.
fn fenced_body<'a>(text: &'a str, lang: &str) -> &'a str {
    let Some(rest) = text.strip_prefix("```").and_then(|t| t.strip_prefix(lang)) else {
        return text;
    };
    match FENCE_CLOSE.find(rest) {
        Some(close) => rest.get(..close.start()).unwrap_or(rest).trim(),
        None => rest.trim_end_matches('`').trim(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseDecoder;

impl ResponseDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `raw` according to its detected encoding.
    ///
    /// # Errors
    ///
    /// A `ParseError` when the reply looks like YAML, XML or JSON but is not
    /// valid. Plain text never fails.
    pub fn parse(&self, raw: &str, options: &DecodeOptions) -> Result<Decoded, ForgeError> {
        let text = raw.trim();
        let format = detect_format(text);

        let value = match format {
            ResponseFormat::Yaml => {
                let body = fenced_body(text, "yaml");
                serde_yaml::from_str::<Value>(body)?
            }
            ResponseFormat::Markdown => Value::String(fenced_body(text, "markdown").to_string()),
            ResponseFormat::Diff => Value::String(fenced_body(text, "diff").to_string()),
            ResponseFormat::Xml => {
                let body = if text.starts_with("```xml") {
                    fenced_body(text, "xml")
                } else {
                    text
                };
                parse_xml(body, options)?
            }
            ResponseFormat::Json => {
                let body = if text.starts_with("```json") {
                    fenced_body(text, "json")
                } else {
                    text
                };
                serde_json::from_str::<Value>(body)?
            }
            ResponseFormat::Text => Value::String(text.to_string()),
        };

        tracing::trace!(%format, "Decoded response");
        Ok(Decoded { format, value })
    }

    /// Decode `raw` and deserialize the result into `T`.
    pub fn parse_as<T: DeserializeOwned>(
        &self,
        raw: &str,
        options: &DecodeOptions,
    ) -> Result<T, ForgeError> {
        let decoded = self.parse(raw, options)?;
        serde_json::from_value(decoded.value).map_err(|e| {
            ForgeError::parse(
                format!("Decoded {} response has an unexpected shape", decoded.format),
                Some(Box::new(e)),
            )
        })
    }
}

struct Element {
    name: String,
    path: String,
    children: Map<String, Value>,
    text: String,
}

impl Element {
    fn open(
        start: &BytesStart<'_>,
        parent_path: Option<&str>,
        options: &DecodeOptions,
    ) -> Result<Self, ForgeError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let path = match parent_path {
            Some(parent) => format!("{}.{}", parent, name),
            None => name.clone(),
        };

        let mut children = Map::new();
        if !options.ignore_attributes {
            for attr in start.attributes() {
                let attr = attr.map_err(|e| {
                    ForgeError::parse("Failed to read XML attribute", Some(Box::new(e)))
                })?;
                let key = format!(
                    "{}{}",
                    ATTRIBUTE_PREFIX,
                    String::from_utf8_lossy(attr.key.as_ref())
                );
                let raw = attr.unescape_value().map_err(|e| {
                    ForgeError::parse("Failed to read XML attribute value", Some(Box::new(e)))
                })?;
                children.insert(key, scalar(raw.trim(), options));
            }
        }

        Ok(Self {
            name,
            path,
            children,
            text: String::new(),
        })
    }

    fn close(self, options: &DecodeOptions) -> (String, String, Value) {
        let text = self.text.trim();
        let value = if self.children.is_empty() {
            scalar(text, options)
        } else {
            let mut children = self.children;
            if !text.is_empty() {
                children.insert(TEXT_KEY.to_string(), scalar(text, options));
            }
            Value::Object(children)
        };
        (self.name, self.path, value)
    }
}

fn scalar(text: &str, options: &DecodeOptions) -> Value {
    if !options.parse_tag_values {
        return Value::String(text.to_string());
    }
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    let digits = text.strip_prefix('-').unwrap_or(text);
    let numeric_shape = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && !digits.starts_with('.')
        && !digits.ends_with('.')
        && !(digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0."));

    if numeric_shape {
        if let Ok(n) = text.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

fn insert_child(
    parent: &mut Map<String, Value>,
    name: String,
    path: &str,
    value: Value,
    options: &DecodeOptions,
) {
    match parent.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None if options.is_array(&name, path) => {
            parent.insert(name, Value::Array(vec![value]));
        }
        None => {
            parent.insert(name, value);
        }
    }
}

fn resolve_reference(name: &str) -> Option<String> {
    if let Some(code) = name.strip_prefix('#') {
        let parsed = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        return parsed.and_then(char::from_u32).map(String::from);
    }
    quick_xml::escape::resolve_predefined_entity(name).map(str::to_string)
}

fn parse_xml(content: &str, options: &DecodeOptions) -> Result<Value, ForgeError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut root = Map::new();
    let mut stack: Vec<Element> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let element = Element::open(&e, stack.last().map(|p| p.path.as_str()), options)?;
                stack.push(element);
            }
            Ok(Event::Empty(e)) => {
                let element = Element::open(&e, stack.last().map(|p| p.path.as_str()), options)?;
                let (name, path, value) = element.close(options);
                let parent = stack.last_mut().map_or(&mut root, |p| &mut p.children);
                insert_child(parent, name, &path, value, options);
            }
            Ok(Event::End(_)) => {
                let Some(element) = stack.pop() else {
                    return Err(ForgeError::parse("Unexpected closing tag in XML response", None));
                };
                let (name, path, value) = element.close(options);
                let parent = stack.last_mut().map_or(&mut root, |p| &mut p.children);
                insert_child(parent, name, &path, value, options);
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(current) = stack.last_mut() {
                    let name = String::from_utf8_lossy(&e).into_owned();
                    match resolve_reference(&name) {
                        Some(resolved) => current.text.push_str(&resolved),
                        None => {
                            current.text.push('&');
                            current.text.push_str(&name);
                            current.text.push(';');
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ForgeError::parse(
                    "Failed to parse XML response",
                    Some(Box::new(e)),
                ));
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(ForgeError::parse(
            format!("Unclosed <{}> element in XML response", open.name),
            None,
        ));
    }

    Ok(Value::Object(root))
}
