//! OpenSCAD customizer parameters
//!
//! Reads top-level `name = literal;` assignments that appear before the first
//! module or function definition, the same subset the OpenSCAD customizer
//! exposes. Recognized annotations:
//!
//! - `/* [Group] */` starts a parameter group; `[Hidden]` hides what follows
//! - a `//` comment on the line above an assignment is its description
//! - a trailing `// [min:max]`, `// [min:step:max]`, `// [max]` or `// [a, b, c]`
//!   constrains the value

use regex::Regex;
use serde_json::{Map, Number, Value, json};
use tracing::debug;

use crate::domain::{ExtractedParameters, Parameters};

/// Compiled patterns for one parse
struct Patterns {
    group: Regex,
    assignment: Regex,
    definition: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            group: Regex::new(r"^/\*\s*\[([^\]]+)\]\s*\*/$")?,
            assignment: Regex::new(r"^([A-Za-z_$][A-Za-z0-9_]*)\s*=\s*(.+?)\s*;\s*(?://\s*(.*))?$")?,
            definition: Regex::new(r"^(module|function)\s+[A-Za-z_]")?,
        })
    }
}

/// Extract customizer defaults and their schema from OpenSCAD source
pub fn extract_customizer(source: &str) -> Result<ExtractedParameters, regex::Error> {
    debug!(bytes = source.len(), "extract_customizer: called");
    let patterns = Patterns::compile()?;

    let mut defaults = Parameters::new();
    let mut properties = Map::new();
    let mut group: Option<String> = None;
    let mut hidden = false;
    let mut description: Option<String> = None;
    let mut depth: i32 = 0;
    let mut in_block_comment = false;

    for raw in source.lines() {
        let line = raw.trim();

        if in_block_comment {
            if line.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }

        if depth == 0 {
            if let Some(caps) = patterns.group.captures(line) {
                let name = caps[1].trim().to_string();
                hidden = name.eq_ignore_ascii_case("hidden");
                group = Some(name);
                description = None;
                continue;
            }

            if patterns.definition.is_match(line) {
                debug!("extract_customizer: reached first definition");
                break;
            }

            if let Some(text) = line.strip_prefix("//") {
                description = Some(text.trim().to_string());
                continue;
            }

            if let Some(caps) = patterns.assignment.captures(line) {
                let name = caps[1].to_string();
                if let Some(value) = parse_literal(&caps[2])
                    && !hidden
                {
                    let mut property = schema_for(&value);
                    if let Some(text) = description.take().filter(|d| !d.is_empty()) {
                        property.insert("description".to_string(), Value::String(text));
                    }
                    if let Some(group) = &group {
                        property.insert("x-group".to_string(), Value::String(group.clone()));
                    }
                    if let Some(hint) = caps.get(3) {
                        apply_hint(&mut property, &value, hint.as_str());
                    }
                    property.insert("default".to_string(), value.clone());

                    // Later assignments override earlier ones, as in OpenSCAD
                    defaults.insert(name.clone(), value);
                    properties.insert(name, Value::Object(property));
                }
                description = None;
                continue;
            }
        }

        if line.starts_with("/*") && !line.contains("*/") {
            in_block_comment = true;
            continue;
        }

        description = None;
        depth += brace_delta(line);
        if depth < 0 {
            depth = 0;
        }
    }

    debug!(count = defaults.len(), "extract_customizer: done");
    Ok(ExtractedParameters {
        default_parameters: defaults,
        json_schema: json!({"type": "object", "properties": properties}),
    })
}

/// Net `{`/`}` balance of a line, ignoring strings and line comments
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0;
    let mut in_string = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if in_string => {
                chars.next();
            }
            '"' => in_string = !in_string,
            '/' if !in_string && chars.peek() == Some(&'/') => break,
            '{' if !in_string => delta += 1,
            '}' if !in_string => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Parse a literal right-hand side; expressions yield `None`
fn parse_literal(text: &str) -> Option<Value> {
    let text = text.trim();
    match text {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => {}
    }

    if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        if inner.contains('"') && !inner.contains("\\\"") {
            return None;
        }
        return Some(Value::String(unescape(inner)));
    }

    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        if inner.contains(':') {
            // Ranges are not customizable values
            return None;
        }
        let items: Option<Vec<Value>> = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_number)
            .collect();
        return items.map(Value::Array);
    }

    parse_number(text)
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn schema_for(value: &Value) -> Map<String, Value> {
    let mut property = Map::new();
    let kind = match value {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => {
            property.insert("items".to_string(), json!({"type": "number"}));
            "array"
        }
        _ => "null",
    };
    property.insert("type".to_string(), Value::String(kind.to_string()));
    property
}

/// Apply a trailing `// [...]` constraint to a property
fn apply_hint(property: &mut Map<String, Value>, value: &Value, comment: &str) {
    let Some(inner) = comment
        .trim()
        .strip_prefix('[')
        .and_then(|c| c.split_once(']'))
        .map(|(inner, _)| inner.trim())
    else {
        return;
    };

    if inner.contains(',') {
        // Options; `value:label` pairs keep the value
        let options: Vec<Value> = inner
            .split(',')
            .map(|option| option.split(':').next().unwrap_or(option).trim())
            .filter(|option| !option.is_empty())
            .map(|option| match value {
                Value::Number(_) => parse_number(option).unwrap_or_else(|| Value::String(option.to_string())),
                _ => Value::String(option.trim_matches('"').to_string()),
            })
            .collect();
        property.insert("enum".to_string(), Value::Array(options));
        return;
    }

    if !value.is_number() {
        if value.is_string()
            && let Ok(max_length) = inner.parse::<u64>()
        {
            property.insert("maxLength".to_string(), Value::Number(max_length.into()));
        }
        return;
    }

    let bounds: Vec<Value> = inner.split(':').filter_map(|b| parse_number(b.trim())).collect();
    match bounds.as_slice() {
        [max] => {
            property.insert("maximum".to_string(), max.clone());
        }
        [min, max] => {
            property.insert("minimum".to_string(), min.clone());
            property.insert("maximum".to_string(), max.clone());
        }
        [min, step, max] => {
            property.insert("minimum".to_string(), min.clone());
            property.insert("multipleOf".to_string(), step.clone());
            property.insert("maximum".to_string(), max.clone());
        }
        _ => {}
    }
}

/// Render a JSON parameter value as an OpenSCAD literal for `-D`
pub fn to_scad_literal(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))),
        Value::Array(items) => {
            let rendered: Option<Vec<String>> = items.iter().map(to_scad_literal).collect();
            rendered.map(|items| format!("[{}]", items.join(", ")))
        }
        Value::Null => Some("undef".to_string()),
        Value::Object(_) => None,
    }
}
