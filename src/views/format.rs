//! Template filters for query result cells and stored preferences.

use std::collections::HashMap;

use tera::{escape_html, Value};

const DATE: [u64; 1] = [1082];
const TIME: [u64; 1] = [1083];
const TIMESTAMP: [u64; 2] = [1114, 1184];
// float4, float8, money, numeric
const NUMERIC: [u64; 4] = [700, 701, 790, 1700];

/// `{{ row | cell(field=field) }}`: markup for one result cell.
pub fn cell(row: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let field = args
        .get("field")
        .ok_or_else(|| tera::Error::msg("cell filter requires a `field` argument"))?;
    let name = field.get("name").and_then(Value::as_str).unwrap_or("");
    let type_id = field.get("dataTypeID").and_then(Value::as_u64).unwrap_or(0);

    let html = match row.get(name) {
        None => r#"<span title="undefined">∅</span>"#.to_string(),
        Some(value) => format_value(name, type_id, value),
    };
    Ok(Value::String(html))
}

fn format_value(name: &str, type_id: u64, value: &Value) -> String {
    match value {
        Value::Null => r#"<span title="null">␀</span>"#.to_string(),
        Value::String(s) if name == "datname" => {
            let s = escape_html(s);
            format!(r#"<a href="/pg/{s}/">{s}</a>"#)
        }
        Value::String(s) if name == "table_name" => {
            let s = escape_html(s);
            format!(r#"<a href="{s}">{s}</a>"#)
        }
        Value::Array(_) => format!(r#"<span class="array">{}</span>"#, escape_html(&value.to_string())),
        Value::String(s) if DATE.contains(&type_id) => {
            let date = s.get(..10).unwrap_or(s);
            format!(r#"<time datetime="{}">{}</time>"#, escape_html(s), escape_html(date))
        }
        Value::String(s) if TIME.contains(&type_id) => {
            let s = escape_html(s);
            format!(r#"<time datetime="{s}">{s}</time>"#)
        }
        Value::String(s) if TIMESTAMP.contains(&type_id) => {
            let shown = match (s.get(..10), s.get(11..19)) {
                (Some(date), Some(time)) => format!("{date} {time}"),
                _ => s.clone(),
            };
            format!(r#"<time datetime="{}">{}</time>"#, escape_html(s), escape_html(&shown))
        }
        Value::String(_) | Value::Number(_) if NUMERIC.contains(&type_id) => {
            let raw = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let shown = raw
                .parse::<f64>()
                .map(|n| format!("{n:.5}"))
                .unwrap_or(raw);
            format!(r#"<span class="number">{}</span>"#, escape_html(&shown))
        }
        Value::Object(_) => format!(r#"<span class="object">{}</span>"#, escape_html(&value.to_string())),
        Value::Number(n) => format!(r#"<span class="number">{n}</span>"#),
        Value::Bool(b) => format!(r#"<span class="boolean" title="{b}">{}</span>"#, if *b { "✓" } else { "✗" }),
        Value::String(s) => format!(r#"<span class="any">{}</span>"#, escape_html(s)),
    }
}

/// `{% if kind | hidden_by(cookies=cookies) %}`: a kind is hidden when its cookie is `false`.
pub fn hidden_by(kind: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let kind = kind.as_str().unwrap_or("");
    let hidden = args
        .get("cookies")
        .and_then(|cookies| cookies.get(kind))
        .and_then(Value::as_str)
        == Some("false");
    Ok(Value::Bool(hidden))
}
