//! Label and annotation template expansion
//!
//! Supports `{{$value}}`, `{{$threshold}}`, `{{$labels.<name>}}` and
//! `{{index $labels "<name>"}}`, plus the `.Value`, `.Threshold` and
//! `.Labels.<name>` spellings. A label that is not present expands to
//! `<no value>`.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

const NO_VALUE: &str = "<no value>";

/// Values available to alert templates
#[derive(Debug, Clone, Default)]
pub struct TemplateData {
    pub labels: HashMap<String, String>,
    pub value: String,
    pub threshold: String,
}

impl TemplateData {
    pub fn new(labels: HashMap<String, String>, value: String, threshold: String) -> Self {
        Self {
            labels,
            value,
            threshold,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TemplateError {
    #[error("unclosed action starting at byte {0}")]
    Unclosed(usize),

    #[error("unsupported expression: {0}")]
    Unsupported(String),
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{-?\s*(.*?)\s*-?\}\}").expect("valid template regex"))
}

fn index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^index\s+(?:\$labels|\.Labels)\s+"([^"]*)"$"#).expect("valid index regex")
    })
}

/// Expand every action in `text` against `data`.
pub fn expand(text: &str, data: &TemplateData) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in action_re().captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let literal = &text[last..whole.start()];
        if let Some(pos) = literal.find("{{") {
            return Err(TemplateError::Unclosed(last + pos));
        }
        out.push_str(literal);
        out.push_str(&eval_action(caps.get(1).map_or("", |m| m.as_str()), data)?);
        last = whole.end();
    }

    let rest = &text[last..];
    if let Some(pos) = rest.find("{{") {
        return Err(TemplateError::Unclosed(last + pos));
    }
    out.push_str(rest);
    Ok(out)
}

fn eval_action(expr: &str, data: &TemplateData) -> Result<String, TemplateError> {
    match expr {
        "$value" | ".Value" => return Ok(data.value.clone()),
        "$threshold" | ".Threshold" => return Ok(data.threshold.clone()),
        _ => {}
    }

    let label = expr
        .strip_prefix("$labels.")
        .or_else(|| expr.strip_prefix(".Labels."))
        .map(str::to_string)
        .or_else(|| index_re().captures(expr).map(|c| c[1].to_string()));

    match label {
        Some(name) if !name.is_empty() => Ok(data
            .labels
            .get(&name)
            .cloned()
            .unwrap_or_else(|| NO_VALUE.to_string())),
        _ => Err(TemplateError::Unsupported(expr.to_string())),
    }
}
