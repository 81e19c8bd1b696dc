//! Server definition text.
//!
//! A definition is a short directive header, optionally followed by a
//! `---` marker and a template body:
//!
//! ```text
//! transform: template
//! content-type: text/plain
//! ---
//! Hello {{request.path}}
//! ```
//!
//! Three transform kinds exist: `template` renders the body, `filter`
//! keeps input lines matching a regex, and `http` forwards to an upstream
//! URL. Header values and the body undergo placeholder expansion at
//! execution time.

use std::fmt::Display;

/// The fixed set of transform kinds a server definition can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// Render the definition body
    Template,
    /// Keep input lines matching `pattern`
    Filter,
    /// Fetch `url` and return the response body
    Http,
}

impl TransformKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "template" => Some(Self::Template),
            "filter" => Some(Self::Filter),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

/// A parsed server definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDefinition {
    pub kind: TransformKind,
    /// Response content type; defaults to text/html downstream
    pub content_type: Option<String>,
    /// Filter transform: regex selecting input lines
    pub pattern: Option<String>,
    /// Http transform: upstream URL
    pub url: Option<String>,
    /// Http transform: outbound timeout override, seconds
    pub timeout_secs: Option<u64>,
    /// Template transform: everything after the `---` marker, verbatim
    pub body: String,
}

/// Definition-text parse failure.
#[derive(Debug)]
pub struct DefinitionError {
    message: String,
}

impl DefinitionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for DefinitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DefinitionError {}

fn split_header_and_body(text: &str) -> (&str, String) {
    if let Some(stripped) = text.strip_prefix("---\n") {
        return ("", stripped.to_string());
    }
    if let Some((header, body)) = text.split_once("\n---\n") {
        return (header, body.to_string());
    }
    if let Some(header) = text.strip_suffix("\n---") {
        return (header, String::new());
    }
    (text, String::new())
}

/// Parse definition text into its directives and body.
pub fn parse_server_definition(text: &str) -> Result<ServerDefinition, DefinitionError> {
    let (header, body) = split_header_and_body(text);

    let mut kind: Option<TransformKind> = None;
    let mut content_type: Option<String> = None;
    let mut pattern: Option<String> = None;
    let mut url: Option<String> = None;
    let mut timeout_secs: Option<u64> = None;

    for raw_line in header.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(DefinitionError::new(format!(
                "directive line {line:?} is not \"key: value\""
            )));
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        match key.as_str() {
            "transform" => {
                let parsed = TransformKind::parse(&value).ok_or_else(|| {
                    DefinitionError::new(format!(
                        "unknown transform {value:?}; expected template, filter, or http"
                    ))
                })?;
                if kind.replace(parsed).is_some() {
                    return Err(DefinitionError::new("transform specified more than once"));
                }
            }
            "content-type" => content_type = Some(value),
            "pattern" => pattern = Some(value),
            "url" => url = Some(value),
            "timeout" => {
                let parsed = value.parse().map_err(|_| {
                    DefinitionError::new(format!("timeout {value:?} is not a number of seconds"))
                })?;
                timeout_secs = Some(parsed);
            }
            other => {
                return Err(DefinitionError::new(format!(
                    "unknown directive {other:?}"
                )));
            }
        }
    }

    let kind = kind.ok_or_else(|| DefinitionError::new("definition is missing \"transform:\""))?;
    match kind {
        TransformKind::Filter if pattern.is_none() => {
            return Err(DefinitionError::new(
                "filter transform requires a \"pattern:\" directive",
            ));
        }
        TransformKind::Http if url.is_none() => {
            return Err(DefinitionError::new(
                "http transform requires a \"url:\" directive",
            ));
        }
        _ => {}
    }

    Ok(ServerDefinition {
        kind,
        content_type,
        pattern,
        url,
        timeout_secs,
        body,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn template_definition_keeps_its_body_verbatim() {
        let parsed = parse_server_definition(
            "transform: template\ncontent-type: text/plain\n---\n{{request.path}}",
        )
        .unwrap();
        assert_eq!(parsed.kind, TransformKind::Template);
        assert_eq!(parsed.content_type.as_deref(), Some("text/plain"));
        assert_eq!(parsed.body, "{{request.path}}");
    }

    #[test]
    fn body_may_contain_directive_looking_lines() {
        let parsed = parse_server_definition(
            "transform: template\n---\ntransform: not-a-directive\nsecond line\n",
        )
        .unwrap();
        assert_eq!(parsed.body, "transform: not-a-directive\nsecond line\n");
    }

    #[test]
    fn filter_requires_a_pattern() {
        let parsed =
            parse_server_definition("transform: filter\npattern: {{args.0}}").unwrap();
        assert_eq!(parsed.kind, TransformKind::Filter);
        assert_eq!(parsed.pattern.as_deref(), Some("{{args.0}}"));

        assert!(parse_server_definition("transform: filter").is_err());
    }

    #[test]
    fn http_requires_a_url() {
        let parsed = parse_server_definition(
            "transform: http\nurl: https://example.com/{{args.0}}\ntimeout: 5",
        )
        .unwrap();
        assert_eq!(parsed.kind, TransformKind::Http);
        assert_eq!(parsed.timeout_secs, Some(5));

        assert!(parse_server_definition("transform: http").is_err());
    }

    #[test]
    fn malformed_definitions_are_rejected() {
        assert!(parse_server_definition("").is_err());
        assert!(parse_server_definition("---\nbody only").is_err());
        assert!(parse_server_definition("transform: python").is_err());
        assert!(parse_server_definition("transform: template\nbogus line").is_err());
        assert!(parse_server_definition("transform: template\nvolume: 11").is_err());
        assert!(parse_server_definition("transform: http\nurl: x\ntimeout: soon").is_err());
    }

    #[test]
    fn empty_body_after_marker() {
        let parsed = parse_server_definition("transform: template\n---").unwrap();
        assert_eq!(parsed.body, "");
    }
}
