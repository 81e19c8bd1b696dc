//! The alias definition DSL.
//!
//! A definition is multi-line text. Route lines have the form
//! `{pattern} -> {target} [options]`; the first route line is the primary
//! route, which is the one that participates in request matching. Comment
//! lines start with `#`. Options select the match type
//! (`literal`, `regex`, `glob`; default literal) and case handling
//! (`ignore-case`).

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// How a route pattern is compared against a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Exact string equality
    #[default]
    Literal,
    /// Shell-style wildcards, `*` bounded to one path segment
    Glob,
    /// Full-match regular expression
    Regex,
}

impl MatchType {
    /// Tie-break rank: literal beats glob beats regex.
    pub fn rank(self) -> u8 {
        match self {
            MatchType::Literal => 0,
            MatchType::Glob => 1,
            MatchType::Regex => 2,
        }
    }

    /// The option keyword naming this match type.
    pub fn keyword(self) -> &'static str {
        match self {
            MatchType::Literal => "literal",
            MatchType::Glob => "glob",
            MatchType::Regex => "regex",
        }
    }
}

/// One parsed route line.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasRoute {
    pub match_type: MatchType,
    pub pattern: String,
    pub target: String,
    pub ignore_case: bool,
    /// One-based line number in the definition text
    pub line: usize,
}

/// A parsed alias definition: the primary route plus any secondary routes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAliasDefinition {
    routes: Vec<AliasRoute>,
}

impl ParsedAliasDefinition {
    /// The primary route: the first route line of the definition.
    pub fn primary(&self) -> &AliasRoute {
        &self.routes[0]
    }

    /// All routes in definition order, primary first.
    pub fn routes(&self) -> &[AliasRoute] {
        &self.routes
    }
}

/// Line-level parse failure.
#[derive(Debug)]
pub struct AliasDefinitionError {
    line: usize,
    message: String,
}

impl AliasDefinitionError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }

    /// One-based line number the error refers to.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl Display for AliasDefinitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for AliasDefinitionError {}

fn parse_options(
    raw: &str,
    line: usize,
) -> Result<(MatchType, bool), AliasDefinitionError> {
    let mut match_type: Option<MatchType> = None;
    let mut ignore_case = false;

    let mut rest = raw.trim();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(AliasDefinitionError::new(
                line,
                format!("unexpected text after target: {rest:?}"),
            ));
        }
        let Some(close) = rest.find(']') else {
            return Err(AliasDefinitionError::new(line, "unclosed option bracket"));
        };
        let group = &rest[1..close];
        for token in group.split_whitespace() {
            match token {
                "literal" | "regex" | "glob" => {
                    let parsed = match token {
                        "literal" => MatchType::Literal,
                        "glob" => MatchType::Glob,
                        _ => MatchType::Regex,
                    };
                    if match_type.replace(parsed).is_some() {
                        return Err(AliasDefinitionError::new(
                            line,
                            "match type specified more than once",
                        ));
                    }
                }
                "ignore-case" => ignore_case = true,
                other => {
                    return Err(AliasDefinitionError::new(
                        line,
                        format!("unknown option {other:?}"),
                    ));
                }
            }
        }
        rest = rest[close + 1..].trim_start();
    }

    Ok((match_type.unwrap_or_default(), ignore_case))
}

fn parse_route_line(raw_line: &str, line: usize) -> Result<AliasRoute, AliasDefinitionError> {
    let Some((lhs, rhs)) = raw_line.split_once("->") else {
        return Err(AliasDefinitionError::new(
            line,
            "route lines must have the form \"pattern -> target [options]\"",
        ));
    };

    let pattern = lhs.trim();
    if pattern.is_empty() {
        return Err(AliasDefinitionError::new(line, "route pattern is empty"));
    }

    let rhs = rhs.trim();
    let (target, options_raw) = match rhs.find('[') {
        Some(index) => (rhs[..index].trim(), &rhs[index..]),
        None => (rhs, ""),
    };
    if target.is_empty() {
        return Err(AliasDefinitionError::new(line, "route target is empty"));
    }
    if target.split_whitespace().count() != 1 {
        return Err(AliasDefinitionError::new(
            line,
            "route target must be a single path",
        ));
    }

    let (match_type, ignore_case) = parse_options(options_raw, line)?;

    Ok(AliasRoute {
        match_type,
        pattern: pattern.to_string(),
        target: target.to_string(),
        ignore_case,
        line,
    })
}

/// Parse a full alias definition.
pub fn parse_alias_definition(
    text: &str,
) -> Result<ParsedAliasDefinition, AliasDefinitionError> {
    let mut routes = Vec::new();
    for (index, raw_line) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        routes.push(parse_route_line(trimmed, line)?);
    }

    if routes.is_empty() {
        return Err(AliasDefinitionError::new(
            1,
            "definition contains no route lines",
        ));
    }
    Ok(ParsedAliasDefinition { routes })
}

/// Render a canonical primary route line.
pub fn format_primary_alias_line(
    match_type: MatchType,
    pattern: &str,
    target: &str,
    ignore_case: bool,
) -> String {
    let mut rendered = format!("{pattern} -> {target}");
    if match_type != MatchType::Literal {
        rendered.push_str(&format!(" [{}]", match_type.keyword()));
    }
    if ignore_case {
        rendered.push_str(" [ignore-case]");
    }
    rendered
}
