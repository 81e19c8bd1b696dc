//! Alias resolution: select at most one alias route for a request path.
//!
//! All primary routes across the user's enabled aliases are candidates.
//! Matches are ranked by the length of the pattern's literal prefix (more
//! specific wins), then by match type (literal over glob over regex), then
//! by alias name ascending.

mod definition;

use glob::{MatchOptions, Pattern};
use regex::RegexBuilder;

use crate::persistence::Alias;

pub use definition::{
    format_primary_alias_line, parse_alias_definition, AliasDefinitionError, AliasRoute,
    MatchType, ParsedAliasDefinition,
};

/// The winning route for a request path.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAlias {
    pub alias_name: String,
    pub match_type: MatchType,
    pub pattern: String,
    pub target: String,
}

fn glob_options(ignore_case: bool) -> MatchOptions {
    MatchOptions {
        case_sensitive: !ignore_case,
        // `*` stays within one path segment; `**` crosses segments.
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

fn route_matches(alias: &Alias, path: &str) -> bool {
    match alias.match_type {
        MatchType::Literal => {
            if alias.ignore_case {
                alias.match_pattern.eq_ignore_ascii_case(path)
            } else {
                alias.match_pattern == path
            }
        }
        MatchType::Glob => match Pattern::new(&alias.match_pattern) {
            Ok(pattern) => pattern.matches_with(path, glob_options(alias.ignore_case)),
            Err(_) => false,
        },
        MatchType::Regex => {
            // Anchors are implicit: the pattern must consume the whole path.
            match RegexBuilder::new(&format!("^(?:{})$", alias.match_pattern))
                .case_insensitive(alias.ignore_case)
                .build()
            {
                Ok(regex) => regex.is_match(path),
                Err(_) => false,
            }
        }
    }
}

/// Length of the leading run of the pattern that matches literally.
fn literal_prefix_length(match_type: MatchType, pattern: &str) -> usize {
    match match_type {
        MatchType::Literal => pattern.len(),
        MatchType::Glob => pattern
            .find(|ch| matches!(ch, '*' | '?' | '['))
            .unwrap_or(pattern.len()),
        MatchType::Regex => {
            let stripped = pattern.strip_prefix('^').unwrap_or(pattern);
            stripped
                .find(|ch| ".^$*+?()[]{}|\\".contains(ch))
                .unwrap_or(stripped.len())
        }
    }
}

/// Resolve the winning alias route for a normalized request path.
pub fn resolve_alias(aliases: &[Alias], path: &str) -> Option<ResolvedAlias> {
    let mut candidates: Vec<&Alias> = aliases
        .iter()
        .filter(|alias| alias.enabled && route_matches(alias, path))
        .collect();

    candidates.sort_by(|a, b| {
        let a_prefix = literal_prefix_length(a.match_type, &a.match_pattern);
        let b_prefix = literal_prefix_length(b.match_type, &b.match_pattern);
        b_prefix
            .cmp(&a_prefix)
            .then(a.match_type.rank().cmp(&b.match_type.rank()))
            .then_with(|| a.name.cmp(&b.name))
    });

    candidates.first().map(|alias| ResolvedAlias {
        alias_name: alias.name.clone(),
        match_type: alias.match_type,
        pattern: alias.match_pattern.clone(),
        target: alias.target_path.clone(),
    })
}
