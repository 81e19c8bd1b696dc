//! The request router.
//!
//! A single resolution step walks the pipeline in priority order: built-in
//! route, alias, server, versioned server, CID content, 404. The chain
//! resolver re-enters the pipeline on every internal redirect with a
//! visited set, a 20-hop cap, and loop detection; its structured report
//! backs the `/routes/{path}` explorer and the diagnostics in tests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::{
    alias::{resolve_alias, ResolvedAlias},
    cid::split_cid_path,
    config::Config,
    persistence::{Database, Server},
    server::ChainSource,
    store::CidStore,
};

/// Maximum internal redirect hops followed for one logical request.
pub const MAX_REDIRECT_HOPS: usize = 20;

/// A historical definition matching a versioned-execution prefix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionMatch {
    pub definition_cid: String,
    pub created_at: DateTime<Utc>,
}

/// What one resolution step decided.
#[derive(Debug)]
pub enum StepOutcome {
    /// The path belongs to a built-in route
    Builtin { endpoint: String },
    /// An alias matched; redirect to its target
    Alias(ResolvedAlias),
    /// Execute a server, with positional args and optional chained source
    Server {
        server: Server,
        args: Vec<String>,
        source: Option<ChainSource>,
    },
    /// Execute one historical definition selected by a CID prefix
    Versioned {
        server: Server,
        definition_cid: String,
        partial: String,
    },
    /// Multiple historical definitions share the prefix
    VersionedAmbiguous {
        server_name: String,
        partial: String,
        matches: Vec<VersionMatch>,
    },
    /// The prefix matched no historical definition
    VersionedMiss { server_name: String, partial: String },
    /// Serve stored content
    Cid {
        cid: String,
        extension: Option<String>,
    },
    /// Nothing matched
    NotFound,
}

/// Normalize a request path: drop query and fragment, ensure a leading
/// slash, collapse duplicate slashes, strip one trailing slash off
/// non-root paths.
pub fn normalize_request_path(raw: &str) -> String {
    let mut candidate = raw.trim().to_string();
    if candidate.is_empty() {
        return "/".to_string();
    }
    candidate = candidate.split('?').next().unwrap_or_default().to_string();
    candidate = candidate.split('#').next().unwrap_or_default().to_string();
    if !candidate.starts_with('/') {
        candidate.insert(0, '/');
    }
    while candidate.contains("//") {
        candidate = candidate.replace("//", "/");
    }
    if candidate.len() > 1 && candidate.ends_with('/') {
        candidate = candidate.trim_end_matches('/').to_string();
    }
    if candidate.is_empty() {
        "/".to_string()
    } else {
        candidate
    }
}

fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_builtin(path: &str, builtin_routes: &BTreeSet<String>) -> bool {
    if path == "/" {
        return true;
    }
    match path_segments(path).first() {
        Some(first) => builtin_routes.contains(&format!("/{first}")),
        None => false,
    }
}

fn resolve_server_path(
    db: &Database,
    store: &CidStore,
    user_id: &str,
    server: Server,
    segments: &[String],
) -> StepOutcome {
    if segments.len() == 1 {
        return StepOutcome::Server {
            server,
            args: Vec::new(),
            source: None,
        };
    }

    let last = segments
        .last()
        .expect("segments checked non-empty")
        .clone();
    let middle: Vec<String> = segments[1..segments.len() - 1].to_vec();

    // The final segment is the data source when it resolves as an enabled
    // server or as content in the store.
    if let Some(source_server) = db.server_by_name(user_id, &last) {
        if source_server.enabled {
            return StepOutcome::Server {
                server,
                args: middle,
                source: Some(ChainSource::Server(last)),
            };
        }
    }
    if store.exists(&last) {
        return StepOutcome::Server {
            server,
            args: middle,
            source: Some(ChainSource::Cid(last)),
        };
    }

    if segments.len() == 2 {
        let history = db.server_history(user_id, &server.name);
        let matches: Vec<VersionMatch> = history
            .iter()
            .filter(|version| version.definition_cid.starts_with(last.as_str()))
            .map(|version| VersionMatch {
                definition_cid: version.definition_cid.clone(),
                created_at: version.created_at,
            })
            .collect();

        return match matches.len() {
            1 => StepOutcome::Versioned {
                server,
                definition_cid: matches[0].definition_cid.clone(),
                partial: last,
            },
            0 if history.is_empty() => StepOutcome::Server {
                server,
                args: vec![last],
                source: None,
            },
            0 => StepOutcome::VersionedMiss {
                server_name: server.name,
                partial: last,
            },
            _ => StepOutcome::VersionedAmbiguous {
                server_name: server.name,
                partial: last,
                matches,
            },
        };
    }

    // Deeper paths with an unresolvable final segment: every extra segment
    // is a positional argument.
    StepOutcome::Server {
        server,
        args: segments[1..].to_vec(),
        source: None,
    }
}

/// Run one step of the resolution pipeline for a normalized path.
pub fn resolve_step(
    db: &Database,
    store: &CidStore,
    config: &Config,
    builtin_routes: &BTreeSet<String>,
    path: &str,
) -> StepOutcome {
    if is_builtin(path, builtin_routes) {
        return StepOutcome::Builtin {
            endpoint: path.to_string(),
        };
    }

    let user_id = &config.user_id;
    if let Some(resolved) = resolve_alias(&db.user_aliases(user_id), path) {
        return StepOutcome::Alias(resolved);
    }

    let segments = path_segments(path);
    if let Some(first) = segments.first() {
        if let Some(server) = db.server_by_name(user_id, first) {
            if server.enabled {
                return resolve_server_path(db, store, user_id, server, &segments);
            }
        }
    }

    if let Some((cid, extension)) = split_cid_path(path) {
        if store.exists(&cid) {
            return StepOutcome::Cid { cid, extension };
        }
    }

    StepOutcome::NotFound
}

/// Single step in the routing chain.
#[derive(Debug, Clone, Serialize)]
pub struct RouteStep {
    pub category: String,
    pub title: String,
    pub description: String,
    pub request_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_target: Option<String>,
}

/// Structured description of how a path is handled.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResolution {
    pub normalized_path: String,
    pub final_status: Option<u16>,
    pub final_summary: String,
    pub redirect_target: Option<String>,
    pub steps: Vec<RouteStep>,
    pub redirects_followed: usize,
    pub chain_limited: bool,
    pub loop_detected: bool,
}

struct SingleStep {
    step: RouteStep,
    final_status: Option<u16>,
    final_summary: String,
    redirect_target: Option<String>,
}

fn describe_single_step(
    db: &Database,
    store: &CidStore,
    config: &Config,
    builtin_routes: &BTreeSet<String>,
    path: &str,
) -> SingleStep {
    match resolve_step(db, store, config, builtin_routes, path) {
        StepOutcome::Builtin { endpoint } => SingleStep {
            step: RouteStep {
                category: "builtin".to_string(),
                title: endpoint.clone(),
                description: "Handled directly by a built-in route.".to_string(),
                request_path: path.to_string(),
                redirect_target: None,
            },
            final_status: Some(200),
            final_summary: format!("Handled by built-in endpoint {endpoint}"),
            redirect_target: None,
        },
        StepOutcome::Alias(resolved) => SingleStep {
            step: RouteStep {
                category: "alias".to_string(),
                title: resolved.alias_name.clone(),
                description: format!(
                    "{:?} match using pattern {:?}.",
                    resolved.match_type, resolved.pattern
                ),
                request_path: path.to_string(),
                redirect_target: Some(resolved.target.clone()),
            },
            final_status: Some(302),
            final_summary: format!("Redirects to {}", resolved.target),
            redirect_target: Some(resolved.target),
        },
        StepOutcome::Server { server, .. } => SingleStep {
            step: RouteStep {
                category: "server".to_string(),
                title: server.name.clone(),
                description: "Executes the server transform with the current request context."
                    .to_string(),
                request_path: path.to_string(),
                redirect_target: None,
            },
            final_status: Some(302),
            final_summary: "Executes server code and redirects to generated CID output."
                .to_string(),
            redirect_target: None,
        },
        StepOutcome::Versioned { server, partial, .. } => SingleStep {
            step: RouteStep {
                category: "server".to_string(),
                title: format!("{} (historical)", server.name),
                description: format!(
                    "Loads the historical definition matching prefix {partial:?} and executes it."
                ),
                request_path: path.to_string(),
                redirect_target: None,
            },
            final_status: Some(302),
            final_summary: "Executes a historical server definition matching the requested prefix."
                .to_string(),
            redirect_target: None,
        },
        StepOutcome::VersionedAmbiguous {
            server_name,
            partial,
            ..
        } => SingleStep {
            step: RouteStep {
                category: "server".to_string(),
                title: format!("{server_name} (historical)"),
                description: format!(
                    "Multiple server versions share prefix {partial:?}. The request returns a 400 detail payload."
                ),
                request_path: path.to_string(),
                redirect_target: None,
            },
            final_status: Some(400),
            final_summary: "Multiple historical definitions match the prefix.".to_string(),
            redirect_target: None,
        },
        StepOutcome::VersionedMiss {
            server_name,
            partial,
        } => SingleStep {
            step: RouteStep {
                category: "server".to_string(),
                title: format!("{server_name} (historical)"),
                description: format!(
                    "No server versions match prefix {partial:?}. The request returns 404."
                ),
                request_path: path.to_string(),
                redirect_target: None,
            },
            final_status: Some(404),
            final_summary: "No historical server version matched the requested prefix."
                .to_string(),
            redirect_target: None,
        },
        StepOutcome::Cid { cid, .. } => SingleStep {
            step: RouteStep {
                category: "cid".to_string(),
                title: cid,
                description: "Served directly from stored CID content.".to_string(),
                request_path: path.to_string(),
                redirect_target: None,
            },
            final_status: Some(200),
            final_summary: "Served from CID storage.".to_string(),
            redirect_target: None,
        },
        StepOutcome::NotFound => SingleStep {
            step: RouteStep {
                category: "not_found".to_string(),
                title: "No matching handler".to_string(),
                description: "No alias, server, or CID matched the requested path.".to_string(),
                request_path: path.to_string(),
                redirect_target: None,
            },
            final_status: Some(404),
            final_summary: "Request results in a 404 response.".to_string(),
            redirect_target: None,
        },
    }
}

/// Follow the resolution chain for a path, chasing internal redirects.
pub fn describe_request_path(
    db: &Database,
    store: &CidStore,
    config: &Config,
    builtin_routes: &BTreeSet<String>,
    raw_path: &str,
) -> RouteResolution {
    let normalized = normalize_request_path(raw_path);

    let mut steps: Vec<RouteStep> = Vec::new();
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut current_path = normalized.clone();
    let mut final_status: Option<u16> = None;
    let mut final_summary = String::new();
    let mut redirect_target: Option<String> = None;
    let mut redirects_followed = 0usize;
    let mut chain_limited = false;
    let mut loop_detected = false;

    loop {
        if visited.contains(&current_path) {
            loop_detected = true;
            chain_limited = true;
            break;
        }
        visited.insert(current_path.clone());

        let resolution =
            describe_single_step(db, store, config, builtin_routes, &current_path);
        steps.push(resolution.step);
        final_status = resolution.final_status;
        final_summary = resolution.final_summary;
        redirect_target = resolution.redirect_target;

        let Some(target) = redirect_target.clone() else {
            break;
        };

        redirects_followed += 1;
        let next_path = normalize_request_path(&target);

        if redirects_followed >= MAX_REDIRECT_HOPS {
            chain_limited = true;
            break;
        }
        if visited.contains(&next_path) {
            loop_detected = true;
            chain_limited = true;
            break;
        }
        current_path = next_path;
    }

    let mut summary_text = final_summary;
    if chain_limited {
        let suffix = if loop_detected {
            format!(" Redirect loop detected after {redirects_followed} redirects.")
        } else {
            format!(" Redirect chain truncated after {redirects_followed} redirects.")
        };
        summary_text = format!("{}{}", summary_text, suffix).trim().to_string();
    }

    RouteResolution {
        normalized_path: normalized,
        final_status,
        final_summary: summary_text,
        redirect_target,
        steps,
        redirects_followed,
        chain_limited,
        loop_detected,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cid::Cid;
    use tempfile::tempdir;

    fn builtin_routes() -> BTreeSet<String> {
        ["/aliases", "/upload", "/export"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn fixtures() -> (Database, CidStore, Config, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = Config::for_tests(dir.path());
        (Database::in_memory(), CidStore::in_memory(), config, dir)
    }

    #[test]
    fn paths_normalize_before_dispatch() {
        assert_eq!(normalize_request_path(""), "/");
        assert_eq!(normalize_request_path("docs"), "/docs");
        assert_eq!(normalize_request_path("/docs/"), "/docs");
        assert_eq!(normalize_request_path("//docs///sub"), "/docs/sub");
        assert_eq!(normalize_request_path("/docs?x=1#frag"), "/docs");
        assert_eq!(normalize_request_path("/"), "/");
    }

    #[test]
    fn builtin_routes_win_over_everything() {
        let (db, store, config, _dir) = fixtures();
        db.upsert_alias("local", "aliases", "/aliases -> /elsewhere", true)
            .unwrap();
        let outcome = resolve_step(&db, &store, &config, &builtin_routes(), "/aliases");
        assert!(matches!(outcome, StepOutcome::Builtin { .. }));
    }

    #[test]
    fn unmatched_paths_fall_through_to_404() {
        let (db, store, config, _dir) = fixtures();
        let outcome = resolve_step(&db, &store, &config, &builtin_routes(), "/nothing-here");
        assert!(matches!(outcome, StepOutcome::NotFound));
    }

    #[test]
    fn alias_step_produces_a_redirect() {
        let (db, store, config, _dir) = fixtures();
        db.upsert_alias("local", "docs", "/docs -> /readme", true)
            .unwrap();
        match resolve_step(&db, &store, &config, &builtin_routes(), "/docs") {
            StepOutcome::Alias(resolved) => assert_eq!(resolved.target, "/readme"),
            other => panic!("expected alias, got {other:?}"),
        }
    }

    #[test]
    fn fresh_server_takes_extra_segment_as_argument() {
        let (db, store, config, _dir) = fixtures();
        db.upsert_server(&store, "local", "echo", "transform: template\n---\nx", true)
            .unwrap();
        match resolve_step(&db, &store, &config, &builtin_routes(), "/echo/hello") {
            StepOutcome::Server { args, source, .. } => {
                assert_eq!(args, vec!["hello".to_string()]);
                assert!(source.is_none());
            }
            other => panic!("expected server, got {other:?}"),
        }
    }

    #[test]
    fn edited_server_dispatches_on_history_prefixes() {
        let (db, store, config, _dir) = fixtures();
        let v1 = db
            .upsert_server(&store, "local", "echo", "transform: template\n---\nv1", true)
            .unwrap();
        db.upsert_server(&store, "local", "echo", "transform: template\n---\nv2", true)
            .unwrap();

        let prefix = &v1.definition_cid[..8];
        match resolve_step(
            &db,
            &store,
            &config,
            &builtin_routes(),
            &format!("/echo/{prefix}"),
        ) {
            StepOutcome::Versioned { definition_cid, .. } => {
                assert_eq!(definition_cid, v1.definition_cid);
            }
            other => panic!("expected versioned, got {other:?}"),
        }

        // A prefix matching nothing on an edited server is a miss, not an
        // argument.
        match resolve_step(&db, &store, &config, &builtin_routes(), "/echo/zzzzzz") {
            StepOutcome::VersionedMiss { partial, .. } => assert_eq!(partial, "zzzzzz"),
            other => panic!("expected versioned miss, got {other:?}"),
        }
    }

    #[test]
    fn ambiguous_history_prefix_reports_all_matches() {
        let (db, store, config, _dir) = fixtures();
        db.upsert_server(&store, "local", "echo", "transform: template\n---\nv1", true)
            .unwrap();
        db.upsert_server(&store, "local", "echo", "transform: template\n---\nv2", true)
            .unwrap();
        db.upsert_server(&store, "local", "echo", "transform: template\n---\nv3", true)
            .unwrap();

        // Every definition CID starts with the length prefix for its size;
        // both history rows share the first character.
        let history = db.server_history("local", "echo");
        assert_eq!(history.len(), 2);
        let shared: String = history[0].definition_cid.chars().take(1).collect();
        assert!(history[1].definition_cid.starts_with(&shared));

        match resolve_step(
            &db,
            &store,
            &config,
            &builtin_routes(),
            &format!("/echo/{shared}"),
        ) {
            StepOutcome::VersionedAmbiguous { matches, .. } => assert_eq!(matches.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn chained_paths_resolve_their_source() {
        let (db, store, config, _dir) = fixtures();
        db.upsert_server(&store, "local", "grep", "transform: filter\npattern: x", true)
            .unwrap();
        let data = store.put(b"data\n", "local").unwrap();

        match resolve_step(
            &db,
            &store,
            &config,
            &builtin_routes(),
            &format!("/grep/error/{}", data.as_str()),
        ) {
            StepOutcome::Server { args, source, .. } => {
                assert_eq!(args, vec!["error".to_string()]);
                assert_eq!(source, Some(ChainSource::Cid(data.as_str().to_string())));
            }
            other => panic!("expected chained server, got {other:?}"),
        }
    }

    #[test]
    fn stored_cids_serve_with_their_extension() {
        let (db, store, config, _dir) = fixtures();
        let content = vec![9u8; 200];
        let cid = store.put(&content, "local").unwrap();
        match resolve_step(
            &db,
            &store,
            &config,
            &builtin_routes(),
            &format!("/{}.txt", cid.as_str()),
        ) {
            StepOutcome::Cid { cid: found, extension } => {
                assert_eq!(found, cid.as_str());
                assert_eq!(extension.as_deref(), Some("txt"));
            }
            other => panic!("expected cid, got {other:?}"),
        }
    }

    #[test]
    fn alias_chains_are_followed_and_counted() {
        let (db, store, config, _dir) = fixtures();
        let readme_cid = store.put(b"# readme", "local").unwrap();
        db.upsert_alias("local", "docs", "/docs -> /readme", true)
            .unwrap();
        db.upsert_alias(
            "local",
            "readme",
            &format!("/readme -> /{}.md", readme_cid.as_str()),
            true,
        )
        .unwrap();

        let resolution =
            describe_request_path(&db, &store, &config, &builtin_routes(), "/docs");
        assert_eq!(resolution.redirects_followed, 2);
        assert_eq!(resolution.final_status, Some(200));
        assert!(!resolution.loop_detected);
        assert_eq!(resolution.steps.len(), 3);
    }

    #[test]
    fn redirect_cycles_stop_with_loop_detected() {
        let (db, store, config, _dir) = fixtures();
        db.upsert_alias("local", "a", "/a -> /b", true).unwrap();
        db.upsert_alias("local", "b", "/b -> /a", true).unwrap();

        let resolution = describe_request_path(&db, &store, &config, &builtin_routes(), "/a");
        assert!(resolution.loop_detected);
        assert!(resolution.chain_limited);
        assert!(resolution.redirects_followed <= MAX_REDIRECT_HOPS);
        assert!(resolution.final_summary.contains("Redirect loop detected"));
    }

    #[test]
    fn long_chains_truncate_at_the_hop_cap() {
        let (db, store, config, _dir) = fixtures();
        for index in 0..30 {
            db.upsert_alias(
                "local",
                &format!("hop{index}"),
                &format!("/hop{index} -> /hop{}", index + 1),
                true,
            )
            .unwrap();
        }

        let resolution =
            describe_request_path(&db, &store, &config, &builtin_routes(), "/hop0");
        assert!(resolution.chain_limited);
        assert!(!resolution.loop_detected);
        assert_eq!(resolution.redirects_followed, MAX_REDIRECT_HOPS);
        assert!(resolution
            .final_summary
            .contains("Redirect chain truncated"));
    }
}
