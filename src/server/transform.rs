//! Transform execution: placeholder expansion and the three transform
//! runners. The runner never panics; every user-visible failure becomes an
//! [`ExecutionFailure`] that the HTTP layer renders as a 500 diagnostic.

use regex::Regex;
use std::time::Duration;

use super::{
    definition::{ServerDefinition, TransformKind},
    ExecutionContext, ExecutionFailure, ExecutionOutput, RequestDetails,
};

/// Default content type when a definition does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

fn placeholder_value(
    token: &str,
    request: &RequestDetails,
    context: &ExecutionContext,
    args: &[String],
    input: &[u8],
) -> Result<String, String> {
    if let Some(name) = token.strip_prefix("var.") {
        return context
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown variable {name:?}"));
    }
    if let Some(name) = token.strip_prefix("secret.") {
        return context
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown secret {name:?}"));
    }
    if let Some(index) = token.strip_prefix("args.") {
        let index: usize = index
            .parse()
            .map_err(|_| format!("argument index {index:?} is not a number"))?;
        return args
            .get(index)
            .cloned()
            .ok_or_else(|| format!("missing positional argument {index}"));
    }
    match token {
        "request.path" => Ok(request.path.clone()),
        "request.method" => Ok(request.method.clone()),
        "request.query" => Ok(request.query_string.clone()),
        "request.host" => Ok(request.host.clone()),
        "input" => Ok(String::from_utf8_lossy(input).into_owned()),
        other => Err(format!("unknown placeholder {{{{{other}}}}}")),
    }
}

/// Expand `{{...}}` placeholders in a template string.
pub fn expand_placeholders(
    template: &str,
    request: &RequestDetails,
    context: &ExecutionContext,
    args: &[String],
    input: &[u8],
) -> Result<String, String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err("unterminated {{ placeholder".to_string());
        };
        let token = after[..end].trim();
        rendered.push_str(&placeholder_value(token, request, context, args, input)?);
        rest = &after[end + 2..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

fn run_filter(
    pattern: &str,
    input: &[u8],
) -> Result<Vec<u8>, ExecutionFailure> {
    let regex = Regex::new(pattern).map_err(|err| {
        ExecutionFailure::new(
            format!("invalid filter pattern: {err}"),
            "transform: filter\nstage: pattern-compile",
        )
    })?;

    let text = String::from_utf8_lossy(input);
    let mut output = String::new();
    for line in text.split_inclusive('\n') {
        if regex.is_match(line.trim_end_matches(['\n', '\r'])) {
            output.push_str(line);
        }
    }
    Ok(output.into_bytes())
}

async fn run_http(
    url: &str,
    timeout: Duration,
    declared_content_type: Option<&str>,
) -> Result<ExecutionOutput, ExecutionFailure> {
    let parsed = url::Url::parse(url).map_err(|err| {
        ExecutionFailure::new(
            format!("invalid upstream url {url:?}: {err}"),
            "transform: http\nstage: url-parse",
        )
    })?;

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| {
            ExecutionFailure::new(
                format!("failed to build http client: {err}"),
                "transform: http\nstage: client-build",
            )
        })?;

    let response = client.get(parsed).send().await.map_err(|err| {
        ExecutionFailure::new(
            format!("upstream request failed: {err}"),
            "transform: http\nstage: request",
        )
    })?;

    let content_type = declared_content_type
        .map(str::to_string)
        .or_else(|| {
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let body = response.bytes().await.map_err(|err| {
        ExecutionFailure::new(
            format!("failed to read upstream body: {err}"),
            "transform: http\nstage: body-read",
        )
    })?;

    Ok(ExecutionOutput {
        output: body.to_vec(),
        content_type,
    })
}

/// Run a parsed definition against the request.
pub async fn run_transform(
    definition: &ServerDefinition,
    request: &RequestDetails,
    context: &ExecutionContext,
    args: &[String],
    input: &[u8],
    default_timeout: Duration,
) -> Result<ExecutionOutput, ExecutionFailure> {
    match definition.kind {
        TransformKind::Template => {
            let rendered =
                expand_placeholders(&definition.body, request, context, args, input).map_err(
                    |message| {
                        ExecutionFailure::new(message, "transform: template\nstage: expand")
                    },
                )?;
            Ok(ExecutionOutput {
                output: rendered.into_bytes(),
                content_type: definition
                    .content_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            })
        }
        TransformKind::Filter => {
            let pattern = definition
                .pattern
                .as_deref()
                .unwrap_or_default();
            let pattern =
                expand_placeholders(pattern, request, context, args, input).map_err(|message| {
                    ExecutionFailure::new(message, "transform: filter\nstage: expand")
                })?;
            let output = run_filter(&pattern, input)?;
            Ok(ExecutionOutput {
                output,
                content_type: definition
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "text/plain".to_string()),
            })
        }
        TransformKind::Http => {
            let url = definition.url.as_deref().unwrap_or_default();
            let url =
                expand_placeholders(url, request, context, args, input).map_err(|message| {
                    ExecutionFailure::new(message, "transform: http\nstage: expand")
                })?;
            let timeout = definition
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout);
            run_http(&url, timeout, definition.content_type.as_deref()).await
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::server::definition::parse_server_definition;
    use std::collections::BTreeMap;

    fn request_for(path: &str) -> RequestDetails {
        RequestDetails::for_path(path)
    }

    fn context() -> ExecutionContext {
        let mut variables = BTreeMap::new();
        variables.insert("greeting".to_string(), "hello".to_string());
        let mut secrets = BTreeMap::new();
        secrets.insert("token".to_string(), "s3cr3t".to_string());
        ExecutionContext {
            variables,
            secrets,
            servers: BTreeMap::new(),
        }
    }

    #[test]
    fn expansion_covers_request_context_args_and_input() {
        let request = request_for("/echo/hello");
        let expanded = expand_placeholders(
            "{{request.path}} {{request.method}} {{var.greeting}} {{secret.token}} {{args.0}} {{input}}",
            &request,
            &context(),
            &["first".to_string()],
            b"piped",
        )
        .unwrap();
        assert_eq!(expanded, "/echo/hello GET hello s3cr3t first piped");
    }

    #[test]
    fn expansion_fails_on_unknowns() {
        let request = request_for("/p");
        let ctx = context();
        assert!(expand_placeholders("{{var.absent}}", &request, &ctx, &[], b"").is_err());
        assert!(expand_placeholders("{{args.3}}", &request, &ctx, &[], b"").is_err());
        assert!(expand_placeholders("{{mystery}}", &request, &ctx, &[], b"").is_err());
        assert!(expand_placeholders("{{request.path}", &request, &ctx, &[], b"").is_err());
    }

    #[tokio::test]
    async fn template_transform_renders_the_body() {
        let definition = parse_server_definition(
            "transform: template\ncontent-type: text/plain\n---\n{{request.path}}",
        )
        .unwrap();
        let result = run_transform(
            &definition,
            &request_for("/echo/hello"),
            &context(),
            &[],
            b"",
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(result.output, b"/echo/hello");
        assert_eq!(result.content_type, "text/plain");
    }

    #[tokio::test]
    async fn template_defaults_to_html() {
        let definition =
            parse_server_definition("transform: template\n---\n<b>hi</b>").unwrap();
        let result = run_transform(
            &definition,
            &request_for("/x"),
            &context(),
            &[],
            b"",
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(result.content_type, "text/html");
    }

    #[tokio::test]
    async fn filter_transform_behaves_like_grep() {
        let definition =
            parse_server_definition("transform: filter\npattern: {{args.0}}").unwrap();
        let result = run_transform(
            &definition,
            &request_for("/grep/error"),
            &context(),
            &["error".to_string()],
            b"error\nok\n",
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(result.output, b"error\n");
        assert_eq!(result.content_type, "text/plain");
    }

    #[tokio::test]
    async fn filter_rejects_invalid_patterns() {
        let definition =
            parse_server_definition("transform: filter\npattern: (unclosed").unwrap();
        let failure = run_transform(
            &definition,
            &request_for("/grep"),
            &context(),
            &[],
            b"",
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(failure.message.contains("invalid filter pattern"));
    }

    #[tokio::test]
    async fn http_rejects_invalid_urls() {
        let definition =
            parse_server_definition("transform: http\nurl: not a url").unwrap();
        let failure = run_transform(
            &definition,
            &request_for("/fetch"),
            &context(),
            &[],
            b"",
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(failure.message.contains("invalid upstream url"));
    }
}
