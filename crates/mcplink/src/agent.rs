//! The handler role: a line-oriented MCP server over stdio.
//!
//! Exposes a single `chat_completion` tool that forwards each invocation as
//! one HTTP POST to the upstream chat-completion service. The call is
//! stateless and unretried; any failure comes back as a payload with a
//! single `error` field rather than a protocol error, so the remote side
//! always receives a well-formed tool result.

use anyhow::{Context, Result};
use mcplink_core::AgentConfig;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

/// Timeout for the upstream HTTP call.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the one tool this handler exposes.
const CHAT_TOOL: &str = "chat_completion";

/// MCP protocol revision answered during `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Shared dependencies of the handler role.
///
/// Constructed once at startup and passed to the serve loop; there are no
/// global client singletons.
pub struct AgentContext {
    http: reqwest::Client,
    config: AgentConfig,
}

impl AgentContext {
    /// Build the context, including the upstream HTTP client.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, config })
    }
}

/// Serve MCP over stdin/stdout until stdin reaches EOF.
///
/// One JSON-RPC message per line in both directions. Diagnostics go to
/// stderr via tracing; stdout carries protocol messages only.
pub async fn run(ctx: AgentContext) -> Result<()> {
    info!("running as MCP handler on stdio");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(line) {
            Ok(request) => handle_request(&ctx, request).await,
            Err(e) => Some(error_response(
                Value::Null,
                -32700,
                &format!("parse error: {e}"),
            )),
        };
        if let Some(response) = response {
            let mut encoded = response.to_string();
            encoded.push('\n');
            stdout.write_all(encoded.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    info!("stdin closed, handler exiting");
    Ok(())
}

/// Dispatch one JSON-RPC request. Notifications get no response.
async fn handle_request(ctx: &AgentContext, request: Value) -> Option<Value> {
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let Some(id) = request.get("id").cloned().filter(|id| !id.is_null()) else {
        debug!(method, "ignoring notification");
        return None;
    };

    let response = match method {
        "initialize" => result_response(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "mcplink",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => result_response(id, json!({})),
        "tools/list" => result_response(id, json!({ "tools": [tool_descriptor()] })),
        "tools/call" => {
            let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            if name != CHAT_TOOL {
                return Some(error_response(id, -32602, &format!("unknown tool: {name}")));
            }
            let args = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let outcome = chat_completion(ctx, &args).await;
            let is_error = outcome.get("error").is_some();
            result_response(
                id,
                json!({
                    "content": [{ "type": "text", "text": outcome.to_string() }],
                    "isError": is_error,
                }),
            )
        }
        other => error_response(id, -32601, &format!("method not found: {other}")),
    };
    Some(response)
}

/// Forward one chat-completion request upstream.
///
/// Returns the upstream JSON unchanged on success, or `{"error": ...}` on
/// any failure: malformed input, transport error, HTTP error, bad response.
async fn chat_completion(ctx: &AgentContext, args: &Value) -> Value {
    let Some(messages) = args.get("messages").and_then(Value::as_array) else {
        return invalid_messages();
    };
    let well_formed = messages
        .iter()
        .all(|m| m.is_object() && m.get("role").is_some() && m.get("content").is_some());
    if !well_formed {
        error!("invalid messages format");
        return invalid_messages();
    }

    let payload = json!({
        "messages": messages,
        "stream": args.get("stream").and_then(Value::as_bool).unwrap_or(false),
        "temperature": float_arg(args, "temperature", 0.7),
        "top_p": float_arg(args, "top_p", 0.9),
        "max_tokens": int_arg(args, "max_tokens", 256),
        "max_completion_tokens": int_arg(args, "max_completion_tokens", 256),
        "k": int_arg(args, "k", 1),
        "retrieval_method": args.get("retrieval_method").and_then(Value::as_str).unwrap_or("none"),
        "frequency_penalty": float_arg(args, "frequency_penalty", 0.0),
        "presence_penalty": float_arg(args, "presence_penalty", 0.0),
        "include_functions_info": false,
        "include_retrieval_info": false,
        "include_guardrails_info": false,
        "provide_citations": false,
        "filter_kb_content_by_query_metadata": false,
    });

    let url = format!(
        "{}/api/v1/chat/completions",
        ctx.config.base_url.trim_end_matches('/')
    );
    debug!(%url, "forwarding chat completion upstream");

    let response = match ctx
        .http
        .post(&url)
        .bearer_auth(&ctx.config.token)
        .json(&payload)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "upstream request failed");
            return json!({ "error": e.to_string() });
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), "upstream returned an error");
        return json!({ "error": format!("HTTP error {}: {}", status.as_u16(), body) });
    }

    match response.json::<Value>().await {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "upstream response was not valid JSON");
            json!({ "error": format!("invalid upstream response: {e}") })
        }
    }
}

fn invalid_messages() -> Value {
    json!({
        "error": "Invalid messages format: Must be a list of dicts with 'role' and 'content'."
    })
}

fn float_arg(args: &Value, key: &str, default: f64) -> f64 {
    args.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn int_arg(args: &Value, key: &str, default: i64) -> i64 {
    args.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn tool_descriptor() -> Value {
    json!({
        "name": CHAT_TOOL,
        "description": "Forward a chat conversation to the upstream completion service",
        "inputSchema": {
            "type": "object",
            "properties": {
                "messages": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "role": { "type": "string" },
                            "content": { "type": "string" },
                        },
                        "required": ["role", "content"],
                    },
                },
                "stream": { "type": "boolean", "default": false },
                "temperature": { "type": "number", "default": 0.7 },
                "top_p": { "type": "number", "default": 0.9 },
                "max_tokens": { "type": "integer", "default": 256 },
                "max_completion_tokens": { "type": "integer", "default": 256 },
                "k": { "type": "integer", "default": 1 },
                "retrieval_method": { "type": "string", "default": "none" },
                "frequency_penalty": { "type": "number", "default": 0.0 },
                "presence_penalty": { "type": "number", "default": 0.0 },
            },
            "required": ["messages"],
        },
    })
}

fn result_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(base_url: &str) -> AgentContext {
        AgentContext::new(AgentConfig {
            token: "test-token".to_string(),
            base_url: base_url.to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_tool_capability() {
        let ctx = context("http://127.0.0.1:9");
        let response = handle_request(&ctx, json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }))
            .await
            .unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_exposes_the_chat_tool() {
        let ctx = context("http://127.0.0.1:9");
        let response = handle_request(&ctx, json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
            .await
            .unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], CHAT_TOOL);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let ctx = context("http://127.0.0.1:9");
        let response = handle_request(
            &ctx,
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_a_jsonrpc_error() {
        let ctx = context("http://127.0.0.1:9");
        let response = handle_request(&ctx, json!({ "jsonrpc": "2.0", "id": 3, "method": "bogus" }))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn valid_call_forwards_upstream_and_returns_body_unchanged() {
        let server = MockServer::start().await;
        let upstream_body = json!({ "choices": [{ "message": { "content": "bamboo" } }] });
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({
                "temperature": 0.7,
                "top_p": 0.9,
                "max_tokens": 256,
                "include_functions_info": false,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(upstream_body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(&server.uri());
        let args = json!({ "messages": [{ "role": "user", "content": "hi" }] });
        let outcome = chat_completion(&ctx, &args).await;
        assert_eq!(outcome, upstream_body);
    }

    #[tokio::test]
    async fn upstream_http_error_becomes_error_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let ctx = context(&server.uri());
        let args = json!({ "messages": [{ "role": "user", "content": "hi" }] });
        let outcome = chat_completion(&ctx, &args).await;
        assert_eq!(outcome["error"], "HTTP error 500: boom");
    }

    #[tokio::test]
    async fn unreachable_upstream_becomes_error_field() {
        let ctx = context("http://127.0.0.1:9");
        let args = json!({ "messages": [{ "role": "user", "content": "hi" }] });
        let outcome = chat_completion(&ctx, &args).await;
        assert!(outcome.get("error").is_some());
    }

    #[tokio::test]
    async fn malformed_messages_are_rejected_without_a_request() {
        let ctx = context("http://127.0.0.1:9");
        for args in [
            json!({}),
            json!({ "messages": "not a list" }),
            json!({ "messages": [{ "role": "user" }] }),
            json!({ "messages": [42] }),
        ] {
            let outcome = chat_completion(&ctx, &args).await;
            assert_eq!(
                outcome["error"],
                "Invalid messages format: Must be a list of dicts with 'role' and 'content'."
            );
        }
    }

    #[tokio::test]
    async fn tool_call_wraps_outcome_in_mcp_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;

        let ctx = context(&server.uri());
        let request = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": CHAT_TOOL,
                "arguments": { "messages": [{ "role": "user", "content": "hi" }] },
            },
        });
        let response = handle_request(&ctx, request).await.unwrap();
        assert_eq!(response["result"]["isError"], false);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(text).unwrap(),
            json!({ "ok": true })
        );
    }

    #[tokio::test]
    async fn calling_an_unknown_tool_is_invalid_params() {
        let ctx = context("http://127.0.0.1:9");
        let request = json!({
            "jsonrpc": "2.0",
            "id": 8,
            "method": "tools/call",
            "params": { "name": "nope", "arguments": {} },
        });
        let response = handle_request(&ctx, request).await.unwrap();
        assert_eq!(response["error"]["code"], -32602);
    }
}
