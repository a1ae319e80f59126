//! MCP stdio transport (spec §6): a line-delimited JSON-RPC loop exposing
//! exactly one tool, `search`. Ported in shape from the teacher's
//! `mcp/stdio.rs::run()` — same handshake states, same `jsonrpc_result`/
//! `jsonrpc_error` envelope helpers, same per-line stdout write+flush — with
//! the HTTP/axum indirection the teacher routes through removed, since this
//! crate has no HTTP surface to dispatch into.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::app::AppState;
use crate::core::types::SearchRequest;

const TOOL_NAME: &str = "search";

fn search_tool_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Natural-language question to ask the AI-Mode search page."
            },
            "language": {
                "type": "string",
                "enum": ["zh-CN", "en-US", "ja-JP", "ko-KR", "de-DE", "fr-FR"],
                "default": "zh-CN"
            },
            "follow_up": {
                "type": "boolean",
                "description": "Continue an existing session's conversation instead of starting a fresh search.",
                "default": false
            },
            "session_id": {
                "type": "string",
                "description": "Session to reuse. Required when follow_up is true; optional otherwise."
            },
            "image_path": {
                "type": "string",
                "description": "Local path to an image to attach to the query."
            },
            "create_image": {
                "type": "boolean"
            }
        }
    })
}

fn jsonrpc_error(id: &Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message.into()
        }
    })
}

fn jsonrpc_result(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn handle_tools_list(id: &Value) -> Value {
    jsonrpc_result(
        id,
        json!({
            "tools": [{
                "name": TOOL_NAME,
                "title": "AI Search",
                "description": "Ask an AI-Mode search page a question and return a grounded Markdown answer with sources.",
                "inputSchema": search_tool_schema(),
            }]
        }),
    )
}

async fn handle_tools_call(state: &Arc<AppState>, id: &Value, params: &Value) -> Value {
    let name = params.get("name").and_then(|v| v.as_str());
    let Some(name) = name else {
        return jsonrpc_error(id, -32602, "missing required field: params.name");
    };
    if name != TOOL_NAME {
        return jsonrpc_error(id, -32601, format!("unknown tool: {}", name));
    }

    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    let request: SearchRequest = match serde_json::from_value(arguments) {
        Ok(r) => r,
        Err(e) => return jsonrpc_error(id, -32602, format!("invalid arguments: {}", e)),
    };

    let body = state.pipeline.handle(request).await;
    jsonrpc_result(
        id,
        json!({
            "content": [{"type": "text", "text": body}],
            "isError": false,
        }),
    )
}

pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    info!("MCP stdio server initialized; waiting for client session");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    let mut has_initialize = false;
    let mut is_initialized = false;
    let mut shutdown_requested = false;

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok(msg) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };

        let method = msg.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        let is_request = msg.get("id").is_some();
        let params = msg.get("params").cloned().unwrap_or(Value::Null);

        if !is_request {
            match method {
                "initialized" => {
                    has_initialize = true;
                    is_initialized = true;
                    continue;
                }
                "exit" => {
                    if shutdown_requested {
                        break;
                    }
                    continue;
                }
                _ => continue,
            }
        }

        let response = match method {
            "initialize" => {
                has_initialize = true;
                jsonrpc_result(
                    &id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {
                            "name": "huge-ai-search",
                            "title": "AI Search MCP",
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    }),
                )
            }
            "shutdown" => {
                shutdown_requested = true;
                jsonrpc_result(&id, Value::Null)
            }
            "tools/list" => {
                if !has_initialize || !is_initialized {
                    jsonrpc_error(&id, -32002, "server not initialized")
                } else {
                    handle_tools_list(&id)
                }
            }
            "tools/call" => {
                if !has_initialize || !is_initialized {
                    jsonrpc_error(&id, -32002, "server not initialized")
                } else {
                    handle_tools_call(&state, &id, &params).await
                }
            }
            _ => jsonrpc_error(&id, -32601, format!("method not found: {}", method)),
        };

        let out = serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{{\"code\":-32603,\"message\":\"serialize error: {}\"}}}}",
                e
            )
        });

        stdout.write_all(out.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    warn!("MCP stdio server stopped");
    Ok(())
}
