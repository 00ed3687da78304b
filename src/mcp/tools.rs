//! MCP tool definitions and handlers

use super::types::{ToolDefinition, ToolResult};
use crate::commands::{
    cmd_ask, cmd_list_ingestions, cmd_status, search_timed, AskRequest, ScoredEmail,
};
use crate::config::Config;
use crate::embed::Embedder;
use crate::generate::Generator;
use crate::meta::MetaDb;
use crate::store::VectorStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::error;

/// Default number of ingestion runs listed by `mail_ingestions`
const DEFAULT_INGESTION_LIMIT: usize = 20;

/// Everything a tool call may touch
pub struct ToolContext<'a> {
    pub config: &'a Config,
    pub db: &'a MetaDb,
    pub store: &'a dyn VectorStore,
    pub embedder: &'a dyn Embedder,
    pub generator: &'a dyn Generator,
}

/// Get all available tool definitions
pub fn get_tool_definitions(config: &Config) -> Vec<ToolDefinition> {
    let max = config.query.max_results;
    vec![
        ToolDefinition {
            name: "mail_search".to_string(),
            description: "Semantic search over indexed email. Returns the closest messages with sender, date, link and a snippet.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language query"
                    },
                    "limit": {
                        "type": "integer",
                        "description": format!("Maximum number of emails (default: {}, max: {})", config.query.default_k, max),
                        "default": config.query.default_k,
                        "minimum": 1,
                        "maximum": max
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "mail_ask".to_string(),
            description: "Answer a question from indexed email using the local model. The answer cites sources as [n].".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question to answer"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Number of emails to retrieve as context",
                        "default": config.query.default_k,
                        "minimum": 1,
                        "maximum": max
                    },
                    "max_tokens": {
                        "type": "integer",
                        "description": "Maximum answer length in tokens",
                        "default": config.generation.max_tokens,
                        "minimum": 1
                    }
                },
                "required": ["question"]
            }),
        },
        ToolDefinition {
            name: "mail_status".to_string(),
            description: "Index status: email count, last update time and vector store health.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: "mail_ingestions".to_string(),
            description: "List ingestion runs, newest first.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of runs (default: 20)",
                        "default": DEFAULT_INGESTION_LIMIT,
                        "minimum": 1
                    }
                }
            }),
        },
    ]
}

/// Handle a tool call
pub async fn handle_tool_call(
    name: &str,
    arguments: &HashMap<String, Value>,
    ctx: &ToolContext<'_>,
) -> ToolResult {
    match name {
        "mail_search" => handle_search(arguments, ctx).await,
        "mail_ask" => handle_ask(arguments, ctx).await,
        "mail_status" => handle_status(ctx).await,
        "mail_ingestions" => handle_ingestions(arguments, ctx).await,
        _ => ToolResult::error(format!("Unknown tool: {}", name)),
    }
}

fn required_string(arguments: &HashMap<String, Value>, key: &str) -> Option<String> {
    match arguments.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn limit_argument(arguments: &HashMap<String, Value>, config: &Config) -> usize {
    arguments
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| (v as usize).clamp(1, config.query.max_results))
        .unwrap_or(config.query.default_k)
}

fn format_email(out: &mut String, index: usize, r: &ScoredEmail) {
    out.push_str(&format!(
        "## [{}] {} (distance: {:.3})\n",
        index, r.subject, r.score
    ));
    out.push_str(&format!("**From:** {}\n", r.sender));
    out.push_str(&format!("**Received:** {}\n", r.received_dt));
    if !r.weblink.is_empty() {
        out.push_str(&format!("**Link:** {}\n", r.weblink));
    }
    out.push_str(&format!("**Message ID:** {}\n", r.message_id));
    out.push_str("\n```\n");
    out.push_str(&r.snippet);
    out.push_str("\n```\n\n");
}

/// Handle mail_search tool
async fn handle_search(arguments: &HashMap<String, Value>, ctx: &ToolContext<'_>) -> ToolResult {
    let query = match required_string(arguments, "query") {
        Some(q) => q,
        None => return ToolResult::error("Missing required parameter: query"),
    };
    let limit = limit_argument(arguments, ctx.config);

    match search_timed(
        ctx.db,
        ctx.store,
        ctx.embedder,
        &query,
        limit,
        ctx.config.query.snippet_chars,
    )
    .await
    {
        Ok(outcome) => {
            if outcome.results.is_empty() {
                return ToolResult::text("No matching emails found.");
            }

            let mut output = format!("Found {} emails:\n\n", outcome.results.len());
            for (i, r) in outcome.results.iter().enumerate() {
                format_email(&mut output, i + 1, r);
            }
            ToolResult::text(output)
        }
        Err(e) => {
            error!("mail_search failed: {}", e);
            ToolResult::error(format!("Search failed: {}", e))
        }
    }
}

/// Handle mail_ask tool
async fn handle_ask(arguments: &HashMap<String, Value>, ctx: &ToolContext<'_>) -> ToolResult {
    let question = match required_string(arguments, "question") {
        Some(q) => q,
        None => return ToolResult::error("Missing required parameter: question"),
    };
    let limit = limit_argument(arguments, ctx.config);
    let max_tokens = arguments
        .get("max_tokens")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(ctx.config.generation.max_tokens);

    let mut request = AskRequest::new(question, limit, max_tokens);
    request.snippet_chars = ctx.config.query.snippet_chars;

    // Tool results are returned whole; streamed fragments are discarded
    let mut discard = |_: &str| {};
    match cmd_ask(
        ctx.db,
        ctx.store,
        ctx.embedder,
        ctx.generator,
        request,
        &mut discard,
    )
    .await
    {
        Ok(outcome) => {
            if outcome.no_matches {
                return ToolResult::text(outcome.answer);
            }

            let mut output = String::new();
            output.push_str(&outcome.answer);
            output.push_str("\n\n---\n\n# Sources\n\n");
            for (i, r) in outcome.sources.iter().enumerate() {
                format_email(&mut output, i + 1, r);
            }
            output.push_str(&format!("Total: {:.0} ms\n", outcome.total_ms));

            if outcome.generation_error.is_some() {
                ToolResult::error(output)
            } else {
                ToolResult::text(output)
            }
        }
        Err(e) => {
            error!("mail_ask failed: {}", e);
            ToolResult::error(format!("Ask failed: {}", e))
        }
    }
}

/// Handle mail_status tool
async fn handle_status(ctx: &ToolContext<'_>) -> ToolResult {
    match cmd_status(ctx.config, ctx.db, ctx.store).await {
        Ok(status) => {
            let output = format!(
                r#"Mail Index Status:

**Emails:** {}
**Last updated:** {}
**Ingestion runs:** {}

**Vector store:** {}
- Status: {}
- Vectors: {}

**Embedding Model:** {}
**Generation Model:** {}"#,
                status.indexed_count,
                status.last_updated.as_deref().unwrap_or("never"),
                status.ingestion_count,
                status.vector_store,
                if status.vector_store_connected {
                    "Connected"
                } else {
                    "Not connected"
                },
                status.vector_count,
                status.embedding_model,
                status.generation_model,
            );
            ToolResult::text(output)
        }
        Err(e) => ToolResult::error(format!("Failed to get status: {}", e)),
    }
}

/// Handle mail_ingestions tool
async fn handle_ingestions(
    arguments: &HashMap<String, Value>,
    ctx: &ToolContext<'_>,
) -> ToolResult {
    let limit = arguments
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_INGESTION_LIMIT);

    match cmd_list_ingestions(ctx.db, limit).await {
        Ok(runs) => {
            if runs.is_empty() {
                return ToolResult::text(
                    "No ingestions yet. Use 'mailrag ingest' or 'mailrag sync' to add mail.",
                );
            }

            let mut output = format!("Ingestion Runs ({}):\n\n", runs.len());
            for run in &runs {
                output.push_str(&format!(
                    "- **{}** [{}]\n  - Label: {}\n  - Emails: {}\n  - Created: {}\n\n",
                    run.ingestion_id, run.mode, run.label, run.email_count, run.created_at
                ));
            }
            ToolResult::text(output)
        }
        Err(e) => ToolResult::error(format!("Failed to list ingestions: {}", e)),
    }
}
