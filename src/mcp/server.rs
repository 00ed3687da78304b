//! MCP stdio server implementation

use super::tools::{get_tool_definitions, handle_tool_call, ToolContext};
use super::types::{McpError, McpMessage, McpNotification, McpRequest, McpResponse};
use crate::config::Config;
use crate::embed::Embedder;
use crate::generate::Generator;
use crate::meta::MetaDb;
use crate::store::VectorStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use tracing::{debug, error, info, warn};

/// MCP Server implementation
pub struct McpServer {
    config: Config,
    db: MetaDb,
    store: Box<dyn VectorStore>,
    embedder: Box<dyn Embedder>,
    generator: Box<dyn Generator>,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(
        config: Config,
        db: MetaDb,
        store: Box<dyn VectorStore>,
        embedder: Box<dyn Embedder>,
        generator: Box<dyn Generator>,
    ) -> Self {
        Self {
            config,
            db,
            store,
            embedder,
            generator,
        }
    }

    /// Run the MCP server loop over stdio
    pub async fn run(&self) -> Result<(), McpError> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        info!("MCP server starting on stdio");
        self.serve(stdin.lock(), stdout.lock()).await?;
        info!("MCP server shutting down");
        Ok(())
    }

    /// Serve newline-delimited JSON-RPC messages until `input` is exhausted
    pub async fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> Result<(), McpError> {
        for line in input.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("Failed to read line: {}", e);
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            debug!("Received: {}", line);

            let message: McpMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(e) => {
                    error!("Failed to parse message: {}", e);
                    let response =
                        McpResponse::error(None, McpError::parse_error(format!("Parse error: {}", e)));
                    writeln!(output, "{}", serde_json::to_string(&response)?)?;
                    output.flush()?;
                    continue;
                }
            };

            match message {
                McpMessage::Request(req) => {
                    let response = self.handle_request(req).await;
                    let response_str = serde_json::to_string(&response)?;
                    debug!("Sending: {}", response_str);
                    writeln!(output, "{}", response_str)?;
                    output.flush()?;
                }
                McpMessage::Notification(notif) => {
                    self.handle_notification(notif);
                }
                McpMessage::Response(resp) => {
                    warn!(
                        id = ?resp.id,
                        is_error = resp.error.is_some(),
                        "Unexpected response message received"
                    );
                }
            }
        }

        Ok(())
    }

    /// Handle an MCP request
    async fn handle_request(&self, request: McpRequest) -> McpResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => McpResponse::success(id, json!({})),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "resources/list" => McpResponse::success(id, json!({ "resources": [] })),
            "prompts/list" => McpResponse::success(id, json!({ "prompts": [] })),
            _ => McpResponse::error(id, McpError::method_not_found(&request.method)),
        }
    }

    /// Handle notifications (fire-and-forget)
    fn handle_notification(&self, notification: McpNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                info!("Client initialized");
            }
            "notifications/cancelled" => {
                info!("Request cancelled");
            }
            _ => {
                debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> McpResponse {
        McpResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    },
                    "resources": {
                        "subscribe": false,
                        "listChanged": false
                    },
                    "prompts": {
                        "listChanged": false
                    }
                },
                "serverInfo": {
                    "name": "mailrag",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Option<Value>) -> McpResponse {
        let tools = get_tool_definitions(&self.config);
        McpResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> McpResponse {
        let params = match params {
            Some(p) => p,
            None => return McpResponse::error(id, McpError::invalid_params("Missing params")),
        };

        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => return McpResponse::error(id, McpError::invalid_params("Missing tool name")),
        };

        let arguments: HashMap<String, Value> = params
            .get("arguments")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        debug!("Calling tool: {} with args: {:?}", name, arguments);

        let ctx = ToolContext {
            config: &self.config,
            db: &self.db,
            store: self.store.as_ref(),
            embedder: self.embedder.as_ref(),
            generator: self.generator.as_ref(),
        };
        let result = handle_tool_call(&name, &arguments, &ctx).await;

        match serde_json::to_value(&result) {
            Ok(value) => McpResponse::success(id, value),
            Err(e) => McpResponse::error(id, McpError::internal_error(e.to_string())),
        }
    }
}
