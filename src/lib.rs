//! mailrag - A local RAG assistant over your mailbox
//!
//! This crate provides:
//! - Mail normalization and ingestion into SQLite plus a Qdrant collection
//! - Semantic search and grounded answers from a local Ollama model
//! - A Microsoft Graph client for pulling mail
//! - An MCP server over stdio exposing search and ask tools

pub mod commands;
pub mod config;
pub mod embed;
pub mod error;
pub mod generate;
pub mod graph;
pub mod mcp;
pub mod meta;
pub mod normalize;
pub mod progress;
pub mod prompt;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
