//! Default values for configuration

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default collection name
pub fn default_collection_name() -> String {
    "mailrag_emails".to_string()
}

/// Default embedding backend kind
pub fn default_embedding_backend() -> String {
    "local".to_string()
}

/// Default embedding model (CPU friendly, 384 dimensions)
pub fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

/// Default embedding dimension
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default embedding sidecar URL (used when backend = "http")
pub fn default_embedding_backend_url() -> String {
    std::env::var("MAILRAG_EMBEDDING_BACKEND_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default Ollama URL
pub fn default_ollama_url() -> String {
    std::env::var("MAILRAG_OLLAMA_URL").unwrap_or_else(|_| "http://127.0.0.1:11434".to_string())
}

/// Default generation model
pub fn default_generation_model() -> String {
    "mistral".to_string()
}

/// Default token budget for an answer
pub fn default_generation_max_tokens() -> usize {
    220
}

/// Default generation timeout in seconds
pub fn default_generation_timeout() -> u64 {
    120
}

/// Default resource sampling interval during generation
pub fn default_sample_interval_ms() -> u64 {
    200
}

/// Default Microsoft Graph API root
pub fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

/// Default environment variable holding the Graph access token
pub fn default_graph_token_env() -> String {
    "MAILRAG_GRAPH_TOKEN".to_string()
}

/// Default Graph page size
pub fn default_graph_page_size() -> u32 {
    25
}

/// Default Graph request timeout in seconds
pub fn default_graph_timeout() -> u64 {
    30
}

/// Default number of query results
pub fn default_query_k() -> usize {
    4
}

/// Default maximum query results
pub fn default_query_max_results() -> usize {
    50
}

/// Default snippet length in characters
pub fn default_snippet_chars() -> usize {
    500
}
