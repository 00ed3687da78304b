//! CLI commands implementation

pub mod ask;
pub mod clear;
pub mod ingest;
pub mod init;
pub mod query;
pub mod reconcile;
pub mod reindex;
pub mod status;
pub mod sync;

pub use ask::*;
pub use clear::*;
pub use ingest::*;
pub use init::*;
pub use query::*;
pub use reconcile::*;
pub use reindex::*;
pub use status::*;
pub use sync::*;
