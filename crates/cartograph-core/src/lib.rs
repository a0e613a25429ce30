//! Cartograph Core Library
//!
//! This crate compiles heterogeneous extraction artifacts describing a
//! command-line product into a single relational knowledge graph:
//! - Artifact and schema ingestion (commands, flags, resources, summaries)
//! - Command classification (view / do / summarize path grammars)
//! - Flag-to-field matching (deterministic rules + cached LLM fallback)
//! - Multi-hop filter path resolution over the relationship graph
//! - Resource similarity scoring exposed as derived SQL views

pub mod artifact;
pub mod classify;
pub mod compile;
pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod matcher;
pub mod paths;
pub mod scan;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::compile::{CompileOptions, CompileReport};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::storage::{Database, DatabaseConfig};
}
