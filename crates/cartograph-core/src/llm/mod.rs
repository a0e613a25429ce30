//! LLM integration - OpenRouter API
//!
//! This module provides:
//! - OpenRouter HTTP client for chat completions
//! - Request/response types matching OpenAI-compatible API
//! - The flag-to-field mapper used as inference fallback

mod client;
mod mapper;
mod types;

pub use client::LlmClient;
pub use mapper::{LlmFieldMapper, extract_json_object};
pub use types::{
    ChatRequest, ChatResponse, Choice, FinishReason, LlmResponse, Message, MessageRole, Usage,
};
