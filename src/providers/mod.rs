//! Providers module - the model boundary
//!
//! This module defines the `LLMProvider` trait and the request/response
//! types shared by every model client. Concrete clients live outside this
//! crate; the runtime only wraps them, e.g. in a [`RetryProvider`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clawloop::providers::{ChatOptions, LLMProvider, RetryProvider};
//! use clawloop::session::Message;
//!
//! async fn example(client: Arc<dyn LLMProvider>) {
//!     let provider = RetryProvider::new(client).with_max_retries(2);
//!     let messages = vec![Message::user("Hello!")];
//!     let options = ChatOptions::new().with_max_tokens(1000);
//!
//!     let response = provider.chat(messages, vec![], None, options).await.unwrap();
//!     println!("Response: {}", response.content);
//! }
//! ```

pub mod retry;
mod types;

pub use retry::RetryProvider;
pub use types::{
    ChatOptions, LLMProvider, LLMResponse, LLMToolCall, StreamEvent, ToolDefinition, Usage,
};
