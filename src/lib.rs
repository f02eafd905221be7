//! # Search Chat
//!
//! A single-page chat server for a conversational agent that can search the
//! web before answering.
//!
//! This library provides:
//! - An HTTP API with per-session history, credential input and SSE replies
//! - A tool-based agent loop with a bounded number of steps
//! - An OpenAI-compatible chat completions client
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Receive a message via the API
//! 2. Render history, tools and the scratchpad into a prompt
//! 3. Call the LLM, parse its JSON action, execute any tool call
//! 4. Feed results back to the LLM, repeat until it gives a final answer
//!
//! ## Example
//!
//! ```rust,ignore
//! use search_chat::{api, Config};
//!
//! let config = Config::from_env()?;
//! api::serve(config).await?;
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod events;
pub mod history;
pub mod llm;
pub mod session;
pub mod tools;

pub use config::Config;
