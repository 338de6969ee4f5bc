//! hearthside conversation library
//!
//! This library provides a conversation agent for smart homes backed by a
//! locally hosted LLM: home state capture and trimming, system prompt
//! templating, option validation, and the Ollama generate exchange.
//!
//! A turn flows `home` -> `prompt` -> `client`, driven by
//! [`agent::ConversationAgent`] under the settings in
//! [`config::SharedSettings`].

pub mod agent;
pub mod client;
pub mod config;
pub mod home;
pub mod prompt;
