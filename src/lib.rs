//! Mediates chat-completion exchanges with OpenAI-compatible models: splits
//! the output into answer and reasoning channels, recovers tool calls written
//! as text, negotiates native tool support, and runs tools until the model
//! answers.

pub mod config;
pub mod llm;
pub mod logging;
pub mod tools;
