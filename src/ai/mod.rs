//! AI tagging: backend client, prompt handling, and the pipeline
//! orchestrator that chains vision analysis into text cleanup.

pub mod client;
pub mod pipeline;
pub mod prompt;
