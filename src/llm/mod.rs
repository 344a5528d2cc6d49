// Provider clients

pub mod provider;
pub mod gemini;
pub mod huggingface;

pub use provider::*;
