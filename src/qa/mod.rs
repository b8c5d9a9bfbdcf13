//! Caption question answering against a chat-completions API.

pub mod client;
pub mod processor;
pub mod prompt;

pub use client::{ApiError, CaptionAnswerer, ChatClient};
pub use processor::{extract_caption, load_caption_records, CaptionEntry, CaptionProcessor};
pub use prompt::QUESTIONS;
