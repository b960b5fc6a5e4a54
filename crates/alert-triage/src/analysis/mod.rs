//! Turning alerts into analyst narratives.
//!
//! [`AnalysisRequest`] extracts the fields the model sees, [`PromptManager`]
//! renders them, and [`ChatAnalyst`] sends the prompt to a chat-completions API.

mod analyst;
mod prompts;
pub mod request;
mod transcript;

pub use analyst::{
    AnalysisResult, Analyst, ChatAnalyst, ChatMessage, ChatRequest, ChatRole,
};
pub use prompts::{PromptManager, SYSTEM_PROMPT};
pub use request::{AnalysisRequest, Technique, NOT_AVAILABLE};
pub use transcript::{NdjsonTranscript, NoTranscript, Transcript};
