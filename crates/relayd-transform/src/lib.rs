pub mod claude2gemini;
pub mod claude2openai;
pub mod claude_passthrough;
pub mod error;
pub mod token_estimate;

pub use error::TransformError;
