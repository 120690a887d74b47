//! Prompt templates and rendering

mod embedded;
mod loader;

pub use embedded::{TEMPLATES, completion_footer};
pub use loader::{PromptContext, PromptLoader};
