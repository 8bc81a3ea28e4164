//! Prompt templates
//!
//! Stage prompts are `.pmt` Handlebars templates embedded in the binary.
//! A user directory may override any of them by name:
//! 1. `{user_dir}/{name}.pmt`
//! 2. Embedded fallback

pub mod embedded;
mod builder;

pub use builder::{HandlebarsPromptBuilder, PromptData};

use eyre::Result;

use crate::capability::StageKind;
use crate::domain::StageContext;

/// Maps a stage and its context to prompt text
pub trait PromptBuilder: Send + Sync {
    fn build(&self, stage: StageKind, context: &StageContext) -> Result<String>;
}
