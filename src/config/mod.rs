//! Configuration module for the pipeline.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{ExtractorPrompts, GraderPrompts, Prompts};
pub use settings::{
    ConcurrencySettings, GeneralSettings, GradingSettings, RetrySettings, Settings,
    SplitterSettings, StorageSettings, VoiceSettings,
};
