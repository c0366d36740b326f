pub mod calls;
pub mod content;
pub mod continuity;
pub mod events;
pub mod models;
pub mod runs;
pub mod slides;
pub mod templates;
pub mod verdicts;
