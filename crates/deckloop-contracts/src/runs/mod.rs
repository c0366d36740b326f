pub mod attempts;
pub mod manifest;
pub mod summary;
pub mod verdict_log;
