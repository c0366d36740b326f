mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, CALL_CAPABILITY, VISION_CAPABILITY};
pub use selectors::{ModelSelection, ModelSelector, SelectionError};
