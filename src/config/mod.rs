//! Configuration types and loading for llmpress

mod backend;
mod loader;

pub use backend::BackendConfig;
pub use loader::PressConfig;
