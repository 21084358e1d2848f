pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::MementoConfig;
pub use error::{MementoError, Result, ValidationError};
pub use events::MemoryEvent;
pub use types::*;
