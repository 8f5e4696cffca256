pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod media;
pub mod playlist;
pub mod scheduler;
pub mod sink;
pub mod tasks {
    pub mod control;
    pub mod engine;
    pub mod files;
}

pub use error::{Error, LoadError};
pub use tasks::engine::{EngineHandle, EngineOptions, EngineStatus, MediaCycleEngine};
