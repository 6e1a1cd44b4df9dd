//! LiveKit client engine core for constrained devices.
//!
//! See [`engine::Engine`] for the public surface, [`reducer`] for the state
//! machine, and [`config::EngineConfig`] for the option set.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod media;
pub mod observer;
pub mod peer;
pub mod queue;
pub mod reducer;
pub mod render;
pub mod signal;
pub mod track;

pub use engine::Engine;
pub use error::EngineError;
pub use observer::EngineObserver;
pub use reducer::ExternalState;
