//! Application layer: the track poller, the sync controller and the engine
//! that wires them to the artwork resolver and the presence session.

pub mod app_paths;
pub mod controller;
pub mod engine;
pub mod events;
pub mod poller;

pub use app_paths::AppPaths;
pub use engine::{start_engine, EngineConfig, EngineDeps, EngineError, EngineHandle};
pub use events::EngineEvent;
pub use poller::{clamp_poll_interval, TrackChanged, TrackPoller};
