//! blinkd — the Blink engine and its daemon plumbing.
//!
//! The engine is a library so hosts other than the daemon (and the
//! integration tests) can drive it with their own radio and stores.

pub mod console;
pub mod dispatch;
pub mod engine;
pub mod radio;
pub mod scheduler;
pub mod seed;

pub use dispatch::{Disposition, DropReason, Router};
pub use engine::{Engine, EngineError};
pub use radio::{Observation, Radio, RadioError};
pub use scheduler::Scheduler;
