/// Business logic services layer
pub mod alerts;
pub mod engine;
pub mod runtime;

pub use alerts::{AlertDecision, AlertPolicy, AlertState};
pub use engine::{Effect, EngineEvent, ReconciliationEngine, TransportSource};
pub use runtime::{run_engine, spawn_clock, spawn_poller};
