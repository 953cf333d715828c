//! # OutPost Scheduler
//!
//! The automation engine: independent periodic phase loops per tenant
//! (collect, generate, post), each a cooperative tokio task with a jittered
//! cancellable ticker. Loops gate on working hours and daily caps, dispatch
//! approved tasks through the rotation selector, and never crash the
//! process; unexpected errors are logged and backed off at the loop
//! boundary.

pub mod engine;
pub mod hours;
pub mod phases;
pub mod registry;
pub mod selector;
pub mod stats;
pub mod ticker;

pub use engine::{AutomationEngine, EngineStatus, RunningPhases, StartOutcome, StopOutcome};
pub use phases::{PhaseRunner, StepReport};
pub use registry::{LoopHandle, SchedulerRegistry};
pub use selector::{BatchReport, Dispatcher};
pub use stats::{StatsAggregator, TodayCounters};
pub use ticker::{sleep_unless_stopped, Ticker};
