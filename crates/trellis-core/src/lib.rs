//! Engine crate: the durable workflow scheduler built over `trellis-db`.
//!
//! Business logic lives here; the store enforces the invariants this crate
//! assumes (transition legality, optimistic locking) but never relies on
//! this crate to hold them up. See each module for its piece of the
//! scheduling pipeline: authoring and materialization (`plan`), attempt
//! transitions (`state`), the run-execution loop (`executor`), routing a
//! completed or failed attempt to its next edge (`routing`), bounded
//! prompt assembly (`context`), dynamic fan-out and join barriers
//! (`fanout`), retry/error-handler scheduling (`retry`), the agent runtime
//! boundary (`provider`), the optional Git worktree contract (`worktree`),
//! and operator control actions over a run's lifecycle (`control`).

pub mod config;
pub mod context;
pub mod control;
pub mod errors;
pub mod executor;
pub mod fanout;
pub mod plan;
pub mod provider;
pub mod retry;
pub mod routing;
pub mod state;
pub mod worktree;

pub use config::EngineConfig;
pub use errors::{ControlError, FanoutError, PlannerError, ProviderError, RoutingError, TransitionError};
pub use executor::{ExecutorConfig, ExecutorResult, execute_run};
