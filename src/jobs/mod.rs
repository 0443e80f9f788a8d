//! Jobs on the remote service.
//!
//! - `state`: job types, remote status mapping, the `Job` state machine
//! - `lifecycle`: start (create remotely) and poll to a terminal state

pub mod lifecycle;
pub mod state;

pub use lifecycle::{compose_prompt, pick_prompt};
pub use state::{Job, JobStatus, JobType, StateTransition};
