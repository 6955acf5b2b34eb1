// State machine module for the remote job lifecycle
//
// The execution service owns every transition; this module only classifies the
// codes it reports and tracks what has been observed for one job.

pub mod lifecycle;
pub mod states;

pub use lifecycle::{LifecycleTransition, Observation, TaskLifecycle};
pub use states::LifecycleStatus;
