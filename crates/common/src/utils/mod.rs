//! Concurrency helpers shared by the cluster and the churn simulator.
//!
//! - [`Group`] fans work out to one task per item and folds the failures
//!   into a single error.
//! - [`poll_immediate`] and [`poll_immediate_no_error`] turn eventually
//!   consistent remote state into something a test can wait on.

mod group;
mod poll;

pub use group::{Group, GroupError};
pub use poll::{eventually, poll_immediate, poll_immediate_no_error};
