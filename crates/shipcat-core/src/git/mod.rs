//! Local working copies of deployment repositories.
//!
//! - [`SourceControlOperator`] clones, branches, rewrites, verifies and pushes
//! - [`SharedOperator`] serializes async callers onto one operator
//! - [`lock_workdir`] guards a working-copy directory across operators

mod lock;
mod operator;
mod remote;
mod shared;

pub use lock::lock_workdir;
pub use operator::{ImageTagChange, PushOutcome, SourceControlOperator};
pub use remote::{GitCredentials, RemoteRepository, Storage};
pub use shared::SharedOperator;

#[cfg(test)]
mod tests;
