//! VM provider backends
//!
//! The pool consumes the [`Provider`] trait; concrete cloud and local
//! virtualization shims live out-of-tree and register themselves by
//! slot name. [`MockProvider`] ships here for tests.

mod mock;
mod traits;

pub use mock::MockProvider;
pub use traits::{CreateInstance, Instance, InstanceStatus, Provider};
