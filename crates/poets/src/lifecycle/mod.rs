//! Request lifecycle: status enums, kinds and the transition rules.

mod kind;
mod machine;
mod status;

pub use kind::{ArtifactKind, RequestKind};
pub use machine::{Claim, Lifecycle, RetryPolicy, TransitionError};
pub use status::{ArtifactStatus, LifecycleStatus, ParseStatusError, Stage};
