//! Safety layer: decides which candidates may be removed.

mod guard;
mod keep;
mod vcs;

pub use guard::{Protection, ProtectionReason, SafetyGuard};
pub use keep::{KeepPolicy, KEEP_MARKER};
pub use vcs::{GitStatusReader, VcsError, VcsStatus};
