//! 核心层：错误类型、Timeout Guard、故障收口与会话协调

pub mod coordinator;
pub mod error;
pub mod recovery;
pub mod timeout;

pub use coordinator::{new_thread_id, SessionCoordinator};
pub use error::{ErrorClass, SidekickError};
pub use recovery::{
    diagnostic, FaultClassifier, FaultContainment, RecoveryHandler, RecoveryOutcome,
    ResourceRestartHandler,
};
pub use timeout::{try_with_timeout, with_timeout, TimeoutGuard};
