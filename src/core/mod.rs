//! 核心编排层：错误类型、状态分类、反应引擎、分支跟踪、主控循环与关闭

pub mod branch_tracker;
pub mod builder;
pub mod classifier;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod reaction;
pub mod shutdown;
pub mod triggers;

pub use branch_tracker::{BranchAdvance, BranchTarget, BranchTracker};
pub use builder::LifecycleBuilder;
pub use classifier::{classify, Observation, PrSignals, Signals};
pub use error::{EventLogError, MailboxError, StorageError};
pub use lifecycle::{LifecycleManager, ProjectContext, TickReport};
pub use reaction::{Firing, Reaction, ReactionCounter, ReactionCounters, ReactionEngine};
pub use shutdown::{MailboxPurgeCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use triggers::TriggerTable;
