//! 核心层：错误分类、优雅关闭

pub mod error;
pub mod shutdown;

pub use error::{DeskError, ValidationError};
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
#[cfg(feature = "async-sqlite")]
pub use shutdown::SqliteStoreCleanup;
