//! Failure classification, retry scheduling, and shutdown coordination
//!
//! All external-call failures pass through this module exactly once, at the
//! venue boundary. Upstream code branches only on the three [`ErrorClass`]
//! values, never on raw errors, and no component outside [`RetryPolicy`]
//! retries on its own.

pub mod classify;
pub mod retry;
pub mod shutdown;

pub use classify::{classify, ErrorClass, ErrorRecord};
pub use retry::RetryPolicy;
pub use shutdown::ShutdownCoordinator;
