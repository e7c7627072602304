//! Instrumented pool diagnostics
//!
//! Turns silent pool misuse into loud, attributable failures: leak
//! detection, double-dispose and pin-discipline checks, and an async drain
//! for graceful shutdown.

mod block;
mod pool;
mod violation;

pub use block::DiagnosticBlock;
pub use pool::DiagnosticPool;
pub use violation::{LeaseList, LeaseSite, Violation, ViolationReport};
