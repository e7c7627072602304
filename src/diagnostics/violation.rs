//! Protocol violation reporting
//!
//! Violations are captured where they happen, often on another thread or
//! after the logical end of a request, and surfaced as one aggregate
//! failure when the diagnostic pool is disposed.

use std::fmt;
use std::panic::Location;

/// Identity of a lease: its id plus the call site that rented it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSite {
    pub id: u64,
    pub rented_at: &'static Location<'static>,
}

impl fmt::Display for LeaseSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block #{} rented at {}", self.id, self.rented_at)
    }
}

/// A misuse of the pool protocol observed by the diagnostic wrapper.
#[derive(Debug, Clone)]
pub enum Violation {
    /// The same lease handle was disposed twice.
    DoubleDispose { lease: LeaseSite },
    /// A lease was disposed while its pin count was still positive.
    DisposeWhilePinned { lease: LeaseSite, pins: usize },
    /// `unpin` was called with no pins outstanding.
    UnbalancedUnpin { lease: LeaseSite },
    /// A lease's memory was accessed after the lease was disposed.
    UseAfterDispose { lease: LeaseSite },
    /// A lease's memory was accessed after its backing slab was disposed.
    SlabDisposed { lease: LeaseSite },
    /// The pool was disposed while this lease was still outstanding.
    Leak { lease: LeaseSite },
}

impl Violation {
    /// The lease this violation is attributed to.
    pub fn lease(&self) -> LeaseSite {
        match self {
            Violation::DoubleDispose { lease }
            | Violation::DisposeWhilePinned { lease, .. }
            | Violation::UnbalancedUnpin { lease }
            | Violation::UseAfterDispose { lease }
            | Violation::SlabDisposed { lease }
            | Violation::Leak { lease } => *lease,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DoubleDispose { lease } => {
                write!(f, "double dispose of {lease}")
            }
            Violation::DisposeWhilePinned { lease, pins } => {
                write!(f, "dispose with {pins} pin(s) outstanding on {lease}")
            }
            Violation::UnbalancedUnpin { lease } => {
                write!(f, "unpin with no pins outstanding on {lease}")
            }
            Violation::UseAfterDispose { lease } => {
                write!(f, "memory access after dispose of {lease}")
            }
            Violation::SlabDisposed { lease } => {
                write!(f, "memory access against a disposed slab for {lease}")
            }
            Violation::Leak { lease } => {
                write!(f, "pool disposed while {lease} was still outstanding")
            }
        }
    }
}

/// Outstanding leases, formatted for leak and drain-timeout reports.
#[derive(Debug, Clone, Default)]
pub struct LeaseList(pub Vec<LeaseSite>);

impl fmt::Display for LeaseList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "none");
        }
        for (i, lease) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{lease}")?;
        }
        Ok(())
    }
}

/// Aggregate of every violation captured over a diagnostic pool's lifetime.
#[derive(Debug, Clone)]
pub struct ViolationReport {
    violations: Vec<Violation>,
}

impl ViolationReport {
    pub(crate) fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ViolationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} pool protocol violation(s):", self.violations.len())?;
        for violation in &self.violations {
            writeln!(f, "  - {violation}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn site(id: u64) -> LeaseSite {
        LeaseSite {
            id,
            rented_at: Location::caller(),
        }
    }

    #[test]
    fn test_violation_attribution() {
        let lease = site(7);
        let violation = Violation::DoubleDispose { lease };
        assert_eq!(violation.lease(), lease);
        assert!(violation.to_string().contains("block #7"));
    }

    #[test]
    fn test_report_lists_every_violation() {
        let report = ViolationReport::new(vec![
            Violation::Leak { lease: site(1) },
            Violation::UnbalancedUnpin { lease: site(2) },
        ]);
        let text = report.to_string();
        assert!(text.starts_with("2 pool protocol violation(s):"));
        assert!(text.contains("block #1"));
        assert!(text.contains("block #2"));
    }
}
