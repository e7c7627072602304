//! Diagnostic pool integration tests

use std::time::Duration;

use slabpool::diagnostics::Violation;
use slabpool::{DiagnosticPool, PoolError, SlabPool};

const BLOCK_SIZE: usize = 4096;

fn strict_pool() -> DiagnosticPool {
    DiagnosticPool::new(SlabPool::new(BLOCK_SIZE, 8))
}

fn lenient_pool() -> DiagnosticPool {
    DiagnosticPool::with_late_return(SlabPool::new(BLOCK_SIZE, 8))
}

#[test]
fn test_clean_shutdown_never_fails_in_either_mode() {
    for pool in [strict_pool(), lenient_pool()] {
        let block = pool.rent(64).unwrap();
        drop(block);
        pool.dispose().unwrap();
    }
}

#[test]
fn test_strict_dispose_identifies_outstanding_leases() {
    let pool = strict_pool();
    let _one = pool.rent(64).unwrap();
    let _two = pool.rent(64).unwrap();

    let err = pool.dispose().unwrap_err();
    let report = match err {
        PoolError::Violations { report } => report,
        other => panic!("expected violations, got {other:?}"),
    };
    assert_eq!(report.len(), 2);
    assert!(report
        .violations()
        .iter()
        .all(|v| matches!(v, Violation::Leak { .. })));
    // Leak reports carry the rent call-sites.
    assert!(report.to_string().contains("diagnostics_tests.rs"));
}

#[test]
fn test_lenient_dispose_tolerates_outstanding_leases() {
    let pool = lenient_pool();
    let block = pool.rent(64).unwrap();

    pool.dispose().unwrap();

    // Late return after disposal: no violation, lease drains.
    drop(block);
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_drain_completes_when_leases_return() {
    let pool = lenient_pool();
    let block = pool.rent(64).unwrap();
    let drainer = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.await_all_returned(Duration::from_secs(5)).await })
    };

    // Give the drain a chance to start waiting before the return.
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(block);

    drainer.await.unwrap().unwrap();
    pool.dispose().unwrap();
}

#[tokio::test]
async fn test_drain_timeout_names_missing_leases() {
    let pool = lenient_pool();
    let _held = pool.rent(64).unwrap();

    let err = pool
        .await_all_returned(Duration::from_millis(50))
        .await
        .unwrap_err();
    match err {
        PoolError::DrainTimeout { outstanding } => {
            assert_eq!(outstanding.0.len(), 1);
            assert!(outstanding.to_string().contains("diagnostics_tests.rs"));
        }
        other => panic!("expected drain timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_drain_sees_returns_from_other_tasks() {
    let pool = lenient_pool();
    let blocks: Vec<_> = (0..4).map(|_| pool.rent(64).unwrap()).collect();

    for block in blocks {
        let pool_for_task = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(block);
            drop(pool_for_task);
        });
    }

    pool.await_all_returned(Duration::from_secs(5)).await.unwrap();
    pool.dispose().unwrap();
}

#[test]
fn test_double_dispose_is_one_violation() {
    let pool = strict_pool();
    let mut block = pool.rent(64).unwrap();
    block.dispose();
    block.dispose();

    let err = pool.dispose().unwrap_err();
    match err {
        PoolError::Violations { report } => {
            assert_eq!(report.len(), 1);
            assert!(matches!(
                report.violations()[0],
                Violation::DoubleDispose { .. }
            ));
        }
        other => panic!("expected violations, got {other:?}"),
    }
}

#[test]
fn test_pin_discipline_end_to_end() {
    let pool = strict_pool();
    let mut block = pool.rent(64).unwrap();

    let first = block.pin().unwrap();
    let second = block.pin().unwrap();
    assert_eq!(first, second);
    block.unpin();
    // One pin still active after a single unpin.
    assert_eq!(block.pin_count(), 1);
    block.unpin();

    // Count is back to zero; a further unpin is a violation.
    block.unpin();
    block.dispose();

    let err = pool.dispose().unwrap_err();
    match err {
        PoolError::Violations { report } => {
            assert_eq!(report.len(), 1);
            assert!(matches!(
                report.violations()[0],
                Violation::UnbalancedUnpin { .. }
            ));
        }
        other => panic!("expected violations, got {other:?}"),
    }
}

#[test]
fn test_slab_teardown_is_detected_by_access_guards() {
    let inner = SlabPool::new(BLOCK_SIZE, 8);
    let pool = DiagnosticPool::with_late_return(inner.clone());
    let block = pool.rent(64).unwrap();

    // Tear the slabs down under the live lease.
    inner.dispose();

    assert!(matches!(
        block.memory(),
        Err(PoolError::SlabDisposed { .. })
    ));
    assert_eq!(pool.violation_count(), 1);
}
