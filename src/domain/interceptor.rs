//! Table-dependency tracking around query execution.
//!
//! [`intercept`] runs a handler future inside a task-local scope that
//! accumulates every storage table the handler reports touching via
//! [`record_table`]. Storage access code calls `record_table` at its
//! query-execution entry point; outside an interception scope the call
//! is a no-op, so the hook can be left in place unconditionally.
//!
//! The scope is task-local: concurrent evaluations never observe each
//! other's table sets. Nested interception is supported — tables
//! recorded inside a nested scope are reported to the outermost caller
//! as well. On failure the gathered tables are discarded.

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;

tokio::task_local! {
    static TOUCHED_TABLES: RefCell<HashSet<String>>;
}

/// Records a storage table read in the active interception scope.
///
/// No-op when called outside [`intercept`].
pub fn record_table(table: &str) {
    let _ = TOUCHED_TABLES.try_with(|tables| {
        tables.borrow_mut().insert(table.to_string());
    });
}

/// Returns `true` when the current task is inside an interception scope.
#[must_use]
pub fn is_intercepting() -> bool {
    TOUCHED_TABLES.try_with(|_| ()).is_ok()
}

/// Runs `future` while recording touched tables into `tables_out`.
///
/// Tables are only committed to `tables_out` when the future resolves
/// to `Ok`; on error the partial set is discarded. When an interception
/// scope is already active on this task, the existing set is shared so
/// the outermost caller also sees tables gathered by nested scopes.
///
/// # Errors
///
/// Propagates the error of the wrapped future unchanged.
pub async fn intercept<F, T, E>(tables_out: &mut HashSet<String>, future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    if is_intercepting() {
        // Nested call: share the active scope's set.
        let result = future.await;
        if result.is_ok() {
            let _ = TOUCHED_TABLES.try_with(|tables| {
                tables_out.extend(tables.borrow().iter().cloned());
            });
        }
        return result;
    }

    let (result, gathered) = TOUCHED_TABLES
        .scope(RefCell::new(HashSet::new()), async {
            let result = future.await;
            let gathered = TOUCHED_TABLES.with(|tables| tables.borrow().clone());
            (result, gathered)
        })
        .await;

    if result.is_ok() {
        tables_out.extend(gathered);
    }
    result
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_tables_touched_by_the_future() {
        let mut tables = HashSet::new();
        let result: Result<u32, ()> = intercept(&mut tables, async {
            record_table("papers");
            record_table("authors");
            Ok(7)
        })
        .await;
        assert_eq!(result, Ok(7));
        assert!(tables.contains("papers"));
        assert!(tables.contains("authors"));
        assert_eq!(tables.len(), 2);
    }

    #[tokio::test]
    async fn record_outside_scope_is_a_noop() {
        record_table("papers");
        assert!(!is_intercepting());
    }

    #[tokio::test]
    async fn failure_discards_gathered_tables() {
        let mut tables = HashSet::new();
        let result: Result<(), &str> = intercept(&mut tables, async {
            record_table("papers");
            Err("query failed")
        })
        .await;
        assert!(result.is_err());
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn nested_scope_reports_to_outermost() {
        let mut outer = HashSet::new();
        let result: Result<(), ()> = intercept(&mut outer, async {
            record_table("outer_table");
            let mut inner = HashSet::new();
            let nested: Result<(), ()> = intercept(&mut inner, async {
                record_table("inner_table");
                Ok(())
            })
            .await;
            assert!(nested.is_ok());
            assert!(inner.contains("inner_table"));
            Ok(())
        })
        .await;
        assert!(result.is_ok());
        assert!(outer.contains("outer_table"));
        assert!(outer.contains("inner_table"));
    }

    #[tokio::test]
    async fn concurrent_tasks_do_not_leak_table_sets() {
        let first = tokio::spawn(async {
            let mut tables = HashSet::new();
            let _: Result<(), ()> = intercept(&mut tables, async {
                record_table("alpha");
                tokio::task::yield_now().await;
                Ok(())
            })
            .await;
            tables
        });
        let second = tokio::spawn(async {
            let mut tables = HashSet::new();
            let _: Result<(), ()> = intercept(&mut tables, async {
                record_table("beta");
                tokio::task::yield_now().await;
                Ok(())
            })
            .await;
            tables
        });

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first.contains("alpha"));
        assert_eq!(second.len(), 1);
        assert!(second.contains("beta"));
    }
}
