//! Logical clock behind the `rowsync_timestamp()` SQL function.
//!
//! Values are wall-clock microseconds, forced strictly increasing within the
//! process so two changes never share a timestamp.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// SQL name of the clock function.
pub const TIMESTAMP_FUNCTION: &str = "rowsync_timestamp";

static LAST: AtomicI64 = AtomicI64::new(0);

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Returns the next clock value: `max(now, last + 1)`.
pub fn next_timestamp() -> i64 {
    let now = now_micros();
    let mut last = LAST.load(Ordering::Relaxed);
    loop {
        let next = now.max(last.saturating_add(1));
        match LAST.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Registers `rowsync_timestamp()` on a connection.
///
/// # Errors
///
/// Returns the SQLite error if registration fails.
pub fn register(connection: &Connection) -> rusqlite::Result<()> {
    connection.create_scalar_function(
        TIMESTAMP_FUNCTION,
        0,
        FunctionFlags::SQLITE_UTF8,
        |_| Ok(next_timestamp()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn strictly_increasing_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    let values: Vec<i64> = (0..1000).map(|_| next_timestamp()).collect();
                    assert!(values.windows(2).all(|w| w[0] < w[1]));
                    values
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for v in handle.join().unwrap() {
                assert!(seen.insert(v), "duplicate timestamp {v}");
            }
        }
    }

    #[test]
    fn sql_function_is_registered() {
        let conn = Connection::open_in_memory().unwrap();
        register(&conn).unwrap();
        let a: i64 = conn
            .query_row("SELECT rowsync_timestamp()", [], |r| r.get(0))
            .unwrap();
        let b: i64 = conn
            .query_row("SELECT rowsync_timestamp()", [], |r| r.get(0))
            .unwrap();
        assert!(b > a);
    }
}
