//! Row fan-out for batch inserts and queries.
//!
//! Rows are spread over a rayon pool sized by the caller's concurrency hint.
//! Small batches stay on the calling thread: spinning up workers costs more
//! than it saves when each would get only a handful of rows.

use crate::config;
use rayon::prelude::*;

/// Number of workers to use for `rows` rows under a concurrency hint (0 = all cores).
pub(crate) fn worker_count(rows: usize, concurrency: usize) -> usize {
    let threads = if concurrency == 0 {
        rayon::current_num_threads()
    } else {
        concurrency
    };
    if rows <= threads * config::ROWS_PER_THREAD {
        1
    } else {
        threads
    }
}

/// Applies `f` to every row index in `0..rows`, returning outputs in row order.
pub(crate) fn map_rows<T, F>(rows: usize, concurrency: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    let workers = worker_count(rows, concurrency);
    if workers <= 1 {
        return (0..rows).map(f).collect();
    }
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| (0..rows).into_par_iter().map(&f).collect()),
        Err(e) => {
            tracing::warn!("Failed to build a {}-thread pool, running serially: {}", workers, e);
            (0..rows).map(f).collect()
        }
    }
}
