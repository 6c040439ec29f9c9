//! Partitioning helpers for rayon fork-join stages.

use rayon::prelude::*;

/// Multiplier for number of chunks relative to CPU threads.
/// Extra chunks keep threads busy when some chunks finish faster.
pub const CHUNKS_PER_THREAD: usize = 4;

/// Number of work partitions for the current rayon pool.
#[inline]
pub fn default_chunk_count() -> usize {
    rayon::current_num_threads() * CHUNKS_PER_THREAD
}

/// Length of each partition when splitting `len` items into at most `chunks` pieces.
/// Never returns zero.
#[inline]
pub fn chunk_len(len: usize, chunks: usize) -> usize {
    assert!(chunks > 0, "chunks must be > 0");
    len.div_ceil(chunks).max(1)
}

/// Maps `f` over `items` in parallel with at most `max_concurrent` items in flight,
/// stopping at the first chunk that contains an error.
///
/// Results keep the order of `items`.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn try_par_map_limited<T, R, E, F>(
    items: &[T],
    max_concurrent: usize,
    f: F,
) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: Send,
    F: Fn(&T) -> Result<R, E> + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(max_concurrent) {
        let chunk_results: Result<Vec<R>, E> = chunk.par_iter().map(&f).collect();
        results.extend(chunk_results?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_chunk_len_covers_all_items() {
        assert_eq!(chunk_len(10, 3), 4);
        assert_eq!(chunk_len(3, 512), 1);
        assert_eq!(chunk_len(0, 8), 1);
    }

    #[test]
    #[should_panic(expected = "chunks must be > 0")]
    fn test_chunk_len_zero_panics() {
        chunk_len(10, 0);
    }

    #[test]
    fn test_default_chunk_count_scales_with_pool() {
        assert_eq!(
            default_chunk_count(),
            rayon::current_num_threads() * CHUNKS_PER_THREAD
        );
    }

    #[test]
    fn test_try_par_map_limited_ok_preserves_order() {
        let items: Vec<i32> = (0..10).collect();
        let result: Result<Vec<i32>, &str> = try_par_map_limited(&items, 3, |&x| Ok(x * 2));
        assert_eq!(result.unwrap(), vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18]);
    }

    #[test]
    fn test_try_par_map_limited_err() {
        let items: Vec<i32> = (0..10).collect();
        let result: Result<Vec<i32>, String> = try_par_map_limited(&items, 3, |&x| {
            if x == 5 {
                Err("bad".to_string())
            } else {
                Ok(x)
            }
        });
        assert_eq!(result.unwrap_err(), "bad");
    }

    #[test]
    fn test_try_par_map_limited_concurrency_cap() {
        let items: Vec<i32> = (0..12).collect();
        let in_flight = AtomicUsize::new(0);
        let max_observed = AtomicUsize::new(0);

        let result: Result<Vec<i32>, ()> = try_par_map_limited(&items, 2, |&x| {
            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_observed.fetch_max(current, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(x)
        });

        assert!(result.is_ok());
        let max = max_observed.load(Ordering::SeqCst);
        assert!(max <= 2, "max in-flight was {max}, expected <= 2");
    }
}
