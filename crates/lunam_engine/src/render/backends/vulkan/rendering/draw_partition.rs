//! Splitting draw lists across render threads

use std::ops::Range;

/// Contiguous slice of `num_entities` owned by render thread `id`
///
/// Buckets differ in size by at most one; the first `num_entities %
/// num_threads` buckets take the extra entity.
///
/// # Panics
/// If `num_threads` is zero or `id >= num_threads`.
pub fn compute_render_bucket_range(id: usize, num_entities: usize, num_threads: usize) -> Range<usize> {
    assert!(id < num_threads, "thread id {id} out of range for {num_threads} threads");
    let base = num_entities / num_threads;
    let extra = num_entities % num_threads;
    let begin = base * id + id.min(extra);
    let end = begin + base + usize::from(id < extra);
    debug_assert!(begin <= end && end <= num_entities);
    begin..end
}

/// Visit the part of `chunks` that thread `id` is responsible for
///
/// The chunks are treated as one list; `callback` receives the index within
/// the chunk and the element.
pub fn partitioned_for_each<T, F>(id: usize, num_threads: usize, chunks: &[&[T]], mut callback: F)
where
    F: FnMut(usize, &T),
{
    let total: usize = chunks.iter().map(|c| c.len()).sum();
    let range = compute_render_bucket_range(id, total, num_threads);
    let mut processed = 0;
    for chunk in chunks {
        if processed >= range.end {
            break;
        }
        let local_start = range.start.saturating_sub(processed).min(chunk.len());
        let local_end = (range.end - processed).min(chunk.len());
        for (i, item) in chunk.iter().enumerate().take(local_end).skip(local_start) {
            callback(i, item);
        }
        processed += chunk.len();
    }
}

/// Whether `thread_id` is the last render thread
pub fn is_last_thread(thread_id: usize, num_threads: usize) -> bool {
    thread_id + 1 == num_threads
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_cover_everything_once() {
        for threads in 1..6 {
            for entities in 0..20 {
                let mut next = 0;
                for id in 0..threads {
                    let range = compute_render_bucket_range(id, entities, threads);
                    assert_eq!(range.start, next);
                    next = range.end;
                }
                assert_eq!(next, entities);
            }
        }
    }

    #[test]
    fn test_extra_entities_go_first() {
        assert_eq!(compute_render_bucket_range(0, 10, 3), 0..4);
        assert_eq!(compute_render_bucket_range(1, 10, 3), 4..7);
        assert_eq!(compute_render_bucket_range(2, 10, 3), 7..10);
    }

    #[test]
    fn test_more_threads_than_entities() {
        assert_eq!(compute_render_bucket_range(1, 2, 4), 1..2);
        assert!(compute_render_bucket_range(3, 2, 4).is_empty());
    }

    #[test]
    fn test_partitioned_spans_chunks() {
        let a = [0, 1, 2];
        let b = [3, 4, 5, 6];
        let chunks: [&[i32]; 2] = [&a, &b];
        let mut seen = Vec::new();
        partitioned_for_each(1, 2, &chunks, |_, v| seen.push(*v));
        assert_eq!(seen, vec![4, 5, 6]);

        let mut first = Vec::new();
        partitioned_for_each(0, 2, &chunks, |i, v| first.push((i, *v)));
        assert_eq!(first, vec![(0, 0), (1, 1), (2, 2), (0, 3)]);
    }

    #[test]
    fn test_last_thread() {
        assert!(is_last_thread(3, 4));
        assert!(!is_last_thread(0, 4));
    }
}
