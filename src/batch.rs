//! Chunks record arrays into per-transaction-sized batches.
//!
//! Aurora DSQL caps a transaction at 3,000 rows; this is a pure function so
//! the CRUD executor and tests can reason about it without a connection.
//! The 10 MiB per-transaction cap is deliberately out of scope here — it is
//! the caller's responsibility when record sizes are large.

use crate::error::{Result, StorageError};

/// Default per-transaction row cap, matching Aurora DSQL's limit.
pub const DEFAULT_MAX_ROWS: usize = 3000;

/// Result of splitting a record slice into batches.
pub struct Split<'a, T> {
    /// Contiguous slices of the input, each no longer than `maxRows`.
    pub batches: Vec<&'a [T]>,
    /// Total number of records across all batches (equals `records.len()`).
    pub total_records: usize,
    /// Number of batches produced.
    pub batch_count: usize,
}

/// Splits `records` into batches of at most `max_rows` elements each,
/// preserving order and never copying elements.
///
/// # Errors
///
/// Returns [`StorageError::InvalidBatchSize`] if `max_rows` is zero.
pub fn split<T>(records: &[T], max_rows: usize) -> Result<Split<'_, T>> {
    if max_rows == 0 {
        return Err(StorageError::InvalidBatchSize);
    }

    let batches: Vec<&[T]> = records.chunks(max_rows).collect();
    Ok(Split {
        batch_count: batches.len(),
        total_records: records.len(),
        batches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_zero_batches() {
        let xs: Vec<u32> = vec![];
        let out = split(&xs, DEFAULT_MAX_ROWS).unwrap();
        assert_eq!(out.batch_count, 0);
        assert_eq!(out.total_records, 0);
        assert!(out.batches.is_empty());
    }

    #[test]
    fn exact_multiple_is_one_batch() {
        let xs: Vec<u32> = (0..3000).collect();
        let out = split(&xs, 3000).unwrap();
        assert_eq!(out.batch_count, 1);
        assert_eq!(out.batches[0].len(), 3000);
    }

    #[test]
    fn one_over_the_cap_spills_into_a_second_batch() {
        let xs: Vec<u32> = (0..3001).collect();
        let out = split(&xs, 3000).unwrap();
        assert_eq!(out.batch_count, 2);
        assert_eq!(out.batches[0].len(), 3000);
        assert_eq!(out.batches[1].len(), 1);
    }

    #[test]
    fn small_cap_chunks_evenly_with_remainder() {
        let xs: Vec<u32> = (0..10).collect();
        let out = split(&xs, 3).unwrap();
        let lens: Vec<usize> = out.batches.iter().map(|b| b.len()).collect();
        assert_eq!(lens, vec![3, 3, 3, 1]);
    }

    #[test]
    fn zero_max_rows_is_an_error() {
        let xs = vec![1, 2, 3];
        let err = split(&xs, 0).unwrap_err();
        assert!(matches!(err, StorageError::InvalidBatchSize));
    }

    #[test]
    fn batch_law_holds_for_arbitrary_sizes() {
        for max_rows in [1usize, 2, 3, 7, 16, 100] {
            for len in [0usize, 1, 2, 3, 15, 16, 17, 257] {
                let xs: Vec<usize> = (0..len).collect();
                let out = split(&xs, max_rows).unwrap();
                let concatenated: Vec<usize> = out.batches.iter().flat_map(|b| b.iter().copied()).collect();
                assert_eq!(concatenated, xs);
                assert!(out.batches.iter().all(|b| b.len() <= max_rows));
                assert_eq!(out.total_records, len);
            }
        }
    }

    #[test]
    fn batches_preserve_identity_by_referencing_input_slices() {
        let xs = vec![String::from("a"), String::from("b"), String::from("c")];
        let out = split(&xs, 2).unwrap();
        assert_eq!(out.batches[0].as_ptr(), xs[0..2].as_ptr());
    }
}
