pub mod metrics;
pub mod validation;

use std::cmp::Ordering;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

/// Stable descending sort on the score; NaN compares equal.
pub fn sort_by_score_desc<T>(items: &mut [(T, f32)]) {
    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
}

/// Runs `processor` over consecutive chunks, stopping at the first error.
///
/// Each chunk's intermediate buffers are dropped before the next chunk starts.
pub fn try_batch_process<T, R, E, F>(items: &[T], batch_size: usize, mut processor: F) -> Result<Vec<R>, E>
where
    F: FnMut(&[T]) -> Result<Vec<R>, E>,
{
    let mut results = Vec::with_capacity(items.len());

    for chunk in items.chunks(batch_size.max(1)) {
        let mut batch_results = processor(chunk)?;
        results.append(&mut batch_results);
    }

    Ok(results)
}
