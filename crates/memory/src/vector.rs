//! Vector similarity utilities.

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Indices of `candidates` ranked by similarity to `query`, best first.
///
/// Candidates scoring below `min_score` are dropped. Equal scores keep
/// insertion order.
pub fn rank_by_similarity<'a, I>(query: &[f32], candidates: I, limit: usize, min_score: f32) -> Vec<(usize, f32)>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut scored: Vec<(usize, f32)> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, emb)| (i, cosine_similarity(emb, query)))
        .filter(|(_, sim)| *sim >= min_score)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}
