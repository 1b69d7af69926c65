/// Cosine similarity of two vectors; 0.0 when either is empty, all zeros, or
/// the lengths differ.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let mag_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Greedy maximal marginal relevance over `candidates`.
///
/// Returns the indices of at most `k` candidates in selection order. Each
/// step picks the candidate maximizing
/// `lambda_mult * sim(query, c) - (1 - lambda_mult) * max sim(c, selected)`;
/// ties keep the earlier (nearer) candidate.
pub(crate) fn select(
    query: &[f32],
    candidates: &[&[f32]],
    k: usize,
    lambda_mult: f64,
) -> Vec<usize> {
    let query_sims: Vec<f64> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;

        for (position, &candidate) in remaining.iter().enumerate() {
            let max_sim_to_selected = selected
                .iter()
                .map(|&s| cosine_similarity(candidates[s], candidates[candidate]))
                .fold(None, |acc: Option<f64>, sim| Some(acc.map_or(sim, |a| a.max(sim))))
                .unwrap_or(0.0);

            let score =
                lambda_mult * query_sims[candidate] - (1.0 - lambda_mult) * max_sim_to_selected;
            if score > best_score {
                best_score = score;
                best = position;
            }
        }

        selected.push(remaining.remove(best));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn pure_relevance_keeps_nearest_order() {
        let a = [1.0, 0.0];
        let b = [0.9, 0.1];
        let c = [0.0, 1.0];
        let candidates: Vec<&[f32]> = vec![&a[..], &b[..], &c[..]];
        assert_eq!(select(&[1.0, 0.0], &candidates, 2, 1.0), vec![0, 1]);
    }

    #[test]
    fn diversity_skips_near_duplicates() {
        let a = [1.0, 0.0];
        let a_dup = [0.99, 0.01];
        let c = [0.5, 0.5];
        let candidates: Vec<&[f32]> = vec![&a[..], &a_dup[..], &c[..]];
        assert_eq!(select(&[1.0, 0.0], &candidates, 2, 0.3), vec![0, 2]);
    }

    #[test]
    fn k_larger_than_candidates() {
        let a = [1.0, 0.0];
        let candidates: Vec<&[f32]> = vec![&a[..]];
        assert_eq!(select(&[1.0, 0.0], &candidates, 5, 0.5), vec![0]);
        let none: Vec<&[f32]> = Vec::new();
        assert!(select(&[1.0, 0.0], &none, 3, 0.5).is_empty());
    }
}
