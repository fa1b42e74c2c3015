use super::matrix::InteractionMatrix;
use crate::utils::sort_by_score_desc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColdStartWeights {
    pub popular: f32,
    pub best_rated: f32,
    pub diverse: f32,
}

impl Default for ColdStartWeights {
    fn default() -> Self {
        Self {
            popular: 0.4,
            best_rated: 0.3,
            diverse: 0.3,
        }
    }
}

/// Model-free ranking for users the codec has never seen.
///
/// Blends three rank lists (popularity, average weight, long-tail) of length
/// `2 * top_k`; each list position contributes `(2 * top_k - rank) * weight`.
/// Pure function of the matrix.
#[derive(Debug, Clone)]
pub struct ColdStartResolver {
    weights: ColdStartWeights,
    normalizer: f32,
}

impl Default for ColdStartResolver {
    fn default() -> Self {
        Self::new(ColdStartWeights::default())
    }
}

impl ColdStartResolver {
    pub fn new(weights: ColdStartWeights) -> Self {
        Self {
            weights,
            normalizer: 10.0,
        }
    }

    /// Returns `(product_index, score)` pairs, best first, at most `top_k` long.
    pub fn resolve(&self, matrix: &InteractionMatrix, top_k: usize) -> Vec<(usize, f32)> {
        if top_k == 0 || matrix.num_products() == 0 {
            return Vec::new();
        }

        let buyers = matrix.unique_buyers();
        let candidates: Vec<usize> = (0..matrix.num_products()).filter(|&p| buyers[p] > 0).collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let list_len = 2 * top_k;
        let totals = matrix.item_totals();
        let averages = matrix.item_averages();

        let popular = ranked(&candidates, |p| totals[p], list_len);
        let best_rated = ranked(&candidates, |p| averages[p], list_len);
        let diverse = ranked(&candidates, |p| 1.0 / (buyers[p] as f32 + 1.0), list_len);

        let mut blended = vec![0.0f32; matrix.num_products()];
        let mut present = vec![false; matrix.num_products()];
        for (list, weight) in [
            (&popular, self.weights.popular),
            (&best_rated, self.weights.best_rated),
            (&diverse, self.weights.diverse),
        ] {
            for (rank, &product) in list.iter().enumerate() {
                blended[product] += (list_len - rank) as f32 * weight;
                present[product] = true;
            }
        }

        let mut scored: Vec<(usize, f32)> = (0..matrix.num_products())
            .filter(|&p| present[p])
            .map(|p| (p, (blended[p] / self.normalizer).clamp(0.0, 1.0)))
            .collect();
        sort_by_score_desc(&mut scored);
        scored.truncate(top_k);
        scored
    }
}

/// Candidates ordered by `key` descending (stable on index), truncated to `len`.
fn ranked<F: Fn(usize) -> f32>(candidates: &[usize], key: F, len: usize) -> Vec<usize> {
    let mut keyed: Vec<(usize, f32)> = candidates.iter().map(|&p| (p, key(p))).collect();
    sort_by_score_desc(&mut keyed);
    keyed.into_iter().take(len).map(|(p, _)| p).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::codec::IdentifierCodec;
    use crate::models::Interaction;

    fn catalog() -> (IdentifierCodec, InteractionMatrix) {
        let interactions = vec![
            Interaction::new("a", "phone").with_quantity(3.0),
            Interaction::new("b", "phone").with_quantity(2.0),
            Interaction::new("c", "phone").with_quantity(1.0),
            Interaction::new("a", "case").with_quantity(1.0),
            Interaction::new("b", "case").with_quantity(1.0),
            Interaction::new("c", "charger").with_quantity(5.0),
        ];
        let codec = IdentifierCodec::from_interactions(&interactions);
        let matrix = InteractionMatrix::build(&interactions, &codec).unwrap();
        (codec, matrix)
    }

    #[test]
    fn test_deterministic() {
        let (_, matrix) = catalog();
        let resolver = ColdStartResolver::default();

        let first = resolver.resolve(&matrix, 2);
        for _ in 0..5 {
            assert_eq!(resolver.resolve(&matrix, 2), first);
        }
    }

    #[test]
    fn test_blend_scores() {
        let (codec, matrix) = catalog();
        let ranked = ColdStartResolver::default().resolve(&matrix, 5);

        // 3 products, list length 10.
        // phone:   popular #0 (10*.4) + best #1 (9*.3) + diverse #2 (8*.3) = 9.1
        // charger: popular #1 (9*.4)  + best #0 (10*.3) + diverse #0 (10*.3) = 9.6
        // case:    popular #2 (8*.4)  + best #2 (8*.3) + diverse #1 (9*.3) = 8.3
        assert_eq!(ranked.len(), 3);
        let names: Vec<&str> = ranked.iter().map(|(p, _)| codec.decode_product(*p).unwrap()).collect();
        assert_eq!(names, vec!["charger", "phone", "case"]);
        assert!((ranked[0].1 - 0.96).abs() < 1e-5);
        assert!((ranked[1].1 - 0.91).abs() < 1e-5);
        assert!((ranked[2].1 - 0.83).abs() < 1e-5);
    }

    #[test]
    fn test_scores_bounded_and_truncated() {
        let (_, matrix) = catalog();
        let ranked = ColdStartResolver::default().resolve(&matrix, 1);

        assert_eq!(ranked.len(), 1);
        assert!(ranked.iter().all(|(_, s)| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_empty_inputs() {
        let (_, matrix) = catalog();
        assert!(ColdStartResolver::default().resolve(&matrix, 0).is_empty());
        assert!(ColdStartResolver::default()
            .resolve(&InteractionMatrix::empty(), 5)
            .is_empty());
    }
}
