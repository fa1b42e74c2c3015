use super::codec::IdentifierCodec;
use super::cold_start::ColdStartResolver;
use super::ecosystem::EcosystemReranker;
use super::matrix::InteractionMatrix;
use super::ScoringModel;
use crate::error::{RecommenderError, Result};
use crate::models::{Recommendation, RecommendationSource};
use crate::utils::{sort_by_score_desc, try_batch_process};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Read-only view of one engine generation.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotView<'a> {
    pub codec: &'a IdentifierCodec,
    pub matrix: &'a InteractionMatrix,
    pub product_names: &'a BTreeMap<String, String>,
}

impl<'a> SnapshotView<'a> {
    /// Display name for a product index, falling back to its identifier.
    pub fn product_name(&self, product: usize) -> Option<&'a str> {
        let id = self.codec.decode_product(product)?;
        Some(self.product_names.get(id).map(String::as_str).unwrap_or(id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub recommendations: Vec<Recommendation>,
    pub cold_start: bool,
}

pub struct InferenceEngine {
    cold_start: ColdStartResolver,
    reranker: EcosystemReranker,
    batch_size: usize,
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new(ColdStartResolver::default(), EcosystemReranker::default(), 32)
    }
}

impl InferenceEngine {
    pub fn new(cold_start: ColdStartResolver, reranker: EcosystemReranker, batch_size: usize) -> Self {
        Self {
            cold_start,
            reranker,
            batch_size: batch_size.max(1),
        }
    }

    /// Ranks products for `user`. Never mutates the snapshot.
    pub fn recommend(
        &self,
        snapshot: SnapshotView<'_>,
        model: Option<&dyn ScoringModel>,
        user: &str,
        top_k: usize,
        exclude_purchased: bool,
    ) -> Result<Ranking> {
        let Some(user_index) = snapshot.codec.encode_user(user) else {
            return Ok(self.cold_start_ranking(snapshot, top_k));
        };

        let model = model.ok_or(RecommenderError::ModelNotReady)?;
        if user_index >= model.num_users() {
            warn!(
                "user {} (index {}) is outside the trained model capacity of {} users, serving cold start",
                user,
                user_index,
                model.num_users()
            );
            return Ok(self.cold_start_ranking(snapshot, top_k));
        }

        let purchased = snapshot.matrix.purchased_by(user_index);
        let excluded: HashSet<usize> = if exclude_purchased {
            purchased.iter().copied().collect()
        } else {
            HashSet::new()
        };

        let limit = snapshot.codec.num_products().min(model.num_products());
        let skipped = snapshot.codec.num_products().saturating_sub(limit);
        if skipped > 0 {
            warn!(
                "skipping {} products added after the model was trained (capacity {})",
                skipped, limit
            );
        }

        let candidates: Vec<usize> = (0..limit).filter(|p| !excluded.contains(p)).collect();
        if candidates.is_empty() || top_k == 0 {
            return Ok(Ranking {
                recommendations: Vec::new(),
                cold_start: false,
            });
        }

        let raw = try_batch_process(&candidates, self.batch_size, |batch| {
            let users = vec![user_index; batch.len()];
            model.predict(&users, batch)
        })?;

        let stats = snapshot.matrix.stats();
        let dominant = self
            .reranker
            .dominant(purchased.iter().filter_map(|&p| snapshot.product_name(p)));

        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .zip(raw)
            .map(|(&product, score)| {
                let base = stats.denormalize(score).clamp(0.0, 1.0);
                let name = snapshot.product_name(product).unwrap_or_default();
                (product, self.reranker.adjust(dominant, name, base))
            })
            .collect();
        sort_by_score_desc(&mut scored);
        scored.truncate(top_k);

        Ok(Ranking {
            recommendations: decode(snapshot.codec, scored, RecommendationSource::Model),
            cold_start: false,
        })
    }

    pub fn cold_start_ranking(&self, snapshot: SnapshotView<'_>, top_k: usize) -> Ranking {
        let ranked = self.cold_start.resolve(snapshot.matrix, top_k);
        Ranking {
            recommendations: decode(snapshot.codec, ranked, RecommendationSource::ColdStart),
            cold_start: true,
        }
    }
}

fn decode(codec: &IdentifierCodec, ranked: Vec<(usize, f32)>, source: RecommendationSource) -> Vec<Recommendation> {
    ranked
        .into_iter()
        .filter_map(|(product, score)| {
            codec.decode_product(product).map(|id| Recommendation {
                product: id.to_string(),
                score,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{FitHistory, FitOptions, ModelArtifact};
    use crate::models::{EpochMetrics, Interaction, TrainingSample};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores depend only on the product index.
    struct FixedScores {
        users: usize,
        scores: Vec<f32>,
        largest_batch: AtomicUsize,
    }

    impl FixedScores {
        fn new(users: usize, scores: Vec<f32>) -> Self {
            Self {
                users,
                scores,
                largest_batch: AtomicUsize::new(0),
            }
        }
    }

    impl ScoringModel for FixedScores {
        fn num_users(&self) -> usize {
            self.users
        }

        fn num_products(&self) -> usize {
            self.scores.len()
        }

        fn fit(
            &mut self,
            _samples: &[TrainingSample],
            _options: &FitOptions,
            _on_epoch: &mut dyn FnMut(&EpochMetrics),
        ) -> Result<FitHistory> {
            Ok(FitHistory::default())
        }

        fn predict(&self, _users: &[usize], products: &[usize]) -> Result<Vec<f32>> {
            self.largest_batch.fetch_max(products.len(), Ordering::SeqCst);
            products
                .iter()
                .map(|&p| {
                    self.scores
                        .get(p)
                        .copied()
                        .ok_or_else(|| RecommenderError::Backend(format!("index {} out of range", p)))
                })
                .collect()
        }

        fn to_artifact(&self) -> Result<ModelArtifact> {
            Err(RecommenderError::Backend("not persistable".to_string()))
        }
    }

    struct Fixture {
        codec: IdentifierCodec,
        matrix: InteractionMatrix,
        names: BTreeMap<String, String>,
    }

    impl Fixture {
        fn view(&self) -> SnapshotView<'_> {
            SnapshotView {
                codec: &self.codec,
                matrix: &self.matrix,
                product_names: &self.names,
            }
        }
    }

    fn fixture() -> Fixture {
        // Products in first-seen order: X=0, Y=1, Z=2, W=3. Weights span [0.1, 0.5].
        let interactions = vec![
            Interaction::new("a", "X").with_quantity(0.5),
            Interaction::new("a", "Y").with_quantity(0.1),
            Interaction::new("b", "X").with_quantity(0.3),
            Interaction::new("b", "Z").with_quantity(0.2),
            Interaction::new("c", "W").with_quantity(0.4),
        ];
        let codec = IdentifierCodec::from_interactions(&interactions);
        let matrix = InteractionMatrix::build(&interactions, &codec).unwrap();
        let names = [("X", "iPhone 15"), ("Y", "AirPods Pro"), ("Z", "Galaxy S24"), ("W", "USB cable")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Fixture { codec, matrix, names }
    }

    fn products(ranking: &Ranking) -> Vec<&str> {
        ranking.recommendations.iter().map(|r| r.product.as_str()).collect()
    }

    #[test]
    fn test_excludes_purchased_and_reranks() {
        let fx = fixture();
        let model = FixedScores::new(3, vec![0.9, 0.1, 0.5, 0.7]);
        let engine = InferenceEngine::default();

        let ranking = engine.recommend(fx.view(), Some(&model), "b", 10, true).unwrap();

        // b owns X (apple) and Z (samsung); the tie resolves to apple.
        assert!(!ranking.cold_start);
        assert_eq!(products(&ranking), vec!["W", "Y"]);
        assert!((ranking.recommendations[0].score - 0.38).abs() < 1e-5);
        assert!((ranking.recommendations[1].score - 0.182).abs() < 1e-5);
        assert!(ranking
            .recommendations
            .iter()
            .all(|r| r.source == RecommendationSource::Model));
    }

    #[test]
    fn test_including_purchased() {
        let fx = fixture();
        let model = FixedScores::new(3, vec![0.9, 0.1, 0.5, 0.7]);
        let engine = InferenceEngine::default();

        let ranking = engine.recommend(fx.view(), Some(&model), "b", 3, false).unwrap();

        assert_eq!(products(&ranking), vec!["X", "W", "Z"]);
        assert!((ranking.recommendations[0].score - 0.598).abs() < 1e-5);
        assert!((ranking.recommendations[2].score - 0.21).abs() < 1e-5);
    }

    #[test]
    fn test_unknown_user_uses_cold_start() {
        let fx = fixture();
        let engine = InferenceEngine::default();

        let ranking = engine.recommend(fx.view(), None, "stranger", 2, true).unwrap();

        assert!(ranking.cold_start);
        assert_eq!(ranking.recommendations.len(), 2);
        assert!(ranking
            .recommendations
            .iter()
            .all(|r| r.source == RecommendationSource::ColdStart));
    }

    #[test]
    fn test_known_user_without_model_is_rejected() {
        let fx = fixture();
        let engine = InferenceEngine::default();

        let err = engine.recommend(fx.view(), None, "a", 5, true).unwrap_err();
        assert!(matches!(err, RecommenderError::ModelNotReady));
    }

    #[test]
    fn test_products_beyond_model_capacity_are_skipped() {
        let fx = fixture();
        // Model trained before W existed.
        let model = FixedScores::new(3, vec![0.9, 0.1, 0.5]);
        let engine = InferenceEngine::default();

        let ranking = engine.recommend(fx.view(), Some(&model), "c", 10, true).unwrap();

        assert_eq!(ranking.recommendations.len(), 3);
        assert!(!products(&ranking).contains(&"W"));
    }

    #[test]
    fn test_user_beyond_model_capacity_falls_back() {
        let fx = fixture();
        let model = FixedScores::new(2, vec![0.9, 0.1, 0.5, 0.7]);
        let engine = InferenceEngine::default();

        let ranking = engine.recommend(fx.view(), Some(&model), "c", 3, true).unwrap();
        assert!(ranking.cold_start);
    }

    #[test]
    fn test_predictions_are_batched() {
        let mut interactions = Vec::new();
        for p in 0..70 {
            interactions.push(Interaction::new("buyer", format!("p{}", p)));
        }
        interactions.push(Interaction::new("fresh", "p0"));
        let codec = IdentifierCodec::from_interactions(&interactions);
        let matrix = InteractionMatrix::build(&interactions, &codec).unwrap();
        let names = BTreeMap::new();
        let view = SnapshotView {
            codec: &codec,
            matrix: &matrix,
            product_names: &names,
        };

        let model = FixedScores::new(2, vec![0.5; 70]);
        let engine = InferenceEngine::default();
        let ranking = engine.recommend(view, Some(&model), "fresh", 100, true).unwrap();

        assert_eq!(ranking.recommendations.len(), 69);
        assert_eq!(model.largest_batch.load(Ordering::SeqCst), 32);
    }
}
