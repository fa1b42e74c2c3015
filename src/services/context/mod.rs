use crate::algorithms::{IdentifierCodec, InteractionMatrix, SnapshotView};
use crate::error::{RecommenderError, Result};
use crate::models::{Interaction, MetaSnapshot};
use std::collections::BTreeMap;
use tracing::debug;

/// One immutable generation of codec, matrix, and product names.
///
/// Built once per training pass or artifact load and shared behind an `Arc`;
/// a new pass produces a new context instead of mutating this one.
#[derive(Debug, Clone)]
pub struct EngineContext {
    generation: u64,
    codec: IdentifierCodec,
    matrix: InteractionMatrix,
    product_names: BTreeMap<String, String>,
}

impl EngineContext {
    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            codec: IdentifierCodec::new(),
            matrix: InteractionMatrix::empty(),
            product_names: BTreeMap::new(),
        }
    }

    /// Drops records without a positive finite weight, then builds codec and
    /// matrix over what remains.
    pub fn from_interactions(generation: u64, interactions: &[Interaction]) -> Result<Self> {
        let positives: Vec<Interaction> = interactions.iter().filter(|i| i.is_positive()).cloned().collect();
        let dropped = interactions.len() - positives.len();
        if dropped > 0 {
            debug!("dropped {} interactions without a positive weight", dropped);
        }
        if positives.is_empty() {
            return Err(RecommenderError::EmptyDataset);
        }

        let codec = IdentifierCodec::from_interactions(&positives);
        let matrix = InteractionMatrix::build(&positives, &codec)?;

        let mut product_names = BTreeMap::new();
        for interaction in &positives {
            if let Some(name) = interaction.product_name.as_deref().filter(|n| !n.trim().is_empty()) {
                product_names.insert(interaction.product.clone(), name.to_string());
            }
        }

        Ok(Self {
            generation,
            codec,
            matrix,
            product_names,
        })
    }

    pub fn from_meta(generation: u64, meta: MetaSnapshot) -> Result<Self> {
        let codec = IdentifierCodec::from_parts(meta.users, meta.products)?;
        let matrix = if codec.is_empty() {
            InteractionMatrix::empty()
        } else {
            InteractionMatrix::from_rows(&meta.interaction_matrix, codec.num_users(), codec.num_products())?
        };

        Ok(Self {
            generation,
            codec,
            matrix,
            product_names: meta.product_names,
        })
    }

    pub fn to_meta(&self) -> MetaSnapshot {
        MetaSnapshot {
            users: self.codec.users().to_vec(),
            products: self.codec.products().to_vec(),
            interaction_matrix: self.matrix.to_rows(),
            product_names: self.product_names.clone(),
        }
    }

    pub fn view(&self) -> SnapshotView<'_> {
        SnapshotView {
            codec: &self.codec,
            matrix: &self.matrix,
            product_names: &self.product_names,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn codec(&self) -> &IdentifierCodec {
        &self.codec
    }

    pub fn matrix(&self) -> &InteractionMatrix {
        &self.matrix
    }

    pub fn product_name(&self, product: &str) -> Option<&str> {
        self.product_names.get(product).map(String::as_str)
    }

    pub fn num_users(&self) -> usize {
        self.codec.num_users()
    }

    pub fn num_products(&self) -> usize {
        self.codec.num_products()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchases() -> Vec<Interaction> {
        vec![
            Interaction::new("a", "X").with_quantity(3.0).with_product_name("iPhone 15"),
            Interaction::new("a", "Y").with_quantity(1.0),
            Interaction::new("b", "X").with_quantity(2.0),
            Interaction::new("c", "Z").with_quantity(0.0),
        ]
    }

    #[test]
    fn test_non_positive_records_are_dropped() {
        let ctx = EngineContext::from_interactions(1, &purchases()).unwrap();

        assert_eq!(ctx.generation(), 1);
        assert_eq!(ctx.num_users(), 2);
        assert_eq!(ctx.num_products(), 2);
        assert!(ctx.codec().encode_user("c").is_none());
        assert_eq!(ctx.product_name("X"), Some("iPhone 15"));
        assert_eq!(ctx.product_name("Y"), None);
    }

    #[test]
    fn test_only_non_positive_records_is_empty_dataset() {
        let records = vec![Interaction::new("a", "X").with_quantity(-1.0)];
        let err = EngineContext::from_interactions(1, &records).unwrap_err();
        assert!(matches!(err, RecommenderError::EmptyDataset));
    }

    #[test]
    fn test_meta_round_trip() {
        let ctx = EngineContext::from_interactions(3, &purchases()).unwrap();
        let meta = ctx.to_meta();
        let restored = EngineContext::from_meta(4, meta.clone()).unwrap();

        assert_eq!(restored.generation(), 4);
        assert_eq!(restored.num_users(), ctx.num_users());
        assert_eq!(restored.num_products(), ctx.num_products());
        assert_eq!(restored.matrix().to_rows(), ctx.matrix().to_rows());
        assert_eq!(restored.to_meta(), meta);
    }

    #[test]
    fn test_empty_meta() {
        let meta = MetaSnapshot {
            users: vec![],
            products: vec![],
            interaction_matrix: vec![],
            product_names: BTreeMap::new(),
        };
        let ctx = EngineContext::from_meta(1, meta).unwrap();
        assert_eq!(ctx.num_users(), 0);
        assert_eq!(ctx.view().product_name(0), None);
    }
}
