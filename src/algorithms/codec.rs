use crate::error::{RecommenderError, Result};
use crate::models::Interaction;
use std::collections::HashMap;

/// Dense index space for one side (users or products).
#[derive(Debug, Clone, Default)]
struct IndexSpace {
    to_index: HashMap<String, usize>,
    to_id: Vec<String>,
}

impl IndexSpace {
    fn insert(&mut self, id: &str) -> usize {
        if let Some(&index) = self.to_index.get(id) {
            return index;
        }
        let index = self.to_id.len();
        self.to_index.insert(id.to_string(), index);
        self.to_id.push(id.to_string());
        index
    }

    fn clear(&mut self) {
        self.to_index.clear();
        self.to_id.clear();
    }
}

/// Bidirectional mapping between opaque user/product identifiers and the
/// zero-based indices consumed by the scoring model.
///
/// Indices are assigned in first-seen order and are only meaningful within the
/// codec they came from.
#[derive(Debug, Clone, Default)]
pub struct IdentifierCodec {
    users: IndexSpace,
    products: IndexSpace,
}

impl IdentifierCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_interactions(interactions: &[Interaction]) -> Self {
        let mut codec = Self::new();
        codec.build(interactions);
        codec
    }

    /// Rebuilds both mappings from scratch.
    pub fn build(&mut self, interactions: &[Interaction]) {
        self.users.clear();
        self.products.clear();

        for interaction in interactions {
            self.users.insert(&interaction.user);
        }
        for interaction in interactions {
            self.products.insert(&interaction.product);
        }
    }

    /// Restores a codec from persisted index-ordered id lists.
    pub fn from_parts(users: Vec<String>, products: Vec<String>) -> Result<Self> {
        let mut codec = Self::new();
        for user in &users {
            if codec.users.to_index.contains_key(user) {
                return Err(RecommenderError::InvalidArtifact(format!(
                    "duplicate user id in snapshot: {}",
                    user
                )));
            }
            codec.users.insert(user);
        }
        for product in &products {
            if codec.products.to_index.contains_key(product) {
                return Err(RecommenderError::InvalidArtifact(format!(
                    "duplicate product id in snapshot: {}",
                    product
                )));
            }
            codec.products.insert(product);
        }
        Ok(codec)
    }

    pub fn encode_user(&self, user: &str) -> Option<usize> {
        self.users.to_index.get(user).copied()
    }

    pub fn encode_product(&self, product: &str) -> Option<usize> {
        self.products.to_index.get(product).copied()
    }

    pub fn decode_user(&self, index: usize) -> Option<&str> {
        self.users.to_id.get(index).map(String::as_str)
    }

    pub fn decode_product(&self, index: usize) -> Option<&str> {
        self.products.to_id.get(index).map(String::as_str)
    }

    pub fn num_users(&self) -> usize {
        self.users.to_id.len()
    }

    pub fn num_products(&self) -> usize {
        self.products.to_id.len()
    }

    pub fn users(&self) -> &[String] {
        &self.users.to_id
    }

    pub fn products(&self) -> &[String] {
        &self.products.to_id
    }

    pub fn is_empty(&self) -> bool {
        self.num_users() == 0 && self.num_products() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample() -> Vec<Interaction> {
        vec![
            Interaction::new("bob", "X"),
            Interaction::new("alice", "Y"),
            Interaction::new("bob", "Z"),
            Interaction::new("carol", "X"),
        ]
    }

    #[test]
    fn test_first_seen_order() {
        let codec = IdentifierCodec::from_interactions(&sample());

        assert_eq!(codec.users(), &["bob", "alice", "carol"]);
        assert_eq!(codec.products(), &["X", "Y", "Z"]);
        assert_eq!(codec.encode_user("alice"), Some(1));
        assert_eq!(codec.encode_product("Z"), Some(2));
    }

    #[test]
    fn test_bijection() {
        let interactions = sample();
        let codec = IdentifierCodec::from_interactions(&interactions);

        let mut seen = HashSet::new();
        for interaction in &interactions {
            let index = codec.encode_user(&interaction.user).unwrap();
            assert_eq!(codec.decode_user(index), Some(interaction.user.as_str()));
            seen.insert((interaction.user.clone(), index));
        }
        let indices: HashSet<usize> = seen.iter().map(|(_, i)| *i).collect();
        assert_eq!(indices.len(), codec.num_users());

        for product in codec.products().to_vec() {
            let index = codec.encode_product(&product).unwrap();
            assert_eq!(codec.decode_product(index), Some(product.as_str()));
        }
    }

    #[test]
    fn test_rebuild_discards_previous_generation() {
        let mut codec = IdentifierCodec::from_interactions(&sample());
        codec.build(&[Interaction::new("dave", "W")]);

        assert_eq!(codec.encode_user("bob"), None);
        assert_eq!(codec.encode_product("X"), None);
        assert_eq!(codec.encode_user("dave"), Some(0));
        assert_eq!(codec.num_products(), 1);
    }

    #[test]
    fn test_unknown_ids_are_none() {
        let codec = IdentifierCodec::from_interactions(&sample());
        assert_eq!(codec.encode_user("nobody"), None);
        assert_eq!(codec.decode_product(99), None);
    }

    #[test]
    fn test_from_parts_rejects_duplicates() {
        let ok = IdentifierCodec::from_parts(vec!["a".into(), "b".into()], vec!["X".into()]);
        assert!(ok.is_ok());

        let dup = IdentifierCodec::from_parts(vec!["a".into(), "a".into()], vec![]);
        assert!(matches!(dup, Err(RecommenderError::InvalidArtifact(_))));
    }
}
