use crate::error::{RecommenderError, Result};
use crate::models::{Interaction, RecommendationRequest};

const MAX_ID_LEN: usize = 256;

fn invalid(message: impl Into<String>) -> RecommenderError {
    RecommenderError::Validation(message.into())
}

fn validate_identifier(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(invalid(format!("{} ID cannot be empty", kind)));
    }

    if id.len() > MAX_ID_LEN {
        return Err(invalid(format!("{} ID too long (max {} characters)", kind, MAX_ID_LEN)));
    }

    Ok(())
}

pub fn validate_interaction(interaction: &Interaction) -> Result<()> {
    validate_identifier("User", &interaction.user)?;
    validate_identifier("Product", &interaction.product)?;

    // Only the value that becomes the weight matters; quantity shadows rating.
    if !interaction.weight().is_finite() {
        return Err(invalid("Interaction weight is not a finite number"));
    }

    Ok(())
}

/// Outcome of screening a batch of records before training.
#[derive(Debug, Default)]
pub struct Screened {
    pub valid: Vec<Interaction>,
    /// Position in the input and the reason, for each dropped record.
    pub rejected: Vec<(usize, String)>,
}

pub fn screen_interactions(interactions: &[Interaction]) -> Screened {
    let mut screened = Screened::default();
    for (position, interaction) in interactions.iter().enumerate() {
        match validate_interaction(interaction) {
            Ok(()) => screened.valid.push(interaction.clone()),
            Err(err) => screened.rejected.push((position, err.to_string())),
        }
    }
    screened
}

pub fn validate_recommendation_request(request: &RecommendationRequest, max_top_k: usize) -> Result<()> {
    validate_identifier("User", &request.user)?;

    if request.top_k == 0 {
        return Err(invalid("Number of recommendations must be greater than 0"));
    }

    if request.top_k > max_top_k {
        return Err(invalid(format!(
            "Number of recommendations too large (max {})",
            max_top_k
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_interaction() {
        assert!(validate_interaction(&Interaction::new("a", "X").with_quantity(2.0)).is_ok());
        // Zero weight is filtered later, not rejected.
        assert!(validate_interaction(&Interaction::new("a", "X").with_quantity(0.0)).is_ok());

        assert!(validate_interaction(&Interaction::new("", "X")).is_err());
        assert!(validate_interaction(&Interaction::new("a", "  ")).is_err());
        assert!(validate_interaction(&Interaction::new("a", "X").with_rating(f32::NAN)).is_err());
        assert!(validate_interaction(&Interaction::new("a", "X").with_quantity(f32::INFINITY)).is_err());
    }

    #[test]
    fn test_rating_ignored_when_quantity_present() {
        let record = Interaction::new("a", "X").with_quantity(2.0).with_rating(f32::NAN);
        assert!(validate_interaction(&record).is_ok());
    }

    #[test]
    fn test_screen_interactions_keeps_valid_records() {
        let records = vec![
            Interaction::new("a", "X").with_quantity(1.0),
            Interaction::new("b", ""),
            Interaction::new("c", "Y").with_quantity(f32::NAN),
            Interaction::new("d", "Y").with_quantity(3.0).with_rating(f32::NAN),
        ];
        let screened = screen_interactions(&records);

        let users: Vec<&str> = screened.valid.iter().map(|r| r.user.as_str()).collect();
        assert_eq!(users, vec!["a", "d"]);
        let positions: Vec<usize> = screened.rejected.iter().map(|(position, _)| *position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert!(screened.rejected[0].1.contains("Product ID"));
    }

    #[test]
    fn test_validate_recommendation_request() {
        assert!(validate_recommendation_request(&RecommendationRequest::new("a", 10), 100).is_ok());
        assert!(validate_recommendation_request(&RecommendationRequest::new("a", 0), 100).is_err());
        assert!(validate_recommendation_request(&RecommendationRequest::new("a", 101), 100).is_err());
        assert!(validate_recommendation_request(&RecommendationRequest::new("", 5), 100).is_err());
    }
}
