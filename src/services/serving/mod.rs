use crate::error::Result;
use crate::models::*;
use crate::services::recommendation::RecommendationService;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Request-facing wrapper that keeps serving counters.
pub struct ServingService {
    recommendation_service: Arc<RecommendationService>,
    serving_stats: Arc<DashMap<String, u64>>,
}

impl ServingService {
    pub fn new(recommendation_service: Arc<RecommendationService>) -> Self {
        Self {
            recommendation_service,
            serving_stats: Arc::new(DashMap::new()),
        }
    }

    pub async fn serve_recommendations(&self, request: &RecommendationRequest) -> Result<RecommendationResponse> {
        self.increment_stat("total_requests");
        let start_time = Instant::now();

        let response = match self.recommendation_service.get_recommendations(request).await {
            Ok(response) => response,
            Err(e) => {
                self.increment_stat("failed_requests");
                return Err(e);
            }
        };

        let latency = start_time.elapsed().as_millis() as u64;
        self.update_latency_stat(latency);
        self.increment_stat("successful_requests");
        if response.cold_start {
            self.increment_stat("cold_start_requests");
        }

        info!(
            "Served {} recommendations for user {} in {}ms",
            response.recommendations.len(),
            request.user,
            latency
        );
        Ok(response)
    }

    /// Failed requests are logged and left out of the result.
    pub async fn batch_serve_recommendations(&self, requests: &[RecommendationRequest]) -> Vec<RecommendationResponse> {
        self.increment_stat("batch_requests");
        let start_time = Instant::now();
        let mut responses = Vec::with_capacity(requests.len());

        for request in requests {
            match self.serve_recommendations(request).await {
                Ok(response) => responses.push(response),
                Err(e) => error!("Failed to get recommendations for user {}: {}", request.user, e),
            }
        }

        info!(
            "Batch served {}/{} requests in {}ms",
            responses.len(),
            requests.len(),
            start_time.elapsed().as_millis()
        );
        responses
    }

    pub fn get_serving_stats(&self) -> HashMap<String, u64> {
        self.serving_stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    fn increment_stat(&self, key: &str) {
        *self.serving_stats.entry(key.to_string()).or_insert(0) += 1;
    }

    fn update_latency_stat(&self, latency_ms: u64) {
        let current_avg = self.serving_stats.get("avg_latency_ms").map(|v| *v).unwrap_or(0);
        let served = self.serving_stats.get("successful_requests").map(|v| *v).unwrap_or(0) + 1;

        let new_avg = (current_avg * (served - 1) + latency_ms) / served;
        self.serving_stats.insert("avg_latency_ms".to_string(), new_avg);

        let current_max = self.serving_stats.get("max_latency_ms").map(|v| *v).unwrap_or(0);
        if latency_ms > current_max {
            self.serving_stats.insert("max_latency_ms".to_string(), latency_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::context::EngineContext;

    fn serving() -> ServingService {
        let recommendation = Arc::new(RecommendationService::new(Arc::new(Config::default())));
        let records = vec![
            Interaction::new("a", "X").with_quantity(2.0),
            Interaction::new("b", "Y").with_quantity(1.0),
        ];
        let context = EngineContext::from_interactions(recommendation.next_generation(), &records).unwrap();
        recommendation.install(Arc::new(context), None);
        ServingService::new(recommendation)
    }

    #[tokio::test]
    async fn test_counters() {
        let serving = serving();

        serving
            .serve_recommendations(&RecommendationRequest::new("new", 2))
            .await
            .unwrap();
        assert!(serving
            .serve_recommendations(&RecommendationRequest::new("a", 2))
            .await
            .is_err());

        let stats = serving.get_serving_stats();
        assert_eq!(stats["total_requests"], 2);
        assert_eq!(stats["successful_requests"], 1);
        assert_eq!(stats["failed_requests"], 1);
        assert_eq!(stats["cold_start_requests"], 1);
        assert!(stats.contains_key("avg_latency_ms"));
    }

    #[tokio::test]
    async fn test_batch_skips_failures() {
        let serving = serving();
        let requests = vec![
            RecommendationRequest::new("new", 2),
            RecommendationRequest::new("a", 2),
            RecommendationRequest::new("", 2),
        ];

        let responses = serving.batch_serve_recommendations(&requests).await;

        assert_eq!(responses.len(), 1);
        assert_eq!(serving.get_serving_stats()["batch_requests"], 1);
    }
}
