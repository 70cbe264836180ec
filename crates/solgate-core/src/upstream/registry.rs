use std::sync::Arc;
use thiserror::Error;

use crate::upstream::{
    endpoint::Endpoint,
    scoring::{selection_score, SelectionWeights},
};

/// Why no endpoint could be chosen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Every candidate endpoint is deactivated (or excluded).
    #[error("No available endpoints")]
    NoAvailableEndpoints,

    /// Candidates exist but every breaker is open. Names the best-ranked one.
    #[error("Circuit breaker open for {endpoint}")]
    AllCircuitsOpen { endpoint: String },
}

/// The fixed set of configured endpoints and the weighted selection over them.
pub struct EndpointRegistry {
    endpoints: Vec<Arc<Endpoint>>,
    weights: SelectionWeights,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new(endpoints: Vec<Arc<Endpoint>>, weights: SelectionWeights) -> Self {
        Self { endpoints, weights }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.iter().find(|endpoint| endpoint.name() == name)
    }

    #[must_use]
    pub fn all(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Reactivates every endpoint whose cooldown elapsed. Returns how many came back.
    pub fn reactivate_due(&self) -> usize {
        self.endpoints.iter().filter(|endpoint| endpoint.try_reactivate()).count()
    }

    /// Picks the active endpoint with the best selection score.
    ///
    /// Endpoints whose breaker would reject the call are skipped without being
    /// transitioned. `exclude` removes one endpoint, which is how failover asks for the
    /// next best. `congestion` reports in-flight plus queued work for an endpoint.
    ///
    /// # Errors
    ///
    /// - [`SelectionError::NoAvailableEndpoints`] if no endpoint is active
    /// - [`SelectionError::AllCircuitsOpen`] if every active endpoint's breaker is open
    pub async fn select_best_endpoint<F>(
        &self,
        exclude: Option<&str>,
        congestion: F,
    ) -> Result<Arc<Endpoint>, SelectionError>
    where
        F: Fn(&Endpoint) -> usize,
    {
        self.reactivate_due();

        let mut candidates: Vec<&Arc<Endpoint>> = self
            .endpoints
            .iter()
            .filter(|endpoint| endpoint.is_active() && Some(endpoint.name()) != exclude)
            .collect();
        if candidates.is_empty() {
            return Err(SelectionError::NoAvailableEndpoints);
        }
        // highest priority first so ties and the open-circuit report favor it
        candidates.sort_by(|a, b| b.priority().cmp(&a.priority()));

        let mut best: Option<(&Arc<Endpoint>, f64)> = None;
        for endpoint in &candidates {
            if !endpoint.circuit_breaker().would_admit().await {
                continue;
            }
            let (health, avg_response_ms, _) = endpoint.health();
            let score = selection_score(
                &self.weights,
                health,
                avg_response_ms,
                congestion(endpoint),
                endpoint.priority(),
            );
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((endpoint, score));
            }
        }

        match best {
            Some((endpoint, score)) => {
                tracing::trace!(endpoint = %endpoint.name(), score = score, "endpoint selected");
                Ok(Arc::clone(endpoint))
            }
            None => Err(SelectionError::AllCircuitsOpen {
                endpoint: candidates[0].name().to_string(),
            }),
        }
    }
}
