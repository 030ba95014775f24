//! Fan-out search across every registered marketplace.
//!
//! Each adapter runs concurrently and is isolated from the others: a panic
//! or a blown deadline in one becomes a failed [`Outcome`] for that
//! marketplace and nothing else. Results come back in registration order.

use crate::marketplace::Marketplace;
use crate::model::{Outcome, Query};
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Backstop for adapters that ignore their own deadline.
pub const DEFAULT_OUTER_DEADLINE: Duration = Duration::from_secs(60);

pub struct Aggregator {
    adapters: Vec<Arc<dyn Marketplace>>,
    outer_deadline: Duration,
}

impl Aggregator {
    pub fn new(adapters: Vec<Arc<dyn Marketplace>>) -> Self {
        Self {
            adapters,
            outer_deadline: DEFAULT_OUTER_DEADLINE,
        }
    }

    pub fn with_outer_deadline(mut self, deadline: Duration) -> Self {
        self.outer_deadline = deadline;
        self
    }

    pub fn adapters(&self) -> &[Arc<dyn Marketplace>] {
        &self.adapters
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Query every adapter and return one outcome per adapter.
    pub async fn search(&self, query: &Query) -> Vec<Outcome> {
        let start = Instant::now();
        let calls = self
            .adapters
            .iter()
            .map(|adapter| isolated_search(adapter.as_ref(), query, self.outer_deadline));
        let outcomes = join_all(calls).await;

        let succeeded = outcomes.iter().filter(|o| o.success()).count();
        let listings: usize = outcomes.iter().map(|o| o.listings().len()).sum();
        tracing::info!(
            adapters = outcomes.len(),
            succeeded,
            listings,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "aggregate search finished"
        );
        outcomes
    }

    /// Check every adapter concurrently.
    pub async fn health_checks(&self) -> Vec<(String, bool)> {
        let checks = self.adapters.iter().map(|adapter| async move {
            let healthy = AssertUnwindSafe(adapter.health_check())
                .catch_unwind()
                .await
                .unwrap_or(false);
            (adapter.name().to_string(), healthy)
        });
        join_all(checks).await
    }
}

async fn isolated_search(adapter: &dyn Marketplace, query: &Query, deadline: Duration) -> Outcome {
    let name = adapter.name().to_string();
    let guarded = AssertUnwindSafe(adapter.search(query)).catch_unwind();

    match tokio::time::timeout(deadline, guarded).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => {
            let msg = panic_message(&panic);
            tracing::error!(marketplace = %name, panic = %msg, "adapter panicked");
            Outcome::failed(&name, format!("adapter panicked: {msg}"))
        }
        Err(_) => {
            tracing::warn!(marketplace = %name, "adapter exceeded outer deadline");
            Outcome::failed(&name, format!("timed out after {}ms", deadline.as_millis()))
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
