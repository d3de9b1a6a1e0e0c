use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome class of one fallback attempt or of a whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStatus {
    /// The strategy recovered the step outright; the payload is the result.
    Success,
    /// The attempt did not recover; try again (within the retry bound).
    Retry,
    /// The strategy proposes a different path (payload describes it); the
    /// caller applies it in its own retry loop.
    Alternative,
    /// The strategy (or the whole chain) gave up.
    Failure,
}

/// Result of a fallback attempt. Created and consumed within one
/// failure-handling call chain, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackResult {
    pub status: FallbackStatus,
    #[serde(default)]
    pub payload: Option<Value>,
    pub attempt: u32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl FallbackResult {
    pub fn new(status: FallbackStatus, attempt: u32) -> Self {
        Self {
            status,
            payload: None,
            attempt,
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn success(payload: Value, attempt: u32) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(FallbackStatus::Success, attempt)
        }
    }

    pub fn alternative(payload: Value, attempt: u32) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(FallbackStatus::Alternative, attempt)
        }
    }

    pub fn retry(attempt: u32) -> Self {
        Self::new(FallbackStatus::Retry, attempt)
    }

    pub fn failure(attempt: u32) -> Self {
        Self::new(FallbackStatus::Failure, attempt)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Context handed to every strategy attempt: the failure category, the
/// triggering error, and caller-supplied data (role, params, task id).
#[derive(Debug, Clone)]
pub struct FallbackContext {
    pub category: String,
    pub error: String,
    pub data: Map<String, Value>,
}

impl FallbackContext {
    pub fn new(category: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            error: error.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// One recovery strategy. A pure function of (context, attempt number).
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Retries this strategy is allowed before the chain moves on.
    fn max_retries(&self) -> u32 {
        2
    }

    async fn attempt(&self, ctx: &FallbackContext, attempt: u32) -> FallbackResult;
}

/// Linear backoff with randomized jitter between strategy retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    /// Jitter fraction in [0, 1]; the delay is scaled by a random factor in
    /// `1 ± jitter`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 250,
            jitter: 0.5,
        }
    }
}

impl BackoffPolicy {
    /// No delay at all; used by tests.
    pub fn none() -> Self {
        Self {
            base_ms: 0,
            jitter: 0.0,
        }
    }

    fn delay_ms(&self, attempt: u32) -> u64 {
        let linear = self.base_ms.saturating_mul(u64::from(attempt) + 1);
        if linear == 0 || self.jitter <= 0.0 {
            return linear;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        (linear as f64 * factor) as u64
    }
}

/// Registry of ordered recovery strategy chains per failure category.
pub struct FallbackManager {
    strategies: HashMap<String, Vec<(u32, Arc<dyn FallbackStrategy>)>>,
    backoff: BackoffPolicy,
}

impl FallbackManager {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            strategies: HashMap::new(),
            backoff,
        }
    }

    /// Register a strategy for a category at the given chain position.
    /// Lower order runs first.
    pub fn register(
        &mut self,
        category: impl Into<String>,
        order: u32,
        strategy: Arc<dyn FallbackStrategy>,
    ) {
        let chain = self.strategies.entry(category.into()).or_default();
        chain.push((order, strategy));
        chain.sort_by_key(|(order, _)| *order);
    }

    /// Whether any strategy is registered for the category.
    pub fn has_strategies(&self, category: &str) -> bool {
        self.strategies
            .get(category)
            .is_some_and(|chain| !chain.is_empty())
    }

    /// Run the chain for the failure's category.
    ///
    /// Strategies execute in ascending declared order, each with up to its
    /// own retry count and jittered linear backoff between attempts. The
    /// chain stops at the first `Success` or `Alternative`; a `Failure`
    /// from a strategy moves straight to the next one. An exhausted chain
    /// (or an unknown category) yields `Failure`.
    pub async fn handle(&self, ctx: &FallbackContext) -> FallbackResult {
        let Some(chain) = self.strategies.get(&ctx.category) else {
            debug!(category = %ctx.category, "No fallback strategies registered");
            return FallbackResult::failure(0);
        };

        let mut total_attempts = 0;
        for (order, strategy) in chain {
            for attempt in 0..=strategy.max_retries() {
                total_attempts += 1;
                let result = strategy.attempt(ctx, attempt).await;
                match result.status {
                    FallbackStatus::Success | FallbackStatus::Alternative => {
                        info!(
                            category = %ctx.category,
                            strategy = strategy.name(),
                            order,
                            attempt,
                            status = ?result.status,
                            "Fallback strategy recovered"
                        );
                        return FallbackResult {
                            attempt: total_attempts,
                            ..result
                        };
                    }
                    FallbackStatus::Retry => {
                        if attempt < strategy.max_retries() {
                            let delay = self.backoff.delay_ms(attempt);
                            debug!(
                                category = %ctx.category,
                                strategy = strategy.name(),
                                attempt,
                                delay_ms = delay,
                                "Fallback retry, backing off"
                            );
                            if delay > 0 {
                                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                            }
                        }
                    }
                    FallbackStatus::Failure => break,
                }
            }
        }

        warn!(category = %ctx.category, error = %ctx.error, "All fallback strategies exhausted");
        FallbackResult::failure(total_attempts)
    }
}

impl Default for FallbackManager {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A strategy that returns a fixed sequence of statuses.
    struct Scripted {
        name: String,
        script: Vec<FallbackStatus>,
        calls: AtomicU32,
        retries: u32,
    }

    impl Scripted {
        fn new(name: &str, script: Vec<FallbackStatus>, retries: u32) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script,
                calls: AtomicU32::new(0),
                retries,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FallbackStrategy for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn max_retries(&self) -> u32 {
            self.retries
        }

        async fn attempt(&self, _ctx: &FallbackContext, attempt: u32) -> FallbackResult {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let status = self
                .script
                .get(idx)
                .copied()
                .unwrap_or(FallbackStatus::Failure);
            match status {
                FallbackStatus::Success => FallbackResult::success(json!({"ok": true}), attempt),
                FallbackStatus::Alternative => {
                    FallbackResult::alternative(json!({"role": "backup"}), attempt)
                }
                other => FallbackResult::new(other, attempt),
            }
        }
    }

    fn manager() -> FallbackManager {
        FallbackManager::new(BackoffPolicy::none())
    }

    #[tokio::test]
    async fn unknown_category_fails_immediately() {
        let mgr = manager();
        let result = mgr.handle(&FallbackContext::new("nope", "boom")).await;
        assert_eq!(result.status, FallbackStatus::Failure);
        assert_eq!(result.attempt, 0);
    }

    #[tokio::test]
    async fn chain_stops_at_first_success() {
        let mut mgr = manager();
        let first = Scripted::new("first", vec![FallbackStatus::Success], 2);
        let second = Scripted::new("second", vec![FallbackStatus::Success], 2);
        mgr.register("cat", 0, first.clone());
        mgr.register("cat", 1, second.clone());

        let result = mgr.handle(&FallbackContext::new("cat", "boom")).await;
        assert_eq!(result.status, FallbackStatus::Success);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn retry_then_success_within_one_strategy() {
        let mut mgr = manager();
        let strategy = Scripted::new(
            "flaky",
            vec![
                FallbackStatus::Retry,
                FallbackStatus::Retry,
                FallbackStatus::Success,
            ],
            2,
        );
        mgr.register("cat", 0, strategy.clone());

        let result = mgr.handle(&FallbackContext::new("cat", "boom")).await;
        assert_eq!(result.status, FallbackStatus::Success);
        assert_eq!(strategy.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_move_to_next_strategy() {
        let mut mgr = manager();
        let first = Scripted::new(
            "always-retry",
            vec![
                FallbackStatus::Retry,
                FallbackStatus::Retry,
                FallbackStatus::Retry,
            ],
            2,
        );
        let second = Scripted::new("alt", vec![FallbackStatus::Alternative], 0);
        mgr.register("cat", 0, first.clone());
        mgr.register("cat", 1, second.clone());

        let result = mgr.handle(&FallbackContext::new("cat", "boom")).await;
        assert_eq!(result.status, FallbackStatus::Alternative);
        assert_eq!(result.payload, Some(json!({"role": "backup"})));
        assert_eq!(first.calls(), 3);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn strategy_failure_skips_remaining_retries() {
        let mut mgr = manager();
        let first = Scripted::new("give-up", vec![FallbackStatus::Failure], 5);
        let second = Scripted::new("next", vec![FallbackStatus::Success], 0);
        mgr.register("cat", 0, first.clone());
        mgr.register("cat", 1, second);

        let result = mgr.handle(&FallbackContext::new("cat", "boom")).await;
        assert_eq!(result.status, FallbackStatus::Success);
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test]
    async fn whole_chain_exhausted_is_failure() {
        let mut mgr = manager();
        mgr.register(
            "cat",
            0,
            Scripted::new("a", vec![FallbackStatus::Retry, FallbackStatus::Retry], 1),
        );
        mgr.register("cat", 1, Scripted::new("b", vec![FallbackStatus::Failure], 3));

        let result = mgr.handle(&FallbackContext::new("cat", "boom")).await;
        assert_eq!(result.status, FallbackStatus::Failure);
        assert_eq!(result.attempt, 3);
    }

    #[tokio::test]
    async fn registration_order_is_by_declared_order_not_insertion() {
        let mut mgr = manager();
        let late = Scripted::new("late", vec![FallbackStatus::Success], 0);
        let early = Scripted::new("early", vec![FallbackStatus::Success], 0);
        mgr.register("cat", 5, late.clone());
        mgr.register("cat", 1, early.clone());

        let result = mgr.handle(&FallbackContext::new("cat", "boom")).await;
        assert_eq!(result.status, FallbackStatus::Success);
        assert_eq!(early.calls(), 1);
        assert_eq!(late.calls(), 0);
    }

    #[test]
    fn backoff_is_linear_in_attempt() {
        let policy = BackoffPolicy {
            base_ms: 100,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_ms(0), 100);
        assert_eq!(policy.delay_ms(1), 200);
        assert_eq!(policy.delay_ms(3), 400);
    }

    #[test]
    fn jittered_backoff_stays_within_band() {
        let policy = BackoffPolicy {
            base_ms: 100,
            jitter: 0.5,
        };
        for _ in 0..100 {
            let d = policy.delay_ms(1);
            assert!((100..=300).contains(&d), "delay {d} out of band");
        }
    }
}
