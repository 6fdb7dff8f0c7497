//! Rate limiting, per-call timeout and retry around any renderer.

use super::{RenderRequest, Renderer};
use crate::error::RenderError;
use crate::job_controller::cancel::CancellationToken;
use crate::job_controller::ratelimit::RateLimiter;
use crate::template::TemplateModel;
use common::model::options::OutputOptions;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): linear in the attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Clone)]
pub struct ResilientRenderer {
    inner: Arc<dyn Renderer>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl ResilientRenderer {
    pub fn new(inner: Arc<dyn Renderer>, limiter: Arc<RateLimiter>, timeout: Duration) -> Self {
        Self {
            inner,
            limiter,
            timeout,
        }
    }

    pub fn supports(&self, template: &TemplateModel, options: &OutputOptions) -> Result<(), String> {
        self.inner.supports(template, options)
    }

    /// Render one record. Each attempt takes a rate-limiter slot first.
    /// Cancellation while waiting for a slot or sitting in backoff abandons
    /// the record with [`RenderError::Cancelled`]; an attempt already running
    /// is allowed to finish.
    pub async fn render(
        &self,
        request: &RenderRequest,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RenderError> {
        let mut attempt: u32 = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RenderError::Cancelled),
                _ = self.limiter.acquire() => {}
            }

            let result = match tokio::time::timeout(self.timeout, self.inner.render(request)).await {
                Ok(result) => result,
                Err(_) => Err(RenderError::Timeout(self.timeout)),
            };

            match result {
                Ok(bytes) => {
                    if attempt > 0 {
                        debug!(
                            "Batch {} row {} rendered after {} retries",
                            request.batch_id,
                            request.row_index(),
                            attempt
                        );
                    }
                    return Ok(bytes);
                }
                Err(e) if e.is_retryable() && attempt < policy.attempts => {
                    attempt += 1;
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Batch {} row {} attempt {} failed ({}), retrying in {:?}",
                        request.batch_id,
                        request.row_index(),
                        attempt,
                        e,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RenderError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{MediaType, TemplateOptions};
    use async_trait::async_trait;
    use common::model::record::Record;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails with the queued errors, then succeeds.
    struct Flaky {
        errors: Mutex<Vec<RenderError>>,
        calls: AtomicU32,
        keys: Mutex<Vec<String>>,
    }

    impl Flaky {
        fn new(errors: Vec<RenderError>) -> Self {
            Self {
                errors: Mutex::new(errors),
                calls: AtomicU32::new(0),
                keys: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Renderer for Flaky {
        async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.keys.lock().unwrap().push(request.idempotency_key.clone());
            let mut errors = self.errors.lock().unwrap();
            if errors.is_empty() {
                Ok(b"ok".to_vec())
            } else {
                Err(errors.remove(0))
            }
        }

        fn supports(&self, _t: &TemplateModel, _o: &OutputOptions) -> Result<(), String> {
            Ok(())
        }
    }

    fn request() -> RenderRequest {
        let template =
            TemplateModel::parse(b"x".to_vec(), MediaType::Text, TemplateOptions::default())
                .unwrap();
        RenderRequest::new(
            "batch",
            Arc::new(template),
            Arc::new(OutputOptions::default()),
            Record::new(1, Default::default()),
        )
    }

    fn resilient(inner: Arc<Flaky>) -> ResilientRenderer {
        ResilientRenderer::new(
            inner,
            Arc::new(RateLimiter::new(100, Duration::from_secs(1))),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_with_linear_backoff() {
        let flaky = Arc::new(Flaky::new(vec![
            RenderError::UpstreamTransient("503".into()),
            RenderError::UpstreamTransient("503".into()),
        ]));
        let renderer = resilient(flaky.clone());
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        let start = tokio::time::Instant::now();
        let out = renderer
            .render(&request(), policy, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, b"ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        // 100ms after the first failure, 200ms after the second.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        let keys = flaky.keys.lock().unwrap();
        assert!(keys.iter().all(|k| *k == keys[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_configured_attempts() {
        let flaky = Arc::new(Flaky::new(vec![
            RenderError::UpstreamTransient("a".into()),
            RenderError::UpstreamTransient("b".into()),
        ]));
        let policy = RetryPolicy {
            attempts: 1,
            base_delay: Duration::from_millis(10),
        };
        let err = resilient(flaky.clone())
            .render(&request(), policy, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, RenderError::UpstreamTransient("b".into()));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let flaky = Arc::new(Flaky::new(vec![RenderError::UpstreamFatal("400".into())]));
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(1),
        };
        let err = resilient(flaky.clone())
            .render(&request(), policy, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::UpstreamFatal(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_abandons_the_record() {
        let flaky = Arc::new(Flaky::new(vec![RenderError::Timeout(Duration::from_secs(1))]));
        let renderer = resilient(flaky.clone());
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_secs(10),
        };
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            })
        };
        let err = renderer.render(&request(), policy, &token).await.unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err, RenderError::Cancelled);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }
}
