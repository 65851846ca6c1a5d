use std::sync::atomic::Ordering::Relaxed;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::time::Duration;

use leaky_bucket::RateLimiter;

use crate::server_config::PromptLimits;

#[derive(Clone)]
pub struct RateLimiters {
    prompt: Arc<RateLimiter>,
    backoff: Arc<AtomicBool>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn new(
        prompt_limit_per_sec: usize,
        prompt_interval_ms: usize,
        prompt_refill: usize,
    ) -> Self {
        let prompt = RateLimiter::builder()
            .initial(prompt_limit_per_sec.max(1))
            .interval(Duration::from_millis(prompt_interval_ms.max(1) as u64))
            .max(prompt_limit_per_sec.max(1))
            .refill(prompt_refill.max(1))
            .build();

        Self {
            prompt: Arc::new(prompt),
            backoff: Arc::new(AtomicBool::new(false)),
            backoff_duration: Duration::from_secs(60),
        }
    }

    pub fn from_limits(limits: &PromptLimits) -> Self {
        Self::new(
            limits.rate_limit_per_sec,
            limits.refill_interval_ms,
            limits.refill_amount,
        )
    }

    pub async fn acquire_one(&self) {
        if self.backoff.load(Relaxed) {
            tokio::time::sleep(self.backoff_duration).await;
        }
        self.prompt.acquire_one().await;
    }

    pub fn trigger_backoff(&self) {
        if self.backoff.swap(true, Relaxed) {
            return;
        }
        tracing::info!("Triggering prompt backoff for {:?}", self.backoff_duration);
        let self_ = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self_.backoff_duration).await;
            tracing::info!("Prompt backoff expired");
            self_.backoff.store(false, Relaxed);
        });
    }

    pub fn in_backoff(&self) -> bool {
        self.backoff.load(Relaxed)
    }

    pub fn get_status(&self) -> String {
        let prompt_bucket = format!("{}/{}", self.prompt.balance(), self.prompt.max());
        if self.in_backoff() {
            format!("prompts: {} (BACKOFF)", prompt_bucket)
        } else {
            format!("prompts: {}", prompt_bucket)
        }
    }
}
