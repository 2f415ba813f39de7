use crate::config::LivenessConfig;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counts consecutive failed health checks.
#[derive(Debug)]
pub struct FailureCounter {
    threshold: u32,
    consecutive: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
        }
    }

    /// Feed one health check result. True once the threshold is reached.
    pub fn observe(&mut self, healthy: bool) -> bool {
        if healthy {
            self.consecutive = 0;
        } else {
            self.consecutive += 1;
        }
        self.consecutive >= self.threshold
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Poll `{base_url}{health_path}` until the target is declared lost or
/// `shutdown` is cancelled from elsewhere. Losing the target cancels
/// `shutdown`, which abandons the running workload.
pub async fn watch(
    client: Client,
    base_url: &str,
    config: &LivenessConfig,
    shutdown: CancellationToken,
) {
    let url = format!("{}{}", base_url.trim_end_matches('/'), config.health_path);
    let mut counter = FailureCounter::new(config.failure_threshold);
    let mut interval = tokio::time::interval(Duration::from_millis(config.interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }

        let healthy = match client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "health check failed");
                false
            }
        };

        if counter.observe(healthy) {
            tracing::error!(
                url = %url,
                failures = counter.consecutive(),
                "target unreachable, abandoning run"
            );
            shutdown.cancel();
            return;
        }
        if !healthy {
            tracing::warn!(url = %url, failures = counter.consecutive(), "target health check failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_consecutive_failures() {
        let mut c = FailureCounter::new(3);
        assert!(!c.observe(false));
        assert!(!c.observe(false));
        assert!(!c.observe(true));
        assert_eq!(c.consecutive(), 0);
        assert!(!c.observe(false));
        assert!(!c.observe(false));
        assert!(c.observe(false));
    }

    #[tokio::test]
    async fn unreachable_target_cancels_token() {
        let client = Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let config = LivenessConfig {
            enabled: true,
            health_path: "/health".into(),
            interval_ms: 10,
            failure_threshold: 2,
        };
        let token = CancellationToken::new();
        tokio::time::timeout(
            Duration::from_secs(5),
            watch(client, "http://127.0.0.1:9", &config, token.clone()),
        )
        .await
        .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn returns_when_cancelled_elsewhere() {
        let token = CancellationToken::new();
        token.cancel();
        watch(Client::new(), "http://127.0.0.1:9", &LivenessConfig::default(), token).await;
    }
}
