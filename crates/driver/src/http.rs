use crate::config::TargetConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use std::time::Duration;
use workload_core::config::WorkloadConfig;
use workload_core::error::{ConfigError, WorkerError};
use workload_core::interval::Interval;
use workload_core::keygen::{build_generator, KeyDistribution, KeyGenerator, KeyParams};
use workload_core::locks::ShardedLocks;
use workload_core::types::TransactionType;
use workload_core::worker::{Completion, WorkerTransport};

/// Talks to the marketplace services over HTTP.
///
/// A `202 Accepted` from a checkout or shipment update means the work was
/// queued and its completion will be posted to the ingress; any other 2xx
/// means it is already done.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    products_per_seller: u64,
    items_per_cart: usize,
    /// Picks the seller of each cart item; rebuilt for every run's
    /// seller population.
    cart_sellers: Mutex<Box<dyn KeyGenerator>>,
    cart_distribution: KeyDistribution,
    key_params: KeyParams,
    product_locks: ShardedLocks,
}

impl HttpTransport {
    pub fn new(
        target: &TargetConfig,
        workload: &WorkloadConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let client = Client::builder()
            .pool_max_idle_per_host(workload.concurrency_level.max(16))
            .timeout(Duration::from_millis(target.timeout_ms))
            .build()?;
        let key_params = workload.key_params();
        let cart_sellers = build_generator(
            workload.customer_distribution,
            workload.seller_range,
            &key_params,
            cart_seed(workload.seed),
        )?;

        Ok(Self {
            client,
            base_url: target.url.trim_end_matches('/').to_string(),
            products_per_seller: target.products_per_seller,
            items_per_cart: target.items_per_cart.max(1),
            cart_sellers: Mutex::new(cart_sellers),
            cart_distribution: workload.customer_distribution,
            key_params,
            product_locks: ShardedLocks::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn random_product(&self) -> u64 {
        rand::thread_rng().gen_range(1..=self.products_per_seller)
    }

    /// Send and map transport failures and non-2xx statuses to `WorkerError`.
    async fn send(&self, req: RequestBuilder, endpoint: &str) -> Result<StatusCode, WorkerError> {
        let resp = req
            .send()
            .await
            .map_err(|e| WorkerError::Transport(format!("{endpoint}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(WorkerError::UnexpectedStatus {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        Ok(status)
    }
}

fn cart_seed(seed: Option<u64>) -> Option<u64> {
    seed.map(|s| s ^ 0x5eed)
}

fn completion_for(status: StatusCode) -> Completion {
    if status == StatusCode::ACCEPTED {
        Completion::Submitted
    } else {
        Completion::Finished
    }
}

#[async_trait]
impl WorkerTransport for HttpTransport {
    async fn customer_session(
        &self,
        customer_id: u64,
        tid: &str,
    ) -> Result<Completion, WorkerError> {
        // Draw the whole cart up front; the rng must not live across awaits.
        let items: Vec<(u64, u64, u32)> = {
            let mut sellers = self.cart_sellers.lock();
            let mut rng = rand::thread_rng();
            (0..self.items_per_cart)
                .map(|_| {
                    (
                        sellers.next_value(),
                        rng.gen_range(1..=self.products_per_seller),
                        rng.gen_range(1..=3),
                    )
                })
                .collect()
        };

        for &(seller_id, product_id, quantity) in &items {
            let path = format!("/products/{seller_id}/{product_id}");
            self.send(self.client.get(self.url(&path)), &path).await?;

            let path = format!("/carts/{customer_id}/items");
            let body = json!({
                "seller_id": seller_id,
                "product_id": product_id,
                "quantity": quantity,
            });
            self.send(self.client.post(self.url(&path)).json(&body), &path)
                .await?;
        }

        let path = format!("/carts/{customer_id}/checkout");
        let status = self
            .send(
                self.client.post(self.url(&path)).json(&json!({ "tid": tid })),
                &path,
            )
            .await?;
        Ok(completion_for(status))
    }

    async fn seller_transaction(
        &self,
        seller_id: u64,
        tid: &str,
        tx_type: TransactionType,
    ) -> Result<Completion, WorkerError> {
        match tx_type {
            TransactionType::PriceUpdate => {
                let product_id = self.random_product();
                let price = rand::thread_rng().gen_range(1..=10_000u32);
                let _guard = self.product_locks.lock(seller_id, product_id).await;
                let path = format!("/products/{seller_id}/{product_id}/price");
                let body = json!({ "tid": tid, "price": price });
                self.send(self.client.patch(self.url(&path)).json(&body), &path)
                    .await
                    .map(completion_for)
            }
            TransactionType::UpdateProduct => {
                let product_id = self.random_product();
                let _guard = self.product_locks.lock(seller_id, product_id).await;
                let path = format!("/products/{seller_id}/{product_id}");
                let body = json!({
                    "tid": tid,
                    "name": format!("product-{seller_id}-{product_id}"),
                    "version": tid,
                });
                self.send(self.client.put(self.url(&path)).json(&body), &path)
                    .await
                    .map(completion_for)
            }
            TransactionType::QueryDashboard => {
                let path = format!("/sellers/{seller_id}/dashboard");
                self.send(
                    self.client.get(self.url(&path)).query(&[("tid", tid)]),
                    &path,
                )
                .await
                .map(|_| Completion::Finished)
            }
            other => Err(WorkerError::Rejected(format!(
                "{other} is not a seller transaction"
            ))),
        }
    }

    async fn delivery(&self, tid: &str) -> Result<Completion, WorkerError> {
        let path = "/shipments";
        self.send(
            self.client.patch(self.url(path)).json(&json!({ "tid": tid })),
            path,
        )
        .await
        .map(completion_for)
    }

    fn name(&self) -> &'static str {
        "http"
    }

    fn set_up(&self, seller_range: Interval, seed: Option<u64>) -> Result<(), ConfigError> {
        let sellers = build_generator(
            self.cart_distribution,
            seller_range,
            &self.key_params,
            cart_seed(seed),
        )?;
        *self.cart_sellers.lock() = sellers;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(url: &str) -> HttpTransport {
        let target = TargetConfig {
            url: url.to_string(),
            timeout_ms: 200,
            ..TargetConfig::default()
        };
        HttpTransport::new(&target, &WorkloadConfig::default()).unwrap()
    }

    #[test]
    fn accepted_means_async_completion() {
        assert_eq!(completion_for(StatusCode::ACCEPTED), Completion::Submitted);
        assert_eq!(completion_for(StatusCode::OK), Completion::Finished);
        assert_eq!(completion_for(StatusCode::NO_CONTENT), Completion::Finished);
    }

    #[test]
    fn base_url_is_normalised() {
        let t = transport("http://127.0.0.1:9/");
        assert_eq!(t.url("/shipments"), "http://127.0.0.1:9/shipments");
    }

    #[test]
    fn cart_sellers_follow_the_run_population() {
        let t = transport("http://127.0.0.1:9");
        assert_eq!(t.cart_sellers.lock().interval().max(), 100);

        let run_range = Interval::new(1, 5).unwrap();
        t.set_up(run_range, Some(3)).unwrap();

        let mut sellers = t.cart_sellers.lock();
        assert_eq!(sellers.interval(), run_range);
        let outside = (0..1000)
            .map(|_| sellers.next_value())
            .filter(|s| !run_range.contains(*s))
            .count();
        assert_eq!(outside, 0);
    }

    #[tokio::test]
    async fn unreachable_target_is_transport_error() {
        // Port 9 (discard) is closed on test machines.
        let t = transport("http://127.0.0.1:9");
        let err = t.delivery("1").await.unwrap_err();
        assert!(matches!(err, WorkerError::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn customer_type_rejected_for_sellers() {
        let t = transport("http://127.0.0.1:9");
        let err = t
            .seller_transaction(1, "1", TransactionType::CustomerSession)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Rejected(_)));
    }
}
