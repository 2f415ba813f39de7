use crate::config::SimulationConfig;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use workload_core::error::WorkerError;
use workload_core::tracker::CompletionIngress;
use workload_core::types::{EntityKind, TransactionOutput, TransactionType};
use workload_core::worker::{Completion, WorkerTransport, DELIVERY_ACTOR};

/// In-process stand-in for the marketplace.
///
/// Each call sleeps a random latency. Customer sessions and deliveries may
/// finish out of band: a spawned task reports them to the completion
/// ingress after a second latency draw, the way the real services post
/// receipts.
pub struct SimulatedTransport {
    config: SimulationConfig,
    ingress: Arc<dyn CompletionIngress>,
}

struct Draw {
    latency: Duration,
    fail: bool,
    deferred: bool,
}

impl SimulatedTransport {
    pub fn new(config: SimulationConfig, ingress: Arc<dyn CompletionIngress>) -> Self {
        Self { config, ingress }
    }

    fn latency(&self, rng: &mut impl Rng) -> Duration {
        Duration::from_millis(rng.gen_range(self.config.min_latency_ms..=self.config.max_latency_ms))
    }

    fn draw(&self, can_defer: bool) -> Draw {
        let mut rng = rand::thread_rng();
        Draw {
            latency: self.latency(&mut rng),
            fail: rng.gen_bool(self.config.failure_rate),
            deferred: can_defer && rng.gen_bool(self.config.async_fraction),
        }
    }

    async fn execute(
        &self,
        actor_id: u64,
        tid: &str,
        can_defer: bool,
    ) -> Result<Completion, WorkerError> {
        let draw = self.draw(can_defer);
        tokio::time::sleep(draw.latency).await;

        if draw.fail {
            return Err(WorkerError::Rejected(format!("simulated failure for {tid}")));
        }
        if !draw.deferred {
            return Ok(Completion::Finished);
        }

        let ingress = Arc::clone(&self.ingress);
        let receipt_delay = self.latency(&mut rand::thread_rng());
        let tid = tid.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(receipt_delay).await;
            ingress.add_finished_transaction(actor_id, TransactionOutput::now(tid));
        });
        Ok(Completion::Submitted)
    }
}

#[async_trait]
impl WorkerTransport for SimulatedTransport {
    async fn customer_session(
        &self,
        customer_id: u64,
        tid: &str,
    ) -> Result<Completion, WorkerError> {
        self.execute(customer_id, tid, true).await
    }

    async fn seller_transaction(
        &self,
        seller_id: u64,
        tid: &str,
        tx_type: TransactionType,
    ) -> Result<Completion, WorkerError> {
        if tx_type.entity_kind() != Some(EntityKind::Seller) {
            return Err(WorkerError::Rejected(format!(
                "{tx_type} is not a seller transaction"
            )));
        }
        self.execute(seller_id, tid, false).await
    }

    async fn delivery(&self, tid: &str) -> Result<Completion, WorkerError> {
        self.execute(DELIVERY_ACTOR, tid, true).await
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
