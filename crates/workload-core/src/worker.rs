use crate::error::{ConfigError, WorkerError};
use crate::idle_pool::IdleLease;
use crate::interval::Interval;
use crate::tracker::TransactionTracker;
use crate::types::{
    EntityKind, TransactionIdentifier, TransactionMark, TransactionOutput, TransactionType,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;

/// Actor id deliveries are recorded under; they target no particular entity.
pub const DELIVERY_ACTOR: u64 = 0;

/// How a transport call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The response itself proves the transaction completed.
    Finished,
    /// Accepted; completion will arrive through the completion ingress.
    Submitted,
}

/// Executes one transaction against the target system.
///
/// Implementations: HTTP (driver), simulated (driver), mocks in tests.
/// All methods take `&self`; transports are shared across dispatch tasks.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Browse, add to cart and check out for `customer_id`.
    async fn customer_session(&self, customer_id: u64, tid: &str)
        -> Result<Completion, WorkerError>;

    /// Price update, product update or dashboard query for `seller_id`.
    async fn seller_transaction(
        &self,
        seller_id: u64,
        tid: &str,
        tx_type: TransactionType,
    ) -> Result<Completion, WorkerError>;

    /// Advance shipment state.
    async fn delivery(&self, tid: &str) -> Result<Completion, WorkerError>;

    /// Human-readable transport name.
    fn name(&self) -> &'static str;

    /// Called by `WorkloadManager::set_up` before each run with the run's
    /// seller population. Transports that pick sellers on their own (cart
    /// contents) rebuild their generators here.
    fn set_up(&self, _seller_range: Interval, _seed: Option<u64>) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Bookkeeping wrapper around a transport.
///
/// Records the submission, then exactly one terminal outcome per tid.
/// Transport errors are logged and turned into abort marks here; they never
/// reach the workload manager.
#[derive(Clone)]
pub struct WorkerFacade {
    transport: Arc<dyn WorkerTransport>,
    tracker: Arc<TransactionTracker>,
}

impl WorkerFacade {
    pub fn new(transport: Arc<dyn WorkerTransport>, tracker: Arc<TransactionTracker>) -> Self {
        Self { transport, tracker }
    }

    pub fn tracker(&self) -> &Arc<TransactionTracker> {
        &self.tracker
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn set_up_transport(
        &self,
        seller_range: Interval,
        seed: Option<u64>,
    ) -> Result<(), ConfigError> {
        self.transport.set_up(seller_range, seed)
    }

    /// Run a customer session for the leased customer. The lease is held
    /// until the session finishes or aborts.
    pub async fn run_customer_transaction(&self, lease: IdleLease, tid: String) {
        let customer_id = lease.id();
        let tx_type = TransactionType::CustomerSession;
        self.submit(EntityKind::Customer, customer_id, &tid, tx_type, Some(lease));
        let result = self.transport.customer_session(customer_id, &tid).await;
        self.settle(customer_id, &tid, tx_type, result);
    }

    pub async fn run_seller_transaction(&self, seller_id: u64, tid: String, tx_type: TransactionType) {
        if tx_type.entity_kind() != Some(EntityKind::Seller) {
            tracing::warn!(tid = %tid, tx_type = %tx_type, "not a seller transaction");
            self.tracker
                .abort_unsubmitted(TransactionMark::abort(tid, tx_type, seller_id, "facade"));
            return;
        }
        self.submit(EntityKind::Seller, seller_id, &tid, tx_type, None);
        let result = self
            .transport
            .seller_transaction(seller_id, &tid, tx_type)
            .await;
        self.settle(seller_id, &tid, tx_type, result);
    }

    pub async fn run_delivery_transaction(&self, tid: String) {
        let tx_type = TransactionType::UpdateDelivery;
        self.submit(EntityKind::Delivery, DELIVERY_ACTOR, &tid, tx_type, None);
        let result = self.transport.delivery(&tid).await;
        self.settle(DELIVERY_ACTOR, &tid, tx_type, result);
    }

    fn submit(
        &self,
        kind: EntityKind,
        actor_id: u64,
        tid: &str,
        tx_type: TransactionType,
        lease: Option<IdleLease>,
    ) {
        let id = TransactionIdentifier {
            tid: tid.to_string(),
            tx_type,
            submitted_at: SystemTime::now(),
        };
        self.tracker.begin_transaction(kind, actor_id, id, lease);
    }

    fn settle(
        &self,
        actor_id: u64,
        tid: &str,
        tx_type: TransactionType,
        result: Result<Completion, WorkerError>,
    ) {
        match result {
            Ok(Completion::Finished) => {
                self.tracker.finish(TransactionOutput::now(tid));
            }
            Ok(Completion::Submitted) => {
                tracing::trace!(tid, tx_type = %tx_type, "awaiting out-of-band completion");
            }
            Err(e) => {
                tracing::warn!(
                    tid,
                    tx_type = %tx_type,
                    actor_id,
                    transport = self.transport.name(),
                    error = %e,
                    "transaction failed"
                );
                self.tracker.abort(TransactionMark::abort(
                    tid,
                    tx_type,
                    actor_id,
                    self.transport.name(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::completion_channel;
    use crate::idle_pool::IdlePool;
    use crate::tracker::CompletionIngress;
    use crate::types::MarkStatus;

    /// Finishes sellers synchronously, defers customers, fails deliveries.
    struct MixedTransport;

    #[async_trait]
    impl WorkerTransport for MixedTransport {
        async fn customer_session(&self, _: u64, _: &str) -> Result<Completion, WorkerError> {
            Ok(Completion::Submitted)
        }

        async fn seller_transaction(
            &self,
            _: u64,
            _: &str,
            _: TransactionType,
        ) -> Result<Completion, WorkerError> {
            Ok(Completion::Finished)
        }

        async fn delivery(&self, _: &str) -> Result<Completion, WorkerError> {
            Err(WorkerError::Transport("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "mixed"
        }
    }

    fn facade() -> WorkerFacade {
        WorkerFacade::new(Arc::new(MixedTransport), TransactionTracker::new())
    }

    #[tokio::test]
    async fn sync_seller_transaction_finishes() {
        let f = facade();
        f.run_seller_transaction(7, "1".into(), TransactionType::PriceUpdate)
            .await;
        let log = f.tracker().entity_log(EntityKind::Seller, 7).unwrap();
        assert_eq!(log.submitted[0].tx_type, TransactionType::PriceUpdate);
        assert_eq!(log.finished[0].tid, "1");
    }

    #[tokio::test]
    async fn async_customer_completes_through_ingress() {
        let f = facade();
        let pool = IdlePool::new(Interval::new(1, 1).unwrap());
        let lease = pool.checkout().await.unwrap();

        f.run_customer_transaction(lease, "2".into()).await;
        assert!(f.tracker().is_pending("2"));
        assert!(pool.is_checked_out(1));

        assert!(f
            .tracker()
            .add_finished_transaction(1, TransactionOutput::now("2")));
        assert!(!pool.is_checked_out(1));
        let log = f.tracker().entity_log(EntityKind::Customer, 1).unwrap();
        assert_eq!(log.finished.len(), 1);
    }

    #[tokio::test]
    async fn transport_error_becomes_abort_mark() {
        let f = facade();
        let (tx, mut rx) = completion_channel();
        f.tracker().begin_run(tx);

        f.run_delivery_transaction("3".into()).await;

        let aborted = f.tracker().aborted();
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].tid, "3");
        assert_eq!(aborted[0].status, MarkStatus::Abort);
        assert_eq!(aborted[0].origin, "mixed");
        let log = f.tracker().entity_log(EntityKind::Delivery, DELIVERY_ACTOR).unwrap();
        assert!(log.finished.is_empty());

        let tokens = rx.drain();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].status, MarkStatus::Abort);
    }

    #[tokio::test]
    async fn non_seller_type_is_rejected() {
        let f = facade();
        f.run_seller_transaction(1, "4".into(), TransactionType::CustomerSession)
            .await;
        assert_eq!(f.tracker().aborted()[0].origin, "facade");
        assert_eq!(f.tracker().counts().submitted, 0);
    }
}
