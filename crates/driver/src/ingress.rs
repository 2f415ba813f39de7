use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use workload_core::tracker::{CompletionIngress, TransactionTracker};
use workload_core::types::{TransactionMark, TransactionOutput, TransactionType};

/// Receipt posted by a service once an accepted transaction is done.
#[derive(Debug, Deserialize)]
pub struct CompletionReceipt {
    pub actor_id: u64,
    pub tid: String,
    /// Completion time in ms since the epoch; receipt time when absent.
    #[serde(default)]
    pub completed_at_ms: Option<u64>,
}

/// A previously accepted transaction that failed downstream.
#[derive(Debug, Deserialize)]
pub struct AbortReceipt {
    pub actor_id: u64,
    pub tid: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    #[serde(default = "default_origin")]
    pub origin: String,
}

fn default_origin() -> String {
    "downstream".to_string()
}

pub fn router(tracker: Arc<TransactionTracker>) -> Router {
    Router::new()
        .route("/completions", post(completion_handler))
        .route("/aborts", post(abort_handler))
        .route("/status", get(status_handler))
        .with_state(tracker)
}

/// Serve the ingress on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    tracker: Arc<TransactionTracker>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(tracker))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// POST /completions
pub async fn completion_handler(
    State(tracker): State<Arc<TransactionTracker>>,
    Json(body): Json<CompletionReceipt>,
) -> impl IntoResponse {
    let completed_at = body
        .completed_at_ms
        .map(|ms| UNIX_EPOCH + Duration::from_millis(ms))
        .unwrap_or_else(SystemTime::now);
    let recorded = tracker.add_finished_transaction(
        body.actor_id,
        TransactionOutput {
            tid: body.tid,
            completed_at,
        },
    );
    Json(serde_json::json!({ "recorded": recorded }))
}

/// POST /aborts
pub async fn abort_handler(
    State(tracker): State<Arc<TransactionTracker>>,
    Json(body): Json<AbortReceipt>,
) -> impl IntoResponse {
    let mark = TransactionMark::abort(body.tid, body.tx_type, body.actor_id, body.origin);
    let recorded = tracker.add_aborted_transaction(mark);
    Json(serde_json::json!({ "recorded": recorded }))
}

/// GET /status: counts for the current run.
pub async fn status_handler(State(tracker): State<Arc<TransactionTracker>>) -> impl IntoResponse {
    Json(tracker.counts())
}

#[cfg(test)]
mod tests {
    use super::*;
    use workload_core::completion::completion_channel;
    use workload_core::types::{EntityKind, TransactionIdentifier};

    fn submit(tracker: &TransactionTracker, tid: &str, tx_type: TransactionType) {
        tracker.begin_transaction(
            EntityKind::Customer,
            5,
            TransactionIdentifier {
                tid: tid.to_string(),
                tx_type,
                submitted_at: SystemTime::now(),
            },
            None,
        );
    }

    fn tracker_with_pending(tid: &str, tx_type: TransactionType) -> Arc<TransactionTracker> {
        let tracker = TransactionTracker::new();
        submit(&tracker, tid, tx_type);
        tracker
    }

    #[test]
    fn receipt_timestamp_is_optional() {
        let r: CompletionReceipt =
            serde_json::from_str(r#"{"actor_id": 5, "tid": "12"}"#).unwrap();
        assert_eq!(r.completed_at_ms, None);

        let a: AbortReceipt = serde_json::from_str(
            r#"{"actor_id": 5, "tid": "12", "type": "customer_session"}"#,
        )
        .unwrap();
        assert_eq!(a.tx_type, TransactionType::CustomerSession);
        assert_eq!(a.origin, "downstream");
    }

    #[tokio::test]
    async fn completion_is_recorded_once() {
        let tracker = TransactionTracker::new();
        let (tx, mut rx) = completion_channel();
        tracker.begin_run(tx);
        submit(&tracker, "12", TransactionType::CustomerSession);

        let receipt = || CompletionReceipt {
            actor_id: 5,
            tid: "12".into(),
            completed_at_ms: Some(1_700_000_000_000),
        };
        completion_handler(State(Arc::clone(&tracker)), Json(receipt())).await;
        completion_handler(State(Arc::clone(&tracker)), Json(receipt())).await;

        assert_eq!(rx.drain().len(), 1);
        let log = tracker.entity_log(EntityKind::Customer, 5).unwrap();
        assert_eq!(log.finished.len(), 1);
        assert_eq!(
            log.finished[0].completed_at,
            UNIX_EPOCH + Duration::from_millis(1_700_000_000_000)
        );
    }

    #[tokio::test]
    async fn unknown_tid_is_ignored() {
        let tracker = TransactionTracker::new();
        let (tx, mut rx) = completion_channel();
        tracker.begin_run(tx);
        completion_handler(
            State(Arc::clone(&tracker)),
            Json(CompletionReceipt {
                actor_id: 1,
                tid: "404".into(),
                completed_at_ms: None,
            }),
        )
        .await;
        assert!(rx.drain().is_empty());
        assert_eq!(tracker.counts().finished, 0);
    }

    #[tokio::test]
    async fn abort_releases_pending() {
        let tracker = tracker_with_pending("3", TransactionType::UpdateDelivery);
        abort_handler(
            State(Arc::clone(&tracker)),
            Json(AbortReceipt {
                actor_id: 0,
                tid: "3".into(),
                tx_type: TransactionType::UpdateDelivery,
                origin: "shipment-service".into(),
            }),
        )
        .await;
        assert!(!tracker.is_pending("3"));
        let counts = tracker.counts();
        assert_eq!(counts.aborted, 1);
        assert_eq!(counts.pending, 0);
        assert_eq!(tracker.aborted()[0].origin, "shipment-service");
    }
}
