use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Transaction families the driver can emit against the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    CustomerSession,
    QueryDashboard,
    PriceUpdate,
    UpdateProduct,
    UpdateDelivery,
    None,
}

impl TransactionType {
    /// Every type that can actually be submitted (excludes `None`).
    pub const SUBMITTABLE: [TransactionType; 5] = [
        TransactionType::CustomerSession,
        TransactionType::QueryDashboard,
        TransactionType::PriceUpdate,
        TransactionType::UpdateProduct,
        TransactionType::UpdateDelivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::CustomerSession => "customer_session",
            TransactionType::QueryDashboard => "query_dashboard",
            TransactionType::PriceUpdate => "price_update",
            TransactionType::UpdateProduct => "update_product",
            TransactionType::UpdateDelivery => "update_delivery",
            TransactionType::None => "none",
        }
    }

    /// Which worker family executes this type.
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            TransactionType::CustomerSession => Some(EntityKind::Customer),
            TransactionType::QueryDashboard
            | TransactionType::PriceUpdate
            | TransactionType::UpdateProduct => Some(EntityKind::Seller),
            TransactionType::UpdateDelivery => Some(EntityKind::Delivery),
            TransactionType::None => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of entity a transaction is recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Customer,
    Seller,
    Delivery,
}

/// Created by the worker façade at the moment of submission. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionIdentifier {
    pub tid: String,
    pub tx_type: TransactionType,
    pub submitted_at: SystemTime,
}

/// Created when completion is observed, synchronously or through the completion feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub tid: String,
    pub completed_at: SystemTime,
}

impl TransactionOutput {
    pub fn now(tid: impl Into<String>) -> Self {
        Self {
            tid: tid.into(),
            completed_at: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkStatus {
    Abort,
    Success,
}

/// Outcome mark for a transaction that was rejected or failed downstream.
/// Aborted tids are excluded from latency computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMark {
    pub tid: String,
    pub tx_type: TransactionType,
    pub actor_id: u64,
    pub status: MarkStatus,
    pub origin: String,
}

impl TransactionMark {
    pub fn abort(
        tid: impl Into<String>,
        tx_type: TransactionType,
        actor_id: u64,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            tid: tid.into(),
            tx_type,
            actor_id,
            status: MarkStatus::Abort,
            origin: origin.into(),
        }
    }
}

/// Start and finish of one run, always produced even when the run is cut short.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunWindow {
    pub start: SystemTime,
    pub finish: SystemTime,
    /// True when the run was abandoned because the target became unreachable.
    pub aborted_early: bool,
}

impl RunWindow {
    /// Wall-clock length of the window. Zero if the clock went backwards.
    pub fn duration(&self) -> std::time::Duration {
        self.finish
            .duration_since(self.start)
            .unwrap_or_default()
    }

    pub fn contains(&self, at: SystemTime) -> bool {
        at >= self.start && at <= self.finish
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn entity_kind_per_type() {
        assert_eq!(
            TransactionType::CustomerSession.entity_kind(),
            Some(EntityKind::Customer)
        );
        assert_eq!(
            TransactionType::PriceUpdate.entity_kind(),
            Some(EntityKind::Seller)
        );
        assert_eq!(
            TransactionType::QueryDashboard.entity_kind(),
            Some(EntityKind::Seller)
        );
        assert_eq!(
            TransactionType::UpdateDelivery.entity_kind(),
            Some(EntityKind::Delivery)
        );
        assert_eq!(TransactionType::None.entity_kind(), None);
    }

    #[test]
    fn type_names_match_serde() {
        for ty in TransactionType::SUBMITTABLE {
            assert_eq!(toml_name(ty), ty.as_str());
        }
    }

    fn toml_name(ty: TransactionType) -> String {
        #[derive(Serialize)]
        struct Wrap {
            t: TransactionType,
        }
        let s = toml::to_string(&Wrap { t: ty }).unwrap();
        s.trim()
            .trim_start_matches("t = ")
            .trim_matches('"')
            .to_string()
    }

    #[test]
    fn window_duration_and_contains() {
        let start = SystemTime::now();
        let window = RunWindow {
            start,
            finish: start + Duration::from_millis(250),
            aborted_early: false,
        };
        assert_eq!(window.duration(), Duration::from_millis(250));
        assert!(window.contains(start + Duration::from_millis(100)));
        assert!(!window.contains(start + Duration::from_secs(1)));
    }
}
