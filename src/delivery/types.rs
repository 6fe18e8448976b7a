//! Delivery wire types and outcome reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::DeliveryRequest;

/// JSON body POSTed to the primary and fallback endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub order_id: i64,
    pub reporter_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Order status hint sent by roles that carry one (e.g. `out_for_delivery`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub accuracy_m: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationUpdate {
    pub fn from_request(request: &DeliveryRequest, status: Option<&str>) -> Self {
        Self {
            order_id: request.session.order_id,
            reporter_id: request.session.reporter_id,
            latitude: request.fix.latitude,
            longitude: request.fix.longitude,
            status: status.map(str::to_string),
            heading: request.heading_deg,
            accuracy_m: request.fix.accuracy_m,
            captured_at: request.fix.captured_at,
        }
    }
}

/// Response envelope returned by both endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Which endpoint accepted a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Primary,
    Fallback,
}

/// Terminal result of one enqueued fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered {
        session_id: Uuid,
        order_id: i64,
        via: Endpoint,
    },
    /// Both attempts failed; the fix was dropped.
    Failed {
        session_id: Uuid,
        order_id: i64,
        primary_error: String,
        fallback_error: String,
    },
    /// Too many deliveries in flight; the fix was dropped before any attempt.
    Saturated { session_id: Uuid, order_id: i64 },
    /// The pipeline shut down while the attempt was running.
    Cancelled { session_id: Uuid, order_id: i64 },
}

impl DeliveryOutcome {
    pub fn session_id(&self) -> Uuid {
        match self {
            DeliveryOutcome::Delivered { session_id, .. }
            | DeliveryOutcome::Failed { session_id, .. }
            | DeliveryOutcome::Saturated { session_id, .. }
            | DeliveryOutcome::Cancelled { session_id, .. } => *session_id,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Counter snapshot from [`PublishPipeline::stats`](super::PublishPipeline::stats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub enqueued: u64,
    pub delivered_primary: u64,
    pub delivered_fallback: u64,
    pub failed: u64,
    pub saturated: u64,
    pub cancelled: u64,
}

impl DeliveryStats {
    pub fn delivered(&self) -> u64 {
        self.delivered_primary + self.delivered_fallback
    }
}
