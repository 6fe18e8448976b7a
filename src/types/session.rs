//! Tracking session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PositionFix;

/// Which side of the delivery is reporting.
///
/// Both roles run the same tracking loop; they differ only in their
/// [`RoleProfile`](crate::config::RoleProfile).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Pickup / dispatch actor
    Pickup,
    /// Delivery actor
    #[default]
    Delivery,
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorRole::Pickup => write!(f, "pickup"),
            ActorRole::Delivery => write!(f, "delivery"),
        }
    }
}

impl std::str::FromStr for ActorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pickup" | "dispatch" => Ok(ActorRole::Pickup),
            "delivery" => Ok(ActorRole::Delivery),
            other => Err(format!("unknown actor role '{other}' (expected pickup or delivery)")),
        }
    }
}

/// Session lifecycle state.
///
/// `Idle → Starting → Active → Stopping → Idle`, with `Failed` reachable from
/// `Starting` and resetting to `Idle` immediately after it is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
    Failed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal edge.
    ///
    /// Any state may enter `Stopping` so teardown is never skipped.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Active)
                | (Starting, Failed)
                | (Failed, Idle)
                | (_, Stopping)
                | (Stopping, Idle)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "IDLE",
            SessionState::Starting => "STARTING",
            SessionState::Active => "ACTIVE",
            SessionState::Stopping => "STOPPING",
            SessionState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of the session owned by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSession {
    pub session_id: Uuid,
    pub order_id: i64,
    pub reporter_id: i64,
    pub role: ActorRole,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

impl TrackingSession {
    pub fn context(&self) -> SessionContext {
        SessionContext {
            session_id: self.session_id,
            order_id: self.order_id,
            reporter_id: self.reporter_id,
            role: self.role,
        }
    }
}

/// Read-only identity carried with every queued delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub order_id: i64,
    pub reporter_id: i64,
    pub role: ActorRole,
}

/// One unit of work for the publish pipeline.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest {
    pub fix: PositionFix,
    pub heading_deg: Option<f64>,
    pub session: SessionContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Active));
        assert!(Active.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Idle));
    }

    #[test]
    fn test_failed_only_from_starting() {
        use SessionState::*;
        assert!(Starting.can_transition_to(Failed));
        assert!(!Active.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Active));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Delivery".parse::<ActorRole>(), Ok(ActorRole::Delivery));
        assert_eq!("dispatch".parse::<ActorRole>(), Ok(ActorRole::Pickup));
        assert!("driver".parse::<ActorRole>().is_err());
    }
}
