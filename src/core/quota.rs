/// Admission control: in-flight request quotas, global and per user
use crate::error::{CharlaError, CharlaResult};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Quota thresholds, replaceable at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub max_in_flight: usize,
    pub max_in_flight_for_uid: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 100,
            max_in_flight_for_uid: 2,
        }
    }
}

#[derive(Debug, Default)]
struct QuotaState {
    config: QuotaConfig,
    in_flight: usize,
    in_flight_by_uid: FnvHashMap<String, usize>,
}

/// Gate every front-end request must pass before fan-out.
///
/// Limits are inclusive: a counter equal to its maximum still admits one more
/// request, so at most `max + 1` requests are in flight.
pub struct AdmissionController {
    state: Mutex<QuotaState>,
}

impl AdmissionController {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            state: Mutex::new(QuotaState {
                config,
                ..Default::default()
            }),
        }
    }

    /// Try to take a slot for `uid`. Nothing is mutated on rejection.
    pub async fn try_acquire(&self, uid: &str) -> bool {
        let mut state = self.state.lock().await;
        let config = state.config;

        if state.in_flight > config.max_in_flight {
            tracing::debug!(
                "Rejecting request for uid {}: {} requests in flight (max {})",
                uid,
                state.in_flight,
                config.max_in_flight
            );
            return false;
        }

        let for_uid = state.in_flight_by_uid.get(uid).copied().unwrap_or(0);
        if for_uid > config.max_in_flight_for_uid {
            tracing::debug!(
                "Rejecting request for uid {}: {} of its requests in flight (max {})",
                uid,
                for_uid,
                config.max_in_flight_for_uid
            );
            return false;
        }

        state.in_flight += 1;
        state.in_flight_by_uid.insert(uid.to_string(), for_uid + 1);
        true
    }

    /// Give back the slot taken by a successful `try_acquire` for `uid`
    pub async fn release(&self, uid: &str) -> CharlaResult<()> {
        let mut state = self.state.lock().await;

        let for_uid = state.in_flight_by_uid.get(uid).copied().unwrap_or(0);
        if for_uid == 0 {
            return Err(CharlaError::quota_violation(uid));
        }
        let in_flight = state.in_flight.checked_sub(1).ok_or_else(|| {
            CharlaError::internal(format!(
                "global in-flight counter is zero while uid {uid} holds {for_uid} slots"
            ))
        })?;

        state.in_flight = in_flight;
        if for_uid == 1 {
            state.in_flight_by_uid.remove(uid);
        } else {
            state.in_flight_by_uid.insert(uid.to_string(), for_uid - 1);
        }
        Ok(())
    }

    /// Swap the thresholds; applies to subsequent acquires only
    pub async fn update_config(&self, config: QuotaConfig) {
        let mut state = self.state.lock().await;
        tracing::info!(
            "Quotas updated: max_in_flight {} -> {}, max_in_flight_for_uid {} -> {}",
            state.config.max_in_flight,
            config.max_in_flight,
            state.config.max_in_flight_for_uid,
            config.max_in_flight_for_uid
        );
        state.config = config;
    }

    pub async fn config(&self) -> QuotaConfig {
        self.state.lock().await.config
    }

    /// Requests currently in flight across all users
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight
    }

    /// Requests currently in flight for `uid`
    pub async fn in_flight_for(&self, uid: &str) -> usize {
        let state = self.state.lock().await;
        state.in_flight_by_uid.get(uid).copied().unwrap_or(0)
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}
