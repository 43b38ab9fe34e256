//! Bounded per-tenant in-flight work tracker.
//!
//! Unlike [`recv_session`], which serialises mutation of a single session,
//! this gates how many artifacts one tenant may have mid-pipeline at once.
//! Overflow is rejected outright rather than queued (§4.13: "the
//! orchestrator exposes a bounded work queue per tenant. Overflow returns
//! `QueueFull`, not a queued job, so callers decide retry policy") — the
//! same immediate-capacity-check shape as a bounded run queue, just tracking
//! concurrent occupancy instead of a FIFO of waiting jobs.

use recv_error::{ErrorCode, PipelineError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Per-tenant in-flight counters, gated at a fixed capacity.
pub struct TenantQueues {
    capacity: usize,
    in_flight: Mutex<HashMap<Uuid, usize>>,
}

impl TenantQueues {
    /// Create a tracker admitting at most `capacity` concurrent artifacts
    /// per tenant.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, in_flight: Mutex::new(HashMap::new()) }
    }

    /// Reserve one slot for `tenant_id`, returning a guard that releases it
    /// on drop. Callers hold `self` behind an `Arc` so the guard can
    /// release asynchronously without borrowing back into `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::QueueFull`] if `tenant_id` already has
    /// `capacity` artifacts in flight.
    pub async fn acquire(self: &Arc<Self>, tenant_id: Uuid) -> Result<TenantPermit, PipelineError> {
        let mut in_flight = self.in_flight.lock().await;
        let count = in_flight.entry(tenant_id).or_insert(0);
        if *count >= self.capacity {
            return Err(PipelineError::new(
                ErrorCode::QueueFull,
                format!("tenant {tenant_id} already has {} artifacts in flight (capacity {})", *count, self.capacity),
            )
            .with_context("tenant_id", tenant_id.to_string())
            .with_context("capacity", self.capacity));
        }
        *count += 1;
        Ok(TenantPermit { queues: Arc::clone(self), tenant_id })
    }

    async fn release(&self, tenant_id: Uuid) {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(count) = in_flight.get_mut(&tenant_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(&tenant_id);
            }
        }
    }

    /// Current in-flight count for `tenant_id`, for diagnostics and tests.
    pub async fn in_flight_count(&self, tenant_id: Uuid) -> usize {
        self.in_flight.lock().await.get(&tenant_id).copied().unwrap_or(0)
    }
}

/// RAII guard releasing a tenant's reserved slot when dropped.
pub struct TenantPermit {
    queues: Arc<TenantQueues>,
    tenant_id: Uuid,
}

impl Drop for TenantPermit {
    fn drop(&mut self) {
        let queues = Arc::clone(&self.queues);
        let tenant_id = self.tenant_id;
        tokio::spawn(async move {
            queues.release(tenant_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_capacity_then_rejects() {
        let queues = Arc::new(TenantQueues::new(2));
        let tenant = Uuid::new_v4();
        let first = queues.acquire(tenant).await.unwrap();
        let second = queues.acquire(tenant).await.unwrap();
        let err = queues.acquire(tenant).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::QueueFull);
        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn releasing_a_permit_frees_a_slot() {
        let queues = Arc::new(TenantQueues::new(1));
        let tenant = Uuid::new_v4();
        let permit = queues.acquire(tenant).await.unwrap();
        assert_eq!(queues.in_flight_count(tenant).await, 1);
        drop(permit);
        // Drop schedules the release on the runtime; yield until it runs.
        for _ in 0..100 {
            if queues.in_flight_count(tenant).await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(queues.in_flight_count(tenant).await, 0);
    }

    #[tokio::test]
    async fn distinct_tenants_have_independent_capacity() {
        let queues = Arc::new(TenantQueues::new(1));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _permit_a = queues.acquire(a).await.unwrap();
        assert!(queues.acquire(b).await.is_ok());
    }
}
