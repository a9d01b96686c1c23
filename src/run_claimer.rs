//! Thin wrapper over the store's atomic claim, collapsing any contention
//! or duplicate-key outcome into a plain `false`.

use chrono::{DateTime, Utc};

use crate::store::StoreGateway;

/// Attempt to claim `(job_id, scheduled_for)` for `machine_id`. Returns
/// `true` only if this machine is the run's claimant immediately after the
/// call.
pub async fn try_claim(
    store: &dyn StoreGateway,
    job_id: &str,
    scheduled_for: DateTime<Utc>,
    machine_id: &str,
    order_value: i64,
    order_position: usize,
) -> bool {
    match store
        .claim_run(job_id, scheduled_for, machine_id, order_value, order_position)
        .await
    {
        Ok(claimed) => claimed,
        Err(e) => {
            tracing::warn!(job_id, error = %e, "claim attempt failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn second_claimant_loses_the_race() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        assert!(try_claim(&store, "j1", now, "a", 1, 1).await);
        assert!(!try_claim(&store, "j1", now, "b", 2, 2).await);
    }
}
