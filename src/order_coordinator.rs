//! Fleet-position election: Phase A (heartbeat + staircase wait), Phase B
//! (earlier-alive recheck), Phase C (execute). No central leader — every
//! machine independently computes its position from the same sorted
//! machine list and waits `(position - 1) * OFFSET_STEP_SEC` seconds before
//! rechecking whether anyone earlier beat it to this minute.

use chrono::{DateTime, FixedOffset, Utc};

use crate::store::StoreGateway;
use crate::types::Machine;

/// Seconds between successive machines' staggered recheck slots.
pub const OFFSET_STEP_SEC: u64 = 5;

/// Outcome of the Phase A / Phase B decision for this minute.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// This machine should proceed to execute immediately (position 1, or
    /// the recheck found no earlier machine alive).
    Execute { position: usize, order_value: i64 },
    /// Beyond `max_active_machines`; sit this minute out entirely.
    BeyondLimit,
    /// Wait `wait_seconds` then recheck.
    Wait { wait_seconds: u64, position: usize, order_value: i64 },
    /// An earlier machine reported in this minute; stand down.
    StandDown,
}

/// The sorted fleet and this machine's place within it.
pub struct OrderContext {
    pub machines: Vec<Machine>,
    pub position: usize,
    pub order_value: i64,
}

/// Look up this machine's position in the sorted fleet list, registering it
/// if it's not present yet.
pub async fn get_order_context(
    store: &dyn StoreGateway,
    machine_id: &str,
    hostname: &str,
    default_order_value: i64,
) -> Result<OrderContext, crate::error::StoreError> {
    let mut machines = store.list_machines_sorted().await?;
    if !machines.iter().any(|m| m.machine_id == machine_id) {
        store
            .ensure_machine(machine_id, hostname, default_order_value)
            .await?;
        machines = store.list_machines_sorted().await?;
    }
    let position = machines
        .iter()
        .position(|m| m.machine_id == machine_id)
        .map(|idx| idx + 1)
        .unwrap_or(machines.len() + 1);
    let order_value = machines
        .iter()
        .find(|m| m.machine_id == machine_id)
        .map(|m| m.order_value)
        .unwrap_or(default_order_value);
    Ok(OrderContext {
        machines,
        position,
        order_value,
    })
}

/// Phase A: heartbeat for `scheduled_minute_utc`, then decide whether to
/// execute now, wait, or stand down entirely (limit exceeded).
pub fn phase_a_decision(position: usize, order_value: i64, max_active_machines: i64) -> Decision {
    if max_active_machines > 0 && position as i64 > max_active_machines {
        return Decision::BeyondLimit;
    }
    let wait_seconds = ((position as u64).saturating_sub(1)) * OFFSET_STEP_SEC;
    if wait_seconds > 0 {
        Decision::Wait {
            wait_seconds,
            position,
            order_value,
        }
    } else {
        Decision::Execute { position, order_value }
    }
}

/// Phase B: after waiting, recheck whether any machine ahead of us in the
/// sorted list reported a heartbeat for this exact minute.
pub fn phase_b_decision(
    machines: &[Machine],
    position: usize,
    order_value: i64,
    scheduled_minute_utc: DateTime<Utc>,
    max_active_machines: i64,
) -> Decision {
    if max_active_machines > 0 && position as i64 > max_active_machines {
        return Decision::BeyondLimit;
    }
    if earlier_machines_online(machines, position, scheduled_minute_utc) {
        return Decision::StandDown;
    }
    Decision::Execute { position, order_value }
}

/// True iff any machine strictly before `position` in the sorted list has
/// `last_online_minute == scheduled_minute_utc`.
fn earlier_machines_online(
    machines: &[Machine],
    position: usize,
    scheduled_minute_utc: DateTime<Utc>,
) -> bool {
    if position <= 1 {
        return false;
    }
    machines
        .iter()
        .take(position - 1)
        .any(|m| m.last_online_minute == Some(scheduled_minute_utc))
}

/// Convert a local tick instant to the UTC minute key used for claims and
/// heartbeats.
pub fn to_utc_minute(local: DateTime<FixedOffset>) -> DateTime<Utc> {
    crate::clock::floor_to_minute(local).with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(id: &str, order: i64, last_online: Option<DateTime<Utc>>) -> Machine {
        Machine {
            machine_id: id.to_string(),
            hostname: id.to_string(),
            order_value: order,
            last_online_minute: last_online,
            last_seen: None,
        }
    }

    #[test]
    fn position_one_has_zero_wait() {
        match phase_a_decision(1, 0, 10) {
            Decision::Execute { position, .. } => assert_eq!(position, 1),
            other => panic!("expected Execute, got {other:?}"),
        }
    }

    #[test]
    fn position_two_waits_one_offset_step() {
        match phase_a_decision(2, 0, 10) {
            Decision::Wait { wait_seconds, .. } => assert_eq!(wait_seconds, OFFSET_STEP_SEC),
            other => panic!("expected Wait, got {other:?}"),
        }
    }

    #[test]
    fn beyond_limit_stands_down_immediately() {
        assert_eq!(phase_a_decision(11, 0, 10), Decision::BeyondLimit);
    }

    #[test]
    fn zero_limit_disables_the_cap() {
        match phase_a_decision(100, 0, 0) {
            Decision::Wait { .. } => {}
            other => panic!("expected Wait (cap disabled), got {other:?}"),
        }
    }

    #[test]
    fn phase_b_stands_down_when_earlier_machine_alive() {
        let now = Utc::now();
        let machines = vec![
            machine("a", 1, Some(now)),
            machine("b", 2, None),
        ];
        let decision = phase_b_decision(&machines, 2, 2, now, 10);
        assert_eq!(decision, Decision::StandDown);
    }

    #[test]
    fn phase_b_executes_when_earlier_machine_dead() {
        let now = Utc::now();
        let machines = vec![
            machine("a", 1, None),
            machine("b", 2, None),
        ];
        let decision = phase_b_decision(&machines, 2, 2, now, 10);
        assert_eq!(decision, Decision::Execute { position: 2, order_value: 2 });
    }

    #[test]
    fn position_one_never_stands_down() {
        let now = Utc::now();
        let machines = vec![machine("a", 1, None)];
        let decision = phase_b_decision(&machines, 1, 1, now, 10);
        assert_eq!(decision, Decision::Execute { position: 1, order_value: 1 });
    }
}
