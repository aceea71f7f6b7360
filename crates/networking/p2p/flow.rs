use std::collections::HashMap;

use tokio::time::Instant;

use crate::rlpx::les::status::{CostEntry, StatusMessage};

/// Default parameters assumed for servers that announce no flow-control
/// table. Matches the conservative limits LES servers advertised in the
/// wild.
const DEFAULT_BUFFER_LIMIT: u64 = 300_000;
const DEFAULT_RECHARGE_RATE: u64 = 50_000;
const DEFAULT_BASE_COST: u64 = 150_000;
const DEFAULT_REQ_COST: u64 = 30_000;

/// Client-side mirror of a server's request-credit budget.
///
/// Every dispatched request debits `base + count * per_unit` from the
/// buffer; every response carries a BV (buffer value) with the server's own
/// view, which we adopt clipped to the announced limit. The buffer also
/// recharges linearly with time at the announced MRR.
#[derive(Debug)]
pub(crate) struct FlowControl {
    buffer_limit: u64,
    /// Units recharged per second.
    recharge_rate: u64,
    costs: HashMap<u8, CostEntry>,
    buffer: u64,
    last_recharge: Instant,
}

impl FlowControl {
    pub fn new(buffer_limit: u64, recharge_rate: u64, cost_table: Vec<CostEntry>) -> Self {
        let costs = cost_table
            .into_iter()
            .map(|entry| (entry.msg_code, entry))
            .collect();
        Self {
            buffer_limit,
            recharge_rate,
            costs,
            buffer: buffer_limit,
            last_recharge: Instant::now(),
        }
    }

    /// Builds the budget mirror from a server's Status message, falling back
    /// to defaults for fields the server omitted.
    pub fn from_status(status: &StatusMessage) -> Self {
        Self::new(
            status.flow_buffer_limit.unwrap_or(DEFAULT_BUFFER_LIMIT),
            status.flow_recharge_rate.unwrap_or(DEFAULT_RECHARGE_RATE),
            status.flow_cost_table.clone().unwrap_or_default(),
        )
    }

    pub fn buffer(&self) -> u64 {
        self.buffer
    }

    pub fn buffer_limit(&self) -> u64 {
        self.buffer_limit
    }

    /// The maximum cost the server may charge for a request of `count` units
    /// of message `msg_code`.
    pub fn max_cost(&self, msg_code: u8, count: u64) -> u64 {
        match self.costs.get(&msg_code) {
            Some(entry) => entry.base_cost + count * entry.req_cost,
            None => DEFAULT_BASE_COST + count * DEFAULT_REQ_COST,
        }
    }

    /// Recharges the buffer for the time elapsed since the last call.
    pub fn recharge(&mut self) {
        let elapsed = self.last_recharge.elapsed();
        self.last_recharge = Instant::now();
        let recharged = (elapsed.as_millis() as u64)
            .saturating_mul(self.recharge_rate)
            / 1000;
        self.buffer = (self.buffer + recharged).min(self.buffer_limit);
    }

    /// Debits `cost` if the buffer covers it. A request must not be
    /// dispatched when this returns false.
    pub fn reserve(&mut self, cost: u64) -> bool {
        if cost > self.buffer {
            return false;
        }
        self.buffer -= cost;
        true
    }

    /// Adopts the buffer value reported by the server, clipped to the
    /// announced limit.
    pub fn absorb_bv(&mut self, bv: u64) {
        self.buffer = bv.min(self.buffer_limit);
        self.last_recharge = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> FlowControl {
        FlowControl::new(
            100_000,
            50_000,
            vec![CostEntry {
                msg_code: 0x02,
                base_cost: 10_000,
                req_cost: 1_000,
            }],
        )
    }

    #[test]
    fn reserve_debits_and_rejects() {
        let mut flow = flow();
        let cost = flow.max_cost(0x02, 3);
        assert_eq!(cost, 13_000);
        assert!(flow.reserve(cost));
        assert_eq!(flow.buffer(), 87_000);

        // The buffer never goes negative.
        assert!(!flow.reserve(1_000_000));
        assert_eq!(flow.buffer(), 87_000);
    }

    #[test]
    fn unknown_message_code_uses_default_cost() {
        let flow = flow();
        assert_eq!(flow.max_cost(0x7f, 1), DEFAULT_BASE_COST + DEFAULT_REQ_COST);
    }

    #[test]
    fn bv_is_clipped_to_limit() {
        let mut flow = flow();
        flow.absorb_bv(u64::MAX);
        assert_eq!(flow.buffer(), flow.buffer_limit());

        flow.absorb_bv(1234);
        assert_eq!(flow.buffer(), 1234);
    }

    #[test]
    fn recharge_never_exceeds_limit() {
        let mut flow = flow();
        flow.absorb_bv(0);
        flow.recharge();
        assert!(flow.buffer() <= flow.buffer_limit());
    }
}
