//! Broker order id translation
//!
//! The gateway assigns its own integer order ids; the ledger keys orders by
//! internal ids. This table binds the two. Allocation of the next broker id
//! and registration of the mapping happen in one call so the mapping exists
//! before the submission that could trigger a callback referencing it.

use std::collections::HashMap;

use crate::gateway::BrokerOrderId;
use crate::oms::orders::OrderId;

pub struct IdTranslator {
    to_internal: HashMap<BrokerOrderId, OrderId>,
    to_broker: HashMap<OrderId, BrokerOrderId>,
    /// Next usable broker id; seeded by the gateway handshake
    next_broker_id: Option<BrokerOrderId>,
}

impl IdTranslator {
    pub fn new() -> Self {
        IdTranslator {
            to_internal: HashMap::new(),
            to_broker: HashMap::new(),
            next_broker_id: None,
        }
    }

    /// Seed (or re-seed on reconnect) the broker id counter. The gateway
    /// guarantees ids at or above the seed are unused, so only a forward
    /// move is accepted.
    pub fn seed(&mut self, next_broker_id: BrokerOrderId) {
        match self.next_broker_id {
            Some(current) if current >= next_broker_id => {}
            _ => self.next_broker_id = Some(next_broker_id),
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.next_broker_id.is_some()
    }

    /// Consume the next broker id and bind it to `order_id`, both under the
    /// caller's exclusive section. Returns None until the gateway handshake
    /// has seeded the counter.
    pub fn allocate(&mut self, order_id: OrderId) -> Option<BrokerOrderId> {
        let broker_id = self.next_broker_id?;
        self.next_broker_id = Some(broker_id + 1);
        self.to_internal.insert(broker_id, order_id);
        self.to_broker.insert(order_id, broker_id);
        Some(broker_id)
    }

    /// Translate a callback's broker id. None means the mapping is not
    /// registered (yet) and the callback must be dropped, not crashed on.
    pub fn internal_id(&self, broker_id: BrokerOrderId) -> Option<OrderId> {
        self.to_internal.get(&broker_id).copied()
    }

    pub fn broker_id(&self, order_id: OrderId) -> Option<BrokerOrderId> {
        self.to_broker.get(&order_id).copied()
    }

    pub fn len(&self) -> usize {
        self.to_internal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_internal.is_empty()
    }
}

impl Default for IdTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_requires_seed() {
        let mut tr = IdTranslator::new();
        assert_eq!(tr.allocate(1), None);

        tr.seed(100);
        assert_eq!(tr.allocate(1), Some(100));
        assert_eq!(tr.allocate(2), Some(101));
    }

    #[test]
    fn test_bidirectional_lookup() {
        let mut tr = IdTranslator::new();
        tr.seed(50);
        let broker = tr.allocate(7).unwrap();

        assert_eq!(tr.internal_id(broker), Some(7));
        assert_eq!(tr.broker_id(7), Some(broker));
        assert_eq!(tr.internal_id(9999), None);
    }

    #[test]
    fn test_reseed_never_moves_backwards() {
        let mut tr = IdTranslator::new();
        tr.seed(100);
        tr.allocate(1);
        // A reconnect handing out a stale lower seed must not cause reuse
        tr.seed(50);
        assert_eq!(tr.allocate(2), Some(101));
    }
}
