use tracing::debug;

use crate::connection::Connection;
use crate::error::{NodeError, NodeResult};
use crate::layers::TimerId;
use crate::topology::NodeAddr;

/// Bounded mapping from peer address to [Connection], looked up by linear scan. Connections are
///  never evicted: once the table is full, new peers are rejected.
#[derive(Debug)]
pub struct ConnectionTable {
    capacity: usize,
    connections: Vec<Connection>,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> ConnectionTable {
        ConnectionTable {
            capacity,
            connections: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn lookup(&mut self, peer: NodeAddr) -> NodeResult<&mut Connection> {
        self.connections.iter_mut()
            .find(|c| c.peer() == peer)
            .ok_or(NodeError::NotFound(peer))
    }

    pub fn lookup_or_create(&mut self, peer: NodeAddr) -> NodeResult<&mut Connection> {
        if let Some(idx) = self.connections.iter().position(|c| c.peer() == peer) {
            return Ok(&mut self.connections[idx]);
        }

        if self.connections.len() >= self.capacity {
            return Err(NodeError::CapacityExceeded { capacity: self.capacity, peer });
        }

        debug!(?peer, "creating connection");
        self.connections.push(Connection::new(peer));
        let idx = self.connections.len() - 1;
        Ok(&mut self.connections[idx])
    }

    /// the connection whose live retransmission timer is `timer`, if any
    pub fn find_by_timer(&mut self, timer: TimerId) -> Option<&mut Connection> {
        self.connections.iter_mut()
            .find(|c| c.arq.timer() == Some(timer))
    }

    /// connections in the order they were created
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use super::*;

    #[test]
    fn test_lookup_or_create_reuses_connection() {
        let mut table = ConnectionTable::new(3);

        table.lookup_or_create(NodeAddr(1)).unwrap()
            .arq.begin_send(Bytes::from_static(b"x"));
        let conn = table.lookup_or_create(NodeAddr(1)).unwrap();

        assert_eq!(conn.arq.next_frame_to_send().to_raw(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_lookup_does_not_create() {
        let mut table = ConnectionTable::new(3);

        assert!(matches!(table.lookup(NodeAddr(1)), Err(NodeError::NotFound(NodeAddr(1)))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut table = ConnectionTable::new(2);
        table.lookup_or_create(NodeAddr(1)).unwrap();
        table.lookup_or_create(NodeAddr(2)).unwrap();

        match table.lookup_or_create(NodeAddr(3)) {
            Err(NodeError::CapacityExceeded { capacity, peer }) => {
                assert_eq!(capacity, 2);
                assert_eq!(peer, NodeAddr(3));
            }
            other => panic!("expected capacity error, was {:?}", other),
        }

        // existing peers are still served
        assert!(table.lookup_or_create(NodeAddr(2)).is_ok());
    }

    #[test]
    fn test_find_by_timer() {
        let mut table = ConnectionTable::new(3);
        table.lookup_or_create(NodeAddr(1)).unwrap();
        let conn = table.lookup_or_create(NodeAddr(2)).unwrap();
        conn.arq.begin_send(Bytes::from_static(b"x"));
        conn.arq.timer_armed(TimerId(9)).unwrap();

        assert_eq!(table.find_by_timer(TimerId(9)).map(|c| c.peer()), Some(NodeAddr(2)));
        assert!(table.find_by_timer(TimerId(8)).is_none());
    }

    #[test]
    fn test_iter_in_creation_order() {
        let mut table = ConnectionTable::new(3);
        for addr in [5, 3, 4] {
            table.lookup_or_create(NodeAddr(addr)).unwrap();
        }
        assert_eq!(table.iter().map(|c| c.peer()).collect::<Vec<_>>(), vec![NodeAddr(5), NodeAddr(3), NodeAddr(4)]);
    }
}
