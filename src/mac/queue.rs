//! Outbound transmit queue

use alloc::collections::VecDeque;

use bytes::Bytes;

use crate::packet::Address;

/// Packet awaiting transmission
#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    pub dest: Address,
    pub payload: Bytes,
    /// RTS attempts made for this packet
    pub attempts: u32,
}

/// FIFO of outbound packets, only the head is ever in flight
#[derive(Clone, Debug, PartialEq)]
pub struct TxQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
}

impl TxQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append a packet, returning it if the queue is full
    pub fn push(&mut self, dest: Address, payload: Bytes) -> Result<(), QueueEntry> {
        let entry = QueueEntry {
            dest,
            payload,
            attempts: 0,
        };

        if self.entries.len() >= self.capacity {
            return Err(entry);
        }

        self.entries.push_back(entry);
        Ok(())
    }

    pub fn head(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// Attempt count for the head of line packet, zero when empty
    pub fn attempts(&self) -> u32 {
        self.head().map(|e| e.attempts).unwrap_or(0)
    }

    /// Record an RTS attempt against the head of line packet
    pub fn record_attempt(&mut self) {
        if let Some(e) = self.entries.front_mut() {
            e.attempts += 1;
        }
    }

    /// Remove the head of line packet (delivered or dropped)
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
