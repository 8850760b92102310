//! RLC Transparent Mode (spec §4.3): memoryless framing, no segmentation,
//! no reordering, no status reporting.

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;

use tracing::warn;

use crate::buffer::ByteBufferChain;
use crate::rlc::{ BufferState, RlcRx, RlcTx, RlcTxNotification };

/// TM TX entity: an SPSC SDU queue, copied verbatim into a grant or
/// dropped with a metric if it doesn't fit (no segmentation in TM).
pub struct TmTxEntity {
    queue: VecDeque<(ByteBufferChain, u32, u32)>, // (sdu, pdcp_sn, arrival_slot)
    pending_buffer_state_update: Arc<AtomicBool>,
    small_alloc_drops: u64,
    notifications: Vec<RlcTxNotification>,
}

impl TmTxEntity {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            pending_buffer_state_update: Arc::new(AtomicBool::new(false)),
            small_alloc_drops: 0,
            notifications: Vec::new(),
        }
    }

    /// Whether an `update_mac_buffer_state` task should be (or already
    /// is) deferred to the pcell executor. Coalesces bursts of enqueues
    /// into at most one pending notification (spec §4.3).
    pub fn take_pending_buffer_state_update(&self) -> bool {
        self.pending_buffer_state_update.swap(false, Ordering::AcqRel)
    }

    fn mark_dirty(&self) {
        self.pending_buffer_state_update.store(true, Ordering::Release);
    }

    /// Number of PDUs dropped because the grant was smaller than the
    /// head-of-line SDU (TM never segments).
    pub fn small_alloc_drops(&self) -> u64 {
        self.small_alloc_drops
    }
}

impl Default for TmTxEntity {
    fn default() -> Self {
        Self::new()
    }
}

impl RlcTx for TmTxEntity {
    fn handle_sdu(&mut self, sdu: ByteBufferChain, pdcp_sn: u32, arrival_slot: u32) {
        self.queue.push_back((sdu, pdcp_sn, arrival_slot));
        self.mark_dirty();
    }

    fn pull_pdu(&mut self, grant: usize) -> Vec<u8> {
        let Some((sdu, _, _)) = self.queue.front() else {
            return Vec::new();
        };
        if sdu.len() > grant {
            self.small_alloc_drops += 1;
            return Vec::new();
        }
        let (sdu, pdcp_sn, _) = self.queue.pop_front().unwrap();
        self.notifications.push(RlcTxNotification::Transmitted {
            pdcp_sn,
            desired_buf_size: self.buffer_state().pending_bytes,
        });
        self.mark_dirty();
        sdu.to_vec()
    }

    fn buffer_state(&self) -> BufferState {
        BufferState {
            pending_bytes: self.queue.iter().map(|(s, _, _)| s.len() as u32).sum(),
            hol_arrival_slot: self.queue.front().map(|(_, _, t)| *t),
        }
    }

    fn drain_notifications(&mut self) -> Vec<RlcTxNotification> {
        std::mem::take(&mut self.notifications)
    }
}

/// TM RX entity: forwards every received PDU upward unchanged.
#[derive(Default)]
pub struct TmRxEntity {
    delivered: Vec<Vec<u8>>,
    discard_failures: u64,
}

impl TmRxEntity {
    pub fn new() -> Self {
        Self::default()
    }

    /// TM does not support discard; any attempt increments this metric
    /// instead of silently doing the wrong thing (spec §4.3).
    pub fn attempt_discard(&mut self) {
        self.discard_failures += 1;
        warn!("discard requested on TM RX entity; TM does not support discard");
    }

    pub fn discard_failures(&self) -> u64 {
        self.discard_failures
    }
}

impl RlcRx for TmRxEntity {
    fn handle_pdu(&mut self, pdu: &[u8]) {
        self.delivered.push(pdu.to_vec());
    }

    fn drain_delivered(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_pdu_copies_verbatim_when_it_fits() {
        let mut tx = TmTxEntity::new();
        tx.handle_sdu(ByteBufferChain::from(b"hello".to_vec()), 1, 0);
        assert!(tx.take_pending_buffer_state_update());
        let pdu = tx.pull_pdu(10);
        assert_eq!(pdu, b"hello");
        assert_eq!(tx.buffer_state().pending_bytes, 0);
    }

    #[test]
    fn test_pull_pdu_returns_empty_and_counts_small_alloc() {
        let mut tx = TmTxEntity::new();
        tx.handle_sdu(ByteBufferChain::from(b"toolong".to_vec()), 1, 0);
        let pdu = tx.pull_pdu(3);
        assert!(pdu.is_empty());
        assert_eq!(tx.small_alloc_drops(), 1);
        // the SDU is still queued: TM never segments it away
        assert_eq!(tx.buffer_state().pending_bytes, 7);
    }

    #[test]
    fn test_buffer_state_coalesces_into_one_pending_flag() {
        let mut tx = TmTxEntity::new();
        tx.handle_sdu(ByteBufferChain::from(b"a".to_vec()), 1, 0);
        tx.handle_sdu(ByteBufferChain::from(b"b".to_vec()), 2, 0);
        assert!(tx.take_pending_buffer_state_update());
        assert!(!tx.take_pending_buffer_state_update());
    }

    #[test]
    fn test_rx_forwards_unchanged() {
        let mut rx = TmRxEntity::new();
        rx.handle_pdu(b"payload");
        assert_eq!(rx.drain_delivered(), vec![b"payload".to_vec()]);
    }
}
