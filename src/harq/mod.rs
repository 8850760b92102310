//! Cell HARQ manager.
//!
//! One instance exists per direction (DL/UL) per cell. Processes live in
//! a fixed-size pool addressed by small integer handles (spec §9's
//! "arena + index" pattern, grounded on the teacher's padded-sequence
//! `RingBuffer` slot array and its `reliable_udp` retransmission buffer
//! of not-yet-acked packets). The `pending_retx` list is intrusive
//! (prev/next stored as indices inside the pool entry, not pointers) so
//! the pool vector is free to grow without invalidating outstanding
//! handles.

use std::collections::HashMap;

use tracing::{ info, warn };

use crate::constants::{
    DEFAULT_MAX_HARQ_RETXS,
    NTN_MAX_ACK_WAIT_SLOTS,
    SHORT_ACK_TIMEOUT_DTX_SLOTS,
    TRAPPED_HARQ_DIVISOR,
};
use crate::time::SlotPoint;

/// Per-cell RNTI.
pub type Rnti = u32;
/// HARQ process id, `[0, MAX_NOF_HARQS)`.
pub type HarqId = u8;

/// Which link direction a [`CellHarqManager`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Dl,
    Ul,
}

/// Lifecycle state of a HARQ process (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqState {
    Empty,
    WaitingAck,
    PendingRetx,
}

/// Aggregate ACK/NACK/DTX outcome, ordered `Ack > Nack > Dtx` so a
/// positive ACK always upgrades a previously-stored NACK/DTX (spec
/// §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AckOutcome {
    Dtx = 0,
    Nack = 1,
    Ack = 2,
}

/// Opaque handle to a pool entry. Cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HarqHandle(usize);

/// Cached grant parameters needed to reproduce a retransmission
/// verbatim (same TBS, same PRB count at the same MCS).
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantParams {
    pub tbs_bytes: u32,
    pub mcs: u8,
    pub nof_prbs: u16,
    pub nof_layers: u8,
    pub dci_format_is_fallback: bool,
}

#[derive(Debug, Clone)]
struct HarqEntry {
    state: HarqState,
    ue_rnti: Rnti,
    harq_id: HarqId,
    tx_slot: Option<SlotPoint>,
    ack_slot: Option<SlotPoint>,
    nof_retxs: u8,
    max_retxs: u8,
    ndi: bool,
    grant: GrantParams,
    // DL-only feedback aggregation state.
    expected_feedbacks: u8,
    received_feedbacks: u8,
    best_ack: Option<AckOutcome>,
    best_ack_snr_db: Option<i16>,
    // Intrusive pending_retx list links.
    prev: Option<usize>,
    next: Option<usize>,
    timer: Option<crate::time::TimerHandle>,
}

impl HarqEntry {
    fn empty() -> Self {
        Self {
            state: HarqState::Empty,
            ue_rnti: 0,
            harq_id: 0,
            tx_slot: None,
            ack_slot: None,
            nof_retxs: 0,
            max_retxs: DEFAULT_MAX_HARQ_RETXS,
            ndi: false,
            grant: GrantParams::default(),
            expected_feedbacks: 0,
            received_feedbacks: 0,
            best_ack: None,
            best_ack_snr_db: None,
            prev: None,
            next: None,
            timer: None,
        }
    }
}

/// A HARQ wheel timeout reported upward (spec §4.2's
/// `harq_timeout_notifier`).
#[derive(Debug, Clone, Copy)]
pub struct HarqTimeoutEvent {
    pub rnti: Rnti,
    pub harq_id: HarqId,
    pub reported_outcome: Option<AckOutcome>,
}

/// Pool of HARQ processes for one direction of one cell.
pub struct CellHarqManager {
    direction: Direction,
    max_ack_wait_in_slots: u16,
    pool: Vec<HarqEntry>,
    free: Vec<usize>,
    ue_handles: HashMap<Rnti, [Option<usize>; crate::constants::MAX_NOF_HARQS]>,
    wheel: crate::time::TimerWheel<usize>,
    pending_head: Option<usize>,
    pending_tail: Option<usize>,
    pending_count: usize,
}

impl CellHarqManager {
    /// Construct a manager whose ack-timeout wheel has `ring_size`
    /// buckets (matching the cell's resource-grid ring, spec §4.1).
    pub fn new(direction: Direction, ring_size: usize, max_ack_wait_in_slots: u16) -> Self {
        Self {
            direction,
            max_ack_wait_in_slots,
            pool: Vec::new(),
            free: Vec::new(),
            ue_handles: HashMap::new(),
            wheel: crate::time::TimerWheel::new(ring_size),
            pending_head: None,
            pending_tail: None,
            pending_count: 0,
        }
    }

    fn alloc_slot(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            idx
        } else {
            self.pool.push(HarqEntry::empty());
            self.pool.len() - 1
        }
    }

    fn push_pending_tail(&mut self, idx: usize) {
        self.pool[idx].prev = self.pending_tail;
        self.pool[idx].next = None;
        if let Some(tail) = self.pending_tail {
            self.pool[tail].next = Some(idx);
        } else {
            self.pending_head = Some(idx);
        }
        self.pending_tail = Some(idx);
        self.pending_count += 1;
    }

    fn remove_pending(&mut self, idx: usize) {
        let (prev, next) = (self.pool[idx].prev, self.pool[idx].next);
        match prev {
            Some(p) => self.pool[p].next = next,
            None => self.pending_head = next,
        }
        match next {
            Some(n) => self.pool[n].prev = prev,
            None => self.pending_tail = prev,
        }
        self.pool[idx].prev = None;
        self.pool[idx].next = None;
        self.pending_count -= 1;
    }

    /// Free a process entry back to `Empty`, clearing all list
    /// membership. Invariant (spec §3): a process is referenced by
    /// exactly one of (timeout wheel, pending-retx list, nothing).
    fn free_entry(&mut self, idx: usize) {
        if self.pool[idx].state == HarqState::PendingRetx {
            self.remove_pending(idx);
        }
        if let Some(timer) = self.pool[idx].timer.take() {
            self.wheel.cancel(timer);
        }
        let rnti = self.pool[idx].ue_rnti;
        let harq_id = self.pool[idx].harq_id;
        if let Some(slots) = self.ue_handles.get_mut(&rnti) {
            slots[harq_id as usize] = None;
        }
        self.pool[idx] = HarqEntry::empty();
        self.free.push(idx);
    }

    /// Allocate a process for a new transmission. `ack_slot` is when the
    /// corresponding feedback is expected; the process is armed in the
    /// timeout wheel at `ack_slot + max_ack_wait`.
    pub fn alloc_harq(
        &mut self,
        ue: Rnti,
        harq_id: HarqId,
        tx_slot: SlotPoint,
        ack_slot: SlotPoint,
        max_retx: u8,
        expected_feedbacks: u8
    ) -> Option<HarqHandle> {
        let slots = self.ue_handles.entry(ue).or_insert_with(|| [None; crate::constants::MAX_NOF_HARQS]);
        if slots[harq_id as usize].is_some() {
            return None; // already in use: caller picked a busy id
        }
        let idx = self.alloc_slot();
        let timeout_slot = ack_slot.add(self.max_ack_wait_in_slots as u32);
        let timer = self.wheel.arm(timeout_slot.ring_index(self.wheel.len()), idx);
        let prev_ndi = self.pool[idx].ndi;
        self.pool[idx] = HarqEntry {
            state: HarqState::WaitingAck,
            ue_rnti: ue,
            harq_id,
            tx_slot: Some(tx_slot),
            ack_slot: Some(ack_slot),
            nof_retxs: 0,
            max_retxs: max_retx,
            ndi: !prev_ndi,
            expected_feedbacks: expected_feedbacks.max(1),
            received_feedbacks: 0,
            best_ack: None,
            best_ack_snr_db: None,
            timer: Some(timer),
            ..HarqEntry::empty()
        };
        self.ue_handles.get_mut(&ue).unwrap()[harq_id as usize] = Some(idx);
        Some(HarqHandle(idx))
    }

    /// Re-arm a process awaiting retransmission as a new transmission.
    /// Requires the process to currently be `PendingRetx`.
    pub fn new_retx(&mut self, h: HarqHandle, tx_slot: SlotPoint, ack_slot: SlotPoint) -> bool {
        let idx = h.0;
        if self.pool[idx].state != HarqState::PendingRetx {
            return false;
        }
        self.remove_pending(idx);
        self.pool[idx].state = HarqState::WaitingAck;
        self.pool[idx].tx_slot = Some(tx_slot);
        self.pool[idx].ack_slot = Some(ack_slot);
        self.pool[idx].nof_retxs += 1;
        self.pool[idx].received_feedbacks = 0;
        self.pool[idx].best_ack = None;
        self.pool[idx].best_ack_snr_db = None;
        let timeout_slot = ack_slot.add(self.max_ack_wait_in_slots as u32);
        self.pool[idx].timer = Some(self.wheel.arm(timeout_slot.ring_index(self.wheel.len()), idx));
        true
    }

    /// Report a HARQ-ACK feedback carried on `carrier_slot` with a given
    /// SNR. Aggregates multi-PUCCH DL feedback per spec §4.2: a positive
    /// ACK always upgrades the stored outcome; the final outcome is
    /// applied once every expected feedback has arrived.
    pub fn ack(&mut self, h: HarqHandle, outcome: AckOutcome, snr_db: i16) -> bool {
        let idx = h.0;
        if self.pool[idx].state != HarqState::WaitingAck {
            warn!(harq_id = self.pool[idx].harq_id, "ACK for HARQ process not in waiting_ack state");
            return false;
        }
        self.pool[idx].received_feedbacks += 1;
        let upgrade = match self.pool[idx].best_ack {
            None => true,
            Some(prev) => outcome > prev,
        };
        if upgrade {
            self.pool[idx].best_ack = Some(outcome);
            self.pool[idx].best_ack_snr_db = Some(snr_db);
        }
        if self.pool[idx].received_feedbacks >= self.pool[idx].expected_feedbacks {
            self.apply_final_outcome(idx);
        }
        true
    }

    fn apply_final_outcome(&mut self, idx: usize) {
        let final_ack = self.pool[idx].best_ack.unwrap_or(AckOutcome::Dtx);
        if let Some(timer) = self.pool[idx].timer.take() {
            self.wheel.cancel(timer);
        }
        let positive = final_ack == AckOutcome::Ack;
        let exhausted = self.pool[idx].nof_retxs >= self.pool[idx].max_retxs;
        if positive || exhausted {
            self.free_entry(idx);
        } else {
            self.pool[idx].state = HarqState::PendingRetx;
            self.push_pending_tail(idx);
        }
    }

    /// Advance the wheel/trapped-sweep to `sl` (spec §4.2). Returns the
    /// timeout events to forward to `harq_timeout_notifier`.
    pub fn slot_indication(&mut self, sl: SlotPoint) -> Vec<HarqTimeoutEvent> {
        let mut events = Vec::new();
        let ring = self.wheel.len();
        for idx in self.wheel.tick(sl.ring_index(ring)) {
            if self.pool[idx].state != HarqState::WaitingAck {
                continue; // already resolved between arming and firing
            }
            self.pool[idx].timer = None;
            let reported = self.pool[idx].best_ack;
            if self.max_ack_wait_in_slots > NTN_MAX_ACK_WAIT_SLOTS {
                warn!(
                    direction = ?self.direction,
                    rnti = self.pool[idx].ue_rnti,
                    harq_id = self.pool[idx].harq_id,
                    "HARQ ack-timeout"
                );
            } else {
                info!(
                    direction = ?self.direction,
                    rnti = self.pool[idx].ue_rnti,
                    harq_id = self.pool[idx].harq_id,
                    "HARQ ack-timeout (NTN)"
                );
            }
            events.push(HarqTimeoutEvent {
                rnti: self.pool[idx].ue_rnti,
                harq_id: self.pool[idx].harq_id,
                reported_outcome: reported,
            });
            self.free_entry(idx);
        }

        // Trapped pending_retx sweep: walk from the head (oldest
        // last-ack slot first) and force-discard anything idle past the
        // heuristic threshold (spec open question (c)).
        let threshold = sl.modulus() / TRAPPED_HARQ_DIVISOR;
        let mut cursor = self.pending_head;
        let mut to_free = Vec::new();
        while let Some(idx) = cursor {
            cursor = self.pool[idx].next;
            if let Some(ack_slot) = self.pool[idx].ack_slot {
                if ack_slot.distance(sl) > threshold as i64 {
                    to_free.push(idx);
                } else {
                    break; // list is ordered by last_ack_slot; nothing later is trapped yet
                }
            }
        }
        for idx in to_free {
            warn!(
                direction = ?self.direction,
                rnti = self.pool[idx].ue_rnti,
                harq_id = self.pool[idx].harq_id,
                "trapped pending_retx HARQ force-discarded"
            );
            self.free_entry(idx);
        }
        events
    }

    /// Short-timeout handling for partial DL feedback reception (spec
    /// open question (b)): call once per slot for HARQs still waiting on
    /// a subset of their expected feedbacks; applies the aggregate
    /// outcome once `SHORT_ACK_TIMEOUT_DTX_SLOTS` have elapsed since the
    /// first feedback arrived without the rest showing up.
    pub fn apply_partial_feedback_timeout(&mut self, h: HarqHandle, sl: SlotPoint) -> bool {
        let idx = h.0;
        if self.pool[idx].state != HarqState::WaitingAck || self.pool[idx].received_feedbacks == 0 {
            return false;
        }
        let Some(ack_slot) = self.pool[idx].ack_slot else {
            return false;
        };
        if ack_slot.distance(sl) >= SHORT_ACK_TIMEOUT_DTX_SLOTS as i64 {
            self.apply_final_outcome(idx);
            true
        } else {
            false
        }
    }

    /// Cancel pending retransmissions for `h` (spec §4.2): if the
    /// process is `pending_retx`, free it immediately; if `waiting_ack`,
    /// clamp `max_retxs` so the next NACK frees it.
    pub fn cancel_retxs(&mut self, h: HarqHandle) {
        let idx = h.0;
        match self.pool[idx].state {
            HarqState::PendingRetx => self.free_entry(idx),
            HarqState::WaitingAck => {
                self.pool[idx].max_retxs = self.pool[idx].nof_retxs;
            }
            HarqState::Empty => {}
        }
    }

    /// Look up the handle for `(ue, harq_id)`, if allocated.
    pub fn handle_of(&self, ue: Rnti, harq_id: HarqId) -> Option<HarqHandle> {
        self.ue_handles.get(&ue)?.get(harq_id as usize).copied().flatten().map(HarqHandle)
    }

    /// Current lifecycle state of `h`.
    pub fn state(&self, h: HarqHandle) -> HarqState {
        self.pool[h.0].state
    }

    /// Cached grant parameters for `h`, used to reproduce a retx verbatim.
    pub fn grant(&self, h: HarqHandle) -> GrantParams {
        self.pool[h.0].grant
    }

    /// Record the grant parameters used for `h`'s transmission.
    pub fn set_grant(&mut self, h: HarqHandle, grant: GrantParams) {
        self.pool[h.0].grant = grant;
    }

    /// NDI value for `h`'s current/last transmission.
    pub fn ndi(&self, h: HarqHandle) -> bool {
        self.pool[h.0].ndi
    }

    /// Iterate the HARQ ids currently sitting in `pending_retx` for
    /// `ue`, oldest first.
    pub fn pending_retx_for_ue(&self, ue: Rnti) -> Vec<HarqHandle> {
        let mut out = Vec::new();
        let mut cursor = self.pending_head;
        while let Some(idx) = cursor {
            if self.pool[idx].ue_rnti == ue {
                out.push(HarqHandle(idx));
            }
            cursor = self.pool[idx].next;
        }
        out
    }

    /// Total bytes cached across every `pending_retx` process (the
    /// original's retx-backlog accounting, spec_full §F).
    pub fn pending_retx_bytes(&self) -> u64 {
        let mut cursor = self.pending_head;
        let mut total = 0u64;
        while let Some(idx) = cursor {
            total += self.pool[idx].grant.tbs_bytes as u64;
            cursor = self.pool[idx].next;
        }
        total
    }

    /// Number of `pending_retx` entries.
    pub fn pending_retx_count(&self) -> usize {
        self.pending_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Scs;

    fn sp(slot: u32) -> SlotPoint {
        SlotPoint::new(Scs::Khz30, 0, slot)
    }

    #[test]
    fn test_alloc_ack_frees_process() {
        let mut mgr = CellHarqManager::new(Direction::Dl, 20, 8);
        let h = mgr.alloc_harq(1, 0, sp(0), sp(4), 4, 1).unwrap();
        assert_eq!(mgr.state(h), HarqState::WaitingAck);
        mgr.ack(h, AckOutcome::Ack, 20);
        assert_eq!(mgr.state(h), HarqState::Empty);
    }

    #[test]
    fn test_nack_with_retxs_remaining_goes_pending() {
        let mut mgr = CellHarqManager::new(Direction::Ul, 20, 8);
        let h = mgr.alloc_harq(2, 1, sp(0), sp(4), 4, 1).unwrap();
        mgr.ack(h, AckOutcome::Nack, -3);
        assert_eq!(mgr.state(h), HarqState::PendingRetx);
        assert_eq!(mgr.pending_retx_count(), 1);
        assert!(mgr.new_retx(h, sp(8), sp(12)));
        assert_eq!(mgr.state(h), HarqState::WaitingAck);
        assert_eq!(mgr.pending_retx_count(), 0);
    }

    #[test]
    fn test_max_retx_exceeded_frees_process() {
        let mut mgr = CellHarqManager::new(Direction::Ul, 20, 8);
        let h = mgr.alloc_harq(3, 0, sp(0), sp(1), 1, 1).unwrap();
        mgr.ack(h, AckOutcome::Nack, 0);
        assert_eq!(mgr.state(h), HarqState::PendingRetx);
        mgr.new_retx(h, sp(2), sp(3));
        mgr.ack(h, AckOutcome::Nack, 0); // nof_retxs(1) >= max_retxs(1)
        assert_eq!(mgr.state(h), HarqState::Empty);
    }

    #[test]
    fn test_dl_multi_pucch_aggregation_positive_upgrades() {
        let mut mgr = CellHarqManager::new(Direction::Dl, 20, 8);
        let h = mgr.alloc_harq(4, 0, sp(0), sp(4), 4, 2).unwrap();
        mgr.ack(h, AckOutcome::Nack, 2); // first feedback: NACK, still waiting on one more
        assert_eq!(mgr.state(h), HarqState::WaitingAck);
        mgr.ack(h, AckOutcome::Ack, 18); // second feedback: ACK upgrades and finalises
        assert_eq!(mgr.state(h), HarqState::Empty);
    }

    #[test]
    fn test_wheel_timeout_frees_process_and_reports_event() {
        let mut mgr = CellHarqManager::new(Direction::Ul, 20, 4);
        let _h = mgr.alloc_harq(5, 0, sp(0), sp(2), 4, 1).unwrap();
        let mut events = Vec::new();
        for s in 1..10 {
            events.extend(mgr.slot_indication(sp(s)));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rnti, 5);
    }

    #[test]
    fn test_cancel_retxs_on_waiting_ack_clamps_max() {
        let mut mgr = CellHarqManager::new(Direction::Ul, 20, 8);
        let h = mgr.alloc_harq(6, 0, sp(0), sp(4), 4, 1).unwrap();
        mgr.cancel_retxs(h);
        mgr.ack(h, AckOutcome::Nack, 0);
        assert_eq!(mgr.state(h), HarqState::Empty);
    }

    #[test]
    fn test_harq_id_reuse_is_rejected_while_in_use() {
        let mut mgr = CellHarqManager::new(Direction::Dl, 20, 8);
        let _h = mgr.alloc_harq(7, 0, sp(0), sp(4), 4, 1).unwrap();
        assert!(mgr.alloc_harq(7, 0, sp(1), sp(5), 4, 1).is_none());
    }
}
