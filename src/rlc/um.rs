//! RLC Unacknowledged Mode, per TS 38.322 §5.2 (spec §4.4).

use std::collections::{ HashMap, HashSet, VecDeque };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;

use tracing::warn;

use crate::buffer::ByteBufferChain;
use crate::constants::{ BUFFER_STATE_SUPPRESS_BYTES, DEFAULT_T_REASSEMBLY_MS };
use crate::rlc::pdu::{ SegmentInfo, UmHeader };
use crate::rlc::{ in_window, sn_add, sn_sub, BufferState, RlcRx, RlcTx, RlcTxNotification, SnSize };

/// Resume threshold below `BUFFER_STATE_SUPPRESS_BYTES` at which
/// notifications are re-enabled after saturation (spec §4.4:
/// "falls below one MAC PDU's worth").
const NOTIFY_RESUME_BYTES: u32 = 1500;

struct InProgressSdu {
    chain: ByteBufferChain,
    pdcp_sn: u32,
    arrival_slot: u32,
    offset: usize,
    notified_transmitted: bool,
}

/// UM TX entity (spec §4.4 TX path).
pub struct UmTxEntity {
    sn_size: SnSize,
    queue: VecDeque<(ByteBufferChain, u32, u32)>,
    in_progress: Option<InProgressSdu>,
    tx_next: u32,
    pending_buffer_state_update: Arc<AtomicBool>,
    notify_suppressed: bool,
    notifications: Vec<RlcTxNotification>,
}

impl UmTxEntity {
    pub fn new(sn_size: SnSize) -> Self {
        Self {
            sn_size,
            queue: VecDeque::new(),
            in_progress: None,
            tx_next: 0,
            pending_buffer_state_update: Arc::new(AtomicBool::new(false)),
            notify_suppressed: false,
            notifications: Vec::new(),
        }
    }

    /// Current TX state variable, for test/metric inspection.
    pub fn tx_next(&self) -> u32 {
        self.tx_next
    }

    fn mark_dirty(&mut self) {
        let bytes = self.raw_buffer_bytes();
        if bytes > BUFFER_STATE_SUPPRESS_BYTES {
            self.notify_suppressed = true;
            return;
        }
        if self.notify_suppressed && bytes >= NOTIFY_RESUME_BYTES {
            return; // still above the resume threshold
        }
        self.notify_suppressed = false;
        self.pending_buffer_state_update.store(true, Ordering::Release);
    }

    /// Whether a deferred `update_mac_buffer_state` task should run.
    pub fn take_pending_buffer_state_update(&self) -> bool {
        self.pending_buffer_state_update.swap(false, Ordering::AcqRel)
    }

    fn raw_buffer_bytes(&self) -> u32 {
        let head_len_full = UmHeader::full_header_len() as u32;
        let queued: u32 = self.queue.iter().map(|(s, _, _)| s.len() as u32 + head_len_full).sum();
        let in_prog = self.in_progress.as_ref().map_or(0, |p| {
            let remaining = (p.chain.len() - p.offset) as u32;
            remaining + UmHeader::with_so_header_len(self.sn_size) as u32
        });
        queued + in_prog
    }
}

impl RlcTx for UmTxEntity {
    fn handle_sdu(&mut self, sdu: ByteBufferChain, pdcp_sn: u32, arrival_slot: u32) {
        self.queue.push_back((sdu, pdcp_sn, arrival_slot));
        self.mark_dirty();
    }

    fn pull_pdu(&mut self, grant: usize) -> Vec<u8> {
        if self.in_progress.is_none() {
            let Some((chain, pdcp_sn, arrival_slot)) = self.queue.pop_front() else {
                return Vec::new();
            };
            self.in_progress = Some(InProgressSdu {
                chain,
                pdcp_sn,
                arrival_slot,
                offset: 0,
                notified_transmitted: false,
            });
        }
        let sdu_len = self.in_progress.as_ref().unwrap().chain.len();
        let offset = self.in_progress.as_ref().unwrap().offset;

        let (si, header_len) = if offset == 0 {
            let head_len_full = UmHeader::full_header_len();
            if grant >= head_len_full && sdu_len <= grant - head_len_full {
                (SegmentInfo::Full, head_len_full)
            } else {
                (SegmentInfo::First, UmHeader::no_so_header_len(self.sn_size))
            }
        } else {
            let remaining = sdu_len - offset;
            let with_so = UmHeader::with_so_header_len(self.sn_size);
            if grant >= with_so && remaining <= grant - with_so {
                (SegmentInfo::Last, with_so)
            } else {
                (SegmentInfo::Middle, with_so)
            }
        };

        if grant < header_len {
            return Vec::new();
        }
        let payload_cap = grant - header_len;
        let remaining = sdu_len - offset;
        let payload_len = remaining.min(payload_cap);
        if payload_len == 0 && remaining > 0 {
            return Vec::new();
        }

        let sn = self.tx_next;
        let header = UmHeader {
            si,
            sn: if si == SegmentInfo::Full { None } else { Some(sn) },
            so: match si {
                SegmentInfo::Middle | SegmentInfo::Last => Some(offset as u16),
                _ => None,
            },
        };
        let mut pdu = header.pack(self.sn_size);
        let p = self.in_progress.as_mut().unwrap();
        pdu.extend(p.chain.to_vec()[p.offset..p.offset + payload_len].iter());

        let first_leaving = !p.notified_transmitted;
        if first_leaving {
            p.notified_transmitted = true;
        }
        let pdcp_sn = p.pdcp_sn;

        match si {
            SegmentInfo::Full | SegmentInfo::Last => {
                self.tx_next = sn_add(self.tx_next, 1, self.sn_size.modulus());
                self.in_progress = None;
            }
            _ => {
                self.in_progress.as_mut().unwrap().offset += payload_len;
            }
        }

        if first_leaving {
            let desired_buf_size = self.raw_buffer_bytes();
            self.notifications.push(RlcTxNotification::Transmitted { pdcp_sn, desired_buf_size });
        }
        self.mark_dirty();
        pdu
    }

    fn buffer_state(&self) -> BufferState {
        let hol = self.queue.front().map(|(_, _, t)| *t).or(self.in_progress.as_ref().map(|p| p.arrival_slot));
        BufferState { pending_bytes: self.raw_buffer_bytes(), hol_arrival_slot: hol }
    }

    fn drain_notifications(&mut self) -> Vec<RlcTxNotification> {
        std::mem::take(&mut self.notifications)
    }
}

struct ReassemblySdu {
    segments: Vec<(u16, Vec<u8>)>,
    total_len: Option<u16>,
}

impl ReassemblySdu {
    fn new() -> Self {
        Self { segments: Vec::new(), total_len: None }
    }

    fn is_complete(&self) -> bool {
        let Some(total_len) = self.total_len else {
            return false;
        };
        let mut sorted = self.segments.clone();
        sorted.sort_by_key(|(so, _)| *so);
        let mut cursor = 0u16;
        for (so, bytes) in &sorted {
            if *so != cursor {
                return false;
            }
            cursor += bytes.len() as u16;
        }
        cursor == total_len
    }

    fn assemble(&self) -> Vec<u8> {
        let mut sorted = self.segments.clone();
        sorted.sort_by_key(|(so, _)| *so);
        sorted.into_iter().flat_map(|(_, b)| b).collect()
    }
}

/// UM RX entity (spec §4.4 RX path + reassembly timer).
pub struct UmRxEntity {
    sn_size: SnSize,
    rx_next_reassembly: u32,
    rx_next_highest: u32,
    buffers: HashMap<u32, ReassemblySdu>,
    delivered_ahead: HashSet<u32>,
    reassembly_timer_expiry: Option<u32>,
    t_reassembly_slots: u32,
    current_slot: u32,
    delivered: Vec<Vec<u8>>,
    malformed_drops: u64,
}

impl UmRxEntity {
    pub fn new(sn_size: SnSize, slots_per_ms: u32) -> Self {
        Self {
            sn_size,
            rx_next_reassembly: 0,
            rx_next_highest: 0,
            buffers: HashMap::new(),
            delivered_ahead: HashSet::new(),
            reassembly_timer_expiry: None,
            t_reassembly_slots: DEFAULT_T_REASSEMBLY_MS * slots_per_ms.max(1),
            current_slot: 0,
            delivered: Vec::new(),
            malformed_drops: 0,
        }
    }

    pub fn rx_next_reassembly(&self) -> u32 {
        self.rx_next_reassembly
    }

    pub fn malformed_drops(&self) -> u64 {
        self.malformed_drops
    }

    fn deliver(&mut self, sn: u32, bytes: Vec<u8>) {
        self.delivered.push(bytes);
        self.buffers.remove(&sn);
        if sn == self.rx_next_reassembly {
            self.rx_next_reassembly = sn_add(self.rx_next_reassembly, 1, self.sn_size.modulus());
            while self.delivered_ahead.remove(&self.rx_next_reassembly) {
                self.rx_next_reassembly = sn_add(self.rx_next_reassembly, 1, self.sn_size.modulus());
            }
        } else {
            self.delivered_ahead.insert(sn);
        }
    }

    fn gap_present(&self) -> bool {
        let dist = sn_sub(self.rx_next_highest, self.rx_next_reassembly, self.sn_size.modulus());
        if dist > 1 {
            return true;
        }
        if dist == 1 {
            // exactly one SDU ahead of the boundary: a gap iff it is
            // itself incomplete.
            return self.buffers.get(&self.rx_next_reassembly).map_or(true, |b| !b.is_complete());
        }
        false
    }

    fn maybe_arm_timer(&mut self, now_slot: u32) {
        if self.reassembly_timer_expiry.is_some() {
            return;
        }
        if self.gap_present() {
            self.reassembly_timer_expiry = Some(now_slot + self.t_reassembly_slots);
        }
    }

    /// Advance the reassembly timer; call once per slot.
    pub fn tick(&mut self, now_slot: u32) {
        self.current_slot = now_slot;
        let Some(expiry) = self.reassembly_timer_expiry else {
            return;
        };
        if now_slot < expiry {
            return;
        }
        self.reassembly_timer_expiry = None;
        let new_boundary = self.rx_next_highest;
        let modulus = self.sn_size.modulus();
        let mut sn = self.rx_next_reassembly;
        while sn != new_boundary {
            self.buffers.remove(&sn);
            self.delivered_ahead.remove(&sn);
            sn = sn_add(sn, 1, modulus);
        }
        self.rx_next_reassembly = new_boundary;
        self.maybe_arm_timer(self.current_slot);
    }
}

impl RlcRx for UmRxEntity {
    fn handle_pdu(&mut self, pdu: &[u8]) {
        let Ok((header, hdr_len)) = UmHeader::unpack(pdu, self.sn_size) else {
            self.malformed_drops += 1;
            warn!("dropping malformed UM PDU");
            return;
        };
        let payload = &pdu[hdr_len..];

        if header.si == SegmentInfo::Full {
            self.delivered.push(payload.to_vec());
            return;
        }

        let sn = header.sn.unwrap();
        let window = self.sn_size.window_size();
        let modulus = self.sn_size.modulus();
        if !in_window(sn, self.rx_next_reassembly, window, modulus) {
            self.malformed_drops += 1;
            return;
        }

        // advance the high-water mark if this SN sits at or beyond it,
        // measured as circular distance from the reassembly boundary.
        if sn_sub(sn, self.rx_next_reassembly, modulus) >= sn_sub(self.rx_next_highest, self.rx_next_reassembly, modulus) {
            self.rx_next_highest = sn_add(sn, 1, modulus);
        }

        let entry = self.buffers.entry(sn).or_insert_with(ReassemblySdu::new);
        let offset = header.so.unwrap_or(0);
        entry.segments.push((offset, payload.to_vec()));
        if header.si == SegmentInfo::Last {
            entry.total_len = Some(offset + payload.len() as u16);
        }
        if entry.is_complete() {
            let bytes = entry.assemble();
            self.deliver(sn, bytes);
        }
        let now = self.current_slot;
        self.maybe_arm_timer(now);
    }

    fn drain_delivered(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.delivered)
    }
}
