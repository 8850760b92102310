//! Compile-time constants for the gNB L2 stack.
//!
//! Mirrors the teacher's `constants.rs`: named, documented magic numbers
//! instead of literals scattered through the scheduler and RLC modules,
//! plus a `validate_constants` sanity check exercised in tests.

/// Number of system frames before SFN wraps (3GPP: SFN in [0, 1024)).
pub const NOF_SFNS: u32 = 1024;

/// HARQ process id width in bits (3GPP allows up to 4 bits => 16 processes).
pub const MAX_NOF_HARQS: usize = 16;

/// Upper bound on HARQ retransmissions before a process is force-freed.
pub const DEFAULT_MAX_HARQ_RETXS: u8 = 4;

/// Slots a DL HARQ process waits for the configured number of PUCCH
/// HARQ-ACK feedbacks before declaring a timeout (`max_ack_wait_timeout`
/// in the spec's ring-size formula).
pub const DEFAULT_MAX_ACK_WAIT_SLOTS: u16 = 8;

/// Maximum slots ahead of the current slot a UL grant may be scheduled
/// (`max_slot_ul_alloc_delay` in the spec's ring-size formula).
pub const MAX_SLOT_UL_ALLOC_DELAY: u16 = 6;

/// Short timeout (in slots) used to aggregate multiple HARQ-ACK PUCCH
/// carriers for one DL HARQ process when not every expected feedback has
/// arrived. Left implementation-defined by TS 38.213; the spec's open
/// question (b) allows any value in [2, 8].
pub const SHORT_ACK_TIMEOUT_DTX_SLOTS: u16 = 4;

/// Ack-wait slots under which wheel timeouts are considered expected
/// (NTN) rather than a scheduler bug, downgrading the log level.
pub const NTN_MAX_ACK_WAIT_SLOTS: u16 = 1;

/// Divisor used by the trapped-`pending_retx` sweep: a process idle for
/// longer than `slots_per_system_frame / TRAPPED_HARQ_DIVISOR` is force
/// discarded. A heuristic (spec open question (c)), not a 3GPP value.
pub const TRAPPED_HARQ_DIVISOR: u32 = 4;

/// Maximum PDCCH candidates per aggregation level per the per-SCS ceiling
/// used across the 15/30 kHz common cases (TS 38.213 §10.1 Table 10.1-2).
pub const MAX_PDCCH_CANDIDATES_PER_SLOT: usize = 44;

/// CCEs available in the smallest CORESET (6 PRBs x 1 symbol).
pub const MIN_CORESET_CCES: usize = 6;

/// Maximum UL grants finalised in a single slot.
pub const DEFAULT_MAX_UL_GRANTS_PER_SLOT: usize = 16;

/// Maximum PUCCH grants finalised in a single slot.
pub const DEFAULT_MAX_PUCCHS_PER_SLOT: usize = 32;

/// RLC UM 6-bit sequence number modulus.
pub const UM_SN_MODULUS_6BIT: u32 = 1 << 6;

/// RLC UM/AM 12-bit sequence number modulus.
pub const SN_MODULUS_12BIT: u32 = 1 << 12;

/// RLC AM 18-bit sequence number modulus.
pub const SN_MODULUS_18BIT: u32 = 1 << 18;

/// Header length (bytes) of a "full SDU" UM/AM data PDU (no SO, no
/// segmentation offset field).
pub const RLC_HEADER_LEN_FULL_6BIT: usize = 1;
/// Header length (bytes) of a segmented UM/AM PDU with a 6-bit SN and no SO.
pub const RLC_HEADER_LEN_NO_SO_6BIT: usize = 1;
/// Header length (bytes) of a segmented UM PDU with a 6-bit SN and an SO.
pub const RLC_HEADER_LEN_WITH_SO_6BIT: usize = 3;

/// Header length (bytes) of a full-SDU UM/AM PDU with a 12-bit SN.
pub const RLC_HEADER_LEN_FULL_12BIT: usize = 2;
/// Header length (bytes) of a segmented UM PDU with a 12-bit SN, no SO.
pub const RLC_HEADER_LEN_NO_SO_12BIT: usize = 2;
/// Header length (bytes) of a segmented UM PDU with a 12-bit SN and an SO.
pub const RLC_HEADER_LEN_WITH_SO_12BIT: usize = 4;

/// Header length (bytes) of an AM data PDU with a 12-bit SN, no SO.
pub const RLC_AM_HEADER_LEN_NO_SO_12BIT: usize = 2;
/// Header length (bytes) of an AM data PDU with a 12-bit SN and an SO.
pub const RLC_AM_HEADER_LEN_WITH_SO_12BIT: usize = 4;
/// Header length (bytes) of an AM data PDU with an 18-bit SN, no SO.
pub const RLC_AM_HEADER_LEN_NO_SO_18BIT: usize = 3;
/// Header length (bytes) of an AM data PDU with an 18-bit SN and an SO.
pub const RLC_AM_HEADER_LEN_WITH_SO_18BIT: usize = 5;

/// Default `t-Reassembly` in milliseconds (TS 38.331 default).
pub const DEFAULT_T_REASSEMBLY_MS: u32 = 35;

/// Default `t-StatusProhibit` in milliseconds.
pub const DEFAULT_T_STATUS_PROHIBIT_MS: u32 = 10;

/// Default poll-byte threshold before requesting a status report.
pub const DEFAULT_POLL_BYTE_THRESHOLD: u64 = 250_000;

/// Default poll-PDU threshold before requesting a status report.
pub const DEFAULT_POLL_PDU_THRESHOLD: u32 = 64;

/// Default RLC AM max retransmission threshold before `on_max_retx`.
pub const DEFAULT_MAX_RETX_THRESHOLD: u32 = 32;

/// Buffer-state "very large" suppression threshold used by UM/AM TX
/// entities to stop spamming `update_mac_buffer_state` while saturated.
pub const BUFFER_STATE_SUPPRESS_BYTES: u32 = 1024 * 1024;

/// Size of the per-cell TC-RNTI pool handed out to detected preambles.
pub const TC_RNTI_POOL_SIZE: usize = 256;

/// Default RAR window, in slots, within which Msg2 must be scheduled
/// after a detected preamble.
pub const DEFAULT_RAR_WINDOW_SLOTS: u16 = 10;

/// Default Msg3 HARQ retransmission ceiling.
pub const DEFAULT_MSG3_MAX_RETXS: u8 = 4;

/// Default contention-resolution timer, in slots (`ra-ContentionResolutionTimer`).
pub const DEFAULT_CONRES_TIMER_SLOTS: u16 = 64;

/// Compute the smallest ring size `K >= min_size` such that
/// `slots_per_system_frame % K == 0`, per spec §3's resource-grid sizing
/// rule (`get_allocator_ring_size_gt_min`).
pub fn get_allocator_ring_size_gt_min(min_size: usize, slots_per_system_frame: usize) -> usize {
    let mut k = min_size.max(1);
    while slots_per_system_frame % k != 0 {
        k += 1;
    }
    k
}

/// Sanity-check the constants above for internal consistency. Exercised
/// in tests, the way the teacher validates its own tuning constants.
pub fn validate_constants() -> std::result::Result<(), &'static str> {
    if MAX_NOF_HARQS == 0 {
        return Err("MAX_NOF_HARQS must be greater than 0");
    }
    if RLC_HEADER_LEN_FULL_6BIT >= RLC_HEADER_LEN_WITH_SO_6BIT {
        return Err("6-bit UM header lengths are inconsistent");
    }
    if RLC_HEADER_LEN_FULL_12BIT >= RLC_HEADER_LEN_WITH_SO_12BIT {
        return Err("12-bit UM header lengths are inconsistent");
    }
    if UM_SN_MODULUS_6BIT != 64 || SN_MODULUS_12BIT != 4096 || SN_MODULUS_18BIT != 262_144 {
        return Err("SN modulus constants do not match their bit widths");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_validation() {
        assert!(validate_constants().is_ok());
    }

    #[test]
    fn test_ring_size_respects_divisibility() {
        let k = get_allocator_ring_size_gt_min(10, 20 * 10);
        assert!(k >= 10);
        assert_eq!((20 * 10) % k, 0);
    }

    #[test]
    fn test_ring_size_minimum_is_exact_divisor() {
        // slots_per_system_frame for 30kHz SCS over 1024 frames = 20 * 1024.
        let spsf = 20 * 1024;
        let k = get_allocator_ring_size_gt_min(14, spsf);
        assert!(k >= 14);
        assert_eq!(spsf % k, 0);
    }
}
