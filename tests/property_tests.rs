//! Randomized invariant checks, gated behind the `property-tests`
//! feature (`cargo test --features property-tests`): header pack/unpack
//! round trips, the SN-modulus-step invariant, and grid
//! collision-freedom (spec §8).

#![cfg(feature = "property-tests")]

use proptest::prelude::*;

use gnb_l2::grid::{ BwpId, PrbRange, ResourceGrid, SymbolRange };
use gnb_l2::rlc::pdu::{ AmHeader, NackEntry, SegmentInfo, StatusPdu, UmHeader };
use gnb_l2::rlc::{ sn_add, SnSize };
use gnb_l2::{ Scs, SlotPoint };
use std::collections::HashMap;

fn segment_info() -> impl Strategy<Value = SegmentInfo> {
    prop_oneof![
        Just(SegmentInfo::Full),
        Just(SegmentInfo::First),
        Just(SegmentInfo::Last),
        Just(SegmentInfo::Middle)
    ]
}

proptest! {
    /// A UM header survives pack -> unpack unchanged, for both SN
    /// widths and every SI value, as long as SN/SO fields are only
    /// populated where the format allows them.
    #[test]
    fn um_header_round_trips(
        sn_size_is_12 in any::<bool>(),
        si in segment_info(),
        sn in 0u32..(1 << 12),
        so in 0u16..u16::MAX,
    ) {
        let sn_size = if sn_size_is_12 { SnSize::Bits12 } else { SnSize::Bits6 };
        let sn = sn % sn_size.modulus();
        let h = match si {
            SegmentInfo::Full => UmHeader { si, sn: None, so: None },
            SegmentInfo::First => UmHeader { si, sn: Some(sn), so: None },
            SegmentInfo::Middle | SegmentInfo::Last => UmHeader { si, sn: Some(sn), so: Some(so) },
        };
        let packed = h.pack(sn_size);
        let (parsed, consumed) = UmHeader::unpack(&packed, sn_size).unwrap();
        prop_assert_eq!(parsed, h);
        prop_assert_eq!(consumed, packed.len());
    }

    /// Same round-trip property for AM headers (12-bit and 18-bit SN).
    #[test]
    fn am_header_round_trips(
        sn_size_is_18 in any::<bool>(),
        poll in any::<bool>(),
        si in segment_info(),
        sn in 0u32..(1 << 18),
        so in 0u16..u16::MAX,
    ) {
        let sn_size = if sn_size_is_18 { SnSize::Bits18 } else { SnSize::Bits12 };
        let sn = sn % sn_size.modulus();
        let so = match si {
            SegmentInfo::Middle | SegmentInfo::Last => Some(so),
            _ => None,
        };
        let h = AmHeader { poll, si, sn, so };
        let packed = h.pack(sn_size);
        let (parsed, consumed) = AmHeader::unpack(&packed, sn_size).unwrap();
        prop_assert_eq!(parsed, h);
        prop_assert_eq!(consumed, packed.len());
    }

    /// A status PDU with up to 8 NACK entries survives pack -> unpack
    /// unchanged.
    #[test]
    fn status_pdu_round_trips(
        ack_sn in 0u32..(1u32 << 12),
        nack_sns in prop::collection::vec(0u32..(1u32 << 12), 0..8),
    ) {
        let sn_size = SnSize::Bits12;
        let nacks: Vec<NackEntry> = nack_sns
            .into_iter()
            .map(|sn| NackEntry { sn, so_range: None, range: None })
            .collect();
        let status = StatusPdu { ack_sn, nacks };
        let packed = status.pack(sn_size);
        let parsed = StatusPdu::unpack(&packed, sn_size).unwrap();
        prop_assert_eq!(parsed, status);
    }

    /// `sn_add` never steps by more than the requested delta modulo the
    /// field's modulus, matching the crate-wide SN-modulus-step
    /// invariant that TX_NEXT/RX_NEXT only ever advance by 0 or 1 per
    /// PDU handled.
    #[test]
    fn sn_add_steps_are_exact_modulo_the_field_width(
        sn in 0u32..(1u32 << 18),
        delta in 0u32..3,
        modulus_pow in 6u32..19,
    ) {
        let modulus = 1u32 << modulus_pow;
        let sn = sn % modulus;
        let next = sn_add(sn, delta, modulus);
        let expected = (sn + delta) % modulus;
        prop_assert_eq!(next, expected);
        prop_assert!(next < modulus);
    }

    /// Two non-overlapping PRB ranges filled into the same slot/BWP/
    /// symbol range never collide; two overlapping ranges always do.
    #[test]
    fn grid_fill_is_collision_free_for_disjoint_ranges(
        nof_prb in 4usize..64,
        a_start in 0usize..60,
        a_len in 1usize..4,
        gap in 0usize..4,
        b_len in 1usize..4,
    ) {
        let a_start = a_start % nof_prb.max(1);
        let a = PrbRange::new(a_start, a_len.min(nof_prb.saturating_sub(a_start).max(1)));
        let b_start = a.start + a.len + gap;
        prop_assume!(b_start < nof_prb);
        let b_len = b_len.min(nof_prb - b_start);
        prop_assume!(b_len > 0);
        let b = PrbRange::new(b_start, b_len);

        let bwp: BwpId = 0;
        let mut bwp_shapes = HashMap::new();
        bwp_shapes.insert(bwp, (nof_prb, 14usize));
        let mut grid = ResourceGrid::new(4, bwp_shapes, HashMap::new()).unwrap();
        let sl = SlotPoint::new(Scs::Khz30, 0, 0);
        grid.slot_indication(sl);
        let symbols = SymbolRange::new(0, 14);

        prop_assert!(!grid.collides(sl, bwp, symbols, a));
        grid.fill(sl, bwp, symbols, a).unwrap();
        prop_assert!(!grid.collides(sl, bwp, symbols, b));
        grid.fill(sl, bwp, symbols, b).unwrap();

        // Re-filling `a` must now collide: it was already marked used.
        prop_assert!(grid.collides(sl, bwp, symbols, a));
    }
}
