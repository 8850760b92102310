//! Per-slot scheduler decision benchmark.
//!
//! Run: cargo bench --bench bench_scheduler_slot

use criterion::{ criterion_group, criterion_main, BenchmarkId, Criterion, Throughput };
use std::hint::black_box;

use std::collections::HashMap;

use gnb_l2::common_sched::SiMessage;
use gnb_l2::ue::{ CellConfig, Qos5qi, RachConfig, SliceRrmConfig, TddPattern, UeConfig };
use gnb_l2::{ CellScheduler, Scs, SlotPoint };

fn ue_config(rnti: u32) -> UeConfig {
    let mut lcid_qos = HashMap::new();
    lcid_qos.insert(3u8, Qos5qi { five_qi: 9, prio: 8, arp_prio: 8, pdb_ms: 300, gbr_dl_kbps: None, gbr_ul_kbps: None });
    UeConfig {
        rnti,
        serving_cell_id: 1,
        bwp_id: 0,
        k1_candidates: vec![4, 5, 6, 7],
        k2_candidates: vec![4, 5, 6],
        min_k2: 4,
        slice_id: 0,
        lcid_qos,
    }
}

fn cell_config(nof_prb: u16) -> CellConfig {
    CellConfig {
        cell_id: 1,
        pci: 10,
        scs: Scs::Khz30,
        slots_per_frame: 20,
        nof_prb,
        tdd_pattern: TddPattern::fdd(),
        coreset0: 0,
        pucch_guard_rb_lo: 0,
        pucch_guard_rb_hi: 0,
        rach_config: RachConfig { nof_preambles: 64, rar_window_slots: 10, msg3_k2: 4 },
        slices: vec![SliceRrmConfig { slice_id: 0, min_rb: 0, max_rb: nof_prb }],
        ntn_cs_koffset: 0,
    }
}

fn scheduler_with_ues(nof_prb: u16, nof_ues: u32) -> CellScheduler {
    let mut sched = CellScheduler::new(
        cell_config(nof_prb),
        20,
        vec![SiMessage { payload_size: 200, period_frames: 8 }]
    ).unwrap();

    for rnti in 1..=nof_ues {
        sched.handle_ue_creation_request(ue_config(rnti));
        sched.handle_dl_buffer_state_indication(rnti, 3, 100_000);
    }
    sched
}

/// Steady-state slot decision cost as a function of the number of
/// saturated UEs competing for the cell's PRBs.
fn benchmark_slot_by_ue_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_indication by UE count");
    group.throughput(Throughput::Elements(1));

    for &nof_ues in &[1u32, 4, 16, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(nof_ues), &nof_ues, |b, &nof_ues| {
            let mut sched = scheduler_with_ues(52, nof_ues);
            let mut slot = 0u32;
            b.iter(|| {
                let sl = SlotPoint::new(Scs::Khz30, 0, slot % 20);
                slot += 1;
                black_box(sched.slot_indication(sl))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_slot_by_ue_count);
criterion_main!(benches);
