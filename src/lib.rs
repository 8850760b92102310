//! gnb-l2 - MAC cell scheduler and RLC entity for a 5G NR gNodeB

pub mod buffer;
pub mod common_sched;
pub mod constants;
pub mod error;
pub mod grid;
pub mod harq;
pub mod metrics;
pub mod pdcch;
pub mod pucch;
pub mod rlc;
pub mod sched;
pub mod time;
pub mod ue;

// Re-export main components
pub use error::{ L2Error, Result };
pub use harq::{ CellHarqManager, Direction as HarqDirection };
pub use rlc::{ RlcMode, RlcRx, RlcTx, RlcTxNotification };
pub use sched::{ CellScheduler, SchedResult };
pub use time::{ Scs, SlotPoint };
pub use ue::{ CellConfig, UeConfig };

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_sched::SiMessage;
    use crate::ue::{ RachConfig, SliceRrmConfig, TddPattern };

    #[test]
    fn test_cell_scheduler_is_reachable_from_the_crate_root() {
        let config = CellConfig {
            cell_id: 1,
            pci: 1,
            scs: Scs::Khz30,
            slots_per_frame: 20,
            nof_prb: 52,
            tdd_pattern: TddPattern::fdd(),
            coreset0: 0,
            pucch_guard_rb_lo: 0,
            pucch_guard_rb_hi: 0,
            rach_config: RachConfig { nof_preambles: 64, rar_window_slots: 10, msg3_k2: 4 },
            slices: vec![SliceRrmConfig { slice_id: 0, min_rb: 0, max_rb: 52 }],
            ntn_cs_koffset: 0,
        };
        let sched = CellScheduler::new(config, 20, vec![SiMessage { payload_size: 100, period_frames: 8 }]);
        assert!(sched.is_ok());
    }
}
