//! RLC segmentation/reassembly throughput benchmark.
//!
//! Run: cargo bench --bench bench_rlc_segmentation

use criterion::{ criterion_group, criterion_main, BenchmarkId, Criterion, Throughput };
use std::hint::black_box;

use gnb_l2::buffer::ByteBufferChain;
use gnb_l2::rlc::um::{ UmRxEntity, UmTxEntity };
use gnb_l2::rlc::{ RlcRx, RlcTx, SnSize };

fn sdu(len: usize) -> ByteBufferChain {
    let bytes: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
    let mut chain = ByteBufferChain::new();
    chain.push_back(gnb_l2::buffer::ByteBuffer::copy_from(&bytes).freeze());
    chain
}

/// Segmenting one SDU into `grant`-sized PDUs end to end through a
/// TX/RX pair, SN size 12 bits.
fn benchmark_segmentation_by_grant(c: &mut Criterion) {
    let mut group = c.benchmark_group("UM segmentation by grant size");
    group.throughput(Throughput::Bytes(4096));

    for &grant in &[32usize, 128, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(grant), &grant, |b, &grant| {
            b.iter(|| {
                let mut tx = UmTxEntity::new(SnSize::Bits12);
                let mut rx = UmRxEntity::new(SnSize::Bits12, 1000);
                tx.handle_sdu(sdu(4096), 0, 0);

                let mut delivered = 0usize;
                loop {
                    let pdu = tx.pull_pdu(grant);
                    if pdu.is_empty() {
                        break;
                    }
                    rx.handle_pdu(&pdu);
                    for sdu in rx.drain_delivered() {
                        delivered += sdu.len();
                    }
                }
                black_box(delivered)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_segmentation_by_grant);
criterion_main!(benches);
