use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use robocast::capture::{Frame, SyntheticSource};
use robocast::config::FanoutConfig;
use robocast::fanout::MediaFanout;
use robocast::runtime_settings::OverlayState;
use std::sync::Arc;
use std::time::Duration;

fn bench_publish(c: &mut Criterion) {
    let payload = Bytes::from(vec![0x5au8; 16 * 1024]);
    let mut group = c.benchmark_group("fanout_publish");

    for subscribers in [1usize, 4, 10] {
        let fanout = MediaFanout::new(&FanoutConfig::default(), Arc::new(OverlayState::new()));
        let mut receivers: Vec<_> = (0..subscribers).map(|_| fanout.subscribe()).collect();
        let mut sequence = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &subscribers, |b, _| {
            b.iter(|| {
                fanout.publish(Frame::new(sequence, payload.clone(), 0, Duration::from_millis(33)));
                sequence += 1;
                for rx in receivers.iter_mut() {
                    let _ = rx.try_recv();
                }
            })
        });
    }
    group.finish();
}

fn bench_synthetic_render(c: &mut Criterion) {
    let source = SyntheticSource::new(320, 240);
    c.bench_function("synthetic_render_320x240", |b| {
        b.iter(|| source.render("12:34:56"))
    });
}

criterion_group!(benches, bench_publish, bench_synthetic_render);
criterion_main!(benches);
