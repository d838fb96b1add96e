use calratio_core::{
    data::test_event, EventRecord, LxyBinning, LxyEfficiency, SelectionVariant, Selector,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const SIZES: [usize; 3] = [1_000, 10_000, 100_000];

fn synthetic_events(n_events: usize) -> Vec<EventRecord> {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    (0..n_events)
        .map(|i| {
            let mut event = test_event();
            event.event_number = i as i64;
            event.jets[0].pt = rng.f64() * 300.0;
            event.jets[2].bib_weight = rng.f64();
            event.event_bdt = rng.f64() * 0.3;
            event.sum_min_dr = rng.f64() * 3.0;
            event.mht_over_ht = rng.f64();
            event.llps[0].lxy = rng.f64() * 6000.0;
            event.llps[1].lxy = rng.f64() * 6000.0;
            event
        })
        .collect()
}

fn selector_benchmark(c: &mut Criterion) {
    let selector = Selector::new(SelectionVariant::LowPt);
    let mut group = c.benchmark_group("selector");
    for size in SIZES {
        let events = synthetic_events(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("run", size), &events, |b, events| {
            b.iter(|| black_box(selector.run(black_box(events))))
        });
        #[cfg(feature = "rayon")]
        group.bench_with_input(BenchmarkId::new("run_par", size), &events, |b, events| {
            b.iter(|| black_box(selector.run_par(black_box(events))))
        });
    }
    group.finish();
}

fn efficiency_benchmark(c: &mut Criterion) {
    let (records, _) = Selector::new(SelectionVariant::LowPt).run(&synthetic_events(100_000));
    c.bench_function("lxy efficiency fill", |b| {
        b.iter(|| {
            black_box(
                LxyEfficiency::from_records(black_box(&records), LxyBinning::default()).unwrap(),
            )
        })
    });
}

criterion_group!(benches, selector_benchmark, efficiency_benchmark);
criterion_main!(benches);
