use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use keg_core::buffer::Width;
use keg_core::{CalibrationModel, FieldLayout, FieldSpec, LinearFit, Monitor};
use keg_traits::RawFrame;

// Noisy weight around a level with occasional spikes (xorshift)
fn synth_frames(n: usize, seed: u32) -> Vec<RawFrame> {
    let mut state = seed.max(1);
    let mut next = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        x
    };
    (0..n)
        .map(|i| {
            let r = next();
            let mut w = 5000u16 + (r % 5) as u16;
            if r % 97 == 0 {
                w = w.wrapping_add(3000);
            }
            let mut p = vec![0u8; 17];
            p[12..14].copy_from_slice(&w.to_le_bytes());
            p[14] = 1;
            RawFrame::new("AA:BB:CC:DD:EE:FF", i as u64 * 100, p)
        })
        .collect()
}

fn monitor() -> Monitor {
    let layout = FieldLayout::builder()
        .field("weight", FieldSpec::new(12, Width::W2))
        .field("state", FieldSpec::new(14, Width::W1))
        .build()
        .unwrap();
    Monitor::builder()
        .with_layout(layout)
        .with_weight_field("weight")
        .with_discriminator("state")
        .with_calibration(CalibrationModel::default().with_fit(
            keg_core::DiscriminatorKey::from(1_i64),
            LinearFit {
                slope: 0.001,
                intercept: 0.0,
            },
        ))
        .build()
        .unwrap()
}

pub fn bench_process(c: &mut Criterion) {
    let mut g = c.benchmark_group("hot_path");
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p keg_core --bench hot_path
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }

    let frames = synth_frames(10_000, 0xC0FFEE);
    g.bench_function("decode_condition_calibrate_10k", |b| {
        b.iter_batched(
            monitor,
            |mut m| {
                for f in &frames {
                    black_box(m.process(black_box(f)));
                }
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

criterion_group!(hot_path, bench_process);
criterion_main!(hot_path);
