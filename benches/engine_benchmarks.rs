//! Engine Benchmarks
//!
//! Performance benchmarks for the pitch stage and offline rendering.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stepgrid::dsp::{Effect, PitchShifter};
use stepgrid::engine::{generate_click, generate_test_tone, WavLoader};
use stepgrid::{EngineConfig, Sequencer, TrackSpec};

fn benchmark_pitch_shift(c: &mut Criterion) {
    let mut buffer = generate_test_tone(440.0, 1.0, 48000);
    let mut shifter = PitchShifter::new(5.0);
    shifter.prepare(48000, 512);

    c.bench_function("pitch_shift_1s_mono", |b| {
        b.iter(|| {
            shifter.process(black_box(&mut buffer));
        })
    });
}

fn benchmark_offline_render(c: &mut Criterion) {
    let mut seq = Sequencer::new(EngineConfig::default(), Arc::new(WavLoader::new())).unwrap();

    let kick = TrackSpec::new("kick", "kick.wav", 120.0);
    seq.sources().insert_ready(kick.source.clone(), generate_click(60.0, 0.2, 48000));
    let kick = seq.add_track(kick).unwrap();
    for step in [0, 4, 8, 12] {
        seq.set_step(kick, step, true).unwrap();
    }

    let pad = TrackSpec::new("pad", "pad.wav", 100.0)
        .with_current_bpm(120.0)
        .with_loop(0.0, 1.0);
    seq.sources().insert_ready(pad.source.clone(), generate_test_tone(220.0, 2.0, 48000));
    let pad = seq.add_track(pad).unwrap();
    seq.set_step(pad, 0, true).unwrap();

    c.bench_function("render_one_cycle_two_tracks", |b| {
        b.iter(|| {
            black_box(seq.render_offline(1).unwrap());
        })
    });
}

criterion_group!(benches, benchmark_pitch_shift, benchmark_offline_render);
criterion_main!(benches);
