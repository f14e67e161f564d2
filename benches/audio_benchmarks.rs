//! Render-loop benchmarks: channel DSP cost scaling with polyphony, and the
//! full engine render path end to end.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mdtracker::sequencer::song::{Instrument, Pattern, Song, CHANNEL_COUNT};
use mdtracker::synth::channel::Channel;
use mdtracker::synth::wavetable::WavetableSet;
use mdtracker::{Engine, EngineConfig};

fn bench_channel_render(c: &mut Criterion) {
    let tables = WavetableSet::new(48_000.0);
    let instrument = Instrument::default();

    c.bench_function("channel_render_held_note", |b| {
        let mut channel = Channel::default();
        channel.note_on(&instrument, 69, 99, 0, &tables, 1.0);
        b.iter(|| {
            channel.update_operators(&tables, 8);
            for _ in 0..8 {
                black_box(channel.render_sample(&tables));
            }
        });
    });
}

fn bench_engine_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_render");

    for channel_count in [1, 6, 12, CHANNEL_COUNT] {
        let mut song = Song::default();
        let mut pattern = Pattern::new(64);
        for ch in 0..channel_count {
            let row = pattern.row_mut(0).unwrap();
            row[ch].note = 60 + (ch % 12) as u8;
            row[ch].instr = 0;
            row[ch].vol = 99;
        }
        song.patterns.push(pattern);
        song.instruments.push(Instrument::default());

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{channel_count}_channels")),
            &song,
            |b, song| {
                let mut engine = Engine::new(song.clone(), EngineConfig::default());
                let mut left = vec![0.0f32; 4096];
                let mut right = vec![0.0f32; 4096];
                b.iter(|| {
                    engine.render(black_box(&mut left), black_box(&mut right));
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_channel_render, bench_engine_render);
criterion_main!(benches);
