use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use looptrack::audio::click::ClickRenderer;
use looptrack::sequencer::metronome::{ClickSink, ClickType, ScheduledClick};
use looptrack::sequencer::{BarTimeline, BeatTimingService, Tempo, TimeSignature};

/// Downbeats every 2s (120 BPM, 4/4)
fn downbeats(bars: usize) -> Vec<f64> {
    (0..bars).map(|i| i as f64 * 2000.0).collect()
}

/// Beat lookup runs once per frame on the control thread
fn bench_beat_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("beat_lookup");
    let tempo = Tempo::try_new(120.0).unwrap();
    let signature = TimeSignature::four_four();

    for bars in [16, 128, 1024] {
        let mut timeline = BarTimeline::new();
        let mut service = BeatTimingService::new();
        service.initialize(
            timeline.bars_for(&downbeats(bars), &tempo, &signature),
            tempo.bpm(),
            &signature,
        );
        let end = bars as f64 * 2.0;

        group.bench_with_input(BenchmarkId::from_parameter(bars), &end, |b, &end| {
            let mut t = 0.0;
            b.iter(|| {
                t = (t + 0.0167) % end;
                black_box(service.beat_at_time(black_box(t)))
            });
        });
    }

    group.finish();
}

/// Rebuilding the bar table is memoized on its inputs
fn bench_bar_timeline(c: &mut Criterion) {
    let tempo = Tempo::try_new(120.0).unwrap();
    let signature = TimeSignature::four_four();
    let marks = downbeats(512);

    c.bench_function("bars_for_cached", |b| {
        let mut timeline = BarTimeline::new();
        b.iter(|| black_box(timeline.bars_for(black_box(&marks), &tempo, &signature).len()));
    });
}

/// Click mixing inside the audio callback
fn bench_click_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("click_render");
    let sample_rate = 48000;

    for buffer_size in [64, 256, 512] {
        group.bench_with_input(
            BenchmarkId::from_parameter(buffer_size),
            &buffer_size,
            |b, &size| {
                let mut renderer = ClickRenderer::new(sample_rate);
                let mut buffer = vec![0.0f32; size];
                b.iter(|| {
                    if renderer.active() == 0 {
                        let at = renderer.now();
                        renderer.schedule(ScheduledClick {
                            at,
                            click_type: ClickType::Accent,
                            gain: 0.3,
                        });
                    }
                    buffer.fill(0.0);
                    renderer.render(&mut buffer);
                    black_box(&buffer);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_beat_lookup, bench_bar_timeline, bench_click_render);
criterion_main!(benches);
