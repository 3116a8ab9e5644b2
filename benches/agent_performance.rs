//! Agent Performance Benchmarks
//!
//! The agent runs on the page's main thread, so every callback competes
//! with the page's own work. These benchmarks cover the hot paths:
//!
//! | Path | Cadence |
//! |------|---------|
//! | Level sampling | every animation frame (~16.7 ms) |
//! | Subtree insertion | every DOM mutation batch |
//! | Parameter update | every slider movement |
//! | Source-change churn | playlist / ad transitions |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pageamp::prelude::*;
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

const FFT_SIZES: [u32; 4] = [256, 1024, 4096, 32768];
const SUBTREE_SIZES: [usize; 4] = [1, 8, 64, 512];

// ============================================================================
// Helper Functions
// ============================================================================

fn agent_with(config: AgentConfig, elements: usize) -> PageAgent<SimEngine, SimDocument> {
    let mut doc = SimDocument::new("https://example.com/");
    for _ in 0..elements {
        doc.add_element();
    }
    let mut agent = PageAgent::new(SimEngine::new(), doc, config);
    agent.dispatch(AgentEvent::Startup, Duration::ZERO);
    agent
}

fn fill_taps(agent: &mut PageAgent<SimEngine, SimDocument>) {
    if let Some(nodes) = agent.graph().nodes() {
        let bins = (agent.config().analyser_fft_size() / 2) as usize;
        let ramp: Vec<u8> = (0..bins).map(|i| (i % 256) as u8).collect();
        agent.engine_mut().set_magnitudes(nodes.input_tap, ramp.clone());
        agent.engine_mut().set_magnitudes(nodes.output_tap, ramp);
    }
}

// ============================================================================
// Level Sampling
// ============================================================================

fn bench_level_sampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("levels/frame_tick");

    for fft_size in FFT_SIZES {
        let config = AgentConfig {
            fft_size,
            ..AgentConfig::default()
        };
        let mut agent = agent_with(config, 1);
        fill_taps(&mut agent);

        group.throughput(Throughput::Elements(fft_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fft_size), &fft_size, |b, _| {
            let mut t = 0u64;
            b.iter(|| {
                t += 16;
                agent.dispatch(AgentEvent::FrameTick, Duration::from_millis(t));
                black_box(agent.levels())
            })
        });
    }

    group.finish();
}

fn bench_normalized_rms(c: &mut Criterion) {
    let buf: Vec<u8> = (0..16384).map(|i| (i % 256) as u8).collect();
    c.bench_function("levels/normalized_rms_16k", |b| {
        b.iter(|| black_box(normalized_rms(black_box(&buf), 255.0)))
    });
}

// ============================================================================
// Discovery
// ============================================================================

fn bench_subtree_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("discovery/insert_subtree");

    for size in SUBTREE_SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let mut agent = agent_with(AgentConfig::default(), 0);
                    let ids: Vec<_> =
                        (0..size).map(|_| agent.document_mut().add_element()).collect();
                    (agent, InsertedSubtree::container(ids))
                },
                |(mut agent, subtree)| {
                    agent.dispatch(AgentEvent::ElementsInserted(vec![subtree]), Duration::ZERO);
                    black_box(agent.attached_count())
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_source_churn(c: &mut Criterion) {
    let mut agent = agent_with(AgentConfig::default(), 1);
    let el = agent.registry().elements().next();
    let Some(el) = el else {
        return;
    };

    c.bench_function("discovery/source_change_cycle", |b| {
        let mut t = 0u64;
        b.iter(|| {
            t += 1000;
            agent.dispatch(AgentEvent::SourceChanged(el), Duration::from_millis(t));
            agent.run_until_idle(Duration::from_millis(t + 100));
            black_box(agent.is_attached(el))
        })
    });
}

// ============================================================================
// Control Interface
// ============================================================================

fn bench_parameter_updates(c: &mut Criterion) {
    let mut agent = agent_with(AgentConfig::default(), 4);
    let message = serde_json::json!({
        "action": "updateAudioSettings",
        "settings": {"volume": 150, "compressionEnabled": true, "threshold": -30, "ratio": 8}
    });

    c.bench_function("control/update_settings", |b| {
        b.iter(|| black_box(agent.handle_message(black_box(&message), Duration::ZERO)))
    });

    let status = serde_json::json!({"action": "getAudioStatus"});
    c.bench_function("control/get_status", |b| {
        b.iter(|| black_box(agent.handle_message(black_box(&status), Duration::ZERO)))
    });
}

criterion_group!(level_benches, bench_level_sampling, bench_normalized_rms,);

criterion_group!(discovery_benches, bench_subtree_insertion, bench_source_churn,);

criterion_group!(control_benches, bench_parameter_updates,);

criterion_main!(level_benches, discovery_benches, control_benches,);
