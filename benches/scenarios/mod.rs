//! Benchmarks for instrument voices and the engine as a whole.

mod engine;
mod graph;
mod voices;

pub use engine::bench_engine;
pub use graph::bench_graph;
pub use voices::bench_voices;
