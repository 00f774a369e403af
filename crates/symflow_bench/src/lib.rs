/// Declarative benchmark systems built on `symflow_core`. A benchmark is a
/// plain `Benchmark` value: symbols, equations and the metadata external
/// verification or learning tools consume.
pub mod benchmark;
pub mod laub_loomis;
pub mod metadata;

pub use benchmark::Benchmark;
pub use laub_loomis::{laub_loomis, LaubLoomisCase};
pub use metadata::{InitialBox, Interval, TimeHorizon, UnsafeCheck, UnsafeRegion};
