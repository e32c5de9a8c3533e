//! Chain execution engine.
//!
//! This crate runs the prompt steps of a parsed chain in order: rendering each
//! template against the variables produced so far, calling a [`Generator`],
//! reporting progress to observers, and accumulating token usage.

pub mod engine;
pub mod events;
pub mod generator;
pub mod inputs;

pub use engine::{
    ChainEngine, GenerationParams, RunOutput, RunState, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};
pub use events::{EventEmitter, FnObserver, ProgressObserver, StepEvent};
pub use generator::{ChunkSink, Generation, GenerationRequest, Generator, LlmGenerator, StdoutSink};
pub use inputs::{declared_inputs, first_unresolved, InputMode};
