//! Execution core of the `parsefuzz` harness.
//!
//! A harness process detects whether a fuzzing engine is attached
//! ([`mode`]), serves the engine's fork-server requests if it is ([`engine`]),
//! and runs an [`IterationLoop`] that pulls test cases from a
//! [`BufferSource`] and feeds each one to a single [`ParserAdapter`].

pub mod adapter;
pub mod config;
pub mod engine;
pub mod executor;
pub mod input;
pub mod mode;
pub mod source;

pub use adapter::{
    JsonCStrAdapter, JsonInsituAdapter, JsonStreamAdapter, JsonTreeAdapter, ParseOutcome,
    ParserAdapter, ParserKind, YamlAdapter,
};
pub use config::{HarnessConfig, HarnessSettings};
pub use engine::{EngineError, ForkServer};
pub use executor::{IterationLoop, LoopState, RunSummary};
pub use input::{DEFAULT_BUFFER_CAPACITY, InputBuffer};
pub use mode::{Detection, EngineAttachment, Mode};
pub use source::{
    BufferSource, HarnessSource, OneShotSource, PersistentSource, ShmChannel, SourceError,
};
