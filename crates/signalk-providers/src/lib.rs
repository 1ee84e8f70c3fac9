//! # signalk-providers
//!
//! Provider pipelines for SignalK server.
//!
//! A provider is one configured data source. This crate turns its
//! configuration into a linear chain of stages (transport source, line
//! framer, optional recorder, protocol decoders) producing deltas:
//! - [`table`]: which stages a source and data type need, and shape checks
//! - [`PipelineComposer`]: validates, constructs and links a [`Pipeline`]
//! - [`StageRegistry`]: stage constructors, with the built-in [`stages`]
//! - [`ProviderHandle`]: runs a pipeline and forwards its deltas

pub mod error;
pub mod pipeline;
pub mod provider;
pub mod record;
pub mod stage;
pub mod stages;
pub mod table;

pub use error::{ProviderError, StageError};
pub use pipeline::{Pipeline, PipelineComposer, StageSpec, StopHandle, LINK_CAPACITY};
pub use provider::{drive, stamp_source, ProviderHandle};
pub use record::{Record, RecordShape};
pub use stage::{
    end_of_input, AppContext, Stage, StageFactory, StageKind, StageLink, StageOptions,
    StageRegistry, StageShape,
};
pub use table::{check_shapes, stage_plan, SourceKind};
