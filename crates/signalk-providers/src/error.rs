//! Provider and stage errors.

use signalk_core::{ConfigError, DataType};
use thiserror::Error;

use crate::record::RecordShape;
use crate::stage::StageKind;
use crate::table::SourceKind;

/// Errors raised while composing a pipeline.
///
/// All of these are configuration errors: they are raised synchronously by
/// [`crate::PipelineComposer::build`] before any stage is constructed or
/// started, and the provider never runs.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The source cannot feed the decoder family.
    #[error("{source_kind} sources cannot carry {data_type} data")]
    Unsupported {
        source_kind: SourceKind,
        data_type: DataType,
    },

    /// The plan needs a stage the registry cannot construct.
    #[error("no stage factory registered for {0}")]
    MissingStageFactory(StageKind),

    /// A stage would receive records of the wrong shape.
    #[error("{stage} cannot follow a stage producing {upstream}")]
    ShapeMismatch {
        stage: StageKind,
        upstream: RecordShape,
    },

    /// The last stage does not produce deltas.
    #[error("pipeline ends with {0} records instead of deltas")]
    NotDeltaProducing(RecordShape),

    #[error("pipeline {0} already started")]
    AlreadyStarted(String),
}

/// Runtime errors of a single stage.
///
/// A stage error ends that stage only; the pipeline winds down as the closed
/// link propagates.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{stage} cannot accept {shape} records")]
    UnexpectedRecord { stage: StageKind, shape: RecordShape },

    #[error("{0}")]
    Failed(String),
}
