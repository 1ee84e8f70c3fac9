//! Pipeline composition.
//!
//! [`PipelineComposer::build`] turns a [`ProviderConfig`] into a linked
//! [`Pipeline`] in three synchronous steps:
//!
//! 1. plan: resolve transport, sub-type and data type, look up the stage
//!    list, check record shapes and that every stage has a factory, and
//!    derive each stage's options;
//! 2. construct every stage (no I/O);
//! 3. link stage *i* to stage *i + 1* with bounded channels.
//!
//! Any failure in step 1 or 2 is a configuration error and nothing runs.
//! [`Pipeline::start`] spawns the stages; [`Pipeline::stop`] closes the input
//! of the first stage and lets the closure travel down the chain.

use std::sync::{Arc, Mutex, PoisonError};

use signalk_core::{ConfigError, DataType, Delta, ProviderConfig, TransportType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::record::Record;
use crate::stage::{AppContext, Stage, StageKind, StageLink, StageOptions, StageRegistry};
use crate::table::{check_shapes, stage_plan, SourceKind};

/// Capacity of each link between stages.
///
/// A single slot means a stage can only run one record ahead of its
/// downstream neighbour.
pub const LINK_CAPACITY: usize = 1;

/// Default rate for replaying files, in bytes per second.
pub const DEFAULT_THROTTLE_RATE: u64 = 1000;

/// One planned stage: its kind and the options it will be built with.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub kind: StageKind,
    pub options: StageOptions,
}

/// Builds pipelines from provider configurations.
#[derive(Debug, Clone)]
pub struct PipelineComposer {
    registry: StageRegistry,
    app: Arc<AppContext>,
}

impl PipelineComposer {
    pub fn new(registry: StageRegistry, app: AppContext) -> Self {
        Self {
            registry,
            app: Arc::new(app),
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Validate a configuration and derive the stage list, without
    /// constructing anything.
    pub fn plan(&self, config: &ProviderConfig) -> Result<Vec<StageSpec>, ProviderError> {
        let transport: TransportType = config.transport.parse()?;
        let data_type: DataType = config.data_type_name()?.parse()?;
        let source = SourceKind::resolve(transport, config.sub_type())?;

        let kinds = stage_plan(source, data_type, config.logging)?;
        check_shapes(&kinds)?;
        if let Some(missing) = kinds.iter().find(|k| !self.registry.contains(**k)) {
            return Err(ProviderError::MissingStageFactory(*missing));
        }

        let mut specs = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let options = stage_options(kind, source, data_type, config)?;
            specs.push(StageSpec { kind, options });
        }
        Ok(specs)
    }

    /// Build and link the pipeline for `config`.
    pub fn build(&self, config: &ProviderConfig) -> Result<Pipeline, ProviderError> {
        let specs = self.plan(config)?;

        let mut stages = Vec::with_capacity(specs.len());
        for spec in specs {
            let factory = self
                .registry
                .get(spec.kind)
                .ok_or(ProviderError::MissingStageFactory(spec.kind))?;
            stages.push((spec.kind, factory.create(spec.options, &self.app)?));
        }

        let pipeline = Pipeline::link(config.id.clone(), stages);
        info!(
            "Built pipeline for provider {}: {}",
            pipeline.id(),
            pipeline.describe()
        );
        Ok(pipeline)
    }
}

/// Options for one stage: a private copy of the sub-options plus the
/// values the composer derives for that stage.
fn stage_options(
    kind: StageKind,
    source: SourceKind,
    data_type: DataType,
    config: &ProviderConfig,
) -> Result<StageOptions, ConfigError> {
    let mut options = StageOptions::new(config.sub_options.clone());
    options.insert("providerId", config.id.clone());

    match (kind, source) {
        (StageKind::Execute, SourceKind::ActisenseSerial) => {
            let device = options.require_str("device")?.to_string();
            options.insert("command", format!("actisense-serial {device}"));
        }
        (StageKind::CanDump, _) => {
            let interface = options.require_str("interface")?.to_string();
            options.insert("command", format!("candump {interface}"));
        }
        (StageKind::Throttle, _) => {
            let rate = options.get_u64("throttleRate")?.unwrap_or(DEFAULT_THROTTLE_RATE);
            options.insert("rate", rate);
        }
        (StageKind::DiscoveryClient, _) => {
            let protocol = config.sub_type().unwrap_or("ws").to_string();
            options.insert("protocol", protocol);
        }
        (StageKind::Recorder, _) => {
            if let Some(discriminator) = data_type.discriminator() {
                options.insert("discriminator", discriminator.to_string());
            }
        }
        _ => {}
    }
    Ok(options)
}

// ============================================================================
// Pipeline
// ============================================================================

/// Closes the first stage's input. Cloneable so a supervisor can stop a
/// pipeline that another task is draining.
#[derive(Debug, Clone)]
pub struct StopHandle {
    head: Arc<Mutex<Option<mpsc::Sender<Record>>>>,
}

impl StopHandle {
    /// Signal end-of-input to the first stage. Idempotent.
    pub fn stop(&self) {
        let sender = self
            .head
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            debug!("End of input signalled");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.head
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// A linked chain of stages owned by one provider.
pub struct Pipeline {
    id: String,
    kinds: Vec<StageKind>,
    /// Stages waiting to be spawned, with their links.
    pending: Vec<(StageKind, Box<dyn Stage>, StageLink)>,
    output: mpsc::Receiver<Record>,
    stop: StopHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Link stages front to back. The last stage feeds the pipeline output.
    pub(crate) fn link(id: String, stages: Vec<(StageKind, Box<dyn Stage>)>) -> Self {
        let (head, mut upstream) = mpsc::channel(LINK_CAPACITY);
        let kinds = stages.iter().map(|(kind, _)| *kind).collect();

        let mut pending = Vec::with_capacity(stages.len());
        for (kind, stage) in stages {
            let (output, next) = mpsc::channel(LINK_CAPACITY);
            pending.push((
                kind,
                stage,
                StageLink {
                    input: upstream,
                    output,
                },
            ));
            upstream = next;
        }

        Self {
            id,
            kinds,
            pending,
            output: upstream,
            stop: StopHandle {
                head: Arc::new(Mutex::new(Some(head))),
            },
            tasks: Vec::new(),
        }
    }

    /// Provider identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stage kinds in chain order.
    pub fn stage_kinds(&self) -> &[StageKind] {
        &self.kinds
    }

    /// Stage names joined with arrows, for logs.
    pub fn describe(&self) -> String {
        self.kinds
            .iter()
            .map(StageKind::as_str)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Spawn one task per stage. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), ProviderError> {
        if !self.tasks.is_empty() || self.pending.is_empty() {
            return Err(ProviderError::AlreadyStarted(self.id.clone()));
        }

        for (position, (kind, stage, link)) in self.pending.drain(..).enumerate() {
            let provider = self.id.clone();
            self.tasks.push(tokio::spawn(async move {
                debug!("Stage {position} ({kind}) of {provider} started");
                match stage.run(link).await {
                    Ok(()) => debug!("Stage {position} ({kind}) of {provider} finished"),
                    Err(e) => warn!("Stage {position} ({kind}) of {provider} failed: {e}"),
                }
            }));
        }
        info!("Started provider {}", self.id);
        Ok(())
    }

    /// Next delta produced by the last stage, or `None` once the chain has
    /// closed.
    pub async fn recv(&mut self) -> Option<Delta> {
        loop {
            match self.output.recv().await? {
                Record::Delta(delta) => return Some(delta),
                other => warn!(
                    "Provider {} produced a {} record instead of a delta",
                    self.id,
                    other.shape()
                ),
            }
        }
    }

    /// Signal end-of-input to the first stage.
    ///
    /// The remaining stages shut down as they observe their input closing;
    /// nothing is forced.
    pub fn stop(&self) {
        info!("Stopping provider {}", self.id);
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait until every stage task has finished.
    ///
    /// This waits as long as it takes; a stage that ignores end-of-input
    /// keeps the pipeline alive.
    pub async fn join(mut self) {
        // Drop the output so a last stage blocked on send can finish.
        self.output.close();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Stage task of {} panicked: {e}", self.id);
            }
        }
        debug!("Provider {} stopped", self.id);
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("stages", &self.kinds)
            .field("started", &!self.tasks.is_empty())
            .finish()
    }
}
