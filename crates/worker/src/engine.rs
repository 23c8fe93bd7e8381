//! Builds the production engine from a [`WorkerConfig`].

use std::sync::Arc;

use storyreel_events::EventBus;
use storyreel_pipeline::assembly::AssemblyEngine;
use storyreel_pipeline::command::{
    CommandEnhancer, CommandNarrator, CommandSpec, CommandVisuals, CommandWriter,
};
use storyreel_pipeline::lifecycle::Lifecycle;
use storyreel_pipeline::organizer::ArtifactOrganizer;
use storyreel_pipeline::providers::{
    ContentWriter, NoVisuals, PassthroughEnhancer, PromptEnhancer, VisualProvider,
};
use storyreel_pipeline::runner::ProductionRunner;
use storyreel_pipeline::synchronizer::{Collaborators, SceneSynchronizer};
use storyreel_pipeline::toolchain::FfmpegToolchain;

use crate::config::{ConfigError, WorkerConfig};

/// Assemble synchronizer, assembly engine, and runner.
///
/// `NARRATION_COMMAND` is mandatory. Without `VISUAL_COMMAND` every scene
/// renders with a placeholder; without `ENHANCE_COMMAND` sentences are used
/// as image prompts unchanged.
pub fn build_runner(
    config: &WorkerConfig,
    lifecycle: Arc<Lifecycle>,
    bus: Arc<EventBus>,
) -> Result<ProductionRunner, ConfigError> {
    let narration = config
        .narration_command
        .as_deref()
        .ok_or(ConfigError::Missing("NARRATION_COMMAND"))?;
    let narrator = Arc::new(CommandNarrator::new(command_spec(
        "NARRATION_COMMAND",
        narration,
        config,
    )?));

    let visuals: Arc<dyn VisualProvider> = match config.visual_command.as_deref() {
        Some(line) => Arc::new(CommandVisuals::new(command_spec("VISUAL_COMMAND", line, config)?)),
        None => {
            tracing::warn!("VISUAL_COMMAND not set, every scene will use a placeholder visual");
            Arc::new(NoVisuals)
        }
    };
    let enhancer: Arc<dyn PromptEnhancer> = match config.enhance_command.as_deref() {
        Some(line) => Arc::new(CommandEnhancer::new(command_spec("ENHANCE_COMMAND", line, config)?)),
        None => Arc::new(PassthroughEnhancer),
    };

    let toolchain = Arc::new(FfmpegToolchain::new(config.fps, config.resolution));
    let organizer = ArtifactOrganizer::new(config.output_root.clone());
    let collaborators = Collaborators {
        narrator,
        visuals,
        enhancer,
        renderer: toolchain.clone(),
        toolchain: toolchain.clone(),
    };

    let synchronizer =
        SceneSynchronizer::new(config.sync_config(), collaborators, organizer.clone());
    let assembly = AssemblyEngine::new(config.assembly_config(), toolchain, organizer.clone());

    tracing::info!(
        output_root = %config.output_root.display(),
        max_concurrency = config.max_concurrency,
        max_dropped_fraction = config.max_dropped_fraction,
        visual_mode = %config.visual_mode,
        placeholder = %config.placeholder,
        "Production engine configured",
    );

    Ok(ProductionRunner::new(lifecycle, bus, organizer, synchronizer, assembly)
        .with_rates(config.rates)
        .with_artifact_ttl(config.artifact_ttl))
}

/// The research and scriptwriting collaborator, required by `produce`.
pub fn build_writer(config: &WorkerConfig) -> Result<Arc<dyn ContentWriter>, ConfigError> {
    let line = config
        .writer_command
        .as_deref()
        .ok_or(ConfigError::Missing("WRITER_COMMAND"))?;
    Ok(Arc::new(CommandWriter::new(command_spec(
        "WRITER_COMMAND",
        line,
        config,
    )?)))
}

fn command_spec(
    var: &'static str,
    line: &str,
    config: &WorkerConfig,
) -> Result<CommandSpec, ConfigError> {
    CommandSpec::parse(line, config.command_timeout).map_err(|e| ConfigError::Invalid {
        var,
        value: line.to_string(),
        reason: e.to_string(),
    })
}
