//! CLI command handlers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use refract_core::{parse_manifests, render_manifests};
use refract_reconciler::{ControllerLoop, Reconciler};
use refract_store::{InMemoryStore, ResourceStore, TracingStore};
use refract_transform::{InputScope, TransformEngine, encode_bytes, encode_text};
use tokio::signal;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands, Overrides};
use crate::config::RefractConfig;

type Store = TracingStore<InMemoryStore>;

/// How `eval` prints its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalFormat {
    /// Pretty-printed JSON.
    #[default]
    Json,
    /// The text a ConfigMap field would hold.
    Text,
    /// The base64 form of a Secret field.
    Binary,
}

/// Execute a parsed command line.
///
/// # Errors
///
/// Returns any configuration, manifest, controller or query error.
pub async fn execute_command(cli: Cli) -> Result<()> {
    let config = RefractConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Apply {
            manifests,
            overrides,
            timeout_secs,
        } => {
            let config = with_overrides(config, &overrides)?;
            let rendered = cmd_apply(&manifests, config, Duration::from_secs(timeout_secs)).await?;
            print!("{rendered}");
            Ok(())
        }

        Commands::Run {
            manifests,
            overrides,
            duration_secs,
        } => {
            let config = with_overrides(config, &overrides)?;
            cmd_run(&manifests, config, duration_secs.map(Duration::from_secs)).await
        }

        Commands::Eval {
            query,
            input,
            text,
            binary,
        } => {
            let format = match (text, binary) {
                (true, _) => EvalFormat::Text,
                (_, true) => EvalFormat::Binary,
                _ => EvalFormat::Json,
            };
            let engine = TransformEngine::new(config.reconciler.query_timeout());
            let output = cmd_eval(&engine, &query, input.as_deref(), format).await?;
            println!("{output}");
            Ok(())
        }
    }
}

/// Apply command-line overrides and re-validate.
///
/// # Errors
///
/// Returns an error when an override produces an invalid configuration.
pub fn with_overrides(mut config: RefractConfig, overrides: &Overrides) -> Result<RefractConfig> {
    if let Some(strategy) = overrides.strategy {
        config.reconciler.reference_strategy = strategy.into();
    }
    if let Some(workers) = overrides.workers {
        config.controller.workers = workers;
    }
    config.validate()?;
    Ok(config)
}

/// Create every object found in `paths`. Returns the number loaded.
///
/// # Errors
///
/// Returns an error naming the file that could not be read, parsed or stored.
pub async fn load_manifests<S>(store: &S, paths: &[PathBuf]) -> Result<usize>
where
    S: ResourceStore + ?Sized,
{
    let mut loaded = 0_usize;
    for path in paths {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let resources = parse_manifests(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        for resource in resources {
            let key = resource.key();
            store
                .create(resource)
                .await
                .with_context(|| format!("Failed to load {key} from {}", path.display()))?;
            loaded = loaded.saturating_add(1);
        }
    }
    info!(objects = loaded, files = paths.len(), "Loaded manifests");
    Ok(loaded)
}

async fn start(manifests: &[PathBuf], config: RefractConfig) -> Result<(Arc<Store>, Arc<ControllerLoop<Store>>)> {
    let store = Arc::new(TracingStore::new(InMemoryStore::new()));
    load_manifests(store.as_ref(), manifests).await?;
    let reconciler = Arc::new(Reconciler::new(Arc::clone(&store), config.reconciler));
    let controller = Arc::new(ControllerLoop::new(reconciler, config.controller));
    Ok((store, controller))
}

/// Reconcile `manifests` until the controller goes idle and return the
/// resulting objects as a YAML stream.
///
/// # Errors
///
/// Returns manifest loading errors and controller failures.
pub async fn cmd_apply(manifests: &[PathBuf], config: RefractConfig, timeout: Duration) -> Result<String> {
    let (store, controller) = start(manifests, config).await?;

    let runner = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.run().await }
    });
    let settled = controller.wait_idle(timeout).await;
    controller.stopper().stop();
    runner.await.context("Controller task failed")??;

    if !settled {
        warn!(timeout_secs = timeout.as_secs(), "Controller did not settle before the timeout");
    }

    let objects = store.inner().snapshot().await;
    render_manifests(&objects).context("Failed to render objects")
}

/// Run the controller until Ctrl-C or until `duration` elapses.
///
/// # Errors
///
/// Returns manifest loading errors and controller failures.
pub async fn cmd_run(manifests: &[PathBuf], config: RefractConfig, duration: Option<Duration>) -> Result<()> {
    let (store, controller) = start(manifests, config).await?;

    let runner = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.run().await }
    });

    info!("Controller running. Press Ctrl+C to stop.");
    match duration {
        Some(duration) => {
            tokio::select! {
                () = tokio::time::sleep(duration) => info!("Run duration elapsed"),
                () = wait_for_shutdown() => {}
            }
        }
        None => wait_for_shutdown().await,
    }

    controller.stopper().stop();
    runner.await.context("Controller task failed")??;
    info!(objects = store.inner().len().await, "Controller stopped");
    Ok(())
}

/// Evaluate `query` against the bundles in `input`.
///
/// The input file maps input names to `{key: text}` bundles, the same
/// shape a ConfigMap's data has.
///
/// # Errors
///
/// Returns read and parse errors for `input` and query errors.
pub async fn cmd_eval(
    engine: &TransformEngine,
    query: &str,
    input: Option<&Path>,
    format: EvalFormat,
) -> Result<String> {
    let mut scope = InputScope::new();
    if let Some(path) = input {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let bundles: BTreeMap<String, BTreeMap<String, String>> = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        for (name, data) in &bundles {
            scope.insert_text_bundle(name.clone(), data);
        }
    }

    let value = engine.evaluate(&scope, query)?;
    match format {
        EvalFormat::Json => serde_json::to_string_pretty(&value).context("Failed to print result"),
        EvalFormat::Text => Ok(encode_text("result", &value)?),
        EvalFormat::Binary => Ok(STANDARD.encode(encode_bytes("result", &value)?)),
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
