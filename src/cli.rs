//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use refract_reconciler::ReferenceStrategyKind;

/// refract - converge SecretTransforms into ConfigMaps and Secrets
#[derive(Parser, Debug)]
#[command(name = "refract")]
#[command(version)]
#[command(about = "Converge SecretTransform resources into derived ConfigMaps and Secrets")]
#[command(
    long_about = "refract loads ConfigMaps, Secrets and SecretTransforms from YAML manifests into an in-memory store, runs the reconciliation controller over them, and evaluates transform queries."
)]
pub struct Cli {
    /// Log filter, e.g. `debug` or `refract_reconciler=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Configuration file (defaults to ./refract.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile manifests until idle and print the resulting objects
    Apply {
        /// Manifest files (multi-document YAML)
        #[arg(required = true)]
        manifests: Vec<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,

        /// Seconds to wait for the controller to settle
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Run the controller over manifests until Ctrl-C or the duration ends
    Run {
        /// Manifest files (multi-document YAML)
        #[arg(required = true)]
        manifests: Vec<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Evaluate a query against an input scope
    Eval {
        /// Query text; an empty query prints the whole scope
        query: String,

        /// YAML or JSON file mapping input names to `{key: text}` bundles
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Print the result as a ConfigMap value
        #[arg(long, conflicts_with = "binary")]
        text: bool,

        /// Print the result as a base64 Secret value
        #[arg(long)]
        binary: bool,
    },
}

/// Settings that override the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// How inputs are linked back to their transforms
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Concurrent reconciliation workers
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    Owner,
    Annotation,
    Combined,
}

impl From<StrategyArg> for ReferenceStrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Owner => Self::Owner,
            StrategyArg::Annotation => Self::Annotation,
            StrategyArg::Combined => Self::Combined,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_with_overrides() {
        let cli = Cli::try_parse_from([
            "refract",
            "--log-level",
            "debug",
            "apply",
            "a.yaml",
            "b.yaml",
            "--strategy",
            "combined",
            "--workers",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Apply {
            manifests,
            overrides,
            timeout_secs,
        } = cli.command
        else {
            assert!(matches!(cli.command, Commands::Apply { .. }));
            return;
        };
        assert_eq!(manifests, vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]);
        assert_eq!(overrides.strategy, Some(StrategyArg::Combined));
        assert_eq!(overrides.workers, Some(3));
        assert_eq!(timeout_secs, 30);
    }

    #[test]
    fn test_apply_requires_manifests() {
        assert!(Cli::try_parse_from(["refract", "apply"]).is_err());
    }

    #[test]
    fn test_eval_modes_conflict() {
        assert!(Cli::try_parse_from(["refract", "eval", ".", "--text", "--binary"]).is_err());
        let cli = Cli::try_parse_from(["refract", "eval", ".a", "--input", "in.yaml", "--binary"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Eval { binary: true, text: false, .. }
        ));
    }
}
