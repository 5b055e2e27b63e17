//! Prognyx: analysis routing & ensemble prediction.
//! Entry point for the command-line binary.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use prognyx_common::{AnalysisError, StrategyHint};
use prognyx_engine::{AnalysisEngine, AnalyzeOptions, BackendSet, JsonDirProfileStore};

#[derive(Parser, Debug)]
#[command(name = "prognyx")]
#[command(about = "Route a record to eligible analysis methods and combine their predictions")]
#[command(version)]
struct Args {
    /// Config file (defaults to PROGNYX_CONFIG, then ./prognyx.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of record profiles (overrides [profiles].dir)
    #[arg(long, env = "PROGNYX_PROFILES")]
    profiles: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full analysis and print the prediction as JSON
    Analyze {
        record_id: String,

        /// Request deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,

        #[arg(long, value_enum, default_value = "auto")]
        hint: Hint,

        /// Extra backend parameter, `key=value` (value parsed as JSON when possible)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },
    /// Show eligibility and the plan without calling any backend
    Plan {
        record_id: String,

        #[arg(long, value_enum, default_value = "auto")]
        hint: Hint,
    },
    /// List the registered methods
    Methods,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Hint {
    Auto,
    UncertaintyFirst,
    WeightedVoting,
    Stacking,
}

impl From<Hint> for StrategyHint {
    fn from(hint: Hint) -> Self {
        match hint {
            Hint::Auto => StrategyHint::Auto,
            Hint::UncertaintyFirst => StrategyHint::UncertaintyFirst,
            Hint::WeightedVoting => StrategyHint::WeightedVoting,
            Hint::Stacking => StrategyHint::Stacking,
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("prognyx=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("Prognyx {}", env!("CARGO_PKG_VERSION"));

    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(dir) = args.profiles {
        config.profiles.dir = dir;
    }
    info!(
        profiles = %config.profiles.dir.display(),
        backends = config.engine.backends.len(),
        "Configuration loaded"
    );

    let backends = BackendSet::from_config(&config.engine)?;
    let engine = AnalysisEngine::builder()
        .config(config.engine.clone())
        .backends(backends)
        .profile_store(Arc::new(JsonDirProfileStore::new(&config.profiles.dir)))
        .build()?;

    match args.command {
        Command::Methods => {
            let specs: Vec<_> = engine.registry().iter().collect();
            println!("{}", serde_json::to_string_pretty(&specs)?);
        }
        Command::Plan { record_id, hint } => {
            let preview = engine.plan(&record_id, hint.into()).await.map_err(report)?;
            let out = serde_json::json!({
                "profile": preview.profile,
                "eligibility": preview.report,
                "plan": preview.plan,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Analyze { record_id, deadline_ms, hint, params } => {
            let mut options = AnalyzeOptions::default().with_hint(hint.into());
            if let Some(ms) = deadline_ms {
                options = options.with_deadline(Duration::from_millis(ms));
            }
            for (key, value) in params {
                options = options.with_param(&key, value);
            }
            let prediction = engine.analyze(&record_id, options).await.map_err(report)?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
    }

    Ok(())
}

/// Log the failure with its structured detail before handing it to anyhow.
fn report(err: AnalysisError) -> anyhow::Error {
    match &err {
        AnalysisError::AnalysisInfeasible { report, .. } => {
            let detail = serde_json::to_string(report).unwrap_or_default();
            error!(%detail, "{err}");
        }
        AnalysisError::AnalysisTimeout { failures, .. } | AnalysisError::AllMethodsFailed { failures, .. } => {
            for f in failures {
                error!(method_id = %f.method_id, status = %f.status, reason = %f.reason, "Method did not contribute");
            }
            error!("{err}");
        }
        _ => error!("{err}"),
    }
    err.into()
}
