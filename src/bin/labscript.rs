use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use labscript::kind;
use labscript::{ExecuteOptions, NullHost, RuntimeConfig, Script, Value};

#[derive(Parser)]
#[command(name = "labscript")]
#[command(about = "Lab automation script runner", long_about = None)]
struct Cli {
    /// Path to a config file; defaults to labscript.toml if present
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a script without running it
    Check { script: String },

    /// Print a script's estimated duration in seconds
    Duration {
        script: String,

        #[arg(long)]
        json: bool,
    },

    /// Execute a script
    Run {
        script: String,

        /// Script type, e.g. ExtractionScript
        #[arg(long)]
        kind: Option<String>,

        /// Positional arguments bound to main()
        args: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = RuntimeConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Check { script } => {
            let mut script = load(&script, config)?;
            script.bootstrap()?;
            script.test()?;
            println!("ok");
        }
        Commands::Duration { script, json } => {
            let mut script = load(&script, config)?;
            script.bootstrap()?;
            let secs = script.calculate_estimated_duration()?;
            if json {
                let out = serde_json::json!({ "script": script.name(), "seconds": secs });
                println!("{}", out);
            } else {
                println!("{:.1}", secs);
            }
        }
        Commands::Run { script, kind, args } => {
            let mut script = load(&script, config)?;
            if let Some(name) = kind {
                let kind = kind::lookup(&name)
                    .with_context(|| format!("unknown script type: {}", name))?;
                script.set_kind(kind);
            }
            let argv = args.iter().map(|s| parse_arg(s)).collect();
            let completed = script.execute(ExecuteOptions {
                argv,
                ..Default::default()
            })?;
            if !completed {
                if let Some(err) = script.last_error() {
                    anyhow::bail!("script failed: {}", err);
                }
                anyhow::bail!("script canceled");
            }
        }
    }

    Ok(())
}

/// Split a script path into its directory and file name.
fn load(path: &str, config: RuntimeConfig) -> anyhow::Result<Script> {
    let path = Path::new(path);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("script path has no file name")?;
    let root = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(Script::new(root, name, Arc::new(NullHost::new())).with_config(config))
}

/// Numbers become numeric values; everything else stays a string.
fn parse_arg(raw: &str) -> Value {
    match raw.parse::<f64>() {
        Ok(n) => Value::Num(n),
        Err(_) => Value::Str(raw.to_string()),
    }
}
