//! Course Runner CLI
//!
//! Serve the execution API, run a snippet locally through the same
//! launcher/relay pipeline, or inspect the effective configuration.

use clap::{Parser, Subcommand};
use console::style;
use course_runner::config::{
    apply_env_overrides, config_path, load_config_from_path, save_config, validate_config,
    Config,
};
use course_runner::sandbox::{relay, Chunk, ExecutionRequest, Launcher};
use course_runner::VERSION;
use futures::StreamExt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "course-runner",
    version = VERSION,
    about = "Course Runner - streams the output of untrusted Python snippets over HTTP",
    long_about = None
)]
struct Cli {
    /// Configuration file (JSON5 or TOML)
    #[arg(long, short, global = true, env = "COURSE_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Port
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Execute code locally and stream its output
    Run {
        /// Script to run ("-" reads stdin)
        file: Option<PathBuf>,

        /// Code to run instead of a file
        #[arg(short = 'e', long = "code", conflicts_with = "file")]
        code: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Also report validation issues; exits non-zero on errors
        #[arg(long)]
        validate: bool,

        /// Write the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load(cli.config.as_deref())?;
    let path = cli.config.unwrap_or_else(config_path);

    match cli.command {
        Commands::Serve { bind, port } => serve(config, bind, port).await,
        Commands::Run { file, code } => run_code(config, file, code).await,
        Commands::Config { validate, write } => show_config(&config, &path, validate, write),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "course_runner=info,tower_http=info".into());

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load(path: Option<&Path>) -> course_runner::Result<Config> {
    match path {
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            Ok(config)
        }
        None => Config::from_env(),
    }
}

async fn serve(mut config: Config, bind: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let validation = validate_config(&config);
    for issue in &validation.warnings {
        tracing::warn!("{}", issue);
    }
    if !validation.valid {
        for issue in &validation.errors {
            tracing::error!("{}", issue);
        }
        anyhow::bail!("invalid configuration");
    }

    info!(
        interpreter = %config.runner.interpreter.display(),
        timeout = ?config.runner.timeout,
        max_concurrent = config.runner.max_concurrent,
        "Starting course runner"
    );

    course_runner::gateway::serve(config).await?;
    Ok(())
}

async fn run_code(config: Config, file: Option<PathBuf>, code: Option<String>) -> anyhow::Result<()> {
    let code = match (code, file) {
        (Some(code), _) => code,
        (None, Some(path)) if path.as_os_str() == "-" => read_stdin()?,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?,
        (None, None) => read_stdin()?,
    };

    let launcher = Launcher::new(config.runner);
    let session = launcher.launch(ExecutionRequest::new(code))?;

    let mut exit = 0;
    let mut chunks = Box::pin(relay(session));
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Chunk::Stdout(line) => {
                stdout.write_all(line.as_bytes())?;
                stdout.flush()?;
            }
            Chunk::Stderr(line) => {
                write!(stderr, "{}", style(line).red())?;
            }
            Chunk::Notice(notice) => {
                write!(stderr, "{}", style(notice).dim())?;
            }
            Chunk::Exit { exit_code, signal } => {
                exit = exit_code.unwrap_or_else(|| 128 + signal.unwrap_or(0));
            }
        }
    }

    if exit != 0 {
        std::process::exit(exit);
    }
    Ok(())
}

fn read_stdin() -> anyhow::Result<String> {
    let mut code = String::new();
    std::io::stdin().read_to_string(&mut code)?;
    Ok(code)
}

fn show_config(config: &Config, path: &Path, validate: bool, write: bool) -> anyhow::Result<()> {
    println!("{}", style(format!("# {}", path.display())).dim());
    println!("{}", serde_json::to_string_pretty(config)?);

    if write {
        save_config(config, path)?;
        println!("{} {}", style("Wrote").green(), path.display());
    }

    if !validate {
        return Ok(());
    }

    let result = validate_config(config);
    println!();
    for issue in &result.errors {
        println!("{} {}", style("error:").red().bold(), issue);
    }
    for issue in &result.warnings {
        println!("{} {}", style("warning:").yellow().bold(), issue);
    }
    if result.valid {
        println!("{}", style("Configuration is valid").green());
        Ok(())
    } else {
        anyhow::bail!("{} configuration error(s)", result.errors.len())
    }
}
