//! styleshift CLI - neural style transfer from the command line or over HTTP.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use styleshift::server::{self, ServerConfig, DEFAULT_MAX_UPLOAD_BYTES};
use styleshift::{Config, DefaultBackend, DefaultDevice, StyleTransfer};

/// Repaint an image in the style of another using a frozen VGG-19.
#[derive(Parser, Debug)]
#[command(name = "styleshift")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stylize one content image with one style image.
    Transfer {
        /// Content image path.
        #[arg(value_name = "CONTENT")]
        content: PathBuf,

        /// Style image path.
        #[arg(value_name = "STYLE")]
        style: PathBuf,

        /// Output image path (format from extension).
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Start the HTTP server.
    Serve {
        /// Host to bind to.
        #[arg(long, default_value = "0.0.0.0", env = "STYLESHIFT_HOST")]
        host: String,

        /// Port to listen on.
        #[arg(long, short, default_value = "8000", env = "STYLESHIFT_PORT")]
        port: u16,

        /// Allowed CORS origin; repeat for several, `*` for any.
        #[arg(
            long = "allow-origin",
            default_value = "http://localhost:3000",
            env = "STYLESHIFT_ALLOW_ORIGIN",
            value_delimiter = ','
        )]
        allow_origin: Vec<String>,

        /// Maximum size of an upload request in bytes.
        #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "STYLESHIFT_MAX_UPLOAD_BYTES")]
        max_upload_bytes: usize,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct EngineArgs {
    /// Number of optimizer iterations.
    #[arg(long, value_name = "INT", env = "STYLESHIFT_ITERATIONS")]
    iterations: Option<u32>,

    /// RMSProp learning rate.
    #[arg(long, value_name = "FLOAT", env = "STYLESHIFT_LEARNING_RATE")]
    learning_rate: Option<f64>,

    /// Output JPEG quality (1-100).
    #[arg(short, long, value_name = "INT", env = "STYLESHIFT_QUALITY")]
    quality: Option<u8>,

    /// VGG-19 checkpoint to use instead of the cached download.
    #[arg(long, value_name = "PATH", env = "STYLESHIFT_WEIGHTS")]
    weights: Option<PathBuf>,
}

impl EngineArgs {
    fn config(&self, show_progress: bool) -> Config {
        let defaults = Config::default();
        Config {
            iterations: self.iterations.unwrap_or(defaults.iterations),
            learning_rate: self.learning_rate.unwrap_or(defaults.learning_rate),
            output_quality: self.quality.unwrap_or(defaults.output_quality),
            weights_path: self.weights.clone(),
            show_progress,
            ..defaults
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("styleshift={log_level},tower_http={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(cli.command) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Transfer {
            content,
            style,
            output,
            engine,
        } => {
            for input in [&content, &style] {
                if !input.exists() {
                    anyhow::bail!("Input file does not exist: {}", input.display());
                }
            }

            let transfer = StyleTransfer::<DefaultBackend>::new(engine.config(true), DefaultDevice::default())
                .context("Failed to initialize style transfer")?;

            transfer
                .process(&content, &style, &output)
                .context("Failed to stylize image")?;

            println!(
                "Successfully stylized {} with {} -> {}",
                content.display(),
                style.display(),
                output.display()
            );
        }
        Command::Serve {
            host,
            port,
            allow_origin,
            max_upload_bytes,
            engine,
        } => {
            // Weights are fetched with a blocking client, so load before entering the runtime
            let transfer = StyleTransfer::<DefaultBackend>::new(engine.config(false), DefaultDevice::default())
                .context("Failed to initialize style transfer")?;

            let config = ServerConfig {
                host,
                port,
                allowed_origins: allow_origin,
                max_upload_bytes,
            };

            tracing::info!("Starting server on {}:{}", config.host, config.port);
            tokio::runtime::Runtime::new()
                .context("Failed to start async runtime")?
                .block_on(server::serve(config, transfer))
                .context("Server failed")?;
        }
    }

    Ok(())
}
