use clap::{Parser, Subcommand};
use pixel_relay::{
    config, output, pipeline::TransformJob, protocol::DEFAULT_MAX_FRAME_BYTES, server::Server,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pixel-relay")]
#[command(about = "Remote image transform service: rotate and mean-filter over TCP")]
#[command(long_about = "\
Remote image transform service: rotate and mean-filter over TCP

A server decodes images, transforms them, and re-encodes them in the format
they arrived in. A client sends a local file through one or two transforms
and writes the result.

Operations:

  RotateImage   counter-clockwise quarter turns: 0, 90, 180, 270 degrees
  MeanFilter    3×3 box average per channel, edges clamp the window

Typical use:

  pixel-relay serve --port 50051
  pixel-relay transform --input in.png --output out.png --rotate NINETY_DEG --mean

Run 'pixel-relay gen-config' to generate a documented server config file.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the transform server until Ctrl-C / SIGTERM
    Serve(ServeArgs),
    /// Send a local image through the server and write the result
    Transform(TransformArgs),
    /// Print a stock server config file with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Address to listen on (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, 0 for an ephemeral port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Server config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(clap::Args)]
struct TransformArgs {
    /// Server IP address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port (1-65535)
    #[arg(long, default_value = "50051")]
    port: String,

    /// Source image
    #[arg(long)]
    input: PathBuf,

    /// Where to write the transformed image
    #[arg(long)]
    output: PathBuf,

    /// NONE, NINETY_DEG, ONE_EIGHTY_DEG or TWO_SEVENTY_DEG
    #[arg(long, default_value = "NONE")]
    rotate: String,

    /// Apply the mean filter after rotating
    #[arg(long)]
    mean: bool,

    /// Largest response accepted from the server, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve(args) => serve(args),
        Command::Transform(args) => transform(args),
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays clean for command output.
/// `RUST_LOG` overrides the default `info` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config(args.config.as_deref())?.with_overrides(args.host, args.port);
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::bind(&config).await?;
        output::print_serve_banner(server.local_addr()?, &config);
        server.run().await
    })?;

    // Calls aborted after the grace period may still hold blocking threads.
    runtime.shutdown_timeout(config.shutdown_grace());
    Ok(())
}

fn transform(args: TransformArgs) -> Result<(), Box<dyn std::error::Error>> {
    let job = TransformJob::from_args(
        &args.host,
        &args.port,
        &args.rotate,
        args.mean,
        &args.input,
        &args.output,
    )?
    .with_max_frame_bytes(args.max_frame_bytes);
    let report = job.run()?;
    output::print_transform_report(&report);
    Ok(())
}
