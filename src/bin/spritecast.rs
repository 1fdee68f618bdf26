use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use spritecast::{
    AudioTrack, CompositorInput, HttpStageClient, JobRequest, JobStatus, Pipeline, PipelineConfig,
    RenderThreading, SpriteMapping, render_frame_sequence,
};

#[derive(Parser, Debug)]
#[command(name = "spritecast", version)]
struct Cli {
    /// Pipeline configuration TOML. Missing file means built-in defaults.
    #[arg(long, default_value = "spritecast.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a job and wait for it to complete or fail.
    Run(RunArgs),
    /// Compose a frame sequence directly from a lipsync result (no services).
    Render(RenderArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Audio track, as `file_id` or `Speaker=file_id`. Repeat for multitrack.
    #[arg(long = "track", required = true)]
    tracks: Vec<String>,

    /// Sprite mapping JSON: speaker -> viseme -> image file id.
    #[arg(long)]
    sprites: PathBuf,

    /// Poll interval while waiting, in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Lipsync result JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Sprite mapping JSON: speaker -> viseme -> image file id.
    #[arg(long)]
    sprites: PathBuf,

    /// Directory sprite file ids resolve against. Defaults to the input's
    /// directory.
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Output directory for the PNG sequence.
    #[arg(long)]
    out: PathBuf,

    /// Enable frame-level parallelism.
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Override rayon worker threads (parallel mode only).
    #[arg(long)]
    threads: Option<usize>,

    /// Render chunk size (parallel mode only).
    #[arg(long, default_value_t = 64)]
    chunk_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load_or_default(&cli.config)
        .with_context(|| format!("load config '{}'", cli.config.display()))?;
    match cli.cmd {
        Command::Run(args) => cmd_run(config, args).await,
        Command::Render(args) => cmd_render(config, args),
    }
}

async fn cmd_run(config: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    let tracks = args
        .tracks
        .iter()
        .map(|spec| parse_track(spec))
        .collect::<Vec<_>>();
    let sprites = load_sprites(&args.sprites)?;

    let client = Arc::new(HttpStageClient::new(config.endpoints()));
    let pipeline = Pipeline::new(config, client);
    let ticket = pipeline
        .submit(JobRequest {
            config_ref: "cli".to_string(),
            tracks,
            sprites,
        })
        .await?;
    eprintln!("submitted job {} ({} mode)", ticket.id, ticket.mode);

    let mut last = ticket.status;
    loop {
        let job = pipeline
            .store()
            .get(ticket.id)
            .await
            .context("job disappeared from the store")?;
        if job.status != last {
            eprintln!("status: {}", job.status);
            last = job.status;
        }
        if job.status.is_terminal() {
            return match job.status {
                JobStatus::Completed => {
                    if let Some(output) = job.output_video {
                        println!("{output}");
                    }
                    Ok(())
                }
                _ => {
                    let cause = job.error.unwrap_or_else(|| "unknown failure".to_string());
                    anyhow::bail!("job failed: {cause}")
                }
            };
        }
        tokio::time::sleep(Duration::from_millis(args.poll_ms)).await;
    }
}

fn cmd_render(config: PipelineConfig, args: RenderArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.in_path)
        .with_context(|| format!("read lipsync result '{}'", args.in_path.display()))?;
    let lipsync: spritecast::stage::schema::LipsyncResult =
        serde_json::from_str(&text).context("parse lipsync result")?;
    let sprites = load_sprites(&args.sprites)?;

    let assets_root = args.assets.unwrap_or_else(|| {
        args.in_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .to_path_buf()
    });

    let input = CompositorInput {
        timelines: spritecast::compose::timeline::timelines_from_lipsync(&lipsync),
        sprite_mapping: sprites,
        assets_root,
        fps: config.fps()?,
        resolution: config.resolution()?,
        background_rgb: config.render.background_rgb,
    };
    let threading = RenderThreading {
        parallel: args.parallel,
        chunk_size: args.chunk_size,
        threads: args.threads,
    };

    let rendered = render_frame_sequence(&input, &args.out, &threading)?;
    eprintln!(
        "wrote {} frames to {}",
        rendered.frame_count,
        rendered.frames_dir.display()
    );
    Ok(())
}

fn parse_track(spec: &str) -> AudioTrack {
    match spec.split_once('=') {
        Some((speaker, file_id)) => AudioTrack::named(speaker, file_id),
        None => AudioTrack::mixed(spec),
    }
}

fn load_sprites(path: &PathBuf) -> anyhow::Result<SpriteMapping> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read sprite mapping '{}'", path.display()))?;
    serde_json::from_str(&text).context("parse sprite mapping")
}
