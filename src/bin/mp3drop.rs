use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio_stream::StreamExt;

use mp3drop::{
    CloudConvertApi, ConvertOptions, Converter, EncoderOptions, FfmpegCommandTranscoder,
    FfmpegLogLevel, HttpStorageRelay, LameBackend, LocalFolderRelay, RemoteJobTranscoder,
    StaticCredentials, StorageRelay, ToolkitCandidate, ToolkitContext, UploadOptions, VideoInput,
};

const CLI_AFTER_HELP: &str = concat!(
    "Examples:\n",
    "  mp3drop convert talk.mp4 --name \"Keynote\"\n",
    "  MP3DROP_RELAY_URL=https://relay.example.com/upload mp3drop convert clip.webm\n",
    "  mp3drop convert clip.mp4 --out-dir ~/Music/drops --progress\n",
    "  mp3drop doctor\n",
    "  mp3drop completions zsh > _mp3drop",
);

#[derive(Debug, Parser)]
#[command(
    name = "mp3drop",
    version,
    about = "Extract the audio of a video as MP3 and drop it into a storage folder",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, debug).
    #[arg(long, global = true)]
    log_level: Option<FfmpegLogLevel>,
}

#[derive(Debug, Args, Clone)]
struct RelayArgs {
    /// Relay endpoint. Files go to --out-dir when unset.
    #[arg(long, env = "MP3DROP_RELAY_URL")]
    relay_url: Option<String>,

    /// Bearer token for the relay.
    #[arg(long, env = "MP3DROP_RELAY_TOKEN", hide_env_values = true)]
    relay_token: Option<String>,

    /// Destination folder id passed to the relay.
    #[arg(long, env = "MP3DROP_FOLDER_ID")]
    folder_id: Option<String>,

    /// Local folder used when no relay is configured.
    #[arg(long, default_value = "mp3drop-uploads")]
    out_dir: PathBuf,
}

#[derive(Debug, Args, Clone)]
struct ToolkitArgs {
    /// Path of the ffmpeg executable used as the last resort.
    #[arg(long, env = "MP3DROP_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// CloudConvert API key; enables the remote conversion fallback.
    #[arg(long, env = "CLOUDCONVERT_API_KEY", hide_env_values = true)]
    cloudconvert_key: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a video and upload the MP3.
    #[command(
        about = "Convert a video to MP3 and upload it",
        after_help = "Examples:\n  mp3drop convert talk.mp4 --name Keynote --json"
    )]
    Convert {
        /// Input video file.
        input: PathBuf,

        /// Name of the uploaded file. Defaults to the input's file stem.
        #[arg(long)]
        name: Option<String>,

        /// MP3 bitrate in kbit/s.
        #[arg(long, default_value_t = 128)]
        bitrate: u32,

        /// Upload attempts before giving up.
        #[arg(long, default_value_t = 3)]
        attempts: u32,

        /// Cap for each extraction strategy, in seconds.
        #[arg(long)]
        strategy_timeout: Option<u64>,

        /// Show a progress bar.
        #[arg(long)]
        progress: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        relay: RelayArgs,

        #[command(flatten)]
        toolkit: ToolkitArgs,
    },

    /// Check which strategies, transcoders and relay settings are usable.
    #[command(about = "Check the environment")]
    Doctor {
        #[command(flatten)]
        relay: RelayArgs,

        #[command(flatten)]
        toolkit: ToolkitArgs,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn default_name(input: &std::path::Path) -> String {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn apply_global_options(global: &GlobalOptions) {
    let filter = if global.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env().filter_level(filter).init();

    if let Some(level) = global.log_level {
        mp3drop::set_ffmpeg_log_level(level);
    }
}

fn build_relay(args: &RelayArgs) -> Arc<dyn StorageRelay> {
    match &args.relay_url {
        Some(url) => {
            let mut relay = HttpStorageRelay::new(url.clone());
            if let Some(token) = &args.relay_token {
                relay = relay.with_credentials(Arc::new(StaticCredentials::new(token.clone())));
            }
            if let Some(folder) = &args.folder_id {
                relay = relay.with_folder_id(folder.clone());
            }
            Arc::new(relay)
        }
        None => Arc::new(LocalFolderRelay::new(args.out_dir.clone())),
    }
}

fn toolkit_candidates(args: &ToolkitArgs) -> Vec<ToolkitCandidate> {
    let mut candidates = vec![ToolkitCandidate::ffmpeg_command(FfmpegCommandTranscoder::new(
        args.ffmpeg.clone(),
    ))];
    if let Some(key) = &args.cloudconvert_key {
        let api = CloudConvertApi::new(key.clone());
        candidates.push(RemoteJobTranscoder::new(Arc::new(api)).into_candidate());
    }
    candidates
}

fn progress_bar() -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let bar = ProgressBar::new(100);
    let style =
        ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos:>3}% {msg}")?;
    bar.set_style(style.progress_chars("##-"));
    Ok(bar)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global);

    match cli.command {
        Commands::Convert {
            input,
            name,
            bitrate,
            attempts,
            strategy_timeout,
            progress,
            json,
            relay,
            toolkit,
        } => {
            let name = name.unwrap_or_else(|| default_name(&input));
            let video = VideoInput::from_path(&input)?;

            let mut options = ConvertOptions::new()
                .with_encoder(EncoderOptions::new().with_bitrate_kbps(bitrate))
                .with_upload(UploadOptions::new().with_max_attempts(attempts));
            if let Some(seconds) = strategy_timeout {
                options = options.with_strategy_timeout(Duration::from_secs(seconds));
            }

            if relay.relay_url.is_none() && !json {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("no relay configured, saving into {}", relay.out_dir.display()).yellow()
                );
            }

            let converter = Converter::builder(build_relay(&relay))
                .with_toolkit(Arc::new(ToolkitContext::new(toolkit_candidates(&toolkit))))
                .with_options(options)
                .build();

            let (mut events, task) = converter.start(video, name);
            let bar = if progress { Some(progress_bar()?) } else { None };
            while let Some(event) = events.next().await {
                match &bar {
                    Some(bar) => {
                        bar.set_position(u64::from(event.percent));
                        bar.set_message(event.message);
                    }
                    None if cli.global.verbose => {
                        eprintln!("[{:>3}%] {}", event.percent, event.message);
                    }
                    None => {}
                }
            }

            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    if let Some(bar) = bar {
                        bar.abandon_with_message("failed");
                    }
                    return Err(error.into());
                }
            };
            if let Some(bar) = bar {
                bar.finish_with_message("done");
            }

            if json {
                let payload = json!({
                    "id": outcome.receipt.id,
                    "name": outcome.receipt.name,
                    "link": outcome.receipt.link,
                    "bytes": outcome.artifact.len(),
                    "strategy": outcome.strategy,
                    "attempted": outcome.attempted,
                    "upload_attempts": outcome.receipt.attempts.len(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{} {}",
                    "success:".green().bold(),
                    format!("Uploaded {} via {}", outcome.receipt.name, outcome.strategy).green()
                );
                println!("{} {}", "link".green().bold(), outcome.receipt.link);
            }
        }
        Commands::Doctor { relay, toolkit } => {
            let candidates = toolkit_candidates(&toolkit);
            let mut toolkit_ready = false;
            println!("{}", "Transcoders".bold());
            for candidate in &candidates {
                match candidate.load().await {
                    Ok(_) => {
                        toolkit_ready = true;
                        println!("  {} {}", "ok".green().bold(), candidate.name());
                    }
                    Err(error) => {
                        let missing = "missing".yellow().bold();
                        println!("  {missing} {} ({error})", candidate.name());
                    }
                }
            }

            let converter = Converter::builder(build_relay(&relay))
                .with_toolkit(Arc::new(ToolkitContext::new(candidates)))
                .build();
            println!("{}", "Strategies".bold());
            let mut any_strategy = false;
            for (name, result) in converter.probe_strategies().await {
                match result {
                    Ok(()) => {
                        any_strategy = true;
                        println!("  {} {name}", "ok".green().bold());
                    }
                    Err(error) => println!("  {} {name} ({error})", "missing".yellow().bold()),
                }
            }

            println!("{}", "Encoder".bold());
            let encoder_ready = LameBackend::is_available();
            if encoder_ready {
                println!("  {} {}", "ok".green().bold(), LameBackend::CODEC_NAME);
            } else {
                println!("  {} {}", "missing".yellow().bold(), LameBackend::CODEC_NAME);
            }

            println!("{}", "Relay".bold());
            match &relay.relay_url {
                Some(url) => {
                    println!("  {} {url}", "ok".green().bold());
                    if relay.relay_token.is_none() {
                        println!("  {} MP3DROP_RELAY_TOKEN is not set", "missing".yellow().bold());
                    }
                    if relay.folder_id.is_none() {
                        println!("  {} MP3DROP_FOLDER_ID is not set", "missing".yellow().bold());
                    }
                }
                None => println!(
                    "  {} MP3DROP_RELAY_URL is not set, using {}",
                    "local".yellow().bold(),
                    relay.out_dir.display()
                ),
            }

            if !any_strategy || !(encoder_ready || toolkit_ready) {
                return Err("no working extraction path".into());
            }
            println!("{} {}", "success:".green().bold(), "ready to convert".green());
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "mp3drop", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
