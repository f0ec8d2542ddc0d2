pub mod config;
pub mod error;
pub mod feed;
pub mod session;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rose_core::NexusArgs;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::feed::FeedTail;
use crate::session::{load_library, Session};

#[derive(Parser)]
#[command(name = "rose-cli")]
#[command(about = "Rose/Nexus - live page element pattern classifier")]
struct Cli {
    #[command(flatten)]
    engine: NexusArgs,

    /// Config file (default ~/.rose/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct Outputs {
    /// Pattern library JSON (built-in priors when absent)
    #[arg(long)]
    library: Option<String>,
    /// Per-tick results file (JSONL), stdout when absent
    #[arg(long)]
    results: Option<String>,
    /// Visualizer frames file (JSONL, appended every tick)
    #[arg(long)]
    frames: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every tick of a recorded JSONL feed
    Run {
        /// Feed file, one JSON array of observations per line
        #[arg(long)]
        feed: PathBuf,
        #[command(flatten)]
        outputs: Outputs,
    },
    /// Follow a growing feed file until Ctrl-C
    Watch {
        #[arg(long)]
        feed: PathBuf,
        /// Polling interval in milliseconds (overrides the config file)
        #[arg(long)]
        interval_ms: Option<u64>,
        #[command(flatten)]
        outputs: Outputs,
    },
    /// Write the pattern library as JSON
    ExportLibrary {
        /// Output JSON file path
        output: String,
        /// Library to export instead of the built-in priors
        #[arg(long)]
        library: Option<String>,
    },
    /// Print the effective configuration
    ShowConfig,
}

fn open_session(config: &Config, engine: &NexusArgs, outputs: &Outputs) -> anyhow::Result<Session> {
    let library_path = outputs.library.as_deref().or(config.library.path.as_deref());
    let library = load_library(library_path).context("loading pattern library")?;

    let results_path = outputs.results.as_deref().or(config.output.results.as_deref());
    let results = Session::results_writer(results_path).context("opening results output")?;

    let frames = match outputs.frames.as_deref().or(config.output.frames.as_deref()) {
        Some(path) => Some(Session::file_writer(Path::new(path)).context("opening frames output")?),
        None => None,
    };

    Ok(Session::new(
        library,
        engine.overlay(&config.monitor),
        results,
        frames,
        config.library.reestimate_every,
    ))
}

fn run_feed(config: &Config, engine: &NexusArgs, feed: &Path, outputs: &Outputs) -> anyhow::Result<()> {
    let file = File::open(feed).with_context(|| format!("opening feed {}", feed.display()))?;
    let ticks = feed::read_ticks(BufReader::new(file)).context("reading feed")?;
    info!(feed = %feed.display(), ticks = ticks.len(), "Replaying feed");

    let mut session = open_session(config, engine, outputs)?;
    let never = AtomicBool::new(false);
    for (line, observations) in &ticks {
        session
            .tick(observations, &never)
            .with_context(|| format!("tick from feed line {}", line))?;
    }
    session.finish()?;
    Ok(())
}

async fn watch_feed(
    config: &Config,
    engine: &NexusArgs,
    feed: PathBuf,
    interval_ms: u64,
    outputs: &Outputs,
) -> anyhow::Result<()> {
    let mut session = open_session(config, engine, outputs)?;
    let mut tail = FeedTail::new(&feed);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.store(true, Ordering::Release);
            }
        });
    }

    info!(feed = %feed.display(), interval_ms = interval_ms, "Watching feed");
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

    'watch: loop {
        interval.tick().await;
        if cancel.load(Ordering::Acquire) {
            break;
        }

        for (line, text) in tail.poll()? {
            let observations = match feed::parse_line(line, &text) {
                Ok(Some(observations)) => observations,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed feed line");
                    continue;
                }
            };

            // Ticks are CPU-bound; keep them off the async workers
            let flag = cancel.clone();
            let (returned, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = session.tick(&observations, &flag);
                (session, outcome)
            })
            .await
            .context("tick worker panicked")?;
            session = returned;

            if outcome?.is_none() {
                info!(feed_line = line, "Tick abandoned on shutdown");
                break 'watch;
            }
        }
    }

    session.finish()?;
    Ok(())
}

fn export_library(output: &str, library: Option<&str>) -> anyhow::Result<()> {
    let library = load_library(library).context("loading pattern library")?;
    std::fs::write(output, library.to_json()).with_context(|| format!("writing {}", output))?;
    info!(output_path = output, "Pattern library exported");
    Ok(())
}

fn show_config(config: &Config, engine: &NexusArgs) -> anyhow::Result<()> {
    let mut effective = config.clone();
    effective.monitor = engine.overlay(&config.monitor);
    println!("{}", toml::to_string_pretty(&effective)?);
    Ok(())
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("loading configuration")?;

    info!(engine = ?cli.engine, "Starting Rose/Nexus");

    match cli.command {
        Commands::Run { feed, outputs } => run_feed(&config, &cli.engine, &feed, &outputs),
        Commands::Watch {
            feed,
            interval_ms,
            outputs,
        } => {
            let interval = interval_ms.unwrap_or(config.watch.poll_interval_ms);
            let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
            rt.block_on(watch_feed(&config, &cli.engine, feed, interval, &outputs))
        }
        Commands::ExportLibrary { output, library } => export_library(&output, library.as_deref()),
        Commands::ShowConfig => show_config(&config, &cli.engine),
    }
}

fn main() {
    // Structured logging; core `log` records are forwarded too
    tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    if let Err(e) = execute(cli) {
        let message = format!("{:#}", e);
        error!(error = %message, "Fatal Error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "rose-cli",
            "--record-frames",
            "--eigen-max-iterations",
            "64",
            "run",
            "--feed",
            "ticks.jsonl",
            "--frames",
            "frames.jsonl",
        ])
        .unwrap();
        assert!(cli.engine.record_frames);
        assert_eq!(cli.engine.eigen_max_iterations, Some(64));
        assert_eq!(cli.engine.reestimate_rate, None);
        match cli.command {
            Commands::Run { feed, outputs } => {
                assert_eq!(feed, PathBuf::from("ticks.jsonl"));
                assert_eq!(outputs.frames.as_deref(), Some("frames.jsonl"));
                assert_eq!(outputs.results, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_flag_equal_to_default_beats_file() {
        let mut config = Config::default();
        config.monitor.eigen_max_iterations = 64;
        config.monitor.eigen_tolerance = 1e-6;

        let cli = Cli::try_parse_from(["rose-cli", "--eigen-max-iterations", "512", "show-config"]).unwrap();
        let effective = cli.engine.overlay(&config.monitor);
        assert_eq!(effective.eigen_max_iterations, 512);
        assert_eq!(effective.eigen_tolerance, 1e-6);

        let cli = Cli::try_parse_from(["rose-cli", "show-config"]).unwrap();
        assert_eq!(cli.engine.overlay(&config.monitor), config.monitor);
    }

    #[test]
    fn test_run_feed_end_to_end() {
        let dir = std::env::temp_dir().join(format!("rose-run-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let feed = dir.join("ticks.jsonl");
        let results = dir.join("results.jsonl");
        std::fs::write(
            &feed,
            concat!(
                "[{\"id\":\"a\",\"attributes\":{\"tag\":\"li\",\"visible\":true,\"text_len\":5},",
                "\"neighbours\":[{\"tag\":\"li\"}]}]\n",
                "# second tick removes it\n",
                "[{\"id\":\"a\",\"present\":false}]\n",
            ),
        )
        .unwrap();

        let outputs = Outputs {
            results: results.to_str().map(String::from),
            ..Outputs::default()
        };
        run_feed(&Config::default(), &NexusArgs::default(), &feed, &outputs).unwrap();

        let written = std::fs::read_to_string(&results).unwrap();
        let reports: Vec<rose_core::TickReport> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].results.len(), 1);
        assert_eq!(reports[1].removed, vec!["a".to_string()]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
