use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use media_cycle::config::Configuration;
use media_cycle::loader::FsMediaLoader;
use media_cycle::playlist::Playlist;
use media_cycle::scheduler::SystemClock;
use media_cycle::sink::HeadlessSink;
use media_cycle::tasks::engine::{EngineOptions, EngineRunState, MediaCycleEngine};
use media_cycle::tasks::{control, files};

#[derive(Debug, Parser)]
#[command(name = "media-cycle", version, about = "timed image and video slideshow")]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Override interval-seconds from the config
    #[arg(long = "interval-seconds", value_name = "SECONDS")]
    interval_seconds: Option<u32>,
    /// Override shuffle-seed from the config
    #[arg(long = "shuffle-seed", value_name = "SEED")]
    shuffle_seed: Option<u64>,
    /// Increase log verbosity (repeatable); ignored when RUST_LOG is set
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        interval_seconds,
        shuffle_seed,
        verbose,
    } = Args::parse();

    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?;
    if let Some(secs) = interval_seconds {
        cfg.interval_seconds = secs;
    }
    if shuffle_seed.is_some() {
        cfg.shuffle_seed = shuffle_seed;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::info!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let items = files::discover(&cfg.media_library_path);
    let playlist = match &cfg.state_file {
        Some(path) => Playlist::with_state_file(items, cfg.ordering, cfg.interval_seconds, path)
            .with_context(|| format!("failed to restore state from {}", path.display()))?,
        None => Playlist::new(items, cfg.ordering, cfg.interval_seconds),
    };
    if let Some(seed) = cfg.shuffle_seed {
        playlist.reshuffle(seed);
    }
    let playlist = Arc::new(playlist);

    let cancel = CancellationToken::new();

    let (engine, handle) = MediaCycleEngine::new(
        playlist.clone(),
        Arc::new(FsMediaLoader),
        Box::new(HeadlessSink::new(
            cfg.headless_video_duration,
            cfg.mute_videos,
        )),
        Arc::new(SystemClock),
        EngineOptions::from(&cfg),
    );

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            match signal(SignalKind::user_defined1()) {
                Ok(mut sigusr1) => loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = sigusr1.recv() => {
                            if received.is_none() {
                                break;
                            }
                            tracing::info!("SIGUSR1 received; toggling pause");
                            let toggled = match handle.status().await {
                                Ok(s) if s.run_state == EngineRunState::Running => handle.pause().await,
                                Ok(_) => handle.resume().await,
                                Err(err) => Err(err),
                            };
                            if let Err(err) = toggled {
                                tracing::warn!("failed to toggle pause: {err}");
                                break;
                            }
                        }
                    }
                },
                Err(err) => tracing::warn!("failed to register SIGUSR1 handler: {err}"),
            }
        });
    }

    let mut tasks = JoinSet::new();

    tasks.spawn({
        let cancel = cancel.clone();
        async move { engine.run(cancel).await.context("engine task failed") }
    });

    if cfg.watch_library {
        tasks.spawn({
            let cfg = cfg.clone();
            let playlist = playlist.clone();
            let cancel = cancel.clone();
            async move {
                files::run(cfg, playlist, cancel)
                    .await
                    .context("files task failed")
            }
        });
    }

    tasks.spawn({
        let handle = handle.clone();
        let cancel = cancel.clone();
        async move {
            control::run(control::spawn_stdin_reader(), handle, cancel)
                .await
                .context("control task failed")
        }
    });

    handle.start().await.context("failed to start engine")?;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!("{err:?}");
                cancel.cancel();
            }
            Err(err) => {
                tracing::error!("task panicked: {err}");
                cancel.cancel();
            }
        }
    }
    Ok(())
}
