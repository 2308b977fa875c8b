//! Track subcommand: run a tracking session until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use locshare_core::tracking::{
    BackgroundTasks, Collaborators, CoordinatorOptions, ReplayProvider, StaticPermissions,
    TimerBackgroundTasks, Unsupported,
};
use locshare_core::{
    Config, CoreError, HttpDurableChannel, SessionStore, TrackingCoordinator, TrackingError,
    TrackingMode,
};

use super::{realtime_client, runtime, CliResult};

#[derive(Subcommand)]
pub enum TrackAction {
    /// Start sharing location; runs until Ctrl-C
    Start {
        /// Workspace to share with
        #[arg(short, long)]
        workspace: String,
        /// Sampling interval in milliseconds (defaults to tracking.default_interval_ms)
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Use the background task facility instead of a foreground timer
        #[arg(long)]
        background: bool,
        /// JSON file of waypoints to replay as the device position
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Show the persisted session descriptor
    Status,
    /// Remove a stale session descriptor
    Clear,
}

pub fn run(action: TrackAction) -> CliResult {
    match action {
        TrackAction::Start {
            workspace,
            interval_ms,
            background,
            replay,
        } => runtime()?.block_on(start(workspace, interval_ms, background, replay)),
        TrackAction::Status => {
            let store = SessionStore::open_default()?;
            match store.load()? {
                Some(descriptor) => println!("{}", serde_json::to_string_pretty(&descriptor)?),
                None => println!("not tracking"),
            }
            Ok(())
        }
        TrackAction::Clear => {
            SessionStore::open_default()?.clear()?;
            println!("session cleared");
            Ok(())
        }
    }
}

async fn start(
    workspace: String,
    interval_ms: Option<u64>,
    background: bool,
    replay: Option<PathBuf>,
) -> CliResult {
    let config = Config::load()?;
    let Some(replay) = replay else {
        return Err(CoreError::Custom(
            "no location provider on this platform; pass --replay FILE".into(),
        ));
    };
    let provider = Arc::new(ReplayProvider::from_file(&replay)?);

    let background_tasks: Arc<dyn BackgroundTasks> = if background {
        Arc::new(TimerBackgroundTasks::new(provider.clone()))
    } else {
        Arc::new(Unsupported)
    };
    let realtime = Arc::new(realtime_client(&config));
    let coordinator = TrackingCoordinator::new(
        Collaborators {
            permissions: Arc::new(StaticPermissions {
                foreground: config.tracking.foreground_permission,
                background: config.tracking.background_permission,
            }),
            background: background_tasks,
            provider,
            durable: Arc::new(HttpDurableChannel::from_config(&config.backend)?),
            realtime: realtime.clone(),
            store: Arc::new(SessionStore::open_default()?),
        },
        CoordinatorOptions::from(&config.tracking),
    );

    let started = if background {
        coordinator.start_background(&workspace).await
    } else {
        let interval = interval_ms.unwrap_or(config.tracking.default_interval_ms);
        coordinator.start_foreground(&workspace, interval).await
    };
    // Both start paths only refuse when foreground access is denied.
    if !started {
        return Err(TrackingError::PermissionDenied {
            mode: TrackingMode::Foreground,
        }
        .into());
    }

    if let Some(session) = coordinator.current_session() {
        println!(
            "Tracking workspace {} in {} mode every {}ms (Ctrl-C to stop)",
            session.workspace_id(),
            session.mode(),
            session.sample_interval_ms()
        );
    }

    tokio::signal::ctrl_c().await?;
    coordinator.stop().await;
    realtime.teardown();
    println!("Tracking stopped");
    Ok(())
}
