use clap::Subcommand;
use locshare_core::realtime::locations::{fetch_workspace_locations, watch_workspace_locations};
use locshare_core::realtime::MemberLocation;
use locshare_core::{Config, RealtimeClient};

use super::{realtime_client, runtime, CliResult};

#[derive(Subcommand)]
pub enum LocationsAction {
    /// Fetch every member's last known position
    List {
        #[arg(short, long)]
        workspace: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stream live updates until Ctrl-C
    Watch {
        #[arg(short, long)]
        workspace: String,
    },
}

pub fn run(action: LocationsAction) -> CliResult {
    let config = Config::load()?;
    let client = realtime_client(&config);
    match action {
        LocationsAction::List { workspace, json } => {
            runtime()?.block_on(list(&client, &config, &workspace, json))
        }
        LocationsAction::Watch { workspace } => runtime()?.block_on(watch(&client, &workspace)),
    }
}

async fn list(client: &RealtimeClient, config: &Config, workspace: &str, json: bool) -> CliResult {
    let result =
        fetch_workspace_locations(client, workspace, config.tracking.request_timeout()).await;
    client.teardown();
    let members = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&members)?);
    } else if members.is_empty() {
        println!("No locations shared in {workspace}");
    } else {
        for member in &members {
            print_member(member);
        }
    }
    Ok(())
}

async fn watch(client: &RealtimeClient, workspace: &str) -> CliResult {
    // Registered before connecting; goes live once the connection is up.
    let subscription = watch_workspace_locations(client, workspace, |members| {
        for member in &members {
            print_member(member);
        }
    });
    client.connect().await?;
    println!("Watching {} (Ctrl-C to stop)", subscription.topic());

    tokio::signal::ctrl_c().await?;
    subscription.unsubscribe();
    client.teardown();
    Ok(())
}

fn print_member(member: &MemberLocation) {
    println!(
        "{}  {:>10.5} {:>11.5}  {}",
        member.user_id,
        member.latitude,
        member.longitude,
        member.captured_at.format("%Y-%m-%d %H:%M:%S")
    );
}
