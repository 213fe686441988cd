mod cli;
mod logging;
mod paths;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use sshdeck_client::workspace::DurableWorkspaceState;
use sshdeck_client::{
    BackendApi, BackendProcess, ClientConfig, Correlator, Dispatcher, SshdeckClient, TabKind,
    WorkspaceEngine, WorkspaceStore,
};

use crate::cli::{Cli, Command, StateCommand};
use crate::paths::DataPaths;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = DataPaths::resolve(cli.data_dir.as_deref())?;
    paths
        .ensure_dirs()
        .with_context(|| format!("create data dir {}", paths.root().display()))?;
    let logging = logging::init_logging(&cli.log_settings(paths.log_dir()))?;

    let config = cli.client_config();
    let dispatcher = Arc::new(Dispatcher::new());
    let (process, transport) = BackendProcess::spawn(&cli.backend, &cli.backend_args, dispatcher.clone())
        .with_context(|| format!("start backend {}", cli.backend.display()))?;
    let api = BackendApi::new(Correlator::new(dispatcher, transport), config.clone());

    info!(
        component = "main",
        event = "client.started",
        run_id = %logging.run_id,
        log_path = %logging.log_path.display(),
        data_dir = %paths.root().display(),
        pid = ?process.pid().await,
        "sshdeck client started"
    );

    let command = cli.command.clone().unwrap_or(Command::Run {
        name: "default".into(),
    });
    let result = match command {
        Command::Run { name } => run(api, &paths, &config, &name).await,
        Command::State {
            action: StateCommand::Show,
        } => show_state(&api).await,
        Command::State {
            action: StateCommand::Clear,
        } => clear_state(&api).await,
    };

    process.shutdown().await?;
    info!(component = "main", event = "client.stopped", "sshdeck client stopped");
    result
}

async fn run(api: BackendApi, paths: &DataPaths, config: &ClientConfig, name: &str) -> anyhow::Result<()> {
    let workspace_id = paths.load_or_create_workspace_id()?;
    let store = Arc::new(WorkspaceStore::new());
    let client = SshdeckClient::new(api.clone(), store.clone(), workspace_id);
    if let Err(e) = client.register(name).await {
        warn!(
            component = "main",
            event = "workspace.register_failed",
            error = %e,
            "Workspace registration failed; continuing without it"
        );
    }

    let engine = Arc::new(WorkspaceEngine::new(
        Arc::new(api.clone()),
        store,
        config.save_debounce,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let saver = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_save_loop(shutdown_rx).await })
    };

    let outcome = engine.hydrate().await;
    info!(
        component = "main",
        event = "workspace.hydrated",
        outcome = ?outcome,
        "Workspace ready"
    );

    let mut closed = api.correlator().dispatcher().watch_closed();
    let backend_gone = async move {
        let _ = closed.wait_for(|reason| reason.is_some()).await;
    };
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            info!(component = "main", event = "client.shutdown_requested", "Shutdown requested");
        }
        _ = backend_gone => {
            warn!(
                component = "main",
                event = "backend.exited",
                reason = ?api.correlator().dispatcher().closed_reason(),
                "Backend exited"
            );
        }
    }

    shutdown_tx.send_replace(true);
    saver.await.context("save loop task failed")?;
    drop(client);
    Ok(())
}

async fn clear_state(api: &BackendApi) -> anyhow::Result<()> {
    api.clear_workspace_state().await?;
    println!("Saved workspace cleared");
    Ok(())
}

async fn show_state(api: &BackendApi) -> anyhow::Result<()> {
    let Some(value) = api.load_workspace_state().await? else {
        println!("No saved workspace");
        return Ok(());
    };
    let Some(state) = DurableWorkspaceState::parse(value.clone()) else {
        println!("Saved workspace is unreadable:");
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    };

    let client_state = &state.client_state;
    println!("version:  {}", state.version);
    println!("saved_at: {}", state.saved_at);
    println!("tabs:     {}", client_state.tabs.len());
    for tab in &client_state.tabs {
        let active = if client_state.active_tab_id.as_deref() == Some(tab.id.as_str()) {
            "*"
        } else {
            " "
        };
        let pinned = if tab.pinned { " [pinned]" } else { "" };
        let kind = match &tab.kind {
            TabKind::Terminal { session_id } => format!("terminal {session_id}"),
            TabKind::FileBrowser { session_id } => format!("files {session_id}"),
            TabKind::Log => "log".to_string(),
            TabKind::WorkspaceGroup(group) => format!("group of {}", group.panes.len()),
        };
        println!(" {active} {}{pinned}  ({kind})", tab.title);
    }
    println!("sessions: {}", client_state.session_refs.len());
    for (id, session_ref) in &client_state.session_refs {
        match (&session_ref.connection_id, session_ref.is_local) {
            (_, true) => println!("   {id}  local"),
            (Some(conn), false) => println!("   {id}  via {conn}"),
            (None, false) => println!("   {id}  (no connection)"),
        }
    }
    Ok(())
}
