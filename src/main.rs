use std::env;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};
use xorlist_sync::{ChannelListener, ManagerParts, SyncError, WhitelistEvent, WhitelistManager};

const USAGE: &str = "Usage: xorlist <fetch|show> --config <path> [--user-id <id>]";

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    if cmd != "fetch" && cmd != "show" {
        usage_exit();
    }

    let mut config_path = String::from("./config/example-config.yaml");
    let mut user_id: Option<String> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next().unwrap_or_else(|| usage_exit()),
            "--user-id" => user_id = Some(args.next().unwrap_or_else(|| usage_exit())),
            _ => usage_exit(),
        }
    }

    let cfg = match xorlist_config::load_and_validate(&config_path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&cfg.logging.level);

    let parts = match ManagerParts::from_config_static(&cfg) {
        Ok(v) => v,
        Err(e) => {
            error!("failed to assemble whitelist manager: {e}");
            std::process::exit(1);
        }
    };
    let manager = WhitelistManager::instance(|| WhitelistManager::new(parts, Handle::current()));

    if cmd == "show" {
        print_whitelist(&manager.whitelist());
        return;
    }

    let (listener, mut rx) = ChannelListener::new();
    manager.set_listener(Some(listener));

    let identity_budget = Duration::from_millis(cfg.identity.timeout_ms);
    if let Some(id) = user_id {
        // An explicit id wins over the one being resolved.
        manager.cancel_pending();
        manager.fetch_whitelist(&id);
    } else if !cfg.identity.fetch_on_resolve {
        if let Err(e) = await_identity(manager, &mut rx, identity_budget).await {
            error!("cannot fetch whitelist: {e}");
            std::process::exit(1);
        }
        manager.refresh();
    }

    let budget = identity_budget + Duration::from_millis(cfg.endpoint.timeout_ms);
    match tokio::time::timeout(budget, rx.recv()).await {
        Ok(Some(WhitelistEvent::Updated(ids))) => {
            info!(count = ids.len(), "whitelist updated");
            print_whitelist(&ids);
        }
        Ok(Some(WhitelistEvent::UpdateFailed(e))) => {
            error!("whitelist update failed: {e}");
            std::process::exit(1);
        }
        Ok(None) | Err(_) => {
            error!("no whitelist notification within {}ms", budget.as_millis());
            std::process::exit(1);
        }
    }
}

/// Waits until the manager knows the current user. A resolution failure
/// that arrives before the listener was registered is lost, so this is
/// bounded by `budget` on top of the resolver's own timeout.
async fn await_identity(
    manager: &WhitelistManager,
    rx: &mut UnboundedReceiver<WhitelistEvent>,
    budget: Duration,
) -> Result<(), SyncError> {
    let mut identity = manager.subscribe_identity();
    let wait = async {
        loop {
            tokio::select! {
                resolved = identity.wait_for(Option::is_some) => {
                    return resolved.map(|_| ()).map_err(|_| {
                        SyncError::Resolution("whitelist manager shut down".to_string())
                    });
                }
                event = rx.recv() => match event {
                    Some(WhitelistEvent::UpdateFailed(e)) => return Err(e),
                    Some(WhitelistEvent::Updated(_)) => {}
                    None => {
                        return Err(SyncError::Resolution("listener channel closed".to_string()))
                    }
                },
            }
        }
    };
    match tokio::time::timeout(budget + Duration::from_millis(250), wait).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout {
            stage: "identity resolution",
            after_ms: budget.as_millis() as u64,
        }),
    }
}

fn usage_exit() -> ! {
    eprintln!("{USAGE}");
    std::process::exit(2);
}

fn print_whitelist(ids: &[i64]) {
    match serde_json::to_string(ids) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("failed to encode whitelist: {e}");
            std::process::exit(1);
        }
    }
}

fn init_logging(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
