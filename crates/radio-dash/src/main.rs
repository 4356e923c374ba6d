mod console;
mod credential;
mod poller;

use std::sync::Arc;
use std::time::Duration;

use radio_proto::config::Config;
use radio_proto::prefs::{PreferenceStore, Preferences};
use radio_proto::protocol::StationId;
use radio_sync::{
    CommentaryStreamAccumulator, LiveHandle, LiveSession, NoopInvalidator, QueryInvalidator,
    SessionOptions, StationCache,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use console::Input;
use poller::Poller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    let data_dir = radio_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("dash.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP client internals quiet by default.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "info,radio_sync=debug,radio_dash=debug,hyper=warn,reqwest=warn".to_string()
    });
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("radio-dash log: {}", log_path.display());
    info!("radio-dash starting…");

    // ── Config + preferences ─────────────────────────────────────────────────
    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let prefs_store = Arc::new(PreferenceStore::new(data_dir.join("preferences.json")));
    let prefs = prefs_store.load();
    let default_station = StationId::from(config.stations.default_station.as_str());
    let initial_station = prefs
        .last_active_station
        .clone()
        .unwrap_or(default_station);

    // ── Shared state ─────────────────────────────────────────────────────────
    let cache = Arc::new(StationCache::new(initial_station));
    let commentary = Arc::new(CommentaryStreamAccumulator::new());
    let cancel = CancellationToken::new();

    // ── Pull layer ───────────────────────────────────────────────────────────
    let poller = Arc::new(Poller::new(&config, cache.clone())?);
    let invalidator: Arc<dyn QueryInvalidator> = if config.polling.enabled {
        tokio::spawn(poller.clone().run(
            Duration::from_secs(config.polling.interval_secs.max(1)),
            cancel.clone(),
        ));
        poller.clone() as Arc<dyn QueryInvalidator>
    } else {
        info!("Polling disabled; push updates only");
        Arc::new(NoopInvalidator)
    };

    // ── Push channel ─────────────────────────────────────────────────────────
    let options = SessionOptions::from_config(&config)?;
    let key_file = credential::key_file();
    let api_key = if config.auth.enabled {
        credential::read_api_key(&config.auth.api_key_env, &key_file)
    } else {
        None
    };
    let waiting_for_key = config.auth.enabled && api_key.is_none();

    let handle = LiveSession::start(options, cache.clone(), commentary, invalidator, api_key);

    if waiting_for_key {
        warn!("No session key yet; live updates start once one is available");
        tokio::spawn(credential::watch_for_key(
            config.auth.api_key_env.clone(),
            key_file,
            handle.control(),
            cancel.clone(),
        ));
    }

    tokio::spawn(persist_active_station(
        cache.clone(),
        prefs_store.clone(),
        prefs,
        cancel.clone(),
    ));
    tokio::spawn(console::present(
        console::Feeds::from_handle(&handle),
        cancel.clone(),
    ));

    // ── Command loop ─────────────────────────────────────────────────────────
    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("stdin: {}", e);
                break;
            }
        };

        if !handle_input(console::parse_line(&line), &handle, &poller).await {
            break;
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────
    cancel.cancel();
    handle.shutdown().await;
    info!("radio-dash stopped");
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_input(input: Input, handle: &LiveHandle, poller: &Poller) -> bool {
    let active = handle.active_station();
    match input {
        Input::Station(station) => {
            handle.set_active_station(station.clone());
            poller.invalidate_active();
            println!("switched to {}", station);
        }
        Input::Stations => {
            let known = handle.known_stations();
            if known.is_empty() {
                println!("  (roster not loaded yet)");
            }
            let infos = poller.stations();
            for id in known {
                let marker = if id == active { "*" } else { " " };
                let name = infos
                    .iter()
                    .find(|s| s.id == id)
                    .map(|s| s.name.as_str())
                    .unwrap_or("");
                println!(" {} {:<12} {}", marker, id.as_str(), name);
            }
        }
        Input::NextUp => println!("{}", console::format_next_up(&poller.next_up(&active))),
        Input::History => println!("{}", console::format_history(&poller.history(&active))),
        Input::Status => {
            let link = if handle.is_connected() {
                "live"
            } else if handle.connection_lost() {
                "lost (type `connect`)"
            } else {
                "offline"
            };
            println!("push channel: {}", link);
            println!(
                "{}",
                console::format_now_playing(&active, handle.current().as_deref())
            );
        }
        Input::Connect => handle.control().connect().await,
        Input::Disconnect => handle.control().disconnect("user request").await,
        Input::Help => println!("{}", console::HELP),
        Input::Quit => return false,
        Input::Empty => {}
        Input::Unknown(text) => println!("unknown command {:?}, try `help`", text),
    }
    true
}

/// Save the active station whenever it changes, including roster fallbacks.
async fn persist_active_station(
    cache: Arc<StationCache>,
    store: Arc<PreferenceStore>,
    mut prefs: Preferences,
    cancel: CancellationToken,
) {
    let mut active = cache.watch_active();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = active.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let station = active.borrow_and_update().clone();
        if prefs.last_active_station.as_ref() == Some(&station) {
            continue;
        }
        prefs.last_active_station = Some(station);
        if let Err(e) = store.save(&prefs).await {
            warn!("Failed to save preferences to {:?}: {}", store.path(), e);
        }
    }
}
