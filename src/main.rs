use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use tipline::config::Config;
use tipline::health;
use tipline::ingest::{AlbumAggregator, FloodGate, Intake, spawn_finalize_pump};
use tipline::mute::MuteLedger;
use tipline::review::{DecisionHandler, Dispatcher, review_channel};
use tipline::store::{LibSqlStore, Store};
use tipline::sweeper::Sweeper;
use tipline::transport::{CommandKind, Inbound, TelegramTransport, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let file_appender = tracing_appender::rolling::daily("logs", "tipline.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stdout.and(file_writer))
        .init();

    let config = Arc::new(Config::from_env()?);
    info!(
        admin_chat = config.admin_chat,
        public_chat = config.public_chat,
        db_path = %config.db_path.display(),
        "tipline v{} starting",
        env!("CARGO_PKG_VERSION"),
    );

    let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_local(&config.db_path).await?);

    let telegram = Arc::new(TelegramTransport::new(config.bot_token.clone()));
    let transport: Arc<dyn Transport> = telegram.clone();

    // ── Pipeline wiring ─────────────────────────────────────────────
    let (queue, queue_rx) = review_channel();
    let (finalized_tx, finalized_rx) = mpsc::unbounded_channel();

    let flood = Arc::new(FloodGate::new(
        config.flood_cooldown,
        config.flood_strike_limit,
    ));
    let albums = AlbumAggregator::new(config.album_debounce, finalized_tx);
    let mutes = MuteLedger::new(store.clone());

    let intake = Intake::new(
        store.clone(),
        transport.clone(),
        flood.clone(),
        albums.clone(),
        mutes.clone(),
        queue.clone(),
        config.flood_mute_duration,
    );
    let decisions = DecisionHandler::new(
        store.clone(),
        transport.clone(),
        mutes.clone(),
        queue.clone(),
        config.clone(),
    );
    let dispatcher = Dispatcher::new(store.clone(), transport.clone(), config.admin_chat);

    // ── Background tasks ────────────────────────────────────────────
    tokio::spawn(dispatcher.run(queue_rx));
    let _pump = spawn_finalize_pump(finalized_rx, store.clone(), queue, transport.clone());
    let _sweeper = Sweeper::new(
        store.clone(),
        transport.clone(),
        mutes,
        albums,
        flood,
        config.admin_chat,
        config.report_max_age,
    )
    .spawn();
    let _health = health::spawn_server(config.port, store.clone());
    if let Some(url) = config.keep_alive_url.clone() {
        let _keep_alive = health::spawn_keep_alive(url);
    }

    // ── Event loop ──────────────────────────────────────────────────
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let _poller = telegram.spawn_poller(inbound_tx);
    info!("tipline running");

    while let Some(event) = inbound_rx.recv().await {
        match event {
            Inbound::Action(action) => {
                if action.chat_id != config.admin_chat {
                    warn!(
                        chat_id = action.chat_id,
                        "Control click outside the admin chat"
                    );
                    continue;
                }
                if let Err(e) = decisions.handle_action(action).await {
                    error!(error = %e, "Failed to handle operator action");
                }
            }
            Inbound::Command(cmd) => {
                match cmd.kind {
                    CommandKind::Start if cmd.chat_id > 0 => intake.welcome(cmd.chat_id).await,
                    CommandKind::Cancel if cmd.chat_id == config.admin_chat => {
                        if let Err(e) = decisions.handle_cancel(cmd.chat_id).await {
                            error!(error = %e, "Failed to cancel edit");
                        }
                    }
                    // Commands elsewhere (public group, etc.) are ignored.
                    _ => {}
                }
            }
            Inbound::Content(unit) => {
                if unit.origin_chat == config.admin_chat {
                    // Operator text only matters while an edit is open.
                    if let Some(text) = unit.text.clone() {
                        if let Err(e) = decisions.handle_operator_text(unit.origin_chat, &text).await
                        {
                            error!(error = %e, "Failed to handle operator text");
                        }
                    }
                } else if unit.is_private() {
                    if let Err(e) = intake.handle_unit(unit).await {
                        error!(error = %e, "Failed to handle submission");
                    }
                }
                // Public-group chatter is none of our business.
            }
        }
    }

    info!("Inbound stream ended; shutting down");
    Ok(())
}
