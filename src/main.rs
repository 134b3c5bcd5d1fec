use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tracing::{error, info};

use camp_attendance_bot::clubs::ClubDirectory;
use camp_attendance_bot::handlers::{self, BotState};
use camp_attendance_bot::ledger::LedgerUpdater;
use camp_attendance_bot::masterlist::Masterlist;
use camp_attendance_bot::scores::ScoreBoard;
use camp_attendance_bot::session::Sessions;
use camp_attendance_bot::sheet::SqliteSheet;
use camp_attendance_bot::workers::WorkerPool;
use camp_attendance_bot::{config, db, lock};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let sheet = |name: &str| Arc::new(SqliteSheet::new(pool.clone(), name));
    let masterlist = Masterlist::new(sheet(&cfg.sheets.masterlist));
    let ledger = LedgerUpdater::new(
        sheet(&cfg.sheets.registration),
        sheet(&cfg.sheets.check_inout),
        masterlist.clone(),
        lock::from_settings(&cfg.lock, &pool),
        cfg.sheets.layout,
    );

    let state = Arc::new(BotState {
        ledger,
        masterlist,
        scores: ScoreBoard::new(sheet(&cfg.sheets.scores), cfg.sheets.points_column),
        clubs: ClubDirectory::from_config(&cfg)?,
        sessions: Sessions::new(cfg.session_idle()),
        workers: WorkerPool::new(cfg.app.max_workers),
    });

    // Drop idle sessions periodically
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let dropped = sweeper.sessions.sweep().await;
            if dropped > 0 {
                info!(dropped, "expired idle sessions");
            }
        }
    });

    let bot = Bot::new(cfg.telegram.bot_token.clone());

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(
            |bot: Bot, msg: Message, state: Arc<BotState>| async move {
                if let Err(err) = handlers::handle_message(&bot, &state, &msg).await {
                    error!(?err, "failed to handle message");
                }
                respond(())
            },
        ))
        .branch(Update::filter_callback_query().endpoint(
            |bot: Bot, q: CallbackQuery, state: Arc<BotState>| async move {
                if let Err(err) = handlers::handle_callback(&bot, &state, &q).await {
                    error!(?err, "failed to handle callback query");
                }
                respond(())
            },
        ));

    info!("starting telegram bot");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
