use anyhow::Context as _;
use gitlab_telegram_bot::config::Config;
use gitlab_telegram_bot::gitlab::GitlabClient;
use gitlab_telegram_bot::handlers::{Context, ReviewerPicker};
use gitlab_telegram_bot::telegram::TelegramClient;
use gitlab_telegram_bot::{db, jobs, logger};
use std::sync::Arc;
use tracing as log;

async fn run_bot() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let pool = db::Pool::open(&config.database_url);
    // Connect once up front so a bad DATABASE_URL fails at startup and the
    // schema is migrated before any job runs.
    drop(
        pool.connection()
            .await
            .context("connecting to the database")?,
    );

    let reviewer_picker = match config.reviewer_seed {
        Some(seed) => {
            log::warn!("reviewer selection is seeded with {seed}");
            ReviewerPicker::seeded(seed)
        }
        None => ReviewerPicker::from_entropy(),
    };
    let scheduled = jobs::jobs(&config);
    let ctx = Arc::new(Context {
        db: pool,
        telegram: Arc::new(TelegramClient::new(
            config.telegram_bot_token,
            config.telegram_api_url,
        )),
        gitlab: Arc::new(GitlabClient::new(
            &config.gitlab_private_token,
            config.gitlab_api_url,
        )?),
        reviewer_picker,
    });

    let handles: Vec<_> = scheduled
        .into_iter()
        .map(|job| {
            log::info!("scheduling {}", job.name());
            jobs::spawn(ctx.clone(), job)
        })
        .collect();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    log::info!("shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    if let Err(e) = logger::init() {
        eprintln!("Failed to initialize logging: {e:?}");
    }

    if let Err(e) = run_bot().await {
        eprintln!("Failed to run bot: {e:?}");
        std::process::exit(1);
    }
}
