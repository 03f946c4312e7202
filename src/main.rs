use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pinpoint::batch::{self, BatchRunner};
use pinpoint::config::{self, AppConfig};
use pinpoint::content;
use pinpoint::errors::{PinpointError, PinpointResult};
use pinpoint::grounding::backend::build_backend;
use pinpoint::grounding::engine::{EngineSettings, GroundingEngine};
use pinpoint::perception::screenshot::{PrimaryMonitorCapturer, ScreenCapturer};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}

async fn run() -> PinpointResult<()> {
    tracing::info!("Pinpoint vision-grounded desktop automation starting");

    let config = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            AppConfig::default()
        }
    };

    let posts = content::fetch_posts(&config.content.api_url, config.content.count).await;
    tracing::info!(count = posts.len(), "starting automation over posts");

    let capturer: Arc<dyn ScreenCapturer> = Arc::new(PrimaryMonitorCapturer);
    let backend = build_backend(&config)?;
    let engine = GroundingEngine::new(
        capturer.clone(),
        backend,
        EngineSettings::from_config(&config),
    );

    // Ctrl-C finishes the current item, then stops cleanly.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("ctrl-c received, stopping after the current item");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let runner = BatchRunner::new(engine, capturer, config.automation.clone(), stop);
    let reports = runner.run(&posts).await;
    let summary = batch::log_summary(&reports);

    if !reports.is_empty() && summary.saved == 0 {
        return Err(PinpointError::Executor(
            "no batch item completed successfully".into(),
        ));
    }
    Ok(())
}
