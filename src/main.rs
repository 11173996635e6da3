use clap::Parser;
use place_reviews::config::Config;
use place_reviews::error::AppError;
use place_reviews::io::{load_places, load_proxies, ReviewSink};
use place_reviews::runner::run_batch;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Batch scraper for Google Maps place reviews.
#[derive(Parser, Debug)]
#[command(name = "place-reviews", version, about)]
struct Cli {
    /// Input CSV of target places.
    #[arg(long = "in", value_name = "CSV")]
    input: PathBuf,

    /// Output CSV; appended to when it already exists.
    #[arg(long = "out", value_name = "CSV", default_value = "reviews.csv")]
    output: PathBuf,

    /// Worker pool size; capped by the proxy pool when proxies are in use.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Newline-delimited proxy list; missing file means direct egress.
    #[arg(long, value_name = "FILE", default_value = "proxies.txt")]
    proxies: PathBuf,

    /// Keep a worker running without its proxy if the proxy fails its probe.
    #[arg(long)]
    fallback_no_proxy: bool,

    /// Run Chrome without a visible window.
    #[arg(long)]
    headless: bool,

    /// UI locale, e.g. "en" or "es".
    #[arg(long)]
    language: Option<String>,

    /// Per-place record cap; 0 means unbounded.
    #[arg(long, value_name = "N")]
    max_reviews: Option<u64>,
}

fn build_config(cli: &Cli) -> Result<Config, AppError> {
    let mut config = Config::default();
    if cli.headless {
        config.browser.headless = true;
    }
    if let Some(lang) = &cli.language {
        config.browser.language = lang.clone();
    }
    if let Some(cap) = cli.max_reviews {
        config.scroll.max_reviews_per_place = cap;
    }
    if cli.fallback_no_proxy {
        config.batch.fallback_no_proxy = true;
    }
    config
        .validate()
        .map_err(|errors| AppError::Configuration(errors.join("; ")))?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = build_config(&cli)?;

    let places = load_places(&cli.input)?;
    if places.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "no usable places in {}",
            cli.input.display()
        )));
    }
    let proxies = load_proxies(&cli.proxies)?;

    let sink = Arc::new(Mutex::new(ReviewSink::open(&cli.output)?));

    // On interrupt, flush whatever has already been appended and bail.
    let sink_for_signal = sink.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, flushing output");
            let _ = sink_for_signal.lock().await.flush();
            std::process::exit(130);
        }
    });

    let summary = run_batch(places, proxies, config, sink.clone(), cli.threads).await?;
    sink.lock().await.flush()?;

    if summary.places_failed > 0 {
        error!(
            failed = summary.places_failed,
            "batch finished with failures"
        );
    }
    Ok(())
}
