use crate::config::Config;
use crate::error::Result;
use crate::io::{ProxyEndpoint, ReviewSink};
use crate::models::Place;
use crate::scrape::scrape_place_reviews;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Aggregate outcome of one batch run.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchSummary {
    pub places_done: usize,
    pub places_failed: usize,
    pub reviews_written: usize,
}

fn jitter_ms(low: u64, high: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(low..high))
}

/// One worker drives its slice of the batch sequentially, pinned to a single
/// proxy for its whole lifetime.
async fn run_worker(
    worker_id: usize,
    places: Vec<Place>,
    proxy: Option<ProxyEndpoint>,
    config: Arc<Config>,
    sink: Arc<Mutex<ReviewSink>>,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    let mut proxy = proxy;
    if let Some(endpoint) = proxy.as_ref() {
        if !endpoint.probe(Duration::from_secs(8)).await {
            if config.batch.fallback_no_proxy {
                warn!(worker_id, proxy = endpoint.as_str(), "proxy probe failed, falling back to direct egress");
                proxy = None;
            } else {
                warn!(worker_id, proxy = endpoint.as_str(), "proxy probe failed, skipping {} places", places.len());
                summary.places_failed = places.len();
                return summary;
            }
        }
    }

    // Desynchronize worker start so browsers do not launch in lockstep.
    tokio::time::sleep(jitter_ms(50, 600)).await;

    for place in &places {
        let mut last_err = None;
        let mut succeeded = false;

        for attempt in 1..=config.batch.retries_per_place {
            match scrape_place_reviews(place, proxy.as_ref(), &config).await {
                Ok(scrape) => {
                    let rows = {
                        let mut sink = sink.lock().await;
                        sink.write_batch(place, &scrape)
                    };
                    match rows {
                        Ok(rows) => {
                            info!(
                                worker_id,
                                place = %place.name,
                                rows,
                                ui_total = ?scrape.ui_total,
                                stop = ?scrape.stop_reason,
                                "place complete"
                            );
                            summary.places_done += 1;
                            summary.reviews_written += rows;
                            succeeded = true;
                        }
                        Err(e) => {
                            error!(worker_id, place = %place.name, "failed to persist rows: {e}");
                            last_err = Some(e);
                        }
                    }
                    break;
                }
                Err(e) if e.is_retryable() && attempt < config.batch.retries_per_place => {
                    warn!(worker_id, place = %place.name, attempt, "attempt failed, retrying: {e}");
                    let backoff = Duration::from_millis((700 * attempt as u64).min(2_500));
                    tokio::time::sleep(backoff).await;
                    last_err = Some(e);
                }
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }

        if !succeeded {
            summary.places_failed += 1;
            if let Some(e) = last_err {
                error!(worker_id, place = %place.name, "place failed: {e}");
            }
        }

        tokio::time::sleep(jitter_ms(150, 350)).await;
    }

    summary
}

/// Splits worker slots across places and proxies. With proxies available the
/// pool never exceeds the proxy count, so each worker keeps exclusive use of
/// its endpoint.
pub fn effective_workers(requested: usize, places: usize, proxies: usize) -> usize {
    let mut workers = requested.max(1).min(places.max(1));
    if proxies > 0 && workers > proxies {
        workers = proxies;
    }
    workers
}

/// Runs the whole batch across a fixed worker pool and returns the combined
/// summary once every worker has drained its slice.
pub async fn run_batch(
    places: Vec<Place>,
    proxies: Vec<ProxyEndpoint>,
    config: Config,
    sink: Arc<Mutex<ReviewSink>>,
    requested_workers: usize,
) -> Result<BatchSummary> {
    let workers = effective_workers(requested_workers, places.len(), proxies.len());
    if !proxies.is_empty() && requested_workers > proxies.len() {
        warn!(
            requested = requested_workers,
            available = proxies.len(),
            "worker count capped by proxy pool size"
        );
    }
    info!(places = places.len(), workers, proxies = proxies.len(), "starting batch");

    let config = Arc::new(config);
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let slice: Vec<Place> = places
            .iter()
            .skip(worker_id)
            .step_by(workers)
            .cloned()
            .collect();
        let proxy = proxies.get(worker_id).cloned();
        let config = config.clone();
        let sink = sink.clone();
        handles.push(tokio::spawn(async move {
            run_worker(worker_id, slice, proxy, config, sink).await
        }));
    }

    let mut total = BatchSummary::default();
    for handle in handles {
        match handle.await {
            Ok(summary) => {
                total.places_done += summary.places_done;
                total.places_failed += summary.places_failed;
                total.reviews_written += summary.reviews_written;
            }
            Err(e) => {
                error!("worker task panicked: {e}");
            }
        }
    }

    info!(
        done = total.places_done,
        failed = total.places_failed,
        reviews = total.reviews_written,
        "batch finished"
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_workers_capped_by_proxies() {
        assert_eq!(effective_workers(8, 100, 3), 3);
        assert_eq!(effective_workers(2, 100, 3), 2);
    }

    #[test]
    fn test_effective_workers_without_proxies() {
        assert_eq!(effective_workers(8, 100, 0), 8);
        assert_eq!(effective_workers(0, 100, 0), 1);
        assert_eq!(effective_workers(8, 2, 0), 2);
    }
}
