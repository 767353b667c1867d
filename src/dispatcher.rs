//! Batch Task Dispatcher
//!
//! Fan-out/fan-in executor behind every batch analysis endpoint: one task per
//! requested layer, bounded concurrency, full barrier, results restored to
//! request order.
//!
//! ## Guarantees
//! - At most `min(items, max_concurrency)` operations in flight at once
//! - One outcome per item; a failing item never aborts its siblings
//! - The barrier waits for every item, fast items never starve slow ones
//! - Output preserves the caller's item order, failed items are dropped
//! - A panicking operation is contained at its own item boundary

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::error::Result;
use crate::metrics;

/// One unit of batch work: the item's position in the caller's list, the
/// layer it targets, and an immutable snapshot of its parameters. Workers
/// receive the snapshot by value, never a live reference to shared state.
#[derive(Debug, Clone)]
pub struct WorkItem<P> {
    pub index: usize,
    pub layer_id: String,
    pub params: P,
}

/// Tag each layer id with its request position and a per-item parameter
/// snapshot, resolved once at the batch boundary.
pub fn tag_items<P>(
    layer_ids: &[String],
    mut params_for: impl FnMut(&str) -> P,
) -> Vec<WorkItem<P>> {
    layer_ids
        .iter()
        .enumerate()
        .map(|(index, layer_id)| WorkItem {
            index,
            layer_id: layer_id.clone(),
            params: params_for(layer_id),
        })
        .collect()
}

/// Decrements the in-flight gauge even when the operation panics.
struct InFlightGuard;

impl InFlightGuard {
    fn enter() -> Self {
        metrics::TASKS_IN_FLIGHT.inc();
        InFlightGuard
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        metrics::TASKS_IN_FLIGHT.dec();
    }
}

/// Run `op` once per item over a bounded worker pool and return the
/// successful results in the items' original order.
///
/// Failed items are logged, counted, and omitted from the output; deciding
/// what a fully-failed batch means is the caller's concern. The call returns
/// only once every item has resolved.
pub async fn run_batch<P, T, F, Fut>(
    op_name: &str,
    items: Vec<WorkItem<P>>,
    max_concurrency: usize,
    op: F,
) -> Vec<T>
where
    P: Send + 'static,
    T: Send + Sync + 'static,
    F: Fn(WorkItem<P>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    metrics::BATCH_REQUESTS.with_label_values(&[op_name]).inc();
    metrics::BATCH_ITEMS
        .with_label_values(&[op_name])
        .inc_by(total as u64);
    let timer = metrics::Timer::new();

    // min(N, max_concurrency); non-positive bounds degrade to serial
    let bound = max_concurrency.max(1).min(total);
    let semaphore = Arc::new(Semaphore::new(bound));

    // Each worker writes exactly one slot keyed by its own index, so the map
    // is write-conflict-free by construction.
    let outcomes: Arc<DashMap<usize, T>> = Arc::new(DashMap::new());
    let op = Arc::new(op);

    let mut handles = Vec::with_capacity(total);
    let mut item_ids = Vec::with_capacity(total);
    for item in items {
        item_ids.push(item.layer_id.clone());
        let semaphore = Arc::clone(&semaphore);
        let outcomes = Arc::clone(&outcomes);
        let op = Arc::clone(&op);
        let op_name = op_name.to_string();

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore never closes while tasks run
            };
            let _in_flight = InFlightGuard::enter();

            let index = item.index;
            let layer_id = item.layer_id.clone();
            match op(item).await {
                Ok(value) => {
                    outcomes.insert(index, value);
                }
                Err(err) => {
                    warn!(
                        "Batch item failed: op={} layer={} index={}: {}",
                        op_name, layer_id, index, err
                    );
                    metrics::ITEM_FAILURES.with_label_values(&[op_name.as_str()]).inc();
                }
            }
        }));
    }

    // Synchronous barrier: every item resolves before anything is returned.
    for (index, joined) in futures::future::join_all(handles).await.into_iter().enumerate() {
        if let Err(join_err) = joined {
            // A panic inside the operation lands here and stays per-item.
            error!(
                "Batch worker aborted: op={} layer={} index={}: {}",
                op_name, item_ids[index], index, join_err
            );
            metrics::ITEM_FAILURES.with_label_values(&[op_name]).inc();
        }
    }

    timer.observe_duration_seconds(&metrics::DISPATCH_LATENCY.with_label_values(&[op_name]));

    // Rebuild in input order, skipping indices with no successful outcome
    (0..total)
        .filter_map(|index| outcomes.remove(&index).map(|(_, value)| value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let results: Vec<String> =
            run_batch("test", Vec::<WorkItem<()>>::new(), 4, |_item| async {
                Ok("unreachable".to_string())
            })
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn zero_concurrency_degrades_to_serial() {
        let items = tag_items(&["a".to_string(), "b".to_string()], |_| ());
        let results = run_batch("test", items, 0, |item| async move {
            Ok(item.layer_id)
        })
        .await;
        assert_eq!(results, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn panic_is_contained_to_its_item() {
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let items = tag_items(&ids, |_| ());
        let results = run_batch("test", items, 2, |item| async move {
            if item.layer_id == "b" {
                panic!("worker blew up");
            }
            Ok(item.layer_id)
        })
        .await;
        assert_eq!(results, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn failures_are_dropped_not_raised() {
        let ids: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let items = tag_items(&ids, |_| ());
        let results = run_batch("test", items, 4, |item| async move {
            if item.layer_id == "a" {
                Err(AnalysisError::Upstream("boom".to_string()))
            } else {
                Ok(item.layer_id)
            }
        })
        .await;
        assert_eq!(results, vec!["b"]);
    }
}
