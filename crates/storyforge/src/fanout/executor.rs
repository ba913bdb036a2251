use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::unbounded;
use tracing::{debug, info_span, warn};

use crate::error::{panic_message, GenerationError, JobError};
use crate::fanout::observer::FanOutObserver;
use crate::usage::Usage;

/// Items carry the key their results are reported under (e.g. a shot number).
pub trait Keyed {
    fn item_key(&self) -> i64;
}

/// What one item operation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    /// Artifacts on success. An item may yield several.
    pub result: Result<Vec<String>, GenerationError>,
    pub usage: Usage,
}

impl ItemOutcome {
    pub fn ok(artifacts: Vec<String>, usage: Usage) -> Self {
        Self {
            result: Ok(artifacts),
            usage,
        }
    }

    pub fn failed(error: GenerationError, usage: Usage) -> Self {
        Self {
            result: Err(error),
            usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    /// Position in the input sequence.
    pub index: usize,
    pub item_key: i64,
    pub result: Result<Vec<String>, GenerationError>,
    pub usage: Usage,
}

/// Results of a batch, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<ItemReport>,
    /// Artifacts of successful items grouped by item key.
    pub by_key: BTreeMap<i64, Vec<String>>,
    pub usage: Usage,
    pub failed: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.len() - self.failed
    }

    fn from_reports(results: Vec<ItemReport>) -> Self {
        let mut report = BatchReport::default();
        for item in &results {
            report.usage += item.usage;
            match &item.result {
                Ok(artifacts) => report
                    .by_key
                    .entry(item.item_key)
                    .or_default()
                    .extend(artifacts.iter().cloned()),
                Err(_) => report.failed += 1,
            }
        }
        report.results = results;
        report
    }
}

/// Runs item operations on a bounded set of scoped worker threads.
#[derive(Debug, Clone, Copy)]
pub struct FanOutExecutor {
    workers: usize,
}

impl FanOutExecutor {
    pub fn new(workers: usize) -> Result<Self, JobError> {
        if workers == 0 {
            return Err(JobError::InvalidConfig(
                "fan-out worker count must be at least 1".to_string(),
            ));
        }
        Ok(Self { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `op` for every item with at most `workers` in flight.
    ///
    /// Every item is reported to `observer` as started before any work is
    /// dispatched, and as finished exactly once. A failing or panicking
    /// item never affects its siblings.
    pub fn run<I, F>(&self, items: &[I], op: F, observer: &dyn FanOutObserver) -> BatchReport
    where
        I: Keyed + Sync,
        F: Fn(&I) -> ItemOutcome + Sync,
    {
        let total = items.len();
        if total == 0 {
            return BatchReport::default();
        }
        let worker_count = self.workers.min(total);
        let span = info_span!("fanout", items = total, workers = worker_count);
        let _enter = span.enter();

        for item in items {
            observer.on_started(item.item_key());
        }

        let (index_tx, index_rx) = unbounded::<usize>();
        for index in 0..total {
            // The receiver is alive until the end of this function.
            let _ = index_tx.send(index);
        }
        drop(index_tx);

        let (result_tx, result_rx) = unbounded::<(usize, ItemOutcome)>();
        let mut slots: Vec<Option<ItemReport>> = vec![None; total];

        thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let index_rx = index_rx.clone();
                let result_tx = result_tx.clone();
                let op = &op;
                let parent = span.clone();
                scope.spawn(move || {
                    let _worker = info_span!(parent: &parent, "fanout_worker", worker_id).entered();
                    for index in index_rx.iter() {
                        let item = &items[index];
                        let outcome = catch_unwind(AssertUnwindSafe(|| op(item)))
                            .unwrap_or_else(|payload| {
                                let message = panic_message(payload.as_ref());
                                warn!(item_key = item.item_key(), "Item operation panicked: {}", message);
                                ItemOutcome::failed(
                                    GenerationError::new(format!("item panicked: {message}")),
                                    Usage::default(),
                                )
                            });
                        if result_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (index, outcome) in result_rx.iter() {
                let report = ItemReport {
                    index,
                    item_key: items[index].item_key(),
                    result: outcome.result,
                    usage: outcome.usage,
                };
                observer.on_finished(&report);
                slots[index] = Some(report);
            }
        });

        let results: Vec<ItemReport> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let report = ItemReport {
                        index,
                        item_key: items[index].item_key(),
                        result: Err(GenerationError::new("item was never executed")),
                        usage: Usage::default(),
                    };
                    observer.on_finished(&report);
                    report
                })
            })
            .collect();

        let report = BatchReport::from_reports(results);
        debug!(
            succeeded = report.succeeded(),
            failed = report.failed,
            "Fan-out batch finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::observer::NoopObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug)]
    struct Shot(i64);

    impl Keyed for Shot {
        fn item_key(&self) -> i64 {
            self.0
        }
    }

    fn shots(n: i64) -> Vec<Shot> {
        (1..=n).map(Shot).collect()
    }

    #[derive(Default)]
    struct Recorder {
        started: Mutex<Vec<i64>>,
        finished: Mutex<Vec<i64>>,
    }

    impl FanOutObserver for Recorder {
        fn on_started(&self, item_key: i64) {
            self.started.lock().unwrap().push(item_key);
        }

        fn on_finished(&self, report: &ItemReport) {
            self.finished.lock().unwrap().push(report.item_key);
        }
    }

    #[test]
    fn test_zero_workers_is_invalid() {
        assert!(matches!(
            FanOutExecutor::new(0),
            Err(JobError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_results_keep_input_order() {
        let n = 6;
        let items = shots(n);
        let executor = FanOutExecutor::new(3).unwrap();

        // Earlier items take longest, so completion order is reversed.
        let report = executor.run(
            &items,
            |shot| {
                thread::sleep(Duration::from_millis(((n - shot.0 + 1) * 15) as u64));
                ItemOutcome::ok(vec![format!("shot-{}.png", shot.0)], Usage::call())
            },
            &NoopObserver,
        );

        assert_eq!(report.results.len(), n as usize);
        for (i, item) in report.results.iter().enumerate() {
            assert_eq!(item.index, i);
            assert_eq!(item.item_key, i as i64 + 1);
            assert_eq!(item.result, Ok(vec![format!("shot-{}.png", i + 1)]));
        }
        assert_eq!(report.usage.api_calls, n as u64);
    }

    #[test]
    fn test_failure_and_panic_are_isolated() {
        let items = shots(5);
        let executor = FanOutExecutor::new(2).unwrap();
        let recorder = Recorder::default();

        let report = executor.run(
            &items,
            |shot| match shot.0 {
                2 => ItemOutcome::failed(
                    GenerationError::new("bad prompt").with_request_id("req-2"),
                    Usage::call(),
                ),
                4 => panic!("decoder exploded"),
                n => ItemOutcome::ok(vec![format!("{n}.png")], Usage::call()),
            },
            &recorder,
        );

        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.by_key.keys().copied().collect::<Vec<_>>(), vec![1, 3, 5]);

        let failed = report.results[1].result.as_ref().unwrap_err();
        assert_eq!(failed.request_id.as_deref(), Some("req-2"));
        let panicked = report.results[3].result.as_ref().unwrap_err();
        assert!(panicked.message.contains("decoder exploded"));

        let mut finished = recorder.finished.lock().unwrap().clone();
        finished.sort();
        assert_eq!(finished, vec![1, 2, 3, 4, 5]);
        assert_eq!(*recorder.started.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_in_flight_never_exceeds_workers() {
        let items = shots(5);
        let executor = FanOutExecutor::new(2).unwrap();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let report = executor.run(
            &items,
            |shot| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                ItemOutcome::ok(vec![shot.0.to_string()], Usage::default())
            },
            &NoopObserver,
        );

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(report.results.len(), 5);
    }

    #[test]
    fn test_multiple_artifacts_per_item() {
        let items = shots(2);
        let report = FanOutExecutor::new(4).unwrap().run(
            &items,
            |shot| {
                ItemOutcome::ok(
                    vec![format!("{}-a.png", shot.0), format!("{}-b.png", shot.0)],
                    Usage {
                        images: 2,
                        ..Usage::call()
                    },
                )
            },
            &NoopObserver,
        );
        assert_eq!(report.by_key[&2], vec!["2-a.png", "2-b.png"]);
        assert_eq!(report.usage.images, 4);
    }

    #[test]
    fn test_empty_batch() {
        let items: Vec<Shot> = Vec::new();
        let report =
            FanOutExecutor::new(2)
                .unwrap()
                .run(&items, |_| unreachable!(), &NoopObserver);
        assert!(report.results.is_empty());
        assert_eq!(report.failed, 0);
    }
}
