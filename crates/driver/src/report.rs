use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use workload_core::interval::Interval;
use workload_core::keygen::KeyDistribution;
use workload_core::manager::RunStats;
use workload_core::tracker::RunRecords;
use workload_core::types::{RunWindow, TransactionType};

/// Latencies are recorded in microseconds, from 1µs to one hour.
const MAX_LATENCY_US: u64 = 3_600_000_000;

/// Everything measured for one run, emitted as one JSON object.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: usize,
    pub seller_distribution: KeyDistribution,
    pub seller_range: Interval,
    pub window_start_ms: u64,
    pub window_finish_ms: u64,
    pub duration_ms: u64,
    pub aborted_early: bool,
    /// Transactions that reached the worker façade.
    pub submitted: u64,
    /// Customer sessions dropped at run end while waiting for a customer.
    pub abandoned_sessions: u64,
    pub no_match_ticks: u64,
    /// Transactions without a terminal outcome when records were drained.
    pub pending_at_drain: usize,
    /// Finished in-window transactions per second.
    pub throughput_tps: f64,
    pub transactions: BTreeMap<TransactionType, TypeReport>,
    pub sellers: SellerSkew,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeReport {
    pub submitted: u64,
    pub finished: u64,
    pub aborted: u64,
    pub latency: Option<LatencySummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SellerSkew {
    pub distinct: usize,
    pub total: u64,
    pub top_seller: Option<u64>,
    /// Share of seller transactions aimed at the most targeted seller.
    pub top_share: f64,
}

/// Where the report's inputs come from.
pub struct ReportInput<'a> {
    pub run: usize,
    pub seller_distribution: KeyDistribution,
    pub seller_range: Interval,
    pub window: RunWindow,
    pub records: &'a RunRecords,
    pub stats: &'a RunStats,
}

impl RunReport {
    /// Join submissions and completions on tid. Aborted tids and
    /// transactions submitted outside the window carry no latency.
    pub fn build(input: ReportInput<'_>) -> Result<Self, hdrhistogram::CreationError> {
        let ReportInput {
            run,
            seller_distribution,
            seller_range,
            window,
            records,
            stats,
        } = input;

        let mut transactions: BTreeMap<TransactionType, TypeReport> = BTreeMap::new();
        let mut submitted_at: HashMap<&str, (TransactionType, SystemTime)> = HashMap::new();
        for id in records.submitted() {
            transactions.entry(id.tx_type).or_default().submitted += 1;
            if window.contains(id.submitted_at) {
                submitted_at.insert(id.tid.as_str(), (id.tx_type, id.submitted_at));
            }
        }

        let aborted: HashSet<&str> = records.aborted.iter().map(|m| m.tid.as_str()).collect();
        for mark in &records.aborted {
            transactions.entry(mark.tx_type).or_default().aborted += 1;
        }

        let mut histograms: BTreeMap<TransactionType, Histogram<u64>> = BTreeMap::new();
        let mut finished_in_window = 0u64;
        for output in records.finished() {
            let Some(&(tx_type, started)) = submitted_at.get(output.tid.as_str()) else {
                continue;
            };
            if aborted.contains(output.tid.as_str()) {
                continue;
            }
            let latency = output
                .completed_at
                .duration_since(started)
                .unwrap_or_default();
            let hist = match histograms.entry(tx_type) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    e.insert(Histogram::new_with_bounds(1, MAX_LATENCY_US, 3)?)
                }
            };
            hist.saturating_record((latency.as_micros() as u64).max(1));
            finished_in_window += 1;
        }

        // Finished counts include completions of out-of-window submissions.
        let mut tx_of: HashMap<&str, TransactionType> = HashMap::new();
        for id in records.submitted() {
            tx_of.insert(id.tid.as_str(), id.tx_type);
        }
        for output in records.finished() {
            if let Some(tx_type) = tx_of.get(output.tid.as_str()) {
                transactions.entry(*tx_type).or_default().finished += 1;
            }
        }

        for (tx_type, hist) in &histograms {
            transactions.entry(*tx_type).or_default().latency = Some(summarize(hist));
        }

        let duration = window.duration();
        let throughput_tps = if duration.is_zero() {
            0.0
        } else {
            finished_in_window as f64 / duration.as_secs_f64()
        };

        Ok(Self {
            run,
            seller_distribution,
            seller_range,
            window_start_ms: epoch_ms(window.start),
            window_finish_ms: epoch_ms(window.finish),
            duration_ms: duration.as_millis() as u64,
            aborted_early: window.aborted_early,
            submitted: stats.total_submitted(),
            abandoned_sessions: stats.abandoned_sessions,
            no_match_ticks: stats.no_match_ticks,
            pending_at_drain: records.pending,
            throughput_tps,
            transactions,
            sellers: SellerSkew::from_hits(stats.seller_hits.iter().map(|(k, v)| (*k, *v))),
        })
    }
}

impl SellerSkew {
    pub fn from_hits(hits: impl Iterator<Item = (u64, u64)>) -> Self {
        let mut skew = SellerSkew::default();
        let mut top = 0u64;
        for (seller, count) in hits {
            skew.distinct += 1;
            skew.total += count;
            // Lowest id wins ties so the report is stable.
            let better = count > top
                || (count == top && skew.top_seller.map_or(true, |s| seller < s));
            if better {
                top = count;
                skew.top_seller = Some(seller);
            }
        }
        if skew.total > 0 {
            skew.top_share = top as f64 / skew.total as f64;
        }
        skew
    }
}

fn summarize(hist: &Histogram<u64>) -> LatencySummary {
    let ms = |us: u64| us as f64 / 1000.0;
    LatencySummary {
        count: hist.len(),
        mean_ms: hist.mean() / 1000.0,
        p50_ms: ms(hist.value_at_quantile(0.50)),
        p90_ms: ms(hist.value_at_quantile(0.90)),
        p99_ms: ms(hist.value_at_quantile(0.99)),
        max_ms: ms(hist.max()),
    }
}

fn epoch_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use workload_core::tracker::{EntityLog, EntityRecords};
    use workload_core::types::{
        EntityKind, TransactionIdentifier, TransactionMark, TransactionOutput,
    };

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn submitted(tid: &str, tx_type: TransactionType, ms: u64) -> TransactionIdentifier {
        TransactionIdentifier {
            tid: tid.into(),
            tx_type,
            submitted_at: at(ms),
        }
    }

    fn finished(tid: &str, ms: u64) -> TransactionOutput {
        TransactionOutput {
            tid: tid.into(),
            completed_at: at(ms),
        }
    }

    fn records() -> RunRecords {
        RunRecords {
            entities: vec![
                EntityRecords {
                    kind: EntityKind::Seller,
                    id: 1,
                    log: EntityLog {
                        submitted: vec![
                            submitted("1", TransactionType::PriceUpdate, 1_000),
                            submitted("2", TransactionType::PriceUpdate, 1_100),
                            // Before the window opened.
                            submitted("3", TransactionType::PriceUpdate, 500),
                        ],
                        finished: vec![
                            finished("1", 1_010),
                            finished("2", 1_130),
                            finished("3", 1_200),
                        ],
                    },
                },
                EntityRecords {
                    kind: EntityKind::Customer,
                    id: 4,
                    log: EntityLog {
                        submitted: vec![submitted("4", TransactionType::CustomerSession, 1_200)],
                        finished: vec![],
                    },
                },
            ],
            aborted: vec![TransactionMark::abort(
                "4",
                TransactionType::CustomerSession,
                4,
                "http",
            )],
            pending: 0,
        }
    }

    fn stats() -> RunStats {
        let mut stats = RunStats::default();
        stats.dispatched.insert(TransactionType::PriceUpdate, 3);
        stats.dispatched.insert(TransactionType::CustomerSession, 1);
        stats.seller_hits.insert(1, 3);
        stats
    }

    fn build(records: &RunRecords, stats: &RunStats) -> RunReport {
        RunReport::build(ReportInput {
            run: 0,
            seller_distribution: KeyDistribution::Uniform,
            seller_range: Interval::new(1, 10).unwrap(),
            window: RunWindow {
                start: at(1_000),
                finish: at(3_000),
                aborted_early: false,
            },
            records,
            stats,
        })
        .unwrap()
    }

    #[test]
    fn latency_joins_on_tid_within_window() {
        let (records, stats) = (records(), stats());
        let report = build(&records, &stats);

        let price = &report.transactions[&TransactionType::PriceUpdate];
        assert_eq!(price.submitted, 3);
        assert_eq!(price.finished, 3);
        let latency = price.latency.as_ref().unwrap();
        // tid 3 was submitted before the window.
        assert_eq!(latency.count, 2);
        assert!((latency.max_ms - 30.0).abs() < 0.1, "{latency:?}");
        assert!((latency.p50_ms - 10.0).abs() < 0.1, "{latency:?}");

        // 2 in-window completions over 2 seconds.
        assert!((report.throughput_tps - 1.0).abs() < 1e-9);
        assert_eq!(report.duration_ms, 2_000);
        assert_eq!(report.submitted, 4);
        assert_eq!(report.abandoned_sessions, 0);
    }

    #[test]
    fn abandoned_sessions_are_not_counted_as_submitted() {
        let records = records();
        let mut stats = stats();
        stats.dispatched.insert(TransactionType::CustomerSession, 3);
        stats.abandoned_sessions = 2;
        let report = build(&records, &stats);
        assert_eq!(report.submitted, 4);
        assert_eq!(report.abandoned_sessions, 2);
    }

    #[test]
    fn aborted_transactions_have_no_latency() {
        let (records, stats) = (records(), stats());
        let report = build(&records, &stats);
        let session = &report.transactions[&TransactionType::CustomerSession];
        assert_eq!(session.aborted, 1);
        assert_eq!(session.finished, 0);
        assert!(session.latency.is_none());
    }

    #[test]
    fn seller_skew_reports_top_share() {
        let skew = SellerSkew::from_hits([(5, 2), (3, 6), (9, 2)].into_iter());
        assert_eq!(skew.distinct, 3);
        assert_eq!(skew.total, 10);
        assert_eq!(skew.top_seller, Some(3));
        assert!((skew.top_share - 0.6).abs() < 1e-9);

        let tie = SellerSkew::from_hits([(8, 1), (2, 1)].into_iter());
        assert_eq!(tie.top_seller, Some(2));

        assert_eq!(SellerSkew::from_hits(std::iter::empty()), SellerSkew::default());
    }

    #[test]
    fn serializes_types_as_keys() {
        let (records, stats) = (records(), stats());
        let json = serde_json::to_value(build(&records, &stats)).unwrap();
        assert!(json["transactions"]["price_update"]["latency"]["p99_ms"].is_number());
        assert_eq!(json["seller_distribution"], "uniform");
    }

    #[test]
    fn run_stats_serialize_with_seller_keys() {
        let mut stats = stats();
        stats.seller_hits.insert(12, 1);
        stats.abandoned_sessions = 1;
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["seller_hits"]["1"], 3);
        assert_eq!(json["seller_hits"]["12"], 1);
        assert_eq!(json["dispatched"]["price_update"], 3);
        assert_eq!(json["abandoned_sessions"], 1);
    }
}
