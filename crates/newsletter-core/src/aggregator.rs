use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::SourceError;
use crate::models::NewsletterItem;
use crate::parser::ContentParser;
use crate::sources::{RawRecord, SourceFetcher};

/// Everything one aggregation pass produced.
#[derive(Debug, Default)]
pub struct AggregationReport {
    /// Surviving items, grouped by source in fetcher order.
    pub items: Vec<NewsletterItem>,
    pub failures: Vec<(String, SourceError)>,
    /// Records discarded by the normalizer.
    pub dropped: usize,
}

impl AggregationReport {
    pub fn all_sources_failed(&self, source_count: usize) -> bool {
        source_count > 0 && self.failures.len() == source_count
    }
}

pub struct Aggregator {
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    parser: ContentParser,
}

impl Aggregator {
    pub fn new(fetchers: Vec<Arc<dyn SourceFetcher>>, parser: ContentParser) -> Self {
        Self { fetchers, parser }
    }

    pub fn source_count(&self) -> usize {
        self.fetchers.len()
    }

    /// Runs every fetcher concurrently and keeps items published within
    /// `[since, until]`. A failing fetcher only loses its own items.
    /// Dropping the returned future aborts fetches still in flight.
    ///
    /// With no `until`, the window closes once every fetcher has returned,
    /// so records dated at fetch time stay inside it.
    pub async fn aggregate(
        &self,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> AggregationReport {
        let mut tasks = JoinSet::new();
        for (idx, fetcher) in self.fetchers.iter().enumerate() {
            let fetcher = Arc::clone(fetcher);
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(fetcher.fetch(since)).catch_unwind().await;
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<Vec<RawRecord>, SourceError>>> =
            self.fetchers.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(result))) => outcomes[idx] = Some(result),
                Ok((idx, Err(panic))) => {
                    let name = self.fetchers[idx].name();
                    outcomes[idx] = Some(Err(SourceError::connectivity(
                        name,
                        format!("fetch task panicked: {}", panic_message(panic.as_ref())),
                    )));
                }
                Err(join_err) => warn!(error = %join_err, "fetch task aborted"),
            }
        }

        let until = until.unwrap_or_else(Utc::now);
        let mut report = AggregationReport::default();
        for (fetcher, outcome) in self.fetchers.iter().zip(outcomes) {
            let name = fetcher.name();
            let outcome = outcome
                .unwrap_or_else(|| Err(SourceError::connectivity(name, "fetch task did not complete")));
            let records = match outcome {
                Ok(records) => records,
                Err(e) => {
                    warn!(source = name, error = %e, "source failed");
                    report.failures.push((name.to_string(), e));
                    continue;
                }
            };

            let fetched = records.len();
            let batch = self.parser.normalize_source(records);
            for (title, reason) in &batch.dropped {
                warn!(source = name, title = %title, reason = %reason, "dropping item");
            }
            report.dropped += batch.dropped.len();

            let before = report.items.len();
            report.items.extend(
                batch
                    .items
                    .into_iter()
                    .filter(|item| since <= item.published_at && item.published_at <= until),
            );
            info!(
                source = name,
                fetched,
                kept = report.items.len() - before,
                "aggregated source"
            );
        }

        info!(
            items = report.items.len(),
            failed_sources = report.failures.len(),
            "aggregation finished"
        );
        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use crate::sources::RecordBody;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    struct StaticFetcher {
        name: String,
        dates: Vec<DateTime<Utc>>,
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        fn name(&self) -> &str {
            &self.name
        }

        fn source_type(&self) -> SourceType {
            SourceType::Feed
        }

        async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
            Ok(self
                .dates
                .iter()
                .enumerate()
                .map(|(i, ts)| RawRecord {
                    source_name: self.name.clone(),
                    source_type: SourceType::Feed,
                    title: Some(format!("{} item {}", self.name, i)),
                    body: RecordBody::Plain(format!(
                        "Distinct body number {} from {} with enough characters to survive.",
                        i, self.name
                    )),
                    published_at: Some(*ts),
                    date_hint: None,
                    fetched_at: *ts,
                    author: None,
                    origin_url: None,
                })
                .collect())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl SourceFetcher for FailingFetcher {
        fn name(&self) -> &str {
            "Broken"
        }

        fn source_type(&self) -> SourceType {
            SourceType::Mail
        }

        async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
            Err(SourceError::auth("Broken", "invalid credentials"))
        }
    }

    struct PanickingFetcher;

    #[async_trait]
    impl SourceFetcher for PanickingFetcher {
        fn name(&self) -> &str {
            "Panics"
        }

        fn source_type(&self) -> SourceType {
            SourceType::File
        }

        async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
            panic!("fetcher bug")
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn static_fetcher(name: &str, count: usize) -> Arc<dyn SourceFetcher> {
        Arc::new(StaticFetcher {
            name: name.to_string(),
            dates: (0..count).map(|i| base() - Duration::hours(i as i64)).collect(),
        })
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let aggregator = Aggregator::new(
            vec![
                static_fetcher("A", 2),
                Arc::new(FailingFetcher),
                static_fetcher("B", 3),
                Arc::new(PanickingFetcher),
            ],
            ContentParser::new(),
        );

        let report = aggregator
            .aggregate(base() - Duration::days(7), Some(base()))
            .await;

        assert_eq!(report.items.len(), 5);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].0, "Broken");
        assert_eq!(report.failures[1].0, "Panics");
        assert!(!report.all_sources_failed(aggregator.source_count()));
    }

    #[tokio::test]
    async fn test_order_is_stable_within_a_source() {
        let aggregator = Aggregator::new(vec![static_fetcher("A", 3)], ContentParser::new());
        let report = aggregator.aggregate(base() - Duration::days(1), Some(base())).await;
        let titles: Vec<&str> = report.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["A item 0", "A item 1", "A item 2"]);
    }

    #[tokio::test]
    async fn test_date_window_is_inclusive() {
        let fetcher = Arc::new(StaticFetcher {
            name: "Dated".to_string(),
            dates: vec![
                base() - Duration::days(10),
                base() - Duration::days(7),
                base() - Duration::days(3),
                base(),
                base() + Duration::hours(1),
            ],
        });
        let aggregator = Aggregator::new(vec![fetcher], ContentParser::new());
        let since = base() - Duration::days(7);

        let report = aggregator.aggregate(since, Some(base())).await;

        assert_eq!(report.items.len(), 3);
        assert!(report
            .items
            .iter()
            .all(|i| since <= i.published_at && i.published_at <= base()));
    }

    #[tokio::test]
    async fn test_all_sources_failing_yields_empty_report() {
        let aggregator = Aggregator::new(vec![Arc::new(FailingFetcher)], ContentParser::new());
        let report = aggregator.aggregate(base() - Duration::days(7), Some(base())).await;
        assert!(report.items.is_empty());
        assert!(report.all_sources_failed(aggregator.source_count()));
    }

    struct UndatedFetcher;

    #[async_trait]
    impl SourceFetcher for UndatedFetcher {
        fn name(&self) -> &str {
            "Undated"
        }

        fn source_type(&self) -> SourceType {
            SourceType::Feed
        }

        async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
            Ok(vec![RawRecord {
                source_name: "Undated".to_string(),
                source_type: SourceType::Feed,
                title: Some("No date on this entry".to_string()),
                body: RecordBody::Plain(
                    "An entry without any publication date but with plenty of text.".to_string(),
                ),
                published_at: None,
                date_hint: None,
                fetched_at: Utc::now(),
                author: None,
                origin_url: None,
            }])
        }
    }

    #[tokio::test]
    async fn test_undated_records_fall_inside_an_open_window() {
        let since = Utc::now() - Duration::days(7);
        let aggregator = Aggregator::new(vec![Arc::new(UndatedFetcher)], ContentParser::new());

        let report = aggregator.aggregate(since, None).await;

        assert_eq!(report.items.len(), 1);
        assert!(report.items[0].published_at >= since);
    }
}
