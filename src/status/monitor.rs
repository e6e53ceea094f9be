//! Availability timeline per API format
//!
//! Attempt outcomes land in fixed-width, epoch-aligned buckets. The admin
//! view carries raw counts and breaker totals; the public view only the
//! per-bucket status.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    catalog::Catalog,
    routing::health::{CircuitState, HealthTracker, Subject},
};

/// Outcome class recorded per attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
    RateLimited,
}

/// Availability classification for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BucketStatus {
    Operational,
    Degraded,
    Down,
    NoData,
}

impl BucketStatus {
    fn classify(availability: Option<f64>) -> Self {
        match availability {
            None => BucketStatus::NoData,
            Some(a) if a >= 0.95 => BucketStatus::Operational,
            Some(a) if a >= 0.5 => BucketStatus::Degraded,
            Some(_) => BucketStatus::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    index: i64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    rate_limited: u64,
}

impl Bucket {
    fn total(&self) -> u64 {
        self.successes + self.failures + self.timeouts + self.rate_limited
    }
}

/// One bucket as reported by the admin timeline
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BucketView {
    pub start: String,
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub rate_limited: u64,
    pub availability: Option<f64>,
    pub status: BucketStatus,
}

/// Admin timeline for one API format, with catalog and breaker counts
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FormatTimeline {
    pub api_format: String,
    pub providers: usize,
    pub active_keys: usize,
    pub open_keys: usize,
    pub buckets: Vec<BucketView>,
}

/// Public bucket: status only
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublicBucket {
    pub start: String,
    pub status: BucketStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublicFormatTimeline {
    pub api_format: String,
    pub current: BucketStatus,
    pub buckets: Vec<PublicBucket>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusTimeline {
    pub bucket_secs: u64,
    pub generated_at: String,
    pub formats: Vec<FormatTimeline>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublicStatusTimeline {
    pub bucket_secs: u64,
    pub generated_at: String,
    pub formats: Vec<PublicFormatTimeline>,
}

/// Rolling per-format outcome history
///
/// Buckets are aligned to multiples of the bucket width since the Unix epoch;
/// only the most recent `bucket_count` are kept.
pub struct StatusMonitor {
    bucket_secs: i64,
    bucket_count: usize,
    formats: DashMap<String, Mutex<VecDeque<Bucket>>>,
}

impl StatusMonitor {
    pub fn new(bucket_width: Duration, bucket_count: usize) -> Self {
        Self {
            bucket_secs: bucket_width.as_secs().max(1) as i64,
            bucket_count: bucket_count.max(1),
            formats: DashMap::new(),
        }
    }

    pub fn bucket_secs(&self) -> u64 {
        self.bucket_secs as u64
    }

    pub fn record(&self, api_format: &str, outcome: AttemptOutcome, at: DateTime<Utc>) {
        let index = at.timestamp().div_euclid(self.bucket_secs);
        let entry = self
            .formats
            .entry(api_format.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut buckets = entry.lock();

        match buckets.back().map(|b| b.index) {
            Some(last) if last == index => {}
            // Late record for an older bucket
            Some(last) if last > index => {
                if let Some(bucket) = buckets.iter_mut().find(|b| b.index == index) {
                    bump(bucket, outcome);
                }
                return;
            }
            _ => buckets.push_back(Bucket {
                index,
                ..Bucket::default()
            }),
        }

        if let Some(bucket) = buckets.back_mut() {
            bump(bucket, outcome);
        }
        while buckets.len() > self.bucket_count {
            buckets.pop_front();
        }
    }

    fn window(&self, api_format: &str, now: DateTime<Utc>) -> Vec<(i64, Option<Bucket>)> {
        let current = now.timestamp().div_euclid(self.bucket_secs);
        let first = current - self.bucket_count as i64 + 1;
        let recorded: Vec<Bucket> = self
            .formats
            .get(api_format)
            .map(|b| b.lock().iter().copied().collect())
            .unwrap_or_default();

        (first..=current)
            .map(|index| (index, recorded.iter().find(|b| b.index == index).copied()))
            .collect()
    }

    fn bucket_start(&self, index: i64) -> String {
        Utc.timestamp_opt(index * self.bucket_secs, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
    }

    fn known_formats(&self, catalog: &Catalog) -> Vec<String> {
        let mut formats: Vec<String> = catalog
            .endpoints()
            .map(|e| e.api_format.clone())
            .chain(self.formats.iter().map(|e| e.key().clone()))
            .collect();
        formats.sort();
        formats.dedup();
        formats
    }

    /// Full timeline with counts, for operators
    pub fn admin_timeline(
        &self,
        catalog: &Catalog,
        health: &HealthTracker,
        now: DateTime<Utc>,
        instant: std::time::Instant,
    ) -> StatusTimeline {
        let formats = self
            .known_formats(catalog)
            .into_iter()
            .map(|api_format| {
                let endpoints: Vec<_> = catalog
                    .endpoints()
                    .filter(|e| e.api_format == api_format)
                    .collect();
                let mut providers: Vec<&str> =
                    endpoints.iter().map(|e| e.provider_id.as_str()).collect();
                providers.sort();
                providers.dedup();

                let keys: Vec<_> = endpoints
                    .iter()
                    .flat_map(|e| catalog.keys_of(&e.id))
                    .filter(|k| k.is_active)
                    .collect();
                let open_keys = keys
                    .iter()
                    .filter(|k| health.state(Subject::Key(&k.id), instant) == CircuitState::Open)
                    .count();

                let buckets = self
                    .window(&api_format, now)
                    .into_iter()
                    .map(|(index, bucket)| {
                        let bucket = bucket.unwrap_or_default();
                        let availability = availability(&bucket);
                        BucketView {
                            start: self.bucket_start(index),
                            total: bucket.total(),
                            successes: bucket.successes,
                            failures: bucket.failures,
                            timeouts: bucket.timeouts,
                            rate_limited: bucket.rate_limited,
                            availability,
                            status: BucketStatus::classify(availability),
                        }
                    })
                    .collect();

                FormatTimeline {
                    api_format,
                    providers: providers.len(),
                    active_keys: keys.len(),
                    open_keys,
                    buckets,
                }
            })
            .collect();

        StatusTimeline {
            bucket_secs: self.bucket_secs(),
            generated_at: now.to_rfc3339(),
            formats,
        }
    }

    /// Status-only timeline, safe to expose without authentication
    pub fn public_timeline(&self, catalog: &Catalog, now: DateTime<Utc>) -> PublicStatusTimeline {
        let formats = self
            .known_formats(catalog)
            .into_iter()
            .map(|api_format| {
                let buckets: Vec<PublicBucket> = self
                    .window(&api_format, now)
                    .into_iter()
                    .map(|(index, bucket)| PublicBucket {
                        start: self.bucket_start(index),
                        status: BucketStatus::classify(bucket.as_ref().and_then(availability)),
                    })
                    .collect();
                let current = buckets
                    .iter()
                    .rev()
                    .map(|b| b.status)
                    .find(|s| *s != BucketStatus::NoData)
                    .unwrap_or(BucketStatus::NoData);

                PublicFormatTimeline {
                    api_format,
                    current,
                    buckets,
                }
            })
            .collect();

        PublicStatusTimeline {
            bucket_secs: self.bucket_secs(),
            generated_at: now.to_rfc3339(),
            formats,
        }
    }
}

fn bump(bucket: &mut Bucket, outcome: AttemptOutcome) {
    match outcome {
        AttemptOutcome::Success => bucket.successes += 1,
        AttemptOutcome::Failure => bucket.failures += 1,
        AttemptOutcome::Timeout => bucket.timeouts += 1,
        AttemptOutcome::RateLimited => bucket.rate_limited += 1,
    }
}

fn availability(bucket: &Bucket) -> Option<f64> {
    match bucket.total() {
        0 => None,
        total => Some(bucket.successes as f64 / total as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogData;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn catalog() -> Catalog {
        let data: CatalogData = serde_json::from_value(json!({
            "providers": [{ "id": "p1", "name": "One" }, { "id": "p2", "name": "Two" }],
            "endpoints": [
                { "id": "e1", "provider_id": "p1", "api_format": "claude", "base_url": "https://a" },
                { "id": "e2", "provider_id": "p2", "api_format": "claude", "base_url": "https://b" },
                { "id": "e3", "provider_id": "p2", "api_format": "openai", "base_url": "https://c" }
            ],
            "keys": [
                { "id": "k1", "endpoint_id": "e1", "secret": "s" },
                { "id": "k2", "endpoint_id": "e2", "secret": "s" },
                { "id": "k3", "endpoint_id": "e3", "secret": "s", "is_active": false }
            ],
            "global_models": [],
            "model_mappings": []
        }))
        .unwrap();
        Catalog::build(data).unwrap()
    }

    #[test]
    fn test_records_into_aligned_buckets() {
        let monitor = StatusMonitor::new(Duration::from_secs(60), 5);
        monitor.record("claude", AttemptOutcome::Success, at(600));
        monitor.record("claude", AttemptOutcome::Success, at(630));
        monitor.record("claude", AttemptOutcome::Timeout, at(659));
        monitor.record("claude", AttemptOutcome::Failure, at(660));

        let timeline = monitor.admin_timeline(
            &catalog(),
            &HealthTracker::new(),
            at(700),
            std::time::Instant::now(),
        );
        let claude = timeline
            .formats
            .iter()
            .find(|f| f.api_format == "claude")
            .unwrap();

        assert_eq!(claude.buckets.len(), 5);
        let previous = &claude.buckets[3];
        assert_eq!(previous.total, 3);
        assert_eq!(previous.timeouts, 1);
        assert_eq!(previous.status, BucketStatus::Degraded);

        let current = &claude.buckets[4];
        assert_eq!(current.failures, 1);
        assert_eq!(current.status, BucketStatus::Down);
        assert_eq!(claude.buckets[0].status, BucketStatus::NoData);
    }

    #[test]
    fn test_keeps_only_recent_buckets() {
        let monitor = StatusMonitor::new(Duration::from_secs(10), 3);
        for i in 0..10 {
            monitor.record("claude", AttemptOutcome::Success, at(i * 10));
        }
        let stored = monitor.formats.get("claude").unwrap().lock().len();
        assert_eq!(stored, 3);
    }

    #[test]
    fn test_admin_counts() {
        let monitor = StatusMonitor::new(Duration::from_secs(60), 2);
        let health = HealthTracker::with_config(crate::routing::health::HealthConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let now = std::time::Instant::now();
        health.record_failure(Subject::Key("k2"), "transport", None, now);

        let timeline = monitor.admin_timeline(&catalog(), &health, at(0), now);
        let claude = &timeline.formats[0];
        assert_eq!(claude.api_format, "claude");
        assert_eq!(claude.providers, 2);
        assert_eq!(claude.active_keys, 2);
        assert_eq!(claude.open_keys, 1);

        let openai = &timeline.formats[1];
        assert_eq!(openai.active_keys, 0);
    }

    #[test]
    fn test_public_timeline_reports_latest_status() {
        let monitor = StatusMonitor::new(Duration::from_secs(60), 3);
        monitor.record("openai", AttemptOutcome::Success, at(60));
        monitor.record("openai", AttemptOutcome::RateLimited, at(120));

        let public = monitor.public_timeline(&catalog(), at(130));
        let openai = public
            .formats
            .iter()
            .find(|f| f.api_format == "openai")
            .unwrap();
        assert_eq!(openai.current, BucketStatus::Down);
        assert_eq!(openai.buckets[1].status, BucketStatus::Operational);

        let json = serde_json::to_value(&public).unwrap();
        assert!(json["formats"][0]["buckets"][0].get("successes").is_none());
    }
}
