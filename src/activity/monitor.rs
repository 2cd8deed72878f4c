//! Rolling-window activity measurement per domain.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::types::{ActivityDomain, ActivityTier};
use crate::util::lock::mutex_lock;

use super::clock::Clock;
use super::config::{ActivityConfig, DomainActivityConfig};
use super::tier::classify;

const SOURCE: &str = "activity::monitor";
const METRIC_ACTIVITY_EVENTS: &str = "chirp_activity_events_total";
const SECS_PER_HOUR: f64 = 3_600.0;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Unix timestamp (seconds) of the bucket's first second.
    start: i64,
    count: u64,
}

/// Event-count buckets of one domain, oldest first.
///
/// Buckets older than the window are evicted on every write, so memory is
/// bounded by `window / bucket` regardless of event volume.
#[derive(Debug)]
struct DomainWindow {
    window_secs: i64,
    bucket_secs: i64,
    buckets: VecDeque<Bucket>,
    total: u64,
    last_event: Option<OffsetDateTime>,
}

impl DomainWindow {
    fn new(config: &DomainActivityConfig) -> Self {
        let window_secs = i64::try_from(config.window.as_secs()).unwrap_or(i64::MAX);
        let bucket_secs = i64::try_from(config.bucket.as_secs())
            .unwrap_or(1)
            .clamp(1, window_secs.max(1));
        Self {
            window_secs,
            bucket_secs,
            buckets: VecDeque::new(),
            total: 0,
            last_event: None,
        }
    }

    fn cutoff(&self, now: OffsetDateTime) -> i64 {
        now.unix_timestamp().saturating_sub(self.window_secs)
    }

    fn evict(&mut self, now: OffsetDateTime) {
        let cutoff = self.cutoff(now);
        while let Some(front) = self.buckets.front() {
            if front.start.saturating_add(self.bucket_secs) > cutoff {
                break;
            }
            self.total -= front.count;
            self.buckets.pop_front();
        }
    }

    fn record(&mut self, at: OffsetDateTime, now: OffsetDateTime) {
        self.touch(at);
        self.evict(now);

        let secs = at.unix_timestamp();
        let start = secs - secs.rem_euclid(self.bucket_secs);
        if start.saturating_add(self.bucket_secs) <= self.cutoff(now) {
            return;
        }

        match self.buckets.binary_search_by_key(&start, |bucket| bucket.start) {
            Ok(index) => self.buckets[index].count += 1,
            Err(index) if index == self.buckets.len() => {
                self.buckets.push_back(Bucket { start, count: 1 })
            }
            Err(index) => self.buckets.insert(index, Bucket { start, count: 1 }),
        }
        self.total += 1;
    }

    fn touch(&mut self, at: OffsetDateTime) {
        if self.last_event.is_none_or(|last| at > last) {
            self.last_event = Some(at);
        }
    }

    fn rate(&mut self, now: OffsetDateTime) -> f64 {
        self.evict(now);
        self.total as f64 / (self.window_secs as f64 / SECS_PER_HOUR)
    }
}

/// Point-in-time view of one domain, for dashboards and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct DomainActivity {
    pub domain: ActivityDomain,
    pub rate_per_hour: f64,
    pub hours_since_last_event: f64,
    pub tier: ActivityTier,
}

/// Measures recent event rates per domain and classifies them into tiers.
///
/// Each domain owns its own window behind its own mutex; the map of domains
/// only grows, one entry per distinct domain name.
#[derive(Debug)]
pub struct ActivityMonitor {
    config: ActivityConfig,
    clock: Arc<dyn Clock>,
    started_at: OffsetDateTime,
    windows: DashMap<ActivityDomain, Arc<Mutex<DomainWindow>>>,
}

impl ActivityMonitor {
    pub fn new(config: ActivityConfig, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self {
            config,
            clock,
            started_at,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn window(&self, domain: &ActivityDomain) -> Option<Arc<Mutex<DomainWindow>>> {
        self.windows.get(domain).map(|entry| Arc::clone(entry.value()))
    }

    fn window_or_create(&self, domain: &ActivityDomain) -> Arc<Mutex<DomainWindow>> {
        if let Some(window) = self.window(domain) {
            return window;
        }
        let config = self.config.for_domain(domain);
        Arc::clone(
            self.windows
                .entry(domain.clone())
                .or_insert_with(|| Arc::new(Mutex::new(DomainWindow::new(config))))
                .value(),
        )
    }

    /// Append one event at `at` to the domain's window.
    pub fn record_event(&self, domain: &ActivityDomain, at: OffsetDateTime) {
        let now = self.clock.now();
        let window = self.window_or_create(domain);
        mutex_lock(&window, SOURCE, "record_event").record(at, now);
        counter!(METRIC_ACTIVITY_EVENTS, "domain" => domain.to_string()).increment(1);
    }

    pub fn record_now(&self, domain: &ActivityDomain) {
        self.record_event(domain, self.clock.now());
    }

    /// Restore the last-known event time without counting an event, e.g.
    /// from persisted data at startup.
    pub fn seed_last_event(&self, domain: &ActivityDomain, at: OffsetDateTime) {
        let window = self.window_or_create(domain);
        mutex_lock(&window, SOURCE, "seed_last_event").touch(at);
        debug!(domain = %domain, last_event = %at, "Seeded activity domain");
    }

    /// Events per hour over the domain's configured window.
    pub fn current_rate(&self, domain: &ActivityDomain) -> f64 {
        let Some(window) = self.window(domain) else {
            return 0.0;
        };
        let mut guard = mutex_lock(&window, SOURCE, "current_rate");
        guard.rate(self.clock.now())
    }

    /// Hours since the newest recorded event.
    ///
    /// A domain without any event counts its idle time from monitor start.
    pub fn hours_since_last_event(&self, domain: &ActivityDomain) -> f64 {
        let last = self
            .window(domain)
            .and_then(|window| {
                let guard = mutex_lock(&window, SOURCE, "hours_since_last_event");
                guard.last_event
            })
            .unwrap_or(self.started_at);
        let idle = (self.clock.now() - last).as_seconds_f64() / SECS_PER_HOUR;
        idle.max(0.0)
    }

    pub fn current_tier(&self, domain: &ActivityDomain) -> ActivityTier {
        let config = self.config.for_domain(domain);
        classify(
            self.current_rate(domain),
            self.hours_since_last_event(domain),
            config.dormant_after_hours(),
            &config.thresholds,
        )
    }

    /// Activity of every configured or observed domain, sorted by name.
    pub fn snapshot(&self) -> Vec<DomainActivity> {
        let mut domains: Vec<ActivityDomain> = self.config.domains.keys().cloned().collect();
        for entry in self.windows.iter() {
            if !domains.contains(entry.key()) {
                domains.push(entry.key().clone());
            }
        }
        domains.sort();

        domains
            .into_iter()
            .map(|domain| DomainActivity {
                rate_per_hour: self.current_rate(&domain),
                hours_since_last_event: self.hours_since_last_event(&domain),
                tier: self.current_tier(&domain),
                domain,
            })
            .collect()
    }
}
