//! In-memory, time-windowed store of the latest samples.
//!
//! The cache keeps the last consumed sample plus a history keyed by the
//! second it was consumed in. A background sweep, every quarter of the
//! retention window, drops history older than `now - retention`.
//!
//! ```text
//! consume ──► latest
//!        └──► history[now] (last write in a second wins)
//!                 ▲
//!   sweep ────────┘ every retention / 4: drop ts < now - retention
//! ```
//!
//! Every operation takes the single mutex for its whole duration and never
//! suspends while holding it, so readers on other tasks see either the state
//! before or after a sweep, never a partial one.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    error::ComponentResult,
    traits::{project_default, Entry, Projector, Sample, Sink},
};

/// Name of the timestamp field added to every record.
pub const TS_FIELD: &str = "ts";

/// Source of "now", in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

struct State<S> {
    latest: Option<S>,
    history: BTreeMap<i64, S>,
}

struct Shared<S> {
    state: Mutex<State<S>>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl<S: Sample> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, State<S>> {
        // A panic elsewhere cannot leave the maps half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self, sample: &S) {
        let ts = self.clock.now();
        let mut state = self.lock();
        state.latest = Some(sample.clone());
        state.history.insert(ts, sample.clone());
    }

    fn evict(&self) -> usize {
        let cutoff = self.clock.now() - self.retention.as_secs() as i64;
        let mut state = self.lock();
        let kept = state.history.split_off(&cutoff);
        let evicted = state.history.len();
        state.history = kept;
        evicted
    }
}

/// Read-only handle on a cache, cheap to clone into request handlers.
pub struct CacheReader<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for CacheReader<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: Sample> CacheReader<S> {
    /// Last consumed sample, `None` before the first one.
    pub fn last(&self) -> Option<S> {
        self.shared.lock().latest.clone()
    }

    /// Last consumed sample or the zero value.
    pub fn last_or_default(&self) -> S
    where
        S: Default,
    {
        self.last().unwrap_or_default()
    }

    /// Every retained observation, ascending by `ts`, as flat records.
    ///
    /// The projector runs outside the lock.
    pub fn data(&self, projector: Projector<S>) -> ComponentResult<Vec<Entry>> {
        let snapshot: Vec<(i64, S)> = self
            .shared
            .lock()
            .history
            .iter()
            .map(|(ts, sample)| (*ts, sample.clone()))
            .collect();

        snapshot
            .into_iter()
            .map(|(ts, sample)| {
                let mut entry = projector(&sample)?;
                entry.insert(TS_FIELD.to_string(), ts.into());
                Ok(entry)
            })
            .collect()
    }

    /// [`CacheReader::data`] with the default projector.
    pub fn data_default(&self) -> ComponentResult<Vec<Entry>> {
        self.data(project_default::<S>)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Time-windowed cache; also a sink, so it can be registered directly.
pub struct MemoryCache<S> {
    reader: CacheReader<S>,
    sweeper: Option<Sweeper>,
}

impl<S: Sample> MemoryCache<S> {
    pub fn new(retention: Duration) -> Self {
        Self::with_clock(retention, Arc::new(SystemClock))
    }

    pub fn with_clock(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            reader: CacheReader {
                shared: Arc::new(Shared {
                    state: Mutex::new(State {
                        latest: None,
                        history: BTreeMap::new(),
                    }),
                    clock,
                    retention,
                }),
            },
            sweeper: None,
        }
    }

    pub fn reader(&self) -> CacheReader<S> {
        self.reader.clone()
    }

    pub fn retention(&self) -> Duration {
        self.reader.shared.retention
    }

    pub fn store(&self, sample: &S) {
        self.reader.shared.store(sample);
    }

    pub fn last(&self) -> Option<S> {
        self.reader.last()
    }

    pub fn data(&self, projector: Projector<S>) -> ComponentResult<Vec<Entry>> {
        self.reader.data(projector)
    }

    /// Removes history older than the retention window right away and
    /// returns how many entries went.
    pub fn evict_expired(&self) -> usize {
        self.reader.shared.evict()
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_some()
    }

    /// Starts the periodic sweep. A running sweep is kept.
    ///
    /// The sweep fires every quarter of the retention window (at least once a
    /// second) and evicts under the lock without awaiting, so a stop never
    /// cuts a sweep in half. Must be called inside a tokio runtime.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut cache = MemoryCache::<f64>::new(Duration::from_secs(3600));
    /// cache.start_sweep(); // sweeps every 15 minutes
    /// cache.store(&0.5);
    /// cache.stop_sweep().await;
    /// ```
    pub fn start_sweep(&mut self) {
        if self.sweeper.is_some() {
            return;
        }

        let period = (self.retention() / 4).max(Duration::from_secs(1));
        let shared = self.reader.shared.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = shared.evict();
                        trace!("Cache sweep evicted {} entries", evicted);
                    }
                }
            }
        });

        debug!("Cache sweep started every {:?}", period);
        self.sweeper = Some(Sweeper { cancel, handle });
    }

    /// Cancels the sweep and waits for it to finish. Idempotent.
    ///
    /// Stored history is kept; only the periodic eviction stops. A panicked
    /// sweep task is logged, not propagated.
    pub async fn stop_sweep(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.cancel.cancel();
            if let Err(e) = sweeper.handle.await {
                warn!("Cache sweep task failed: {}", e);
            }
            debug!("Cache sweep stopped");
        }
    }
}

impl<S> Drop for MemoryCache<S> {
    fn drop(&mut self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.cancel.cancel();
        }
    }
}

#[async_trait::async_trait]
impl<S: Sample> Sink<S> for MemoryCache<S> {
    async fn init(&mut self, _debug: bool) -> ComponentResult<()> {
        self.start_sweep();
        Ok(())
    }

    async fn consume(&mut self, sample: &S) -> ComponentResult<()> {
        self.store(sample);
        Ok(())
    }

    async fn close(&mut self) -> ComponentResult<()> {
        self.stop_sweep().await;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "cache"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use serde::Serialize;
    use serde_json::{json, Value};

    use super::*;

    const EPOCH: i64 = 1_700_000_000;

    /// Clock set by hand.
    #[derive(Default)]
    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn at(ts: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(ts)))
        }

        fn set(&self, ts: i64) {
            self.0.store(ts, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Follows tokio's (pausable) clock.
    struct TokioClock {
        base: tokio::time::Instant,
    }

    impl Clock for TokioClock {
        fn now(&self) -> i64 {
            EPOCH + self.base.elapsed().as_secs() as i64
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    struct Reading {
        temperature: f64,
    }

    #[test]
    fn test_last_before_first_consume() {
        let cache: MemoryCache<Reading> = MemoryCache::new(Duration::from_secs(3600));
        assert!(cache.last().is_none());
        assert_eq!(cache.reader().last_or_default(), Reading::default());
        assert!(cache.reader().data_default().unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_with_timestamp() {
        let clock = ManualClock::at(EPOCH);
        let cache = MemoryCache::with_clock(Duration::from_secs(3600), clock);
        cache.store(&Reading { temperature: 20.5 });

        assert_eq!(cache.last(), Some(Reading { temperature: 20.5 }));
        let data = cache.reader().data_default().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(
            Value::Object(data[0].clone()),
            json!({"temperature": 20.5, "ts": EPOCH})
        );
    }

    #[test]
    fn test_data_ascending_by_ts() {
        let clock = ManualClock::at(EPOCH + 30);
        let cache = MemoryCache::with_clock(Duration::from_secs(3600), clock.clone());
        for (offset, value) in [(30, 3.0), (10, 1.0), (20, 2.0)] {
            clock.set(EPOCH + offset);
            cache.store(&value);
        }

        let data = cache.data(project_default::<f64>).unwrap();
        let ts: Vec<i64> = data.iter().map(|e| e[TS_FIELD].as_i64().unwrap()).collect();
        assert_eq!(ts, vec![EPOCH + 10, EPOCH + 20, EPOCH + 30]);
        assert_eq!(data[0]["value"], json!(1.0));
        // `latest` is the last consumed, not the newest timestamp.
        assert_eq!(cache.last(), Some(2.0));
    }

    #[test]
    fn test_same_second_last_write_wins() {
        let clock = ManualClock::at(EPOCH);
        let cache = MemoryCache::with_clock(Duration::from_secs(3600), clock);
        cache.store(&1u32);
        cache.store(&2u32);

        let data = cache.reader().data_default().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["value"], json!(2));
    }

    #[test]
    fn test_evict_keeps_window_boundary() {
        let clock = ManualClock::at(EPOCH);
        let cache = MemoryCache::with_clock(Duration::from_secs(60), clock.clone());
        cache.store(&1u8);

        clock.set(EPOCH + 60);
        assert_eq!(cache.evict_expired(), 0);
        assert_eq!(cache.reader().len(), 1);

        clock.set(EPOCH + 61);
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.reader().is_empty());
        // Eviction never touches the latest sample.
        assert_eq!(cache.last(), Some(1u8));
    }

    #[test]
    fn test_projector_error_propagates() {
        fn failing(_: &u8) -> ComponentResult<Entry> {
            Err(crate::core::error::ComponentError::Other("no".into()))
        }
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.store(&1u8);
        assert!(cache.data(failing).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_after_retention() {
        let clock = Arc::new(TokioClock {
            base: tokio::time::Instant::now(),
        });
        let mut cache = MemoryCache::with_clock(Duration::from_secs(60 * 60), clock);
        Sink::init(&mut cache, false).await.unwrap();
        Sink::consume(&mut cache, &Reading { temperature: 1.0 }).await.unwrap();

        tokio::time::sleep(Duration::from_secs(59 * 60)).await;
        assert_eq!(cache.reader().len(), 1);

        tokio::time::sleep(Duration::from_secs(16 * 60 + 1)).await;
        assert!(cache.reader().is_empty());
        assert!(cache.last().is_some());

        Sink::close(&mut cache).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut cache: MemoryCache<u8> = MemoryCache::new(Duration::from_secs(60));
        Sink::init(&mut cache, false).await.unwrap();
        assert!(cache.is_sweeping());

        Sink::close(&mut cache).await.unwrap();
        assert!(!cache.is_sweeping());
        Sink::close(&mut cache).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_readers() {
        let cache: MemoryCache<u64> = MemoryCache::new(Duration::from_secs(60));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reader = cache.reader();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        let _ = reader.last();
                        let _ = reader.data_default().unwrap();
                    }
                })
            })
            .collect();

        for i in 0..100 {
            cache.store(&i);
        }
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(cache.last(), Some(99));
    }
}
