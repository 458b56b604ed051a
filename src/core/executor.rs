//! Polling loop: one source, many sinks, a failure budget.
//!
//! The `Executor` owns the components of a deployment. Once per interval it
//! asks the source for a sample and hands it to every sink in registration
//! order. Consecutive failures are counted; when the count reaches the budget
//! the executor stops on its own. A stop requested through the
//! [`Lifecycle`] interrupts the wait between ticks but never a tick itself.
//!
//! ```text
//! Idle ──init ok──► Running ──stop requested / budget──► Stopping ──cleanup──► Stopped
//!   └──init failed──────────────────────────────────────► Stopping ──cleanup──► Stopped
//! ```

use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{
    error::ExecutorError,
    lifecycle::{ExecutorState, Lifecycle},
    traits::{Sample, Sink, Source},
};
use crate::config::executor::ExecutorConfig;

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A stop was requested through the lifecycle.
    Cancelled,
    /// Too many consecutive failures.
    FailureBudgetExhausted { failures: u32 },
}

/// Outcome of one tick, as far as the budget is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TickOutcome {
    failures: u32,
}

pub struct Executor<S: Sample> {
    name: String,
    interval: Duration,
    fail_budget: u32,
    fail_on_consume: bool,
    debug: bool,
    lifecycle: Lifecycle,
    source: Box<dyn Source<S>>,
    sinks: Vec<Box<dyn Sink<S>>>,
    consecutive_failures: u32,
    tick: u64,
    started: bool,
    /// Sinks whose init was attempted; only those are closed.
    attempted_sinks: usize,
}

impl<S: Sample> Executor<S> {
    /// Registers the components and calls `setup` on each with the
    /// deployment name.
    pub fn new(
        name: impl Into<String>,
        config: &ExecutorConfig,
        lifecycle: Lifecycle,
        mut source: Box<dyn Source<S>>,
        mut sinks: Vec<Box<dyn Sink<S>>>,
    ) -> Self {
        let name = name.into();
        source.setup(&name);
        for sink in sinks.iter_mut() {
            sink.setup(&name);
        }

        Self {
            name,
            interval: config.interval(),
            fail_budget: config.fail_budget,
            fail_on_consume: config.fail_on_consume,
            debug: config.debug,
            lifecycle,
            source,
            sinks,
            consecutive_failures: 0,
            tick: 0,
            started: false,
            attempted_sinks: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Runs until a stop is requested or the failure budget is exhausted.
    ///
    /// Cleanup (source first, then sinks in registration order) runs exactly
    /// once before returning, including after an init failure.
    ///
    /// # Errors
    ///
    /// - [`ExecutorError::Init`] when the source or a sink fails to
    ///   initialize. Nothing is produced in that case.
    /// - [`ExecutorError::AlreadyStarted`] on a second call.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let lifecycle = Lifecycle::new();
    /// let mut executor = Executor::new(
    ///     "boiler",
    ///     &config.executor,
    ///     lifecycle.clone(),
    ///     Box::new(RandomSource::new(None)),
    ///     vec![Box::new(ConsoleSink::<f64>::new())],
    /// );
    /// tokio::spawn(signals::route_shutdown(lifecycle));
    ///
    /// match executor.run().await? {
    ///     StopReason::Cancelled => {}
    ///     StopReason::FailureBudgetExhausted { failures } => std::process::exit(2),
    /// }
    /// ```
    pub async fn run(&mut self) -> Result<StopReason, ExecutorError> {
        if self.started {
            return Err(ExecutorError::AlreadyStarted);
        }
        self.started = true;

        let sinks: Vec<&str> = self.sinks.iter().map(|s| s.kind()).collect();
        info!(
            "Starting '{}': source={}, sinks=[{}], interval={}s, fail_budget={}",
            self.name,
            self.source.kind(),
            sinks.join(", "),
            self.interval.as_secs(),
            self.fail_budget
        );

        if let Err(e) = self.init_all().await {
            self.lifecycle.set_state(ExecutorState::Stopping);
            self.cleanup().await;
            self.lifecycle.set_state(ExecutorState::Stopped);
            return Err(e);
        }

        self.lifecycle.set_state(ExecutorState::Running);
        let reason = self.tick_loop().await;

        self.lifecycle.set_state(ExecutorState::Stopping);
        self.cleanup().await;
        self.lifecycle.set_state(ExecutorState::Stopped);

        match reason {
            StopReason::Cancelled => info!("Executor '{}' stopped", self.name),
            StopReason::FailureBudgetExhausted { failures } => error!(
                "Executor '{}' stopped after {} consecutive failures",
                self.name, failures
            ),
        }
        Ok(reason)
    }

    /// Source first, then sinks in order. Stops at the first failure; the
    /// failing component counts as attempted and is closed with the others.
    async fn init_all(&mut self) -> Result<(), ExecutorError> {
        let kind = self.source.kind();
        self.source
            .init(self.debug)
            .await
            .map_err(|source| ExecutorError::Init { kind, source })?;
        debug!("Initialized source '{}'", kind);

        for sink in self.sinks.iter_mut() {
            self.attempted_sinks += 1;
            let kind = sink.kind();
            sink.init(self.debug)
                .await
                .map_err(|source| ExecutorError::Init { kind, source })?;
            debug!("Initialized sink '{}'", kind);
        }
        Ok(())
    }

    async fn tick_loop(&mut self) -> StopReason {
        let mut next = Instant::now() + self.interval;

        loop {
            tokio::select! {
                biased;
                _ = self.lifecycle.cancelled() => return StopReason::Cancelled,
                _ = sleep_until(next) => {}
            }

            if self.lifecycle.is_stop_requested() {
                return StopReason::Cancelled;
            }

            if self.fail_budget > 0 && self.consecutive_failures >= self.fail_budget {
                return StopReason::FailureBudgetExhausted {
                    failures: self.consecutive_failures,
                };
            }

            self.tick += 1;
            let outcome = self.run_tick().await;
            if outcome.failures == 0 {
                if self.consecutive_failures > 0 {
                    info!(
                        "Tick {} succeeded, resetting {} consecutive failures",
                        self.tick, self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
            } else {
                self.consecutive_failures += outcome.failures;
            }

            // A slow tick pushes the schedule back instead of bursting.
            next += self.interval;
            let now = Instant::now();
            if next < now {
                next = now + self.interval;
            }
        }
    }

    async fn run_tick(&mut self) -> TickOutcome {
        let sample = match self.source.produce().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(
                    "Tick {}: source '{}' failed ({} consecutive): {}",
                    self.tick,
                    self.source.kind(),
                    self.consecutive_failures + 1,
                    e
                );
                return TickOutcome { failures: 1 };
            }
        };
        debug!("Tick {}: produced {:?}", self.tick, sample);

        let mut failures = 0;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.consume(&sample).await {
                warn!("Tick {}: sink '{}' failed: {}", self.tick, sink.kind(), e);
                if self.fail_on_consume {
                    failures += 1;
                }
            }
        }
        TickOutcome { failures }
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.source.close().await {
            warn!("Failed to close source '{}': {}", self.source.kind(), e);
        }
        for sink in self.sinks.iter_mut().take(self.attempted_sinks) {
            if let Err(e) = sink.close().await {
                warn!("Failed to close sink '{}': {}", sink.kind(), e);
            }
        }
        debug!("All components closed");
    }
}

async fn sleep_until(deadline: Instant) {
    sleep(deadline.saturating_duration_since(Instant::now())).await
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    };

    use tracing_test::traced_test;

    use super::*;
    use crate::core::error::{ComponentError, ComponentResult};

    /// Shared view of what the components saw.
    #[derive(Default)]
    struct Calls {
        produced: AtomicU32,
        consumed: AtomicU32,
        events: Mutex<Vec<String>>,
    }

    impl Calls {
        fn log(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    struct MockSource {
        calls: Arc<Calls>,
        fail_produce: Arc<AtomicBool>,
        /// Per-tick failures; `fail_produce` decides once it runs out.
        script: Vec<bool>,
        fail_init: bool,
        next: u32,
    }

    #[async_trait::async_trait]
    impl Source<u32> for MockSource {
        fn setup(&mut self, name: &str) {
            self.calls.log(format!("setup source {name}"));
        }

        async fn init(&mut self, _debug: bool) -> ComponentResult<()> {
            self.calls.log("init source");
            if self.fail_init {
                return Err(ComponentError::Other("source init".into()));
            }
            Ok(())
        }

        async fn produce(&mut self) -> ComponentResult<u32> {
            let call = self.calls.produced.fetch_add(1, Ordering::SeqCst) as usize;
            let fail = match self.script.get(call) {
                Some(fail) => *fail,
                None => self.fail_produce.load(Ordering::SeqCst),
            };
            if fail {
                return Err(ComponentError::Other("produce".into()));
            }
            self.next += 1;
            Ok(self.next)
        }

        async fn close(&mut self) -> ComponentResult<()> {
            self.calls.log("close source");
            Ok(())
        }

        fn kind(&self) -> &'static str {
            "mock-source"
        }
    }

    struct MockSink {
        id: &'static str,
        calls: Arc<Calls>,
        fail_consume: bool,
        fail_init: bool,
        fail_close: bool,
    }

    #[async_trait::async_trait]
    impl Sink<u32> for MockSink {
        async fn init(&mut self, _debug: bool) -> ComponentResult<()> {
            self.calls.log(format!("init {}", self.id));
            if self.fail_init {
                return Err(ComponentError::Other("sink init".into()));
            }
            Ok(())
        }

        async fn consume(&mut self, sample: &u32) -> ComponentResult<()> {
            self.calls.consumed.fetch_add(1, Ordering::SeqCst);
            self.calls.log(format!("consume {} {}", self.id, sample));
            if self.fail_consume {
                return Err(ComponentError::Other("consume".into()));
            }
            Ok(())
        }

        async fn close(&mut self) -> ComponentResult<()> {
            self.calls.log(format!("close {}", self.id));
            if self.fail_close {
                return Err(ComponentError::Other("close".into()));
            }
            Ok(())
        }

        fn kind(&self) -> &'static str {
            self.id
        }
    }

    struct Harness {
        calls: Arc<Calls>,
        fail_produce: Arc<AtomicBool>,
        lifecycle: Lifecycle,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                calls: Arc::new(Calls::default()),
                fail_produce: Arc::new(AtomicBool::new(false)),
                lifecycle: Lifecycle::new(),
            }
        }

        fn source(&self) -> Box<dyn Source<u32>> {
            Box::new(MockSource {
                calls: self.calls.clone(),
                fail_produce: self.fail_produce.clone(),
                script: Vec::new(),
                fail_init: false,
                next: 0,
            })
        }

        fn scripted_source(&self, script: Vec<bool>) -> Box<dyn Source<u32>> {
            Box::new(MockSource {
                calls: self.calls.clone(),
                fail_produce: self.fail_produce.clone(),
                script,
                fail_init: false,
                next: 0,
            })
        }

        fn sink(&self, id: &'static str) -> MockSink {
            MockSink {
                id,
                calls: self.calls.clone(),
                fail_consume: false,
                fail_init: false,
                fail_close: false,
            }
        }

        fn executor(
            &self,
            config: ExecutorConfig,
            source: Box<dyn Source<u32>>,
            sinks: Vec<Box<dyn Sink<u32>>>,
        ) -> Executor<u32> {
            Executor::new("test", &config, self.lifecycle.clone(), source, sinks)
        }
    }

    /// Cleanup ran once, source first, then the listed sinks in order.
    fn assert_closed_once(events: &[String], sinks: &[&str]) {
        let mut expected = vec!["close source".to_string()];
        expected.extend(sinks.iter().map(|id| format!("close {id}")));
        assert!(
            events.ends_with(&expected),
            "events {events:?} do not end with {expected:?}"
        );
        for close in &expected {
            assert_eq!(events.iter().filter(|e| *e == close).count(), 1, "{close}");
        }
    }

    fn config(interval: u64, fail_budget: u32, fail_on_consume: bool) -> ExecutorConfig {
        ExecutorConfig {
            interval,
            fail_budget,
            fail_on_consume,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn budget_stops_before_producing_tick_f_plus_one() {
        let h = Harness::new();
        h.fail_produce.store(true, Ordering::SeqCst);
        let mut executor = h.executor(config(1, 3, false), h.source(), vec![Box::new(h.sink("a"))]);

        let reason = executor.run().await.unwrap();

        assert_eq!(reason, StopReason::FailureBudgetExhausted { failures: 3 });
        assert_eq!(h.calls.produced.load(Ordering::SeqCst), 3);
        assert_eq!(h.calls.consumed.load(Ordering::SeqCst), 0);
        assert_eq!(h.lifecycle.state(), ExecutorState::Stopped);
        assert!(logs_contain("source 'mock-source' failed"));
        assert_closed_once(&h.calls.events(), &["a"]);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn success_resets_failure_counter() {
        let h = Harness::new();
        // Without resets the budget of 2 would trip before the 4th tick.
        let source = h.scripted_source(vec![true, false, true, false, true, true]);
        let mut executor = h.executor(config(1, 2, false), source, vec![Box::new(h.sink("a"))]);

        let reason = executor.run().await.unwrap();

        assert_eq!(reason, StopReason::FailureBudgetExhausted { failures: 2 });
        assert_eq!(h.calls.produced.load(Ordering::SeqCst), 6);
        assert_eq!(h.calls.consumed.load(Ordering::SeqCst), 2);
        assert!(logs_contain("resetting 1 consecutive failures"));
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_budget_never_trips() {
        let h = Harness::new();
        h.fail_produce.store(true, Ordering::SeqCst);
        let mut executor = h.executor(config(1, 0, false), h.source(), vec![]);
        let lifecycle = h.lifecycle.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50_500)).await;
            lifecycle.request_stop();
        });

        let reason = executor.run().await.unwrap();
        assert_eq!(reason, StopReason::Cancelled);
        assert_eq!(h.calls.produced.load(Ordering::SeqCst), 50);
        assert_eq!(executor.consecutive_failures(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failures_count_only_with_fail_on_consume() {
        let h = Harness::new();
        let mut failing = h.sink("bad");
        failing.fail_consume = true;
        let mut executor = h.executor(
            config(1, 2, true),
            h.source(),
            vec![Box::new(failing), Box::new(h.sink("good"))],
        );

        let reason = executor.run().await.unwrap();

        assert_eq!(reason, StopReason::FailureBudgetExhausted { failures: 2 });
        assert_eq!(h.calls.produced.load(Ordering::SeqCst), 2);
        // The failing sink never keeps the sample from the next one.
        let events = h.calls.events();
        assert!(events.contains(&"consume good 1".to_string()));
        assert!(events.contains(&"consume good 2".to_string()));
        assert_closed_once(&events, &["bad", "good"]);
        assert_eq!(h.lifecycle.state(), ExecutorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failures_ignored_by_default() {
        let h = Harness::new();
        let mut failing = h.sink("bad");
        failing.fail_consume = true;
        let mut executor = h.executor(config(1, 1, false), h.source(), vec![Box::new(failing)]);
        let lifecycle = h.lifecycle.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5_500)).await;
            lifecycle.request_stop();
        });

        assert_eq!(executor.run().await.unwrap(), StopReason::Cancelled);
        assert_eq!(h.calls.consumed.load(Ordering::SeqCst), 5);
        assert_eq!(executor.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sinks_called_in_registration_order() {
        let h = Harness::new();
        let mut executor = h.executor(
            config(1, 10, false),
            h.source(),
            vec![Box::new(h.sink("first")), Box::new(h.sink("second"))],
        );
        let lifecycle = h.lifecycle.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            lifecycle.request_stop();
        });
        executor.run().await.unwrap();

        assert_eq!(
            h.calls.events(),
            vec![
                "setup source test",
                "init source",
                "init first",
                "init second",
                "consume first 1",
                "consume second 1",
                "close source",
                "close first",
                "close second",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let h = Harness::new();
        let mut executor = h.executor(config(3600, 10, false), h.source(), vec![]);
        let lifecycle = h.lifecycle.clone();

        let started = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            lifecycle.request_stop();
        });

        assert_eq!(executor.run().await.unwrap(), StopReason::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(h.calls.produced.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_requested_before_run_produces_nothing() {
        let h = Harness::new();
        let mut executor = h.executor(config(1, 10, false), h.source(), vec![Box::new(h.sink("a"))]);
        h.lifecycle.request_stop();

        assert_eq!(executor.run().await.unwrap(), StopReason::Cancelled);
        assert_eq!(h.calls.produced.load(Ordering::SeqCst), 0);
        assert!(h.calls.events().contains(&"close a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn init_failure_closes_initialized_components() {
        let h = Harness::new();
        let mut broken = h.sink("broken");
        broken.fail_init = true;
        let mut executor = h.executor(
            config(1, 10, false),
            h.source(),
            vec![Box::new(h.sink("ok")), Box::new(broken), Box::new(h.sink("never"))],
        );

        let err = executor.run().await.unwrap_err();

        assert!(matches!(err, ExecutorError::Init { kind: "broken", .. }));
        assert_eq!(h.lifecycle.state(), ExecutorState::Stopped);
        assert_eq!(h.calls.produced.load(Ordering::SeqCst), 0);
        let events = h.calls.events();
        assert!(events.contains(&"close ok".to_string()));
        assert!(events.contains(&"close broken".to_string()));
        assert!(!events.contains(&"init never".to_string()));
        assert!(!events.contains(&"close never".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn source_init_failure_is_fatal() {
        let h = Harness::new();
        let source = Box::new(MockSource {
            calls: h.calls.clone(),
            fail_produce: h.fail_produce.clone(),
            script: Vec::new(),
            fail_init: true,
            next: 0,
        });
        let mut executor = h.executor(config(1, 10, false), source, vec![Box::new(h.sink("a"))]);

        let err = executor.run().await.unwrap_err();
        assert!(matches!(err, ExecutorError::Init { kind: "mock-source", .. }));
        let events = h.calls.events();
        assert!(events.contains(&"close source".to_string()));
        assert!(!events.contains(&"init a".to_string()));
        assert!(!events.contains(&"close a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn close_errors_are_logged_not_escalated() {
        let h = Harness::new();
        let mut sink = h.sink("sticky");
        sink.fail_close = true;
        let mut executor = h.executor(config(1, 10, false), h.source(), vec![Box::new(sink)]);
        h.lifecycle.request_stop();

        assert_eq!(executor.run().await.unwrap(), StopReason::Cancelled);
        assert!(logs_contain("Failed to close sink 'sticky'"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_twice_is_rejected() {
        let h = Harness::new();
        let mut executor = h.executor(config(1, 10, false), h.source(), vec![]);
        h.lifecycle.request_stop();

        executor.run().await.unwrap();
        assert!(matches!(
            executor.run().await,
            Err(ExecutorError::AlreadyStarted)
        ));
    }
}
