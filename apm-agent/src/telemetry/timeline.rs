//! Start/stop timing of named operations, scoped to the open transaction.
//!
//! Offsets are measured from the start of the transaction that was open when
//! a measure began (or from the request start when none was). Finished
//! measurements stay buffered for the life of the collector; `collect` only
//! filters them.

use apm_types::Context;
use parking_lot::Mutex;
use std::sync::Arc;

use super::context::ApmContext;
use super::measurement::{DEFAULT_ACTION, MeasureOptions, Measurement, PendingMeasure};
use super::registry::Collector;
use crate::error::{ApmError, ApmResult};

pub const TIMELINE_COLLECTOR_NAME: &str = "timeline";

#[derive(Debug)]
struct StartedMeasure {
    name: String,
    /// Bumped on every start, so a restarted name gets a fresh id
    id: u64,
    measure: PendingMeasure,
}

#[derive(Debug, Default)]
struct TimelineState {
    next_id: u64,
    /// Started measures in start order; names are unique
    started: Vec<StartedMeasure>,
    measures: Vec<Measurement>,
}

impl TimelineState {
    fn put_started(&mut self, name: &str, measure: PendingMeasure) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        match self.started.iter_mut().find(|s| s.name == name) {
            Some(entry) => {
                entry.id = id;
                entry.measure = measure;
            }
            None => self.started.push(StartedMeasure {
                name: name.to_string(),
                id,
                measure,
            }),
        }
        id
    }

    /// Remove the pending entry for `name`; with `id`, only that exact start.
    fn pull_started(&mut self, name: &str, id: Option<u64>) -> Option<PendingMeasure> {
        let idx = self
            .started
            .iter()
            .position(|s| s.name == name && id.is_none_or(|id| s.id == id))?;
        Some(self.started.remove(idx).measure)
    }
}

/// Collects the duration of arbitrary named operations.
#[derive(Debug)]
pub struct TimelineCollector {
    ctx: Arc<ApmContext>,
    state: Mutex<TimelineState>,
}

impl TimelineCollector {
    pub fn new(ctx: Arc<ApmContext>) -> Self {
        Self {
            ctx,
            state: Mutex::new(TimelineState::default()),
        }
    }

    /// Start a measure. Starting a name that is already running replaces it.
    pub fn start_measure(&self, name: &str, options: MeasureOptions) {
        self.start_entry(name, options);
    }

    fn start_entry(&self, name: &str, options: MeasureOptions) -> u64 {
        let transaction = self.ctx.latest_transaction_name();
        let start = options.start_time.unwrap_or_else(|| self.ctx.now());
        let origin = self.ctx.origin_time(&transaction);

        let label = options
            .label
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| name.to_string());

        log::debug!("[TIMELINE] Measuring {} --- '{}'", label, transaction);

        self.state.lock().put_started(
            name,
            PendingMeasure {
                label,
                start: start - origin,
                span_type: options.span_type,
                action: options.action,
                transaction,
            },
        )
    }

    pub fn has_started_measure(&self, name: &str) -> bool {
        self.state.lock().started.iter().any(|s| s.name == name)
    }

    /// Stop a running measure, attaching `context` to the finished record.
    pub fn stop_measure(&self, name: &str, context: Context) -> ApmResult<()> {
        self.stop_entry(name, None, context)
    }

    fn stop_entry(&self, name: &str, id: Option<u64>, context: Context) -> ApmResult<()> {
        let end = self.ctx.now();
        let measure = self
            .state
            .lock()
            .pull_started(name, id)
            .ok_or_else(|| ApmError::MeasureNotStarted(name.to_string()))?;

        self.finish(measure, end, context);
        Ok(())
    }

    /// Start a measure that stops itself when the guard is dropped.
    ///
    /// The guard only ever stops the start it was created for: once a collect
    /// pass has flushed it, a later measure reusing the name is left alone.
    pub fn start_guarded(self: &Arc<Self>, name: &str, options: MeasureOptions) -> MeasureGuard {
        let id = self.start_entry(name, options);
        MeasureGuard {
            collector: Arc::clone(self),
            name: Some(name.to_string()),
            id,
        }
    }

    /// Record a measure whose bounds are already known.
    ///
    /// `start` and `end` are seconds relative to the origin of `transaction`.
    /// A missing `action` is recorded as `"request"`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_measure(
        &self,
        label: &str,
        start: f64,
        end: f64,
        span_type: &str,
        action: Option<&str>,
        context: Context,
        transaction: &str,
    ) {
        self.push(Measurement::from_offsets(
            label,
            start,
            end,
            span_type,
            Some(action.unwrap_or(DEFAULT_ACTION).to_string()),
            context,
            transaction,
        ));
    }

    fn push(&self, measurement: Measurement) {
        log::debug!(
            "[TIMELINE] Measured {} --- '{}'",
            measurement.label,
            measurement.transaction
        );
        self.state.lock().measures.push(measurement);
    }

    /// All finished measurements, in recording order.
    pub fn measures(&self) -> Vec<Measurement> {
        self.state.lock().measures.clone()
    }

    pub fn started_count(&self) -> usize {
        self.state.lock().started.len()
    }

    fn finish(&self, measure: PendingMeasure, end: f64, context: Context) {
        let origin = self.ctx.origin_time(&measure.transaction);
        self.push(Measurement::from_offsets(
            measure.label,
            measure.start,
            end - origin,
            measure.span_type,
            measure.action,
            context,
            measure.transaction,
        ));
    }
}

impl Collector for TimelineCollector {
    fn name(&self) -> &str {
        TIMELINE_COLLECTOR_NAME
    }

    fn collect(&self, transaction_name: &str) -> ApmResult<Vec<Measurement>> {
        // Anything still running for this transaction ends now
        let end = self.ctx.now();
        let unfinished: Vec<PendingMeasure> = {
            let mut state = self.state.lock();
            let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.started)
                .into_iter()
                .partition(|s| s.measure.transaction == transaction_name);
            state.started = rest;
            matching.into_iter().map(|s| s.measure).collect()
        };
        for measure in unfinished {
            log::debug!("[TIMELINE] Auto-stopping {}", measure.label);
            self.finish(measure, end, Context::new());
        }

        let collected: Vec<Measurement> = self
            .state
            .lock()
            .measures
            .iter()
            .filter(|m| m.transaction == transaction_name)
            .cloned()
            .collect();
        for measure in &collected {
            log::debug!("[TIMELINE] Collecting {}", measure.label);
        }
        Ok(collected)
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.started.clear();
        state.measures.clear();
    }
}

/// RAII guard that stops its measure when dropped.
pub struct MeasureGuard {
    collector: Arc<TimelineCollector>,
    name: Option<String>,
    id: u64,
}

impl MeasureGuard {
    /// Stop the measure now, attaching `context`.
    pub fn stop(mut self, context: Context) -> ApmResult<()> {
        match self.name.take() {
            Some(name) => self.collector.stop_entry(&name, Some(self.id), context),
            None => Ok(()),
        }
    }
}

impl Drop for MeasureGuard {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            // Already flushed by a collect pass if this fails
            if let Err(e) = self.collector.stop_entry(&name, Some(self.id), Context::new()) {
                log::debug!("[TIMELINE] Guard for {} had nothing to stop: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::client::TransactionProvider;
    use crate::telemetry::clock::ManualClock;
    use crate::telemetry::memory::InMemoryAgent;
    use serde_json::json;

    struct Fixture {
        clock: Arc<ManualClock>,
        agent: Arc<InMemoryAgent>,
        ctx: Arc<ApmContext>,
        timeline: Arc<TimelineCollector>,
    }

    fn fixture(request_start: f64) -> Fixture {
        let clock = Arc::new(ManualClock::new(request_start));
        let agent = Arc::new(InMemoryAgent::with_clock(clock.clone()));
        let ctx = Arc::new(ApmContext::with_clock(agent.clone(), clock.clone(), request_start));
        let timeline = Arc::new(TimelineCollector::new(ctx.clone()));
        Fixture {
            clock,
            agent,
            ctx,
            timeline,
        }
    }

    fn open(f: &Fixture, name: &str, start: f64) {
        f.agent.start_transaction(name, Context::new(), Some(start)).unwrap();
        f.ctx.with_stack(|stack| stack.push(name));
    }

    #[test]
    fn test_start_stop_inside_transaction() {
        let f = fixture(0.0);
        open(&f, "req", 0.0);

        f.clock.set(0.100);
        f.timeline.start_measure("q1", MeasureOptions::new().with_type("db.query"));
        assert!(f.timeline.has_started_measure("q1"));

        f.clock.set(0.150);
        f.timeline.stop_measure("q1", Context::new()).unwrap();
        assert!(!f.timeline.has_started_measure("q1"));

        let measures = f.timeline.measures();
        assert_eq!(measures.len(), 1);
        assert_eq!(measures[0].start, 100.0);
        assert_eq!(measures[0].duration, 50.0);
        assert_eq!(measures[0].transaction, "req");
        assert_eq!(measures[0].span_type, "db.query");
        assert_eq!(measures[0].label, "q1");
    }

    #[test]
    fn test_unattached_measure_is_relative_to_request_start() {
        let f = fixture(10.0);
        f.clock.set(10.5);
        f.timeline.start_measure("boot", MeasureOptions::default());
        f.clock.set(10.75);
        f.timeline.stop_measure("boot", Context::new()).unwrap();

        let m = &f.timeline.measures()[0];
        assert_eq!(m.start, 500.0);
        assert_eq!(m.duration, 250.0);
        assert!(m.is_unattached());
    }

    #[test]
    fn test_explicit_start_time_and_label() {
        let f = fixture(100.0);
        open(&f, "req", 100.0);
        f.clock.set(100.2);

        f.timeline.start_measure(
            "k",
            MeasureOptions::new()
                .with_label("Company SELECT")
                .with_action("SELECT")
                .started_at(100.05),
        );
        f.timeline.stop_measure("k", Context::new()).unwrap();

        let m = &f.timeline.measures()[0];
        assert_eq!(m.label, "Company SELECT");
        assert_eq!(m.action.as_deref(), Some("SELECT"));
        assert!((m.start - 50.0).abs() < 1e-6);
        assert!((m.duration - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_stop_unknown_fails() {
        let f = fixture(0.0);
        let err = f.timeline.stop_measure("never", Context::new()).unwrap_err();
        assert!(matches!(err, ApmError::MeasureNotStarted(ref n) if n == "never"));
        assert!(!f.timeline.has_started_measure("never"));
        assert!(f.timeline.measures().is_empty());
    }

    #[test]
    fn test_stop_twice_fails_second_time() {
        let f = fixture(0.0);
        f.timeline.start_measure("a", MeasureOptions::default());
        f.timeline.stop_measure("a", Context::new()).unwrap();
        assert!(matches!(
            f.timeline.stop_measure("a", Context::new()),
            Err(ApmError::MeasureNotStarted(_))
        ));
    }

    #[test]
    fn test_restart_overwrites_pending() {
        let f = fixture(0.0);
        f.clock.set(1.0);
        f.timeline.start_measure("a", MeasureOptions::default());
        f.clock.set(2.0);
        f.timeline.start_measure("a", MeasureOptions::default());
        assert_eq!(f.timeline.started_count(), 1);

        f.clock.set(3.0);
        f.timeline.stop_measure("a", Context::new()).unwrap();
        let m = &f.timeline.measures()[0];
        assert_eq!(m.start, 2000.0);
        assert_eq!(m.duration, 1000.0);
    }

    #[test]
    fn test_start_offset_is_not_recomputed_at_stop() {
        let f = fixture(0.0);
        open(&f, "req", 0.0);
        f.clock.set(0.2);
        f.timeline.start_measure("a", MeasureOptions::default());

        // A nested transaction opens between start and stop
        f.clock.set(0.3);
        open(&f, "job", 0.3);
        f.clock.set(0.5);
        f.timeline.stop_measure("a", Context::new()).unwrap();

        let m = &f.timeline.measures()[0];
        assert_eq!(m.transaction, "req");
        assert_eq!(m.start, 200.0);
        assert_eq!(m.duration, 300.0);
        assert!(m.duration >= 0.0);
    }

    #[test]
    fn test_stop_context_is_kept() {
        let f = fixture(0.0);
        f.timeline.start_measure("a", MeasureOptions::default());
        let mut ctx = Context::new();
        ctx.insert("user".to_string(), json!(1));
        f.timeline.stop_measure("a", ctx).unwrap();

        assert_eq!(f.timeline.measures()[0].context["user"], json!(1));
    }

    #[test]
    fn test_add_measure_converts_seconds() {
        let f = fixture(0.0);
        f.timeline
            .add_measure("render", 0.25, 0.5, "template", Some("render"), Context::new(), "req");

        let m = &f.timeline.measures()[0];
        assert_eq!(m.start, 250.0);
        assert_eq!(m.duration, 250.0);
        assert_eq!(m.action.as_deref(), Some("render"));
        assert!(f.timeline.collect("req").unwrap().len() == 1);
    }

    #[test]
    fn test_collect_flushes_pending_for_that_transaction_only() {
        let f = fixture(0.0);
        f.timeline.start_measure("loose", MeasureOptions::default());
        open(&f, "req", 0.0);
        f.clock.set(0.1);
        f.timeline.start_measure("forgotten", MeasureOptions::default());
        f.clock.set(0.4);

        let collected = f.timeline.collect("req").unwrap();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].label, "forgotten");
        assert_eq!(collected[0].duration, 300.0);
        assert!(!f.timeline.has_started_measure("forgotten"));
        assert!(f.timeline.has_started_measure("loose"));

        let unattached = f.timeline.collect("").unwrap();
        assert_eq!(unattached.len(), 1);
        assert_eq!(unattached[0].label, "loose");
    }

    #[test]
    fn test_collect_is_repeatable_and_never_duplicates() {
        let f = fixture(0.0);
        open(&f, "req", 0.0);
        for i in 0..3 {
            f.timeline.start_measure(&format!("m{}", i), MeasureOptions::default());
            f.timeline.stop_measure(&format!("m{}", i), Context::new()).unwrap();
        }

        let first = f.timeline.collect("req").unwrap();
        f.timeline.start_measure("late", MeasureOptions::default());
        let second = f.timeline.collect("req").unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 4);
        assert_eq!(&second[..3], &first[..]);
        let labels: Vec<_> = second.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["m0", "m1", "m2", "late"]);
    }

    #[test]
    fn test_guard_stops_on_drop() {
        let f = fixture(0.0);
        {
            let _guard = f.timeline.start_guarded("scoped", MeasureOptions::default());
            f.clock.advance(0.01);
        }
        assert!(!f.timeline.has_started_measure("scoped"));
        assert_eq!(f.timeline.measures()[0].duration, 10.0);

        let guard = f.timeline.start_guarded("explicit", MeasureOptions::default());
        guard.stop(Context::new()).unwrap();
        assert_eq!(f.timeline.measures().len(), 2);
    }

    #[test]
    fn test_guard_leaves_restarted_name_alone() {
        let f = fixture(0.0);
        open(&f, "req", 0.0);
        let guard = f.timeline.start_guarded("work", MeasureOptions::default());

        f.clock.set(0.1);
        f.timeline.collect("req").unwrap();
        assert!(!f.timeline.has_started_measure("work"));

        f.clock.set(0.2);
        f.timeline.start_measure("work", MeasureOptions::default());
        f.clock.set(0.25);
        drop(guard);

        assert!(f.timeline.has_started_measure("work"));
        assert_eq!(f.timeline.measures().len(), 1);

        f.clock.set(0.3);
        f.timeline.stop_measure("work", Context::new()).unwrap();
        let measures = f.timeline.measures();
        assert_eq!(measures.len(), 2);
        assert_eq!(measures[1].start, 200.0);
        assert_eq!(measures[1].duration, 100.0);
    }

    #[test]
    fn test_guard_stop_after_restart_reports_not_started() {
        let f = fixture(0.0);
        let guard = f.timeline.start_guarded("work", MeasureOptions::default());
        f.timeline.start_measure("work", MeasureOptions::default());

        assert!(matches!(
            guard.stop(Context::new()),
            Err(ApmError::MeasureNotStarted(_))
        ));
        assert!(f.timeline.has_started_measure("work"));
    }

    #[test]
    fn test_action_defaults() {
        let f = fixture(0.0);
        f.timeline.add_measure("direct", 0.0, 0.1, "custom", None, Context::new(), "");
        f.timeline.start_measure("timed", MeasureOptions::default());
        f.timeline.stop_measure("timed", Context::new()).unwrap();

        let measures = f.timeline.measures();
        assert_eq!(measures[0].action.as_deref(), Some("request"));
        assert_eq!(measures[1].action, None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let f = fixture(0.0);
        f.timeline.start_measure("a", MeasureOptions::default());
        f.timeline.add_measure("b", 0.0, 1.0, "request", None, Context::new(), "");
        f.timeline.reset();
        assert_eq!(f.timeline.started_count(), 0);
        assert!(f.timeline.measures().is_empty());
        assert_eq!(f.timeline.name(), "timeline");
    }
}
