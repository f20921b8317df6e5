use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

/// Simple monotonic id generator for in-process identifiers.
#[derive(Debug)]
pub struct IdGenerator {
    next: Cell<u64>,
}

impl IdGenerator {
    /// Creates a new generator starting at the provided value.
    pub fn new(start: u64) -> Self {
        Self {
            next: Cell::new(start),
        }
    }

    /// Returns the next id in sequence.
    pub fn next(&self) -> u64 {
        let id = self.next.get();
        self.next.set(id + 1);
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Sink for named timeline events.
///
/// Recording is best effort: implementations must never fail the caller.
pub trait MetricsSink {
    /// Records a named event at the current point in time.
    fn add(&self, event: &str);
}

/// Single timeline entry: elapsed time since the timeline started and the
/// event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEvent {
    pub elapsed: Duration,
    pub name: String,
}

/// In-memory metrics sink that keeps an ordered timeline of events.
#[derive(Debug)]
pub struct TimelineMetrics {
    started: Instant,
    events: RefCell<Vec<TimelineEvent>>,
}

impl TimelineMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            events: RefCell::new(Vec::new()),
        }
    }

    /// Returns a copy of the recorded events in insertion order.
    pub fn events(&self) -> Vec<TimelineEvent> {
        self.events.borrow().clone()
    }

    /// Counts how many times an event with the given name was recorded.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.name == name)
            .count()
    }
}

impl Default for TimelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for TimelineMetrics {
    fn add(&self, event: &str) {
        let elapsed = self.started.elapsed();
        tracing::trace!(event, elapsed_ms = elapsed.as_millis() as u64, "metrics event");
        self.events.borrow_mut().push(TimelineEvent {
            elapsed,
            name: event.to_string(),
        });
    }
}
