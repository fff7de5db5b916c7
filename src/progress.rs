use std::sync::Mutex;

/// Pipeline stage a progress tick belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressStage {
    /// Fractional packaging progress, 0..=100.
    Packaging,
    /// Frames rendered so far, bounded by the composition duration.
    Rendering,
    /// Frames consumed by the encoder, bounded by the composition duration.
    Stitching,
}

/// Event sink for pipeline progress.
///
/// `value` is monotonically non-decreasing per stage and never exceeds
/// `max`. Implementations must tolerate concurrent invocation from frame
/// workers, hence `&self` and the `Send + Sync` bound.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: ProgressStage, value: u64, max: u64);
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _stage: ProgressStage, _value: u64, _max: u64) {}
}

/// Sink that forwards ticks to `tracing` at debug level. Used by the CLI.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, stage: ProgressStage, value: u64, max: u64) {
        tracing::debug!(?stage, value, max, "progress");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub value: u64,
    pub max: u64,
}

/// Sink that records every event, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn events_for(&self, stage: ProgressStage) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.stage == stage)
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn report(&self, stage: ProgressStage, value: u64, max: u64) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ProgressEvent { stage, value, max });
    }
}

/// Aggregate frame counter shared by concurrent workers.
///
/// Each completion advances a high-water mark under a lock and reports the
/// new value, so ticks reaching the sink never regress regardless of how
/// worker completions interleave.
pub(crate) struct MonotonicCounter {
    high_water: Mutex<u64>,
}

impl MonotonicCounter {
    pub(crate) fn new() -> Self {
        Self {
            high_water: Mutex::new(0),
        }
    }

    pub(crate) fn tick(&self, sink: &dyn ProgressSink, stage: ProgressStage, max: u64) -> u64 {
        let mut guard = self.high_water.lock().unwrap_or_else(|p| p.into_inner());
        *guard = (*guard + 1).min(max);
        let value = *guard;
        sink.report(stage, value, max);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.report(ProgressStage::Packaging, 0, 100);
        sink.report(ProgressStage::Packaging, 100, 100);
        sink.report(ProgressStage::Rendering, 1, 3);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].value, 100);
        assert_eq!(sink.events_for(ProgressStage::Rendering).len(), 1);
    }

    #[test]
    fn counter_is_monotonic_and_bounded_across_threads() {
        let sink = RecordingSink::new();
        let counter = MonotonicCounter::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        counter.tick(&sink, ProgressStage::Rendering, 40);
                    }
                });
            }
        });

        let events = sink.events_for(ProgressStage::Rendering);
        assert_eq!(events.len(), 40);
        let mut last = 0;
        for e in events {
            assert!(e.value >= last);
            assert!(e.value <= 40);
            last = e.value;
        }
        assert_eq!(last, 40);
    }
}
