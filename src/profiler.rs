use crate::descriptor::DescriptorId;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Clone, Debug)]
pub struct CallbackTimingSummary {
    pub id: DescriptorId,
    pub last_ms: f32,
    pub average_ms: f32,
    pub max_ms: f32,
    pub samples: u64,
}

#[derive(Default)]
struct CallbackTiming {
    last_ms: f32,
    total_ms: f32,
    max_ms: f32,
    samples: u64,
}

pub struct CallbackProfiler {
    enabled: bool,
    timings: HashMap<DescriptorId, CallbackTiming>,
}

impl CallbackProfiler {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, timings: HashMap::new() }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn scope<'a>(&'a mut self, id: &'a DescriptorId) -> CallbackProfileScope<'a> {
        let start = self.enabled.then(Instant::now);
        CallbackProfileScope { id, profiler: self, start }
    }

    fn record(&mut self, id: &DescriptorId, duration: f32) {
        let entry = self.timings.entry(id.clone()).or_default();
        entry.last_ms = duration;
        entry.max_ms = entry.max_ms.max(duration);
        entry.total_ms += duration;
        entry.samples += 1;
    }

    /// Drops timings for a descriptor that is no longer registered.
    pub fn forget(&mut self, id: &DescriptorId) {
        self.timings.remove(id);
    }

    pub fn summary(&self, id: &DescriptorId) -> Option<CallbackTimingSummary> {
        self.timings.get(id).map(|timing| summarize(id, timing))
    }

    pub fn summaries(&self) -> Vec<CallbackTimingSummary> {
        let mut out: Vec<_> = self.timings.iter().map(|(id, timing)| summarize(id, timing)).collect();
        out.sort_by(|a, b| b.last_ms.partial_cmp(&a.last_ms).unwrap_or(std::cmp::Ordering::Equal));
        out
    }
}

impl Default for CallbackProfiler {
    fn default() -> Self {
        Self::new(true)
    }
}

fn summarize(id: &DescriptorId, timing: &CallbackTiming) -> CallbackTimingSummary {
    let average_ms = if timing.samples == 0 { 0.0 } else { timing.total_ms / timing.samples as f32 };
    CallbackTimingSummary {
        id: id.clone(),
        last_ms: timing.last_ms,
        average_ms,
        max_ms: timing.max_ms,
        samples: timing.samples,
    }
}

pub struct CallbackProfileScope<'a> {
    id: &'a DescriptorId,
    profiler: &'a mut CallbackProfiler,
    start: Option<Instant>,
}

impl<'a> Drop for CallbackProfileScope<'a> {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            let duration_ms = start.elapsed().as_secs_f32() * 1000.0;
            self.profiler.record(self.id, duration_ms);
        }
    }
}
