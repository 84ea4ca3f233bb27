//! Fan-out sink

use costroute_core::{UsageRecord, UsageSink};
use std::sync::Arc;

/// Forwards every record to each inner sink, in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn UsageSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl UsageSink for FanoutSink {
    fn emit(&self, record: &UsageRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }
}
