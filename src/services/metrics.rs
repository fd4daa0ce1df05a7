//! Metric emission.
//!
//! Metrics ride the tracing pipeline as structured events under the
//! `postbox::metrics` target, so any subscriber (or a shipping layer) can
//! pick them out without a separate metrics dependency.

use tracing::info;

#[derive(Clone)]
pub struct Metrics {
    /// Stress-test runs flood the error paths on purpose; emitting a
    /// counter per synthetic failure would drown the sink.
    suppressed: bool,
}

impl Metrics {
    pub fn new(suppressed: bool) -> Self {
        Self { suppressed }
    }

    pub fn counter(&self, name: &str) {
        if self.suppressed {
            return;
        }
        info!(target: "postbox::metrics", metric = name, kind = "counter", value = 1u64);
    }

    pub fn gauge(&self, name: &str, value: u64) {
        if self.suppressed {
            return;
        }
        info!(target: "postbox::metrics", metric = name, kind = "gauge", value = value);
    }

    /// Counter keyed by error class, e.g. `error.Protocol`.
    pub fn error(&self, class: &str) {
        self.counter(&format!("error.{}", class));
    }
}
