use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one session, across reconnects.
#[derive(Debug, Default)]
pub struct LinkStats {
    frames_sent: AtomicU64,
    frames_gated: AtomicU64,
    frames_dropped: AtomicU64,
    buffers_scheduled: AtomicU64,
    interruptions: AtomicU64,
    tool_calls: AtomicU64,
    tool_failures: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub frames_gated: u64,
    pub frames_dropped: u64,
    pub buffers_scheduled: u64,
    pub interruptions: u64,
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub retries: u64,
}

impl LinkStats {
    pub(crate) fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_gated(&self) {
        self.frames_gated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn buffer_scheduled(&self) {
        self.buffers_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn interrupted(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tool_call(&self, ok: bool) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_gated: self.frames_gated.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            buffers_scheduled: self.buffers_scheduled.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_failures: self.tool_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}
