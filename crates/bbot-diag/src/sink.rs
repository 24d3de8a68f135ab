//! Bounded diagnostics sink with a background JSONL writer.
//!
//! Producers call [`DiagSink::record`] which never blocks: events go into
//! a bounded channel and are dropped (counted) when the consumer falls
//! behind. A background task appends each event as one JSON line to
//! `diagnostics/<session_id>.jsonl` and keeps per-reason counters for
//! aggregation.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DiagResult;
use crate::event::DiagEvent;

/// Default channel capacity. Bursts beyond this drop events.
const DEFAULT_CAPACITY: usize = 4096;

/// How many events between explicit flushes.
const FLUSH_EVERY: usize = 64;

/// Shared counters kept by the writer task.
#[derive(Debug, Default)]
pub struct DiagCounters {
    by_reason: Mutex<HashMap<String, u64>>,
    written: AtomicU64,
    dropped: AtomicU64,
}

impl DiagCounters {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Snapshot of the per-reason counts.
    pub fn reasons(&self) -> HashMap<String, u64> {
        self.by_reason.lock().clone()
    }

    fn record(&self, event: &DiagEvent) {
        self.written.fetch_add(1, Ordering::Relaxed);
        if let Some(reason) = &event.reason {
            *self.by_reason.lock().entry(reason.clone()).or_insert(0) += 1;
        }
    }
}

/// Cheap-to-clone handle for producers.
#[derive(Clone)]
pub struct DiagSink {
    tx: mpsc::Sender<DiagEvent>,
    counters: Arc<DiagCounters>,
    enabled: bool,
}

impl DiagSink {
    /// Record an event. Never blocks; drops and counts on overflow.
    pub fn record(&self, event: DiagEvent) {
        if !self.enabled {
            return;
        }
        if self.tx.try_send(event).is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A sink that discards everything. For tests and disabled setups.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self {
            tx,
            counters: Arc::new(DiagCounters::default()),
            enabled: false,
        }
    }

    pub fn counters(&self) -> &DiagCounters {
        &self.counters
    }
}

/// Owns the writer task. Dropping without [`DiagWriter::shutdown`] aborts it.
pub struct DiagWriter {
    handle: JoinHandle<()>,
    path: PathBuf,
    counters: Arc<DiagCounters>,
}

impl DiagWriter {
    /// Spawn the writer and return `(sink, writer)`.
    ///
    /// The output file is `<base_dir>/<session_id>.jsonl`, opened in
    /// append mode so restarts never truncate earlier sessions.
    pub fn spawn(base_dir: impl AsRef<Path>, session_id: &str) -> DiagResult<(DiagSink, Self)> {
        std::fs::create_dir_all(base_dir.as_ref())?;
        let path = base_dir.as_ref().join(format!("{session_id}.jsonl"));

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let counters = Arc::new(DiagCounters::default());

        let (tx, rx) = mpsc::channel(DEFAULT_CAPACITY);
        let task_counters = counters.clone();
        let task_path = path.clone();
        let handle = tokio::spawn(write_loop(file, rx, task_counters, task_path));

        info!(path = %path.display(), "Diagnostics writer started");

        Ok((
            DiagSink {
                tx,
                counters: counters.clone(),
                enabled: true,
            },
            Self {
                handle,
                path,
                counters,
            },
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn counters(&self) -> &DiagCounters {
        &self.counters
    }

    /// Wait for the writer to drain after all sinks are dropped.
    pub async fn shutdown(self) {
        if let Err(e) = self.handle.await {
            warn!(?e, "Diagnostics writer task failed");
        }
    }
}

async fn write_loop(
    file: File,
    mut rx: mpsc::Receiver<DiagEvent>,
    counters: Arc<DiagCounters>,
    path: PathBuf,
) {
    let mut writer = BufWriter::new(file);
    let mut since_flush = 0usize;

    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => {
                if writeln!(writer, "{line}").is_err() {
                    warn!(path = %path.display(), "Diagnostics write failed");
                    continue;
                }
                counters.record(&event);
                since_flush += 1;
                if since_flush >= FLUSH_EVERY {
                    let _ = writer.flush();
                    since_flush = 0;
                }
            }
            Err(e) => {
                debug!(?e, "Unserialisable diagnostics event");
            }
        }
    }

    let _ = writer.flush();
    debug!(
        written = counters.written(),
        dropped = counters.dropped(),
        "Diagnostics writer drained"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_land_in_session_file() {
        let dir = std::env::temp_dir().join(format!("bbot-diag-{}", std::process::id()));
        let (sink, writer) = DiagWriter::spawn(&dir, "session-test").unwrap();

        for i in 0..10 {
            sink.record(
                DiagEvent::new("scanner", "filter")
                    .with_reason("filter:min_24h_volume")
                    .with_field("i", i),
            );
        }
        drop(sink);
        writer.shutdown().await;

        let content = std::fs::read_to_string(dir.join("session-test.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 10);
        let first: DiagEvent = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first.component, "scanner");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_disabled_sink_is_silent() {
        let sink = DiagSink::disabled();
        sink.record(DiagEvent::new("x", "y"));
        assert_eq!(sink.counters().written(), 0);
    }
}
