//! Reference newline-delimited-JSON telemetry sink (§4.10, §9).

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use super::{TelemetryEvent, TelemetrySink, REFERENCE_EVENT_CAP};

/// Telemetry sink backed by a newline-delimited JSON file, trimmed to
/// [`REFERENCE_EVENT_CAP`] lines. One JSON object per line; the tail of
/// the file is ignored if malformed rather than failing the whole read
/// (§9: "no transactional guarantees beyond... the tail is ignored").
pub struct JsonlTelemetrySink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlTelemetrySink {
    /// Open (or create) a JSONL telemetry file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Vec<TelemetryEvent> {
        let Ok(file) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };
        let reader = BufReader::new(file);
        reader
            .lines()
            .map_while(Result::ok)
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<TelemetryEvent>(&line).ok())
            .collect()
    }

    fn write_all(&self, events: &VecDeque<TelemetryEvent>) {
        let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        else {
            tracing::warn!(path = %self.path.display(), "failed to open telemetry sink for write");
            return;
        };
        for event in events {
            if let Ok(line) = serde_json::to_string(event) {
                let _ = writeln!(file, "{line}");
            }
        }
    }
}

impl TelemetrySink for JsonlTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        let _guard = self.lock.lock().unwrap();
        let mut events: VecDeque<TelemetryEvent> = self.read_all().into();
        events.push_back(event);
        while events.len() > REFERENCE_EVENT_CAP {
            events.pop_front();
        }
        self.write_all(&events);
    }

    fn read_recent(&self, limit: usize) -> Vec<TelemetryEvent> {
        let _guard = self.lock.lock().unwrap();
        let events = self.read_all();
        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn event(n: i64) -> TelemetryEvent {
        TelemetryEvent {
            timestamp_ms: n,
            ai_id: "agent".to_string(),
            strategy: "SEMANTIC".to_string(),
            latency_ms: 1,
            result_count: 1,
            top_k: 5,
            top_score: n as f64,
            avg_score: n as f64,
        }
    }

    #[test]
    fn records_persist_across_reads() {
        let file = NamedTempFile::new().unwrap();
        let sink = JsonlTelemetrySink::new(file.path());
        sink.record(event(1));
        sink.record(event(2));
        let recent = sink.read_recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].timestamp_ms, 2);
    }

    #[test]
    fn malformed_tail_line_is_skipped_without_failing_the_batch() {
        let file = NamedTempFile::new().unwrap();
        let sink = JsonlTelemetrySink::new(file.path());
        sink.record(event(1));
        // Corrupt the file by appending a garbage line.
        use std::io::Write as _;
        let mut f = OpenOptions::new().append(true).open(file.path()).unwrap();
        writeln!(f, "{{not valid json").unwrap();
        let recent = sink.read_recent(10);
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn trims_to_reference_cap() {
        let file = NamedTempFile::new().unwrap();
        let sink = JsonlTelemetrySink::new(file.path());
        for i in 0..(REFERENCE_EVENT_CAP + 10) {
            sink.record(event(i as i64));
        }
        let recent = sink.read_recent(REFERENCE_EVENT_CAP + 100);
        assert_eq!(recent.len(), REFERENCE_EVENT_CAP);
    }
}
