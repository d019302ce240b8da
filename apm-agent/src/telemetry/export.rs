//! Newline-delimited JSON exporter.

use apm_types::{ErrorEvent, ExportRecord, SpanEvent};
use parking_lot::Mutex;
use std::io::Write;

use super::client::EventSink;
use crate::error::ApmResult;

/// Writes every event as one JSON object per line.
///
/// Write failures are logged and dropped so exporting can never fail the
/// code being measured.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_record(&self, record: &ExportRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                log::error!("[APM] Failed to serialize export record: {}", e);
                return;
            }
        };

        if let Err(e) = writeln!(self.writer.lock(), "{}", line) {
            log::error!("[APM] Failed to write export record: {}", e);
        }
    }
}

impl<W: Write + Send> std::fmt::Debug for JsonLinesSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn put_event(&self, event: SpanEvent) {
        self.write_record(&ExportRecord::Span(event));
    }

    fn capture_error(&self, error: ErrorEvent) {
        self.write_record(&ExportRecord::Error(error));
    }

    fn send(&self) -> ApmResult<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_types::Context;
    use std::io;

    fn span(name: &str) -> SpanEvent {
        SpanEvent {
            id: format!("{}-id", name),
            transaction_id: "t".to_string(),
            transaction_name: "req".to_string(),
            parent_id: "t".to_string(),
            name: name.to_string(),
            span_type: "request".to_string(),
            action: None,
            context: Context::new(),
            start: 1.0,
            duration: 2.0,
        }
    }

    #[test]
    fn test_one_line_per_event() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.put_event(span("a"));
        sink.put_event(span("b"));
        sink.send().unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: ExportRecord = serde_json::from_str(lines[1]).unwrap();
        match record {
            ExportRecord::Span(event) => assert_eq!(event.name, "b"),
            other => panic!("Expected span record, got {:?}", other),
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_write_failures_do_not_panic() {
        let sink = JsonLinesSink::new(BrokenWriter);
        sink.put_event(span("a"));
        assert!(sink.send().is_err());
    }
}
