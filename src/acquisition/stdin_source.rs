//! Stdin Position Source
//!
//! Reads JSON-formatted position fixes from stdin, one per line.
//! Used with an external feed: `gpspipe -w | fix-adapter | livetrack run --stdin`
//!
//! Each line is either a fix (`{"latitude": .., "longitude": ..}`) or a
//! capability marker (`{"event": "unavailable"}`). Malformed lines are skipped.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use super::source::{AcquisitionError, PositionEvent, PositionSource, PositionStream, SamplingRequest};
use crate::types::PositionFix;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonLine {
    Marker { event: String },
    Fix(PositionFix),
}

/// Parse a single input line. `Ok(None)` for blank lines.
fn parse_line(line: &str) -> Result<Option<PositionEvent>, AcquisitionError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<JsonLine>(line) {
        Ok(JsonLine::Fix(fix)) if fix.is_valid() => Ok(Some(PositionEvent::Fix(fix))),
        Ok(JsonLine::Fix(fix)) => Err(AcquisitionError::Parse(format!(
            "coordinates out of range: {}, {}",
            fix.latitude, fix.longitude
        ))),
        Ok(JsonLine::Marker { event }) if event.eq_ignore_ascii_case("unavailable") => {
            Ok(Some(PositionEvent::Unavailable))
        }
        Ok(JsonLine::Marker { event }) => Err(AcquisitionError::Parse(format!("unknown event '{event}'"))),
        Err(e) => Err(AcquisitionError::Parse(e.to_string())),
    }
}

/// Position source backed by any line-oriented async reader (stdin by default).
///
/// The reader can only be consumed once; a second `begin_sampling` returns a
/// stream that ends immediately.
pub struct LineSource<R> {
    reader: Mutex<Option<R>>,
    name: &'static str,
}

/// Stdin-backed position source.
pub type StdinSource = LineSource<BufReader<tokio::io::Stdin>>;

impl StdinSource {
    pub fn stdin() -> Self {
        LineSource::new(BufReader::new(tokio::io::stdin()), "stdin")
    }
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, name: &'static str) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            name,
        }
    }
}

#[async_trait]
impl<R> PositionSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn positioning_enabled(&self) -> bool {
        // External feeds announce revocation in-band.
        true
    }

    async fn begin_sampling(
        &self,
        _request: SamplingRequest,
    ) -> Result<Box<dyn PositionStream>, AcquisitionError> {
        let reader = self.reader.lock().await.take();
        Ok(Box::new(LineStream {
            reader,
            line_buffer: String::with_capacity(256),
            stopped: false,
        }))
    }

    fn source_name(&self) -> &str {
        self.name
    }
}

struct LineStream<R> {
    reader: Option<R>,
    line_buffer: String,
    stopped: bool,
}

#[async_trait]
impl<R> PositionStream for LineStream<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn next_event(&mut self) -> Result<PositionEvent, AcquisitionError> {
        if self.stopped {
            return Ok(PositionEvent::Ended);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(PositionEvent::Ended);
        };
        loop {
            self.line_buffer.clear();
            let bytes = reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(PositionEvent::Ended);
            }
            match parse_line(&self.line_buffer) {
                Ok(Some(event)) => return Ok(event),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("[LineSource] Skipping input line: {}", e);
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), AcquisitionError> {
        self.stopped = true;
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SamplingRequest {
        SamplingRequest {
            interval_ms: 1000,
            min_interval_ms: 500,
            max_delay_ms: 2000,
            high_accuracy: true,
        }
    }

    #[test]
    fn test_parse_fix_line() {
        let event = parse_line(r#"{"latitude": 12.97, "longitude": 77.59, "accuracy_m": 4.0}"#)
            .unwrap()
            .unwrap();
        match event {
            PositionEvent::Fix(fix) => {
                assert_eq!(fix.latitude, 12.97);
                assert_eq!(fix.accuracy_m, 4.0);
            }
            other => panic!("expected fix, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_marker_and_blank() {
        assert_eq!(
            parse_line(r#"{"event": "unavailable"}"#).unwrap(),
            Some(PositionEvent::Unavailable)
        );
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"latitude": 100.0, "longitude": 0.0}"#).is_err());
    }

    #[tokio::test]
    async fn test_stream_skips_garbage_and_ends() {
        let input = b"{\"latitude\": 1.0, \"longitude\": 2.0}\ngarbage\n\n{\"latitude\": 1.5, \"longitude\": 2.5}\n";
        let source = LineSource::new(BufReader::new(&input[..]), "test");
        let mut stream = source.begin_sampling(request()).await.unwrap();

        assert!(matches!(stream.next_event().await.unwrap(), PositionEvent::Fix(f) if f.latitude == 1.0));
        assert!(matches!(stream.next_event().await.unwrap(), PositionEvent::Fix(f) if f.latitude == 1.5));
        assert_eq!(stream.next_event().await.unwrap(), PositionEvent::Ended);

        // Reader already consumed
        let mut second = source.begin_sampling(request()).await.unwrap();
        assert_eq!(second.next_event().await.unwrap(), PositionEvent::Ended);
    }
}
