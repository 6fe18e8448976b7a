//! Scripted replay source.
//!
//! Replays a fixed list of events with per-event delays. Every
//! `begin_sampling` call replays the script from the start.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::source::{AcquisitionError, PositionEvent, PositionSource, PositionStream, SamplingRequest};
use crate::types::PositionFix;

/// One scripted event and the delay before it is emitted.
#[derive(Debug, Clone, Copy)]
pub struct ReplayStep {
    pub delay: Duration,
    pub event: PositionEvent,
}

impl ReplayStep {
    pub fn fix(delay_ms: u64, fix: PositionFix) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            event: PositionEvent::Fix(fix),
        }
    }

    pub fn unavailable(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            event: PositionEvent::Unavailable,
        }
    }
}

/// What a replay stream does once the script is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayEnd {
    /// Report [`PositionEvent::Ended`].
    End,
    /// Stay silent until shut down, like a parked receiver with no new fix.
    Hold,
}

pub struct ReplaySource {
    steps: Vec<ReplayStep>,
    end: ReplayEnd,
    enabled: AtomicBool,
}

impl ReplaySource {
    pub fn new(steps: Vec<ReplayStep>, end: ReplayEnd) -> Self {
        Self {
            steps,
            end,
            enabled: AtomicBool::new(true),
        }
    }

    /// Replay plain fixes `delay_ms` apart, then hold.
    pub fn from_fixes(fixes: &[PositionFix], delay_ms: u64) -> Self {
        let steps = fixes.iter().map(|f| ReplayStep::fix(delay_ms, *f)).collect();
        Self::new(steps, ReplayEnd::Hold)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl PositionSource for ReplaySource {
    fn positioning_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn begin_sampling(
        &self,
        _request: SamplingRequest,
    ) -> Result<Box<dyn PositionStream>, AcquisitionError> {
        if !self.positioning_enabled() {
            return Err(AcquisitionError::Unavailable);
        }
        Ok(Box::new(ReplayStream {
            steps: self.steps.clone().into_iter(),
            end: self.end,
            stopped: false,
        }))
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

struct ReplayStream {
    steps: std::vec::IntoIter<ReplayStep>,
    end: ReplayEnd,
    stopped: bool,
}

#[async_trait]
impl PositionStream for ReplayStream {
    async fn next_event(&mut self) -> Result<PositionEvent, AcquisitionError> {
        if self.stopped {
            return Ok(PositionEvent::Ended);
        }
        match self.steps.next() {
            Some(step) => {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                Ok(step.event)
            }
            None => match self.end {
                ReplayEnd::End => Ok(PositionEvent::Ended),
                ReplayEnd::Hold => std::future::pending().await,
            },
        }
    }

    async fn shutdown(&mut self) -> Result<(), AcquisitionError> {
        self.stopped = true;
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

    #[tokio::test]
    async fn test_each_stream_is_independent() {
        let source = ReplaySource::new(
            vec![ReplayStep::fix(0, PositionFix::new(1.0, 2.0))],
            ReplayEnd::End,
        );
        for _ in 0..2 {
            let mut stream = source.begin_sampling(request()).await.unwrap();
            assert!(matches!(stream.next_event().await.unwrap(), PositionEvent::Fix(_)));
            assert_eq!(stream.next_event().await.unwrap(), PositionEvent::Ended);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_never_fabricates() {
        let source = ReplaySource::from_fixes(&[PositionFix::new(1.0, 2.0)], 10);
        let mut stream = source.begin_sampling(request()).await.unwrap();
        assert!(matches!(stream.next_event().await.unwrap(), PositionEvent::Fix(_)));
        let silent =
            tokio::time::timeout(Duration::from_secs(60), stream.next_event()).await;
        assert!(silent.is_err(), "held stream must stay silent");
    }
}
