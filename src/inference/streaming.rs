//! Streaming response iterator
//!
//! Wraps the engine's fragment stream into a pull-based, one-shot iterator.
//! Each fragment is produced only when the caller asks for the next one;
//! cancellation is the caller dropping the stream. On exhaustion the
//! elapsed time and fragment count are folded into the session's
//! tokens-per-second metric.

use crate::inference::engine::FragmentStream;
use crate::types::hardware::PerformanceMetrics;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

/// Fragment yielded when the engine produced no output at all
pub const NO_OUTPUT_SENTINEL: &str = "[no response generated]";

/// Lazy, finite, non-restartable stream of response fragments.
///
/// Borrows the session's engine for its whole lifetime, so no other
/// session call can be issued until the stream is dropped or exhausted.
pub struct ChatStream<'a> {
    inner: FragmentStream<'a>,
    metrics: Rc<RefCell<PerformanceMetrics>>,
    started: Instant,
    fragments: usize,
    done: bool,
}

impl<'a> ChatStream<'a> {
    pub(crate) fn new(inner: FragmentStream<'a>, metrics: Rc<RefCell<PerformanceMetrics>>) -> Self {
        Self {
            inner,
            metrics,
            started: Instant::now(),
            fragments: 0,
            done: false,
        }
    }

    /// Fragments produced so far
    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    fn finish(&mut self) {
        self.done = true;
        let secs = self.started.elapsed().as_secs_f64();
        self.metrics.borrow_mut().record_stream(secs, self.fragments);
        tracing::info!(
            "Streaming finished in {:.2}s, {} fragment(s) generated",
            secs,
            self.fragments
        );
    }
}

impl Iterator for ChatStream<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(fragment)) => {
                self.fragments += 1;
                Some(fragment)
            }
            Some(Err(e)) => {
                tracing::error!("Streaming failed: {}", e);
                self.done = true;
                Some(format!("[stream error: {}]", e))
            }
            None => {
                let empty = self.fragments == 0;
                self.finish();
                if empty {
                    tracing::warn!("No fragments generated in stream");
                    Some(NO_OUTPUT_SENTINEL.to_string())
                } else {
                    None
                }
            }
        }
    }
}
