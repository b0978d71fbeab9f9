//! One-deep background encode pipeline.
//!
//! At most one composited frame is being written at any time. Dispatching the
//! next frame first joins the previous job, so frame N+1 can be computed while
//! frame N is written but two writes never overlap.

use std::thread::JoinHandle;

use crate::foundation::error::{TimelineError, TimelineResult};
use crate::render::runtime::Layer;
use crate::render::sink::FrameSink;

struct Done<S> {
    sink: S,
    idx: u64,
    frame: Layer,
    result: TimelineResult<()>,
}

pub(crate) struct EncodePipeline<S: FrameSink + 'static> {
    sink: Option<S>,
    job: Option<JoinHandle<Done<S>>>,
    failed: Option<(u64, Layer)>,
    written: u64,
}

impl<S: FrameSink + 'static> EncodePipeline<S> {
    pub(crate) fn new(sink: S) -> Self {
        Self {
            sink: Some(sink),
            job: None,
            failed: None,
            written: 0,
        }
    }

    /// Frames successfully written so far.
    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    /// Sink, when no job is in flight.
    pub(crate) fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    /// Wait for the in-flight job. A failed write is kept for [`Self::retry`].
    pub(crate) fn join(&mut self) -> TimelineResult<()> {
        let Some(job) = self.job.take() else {
            return Ok(());
        };
        let done = job
            .join()
            .map_err(|_| TimelineError::Other(anyhow::anyhow!("encode worker panicked")))?;
        self.sink = Some(done.sink);
        match done.result {
            Ok(()) => {
                self.written += 1;
                Ok(())
            }
            Err(err) => {
                self.failed = Some((done.idx, done.frame));
                Err(err)
            }
        }
    }

    /// Hand frame `idx` to the worker, after the previous job completes.
    pub(crate) fn dispatch(&mut self, idx: u64, frame: Layer) -> TimelineResult<()> {
        self.join()?;
        if self.failed.is_some() {
            return Err(TimelineError::validation(
                "a failed frame write must be retried before the next frame",
            ));
        }
        let mut sink = self.take_sink()?;
        let job = std::thread::Builder::new()
            .name("timeline-encode".to_owned())
            .spawn(move || {
                let result = sink.push_frame(idx, &frame);
                Done {
                    sink,
                    idx,
                    frame,
                    result,
                }
            })
            .map_err(|e| TimelineError::Other(anyhow::Error::new(e).context("spawn encode worker")))?;
        self.job = Some(job);
        Ok(())
    }

    /// Write the failed frame again, on the calling thread.
    pub(crate) fn retry(&mut self) -> TimelineResult<()> {
        self.join()?;
        let Some((idx, frame)) = self.failed.take() else {
            return Ok(());
        };
        let sink = self.sink_mut()?;
        match sink.push_frame(idx, &frame) {
            Ok(()) => {
                self.written += 1;
                Ok(())
            }
            Err(err) => {
                self.failed = Some((idx, frame));
                Err(err)
            }
        }
    }

    /// Join and forget any failed frame. Returns the join error, if any.
    pub(crate) fn discard(&mut self) -> Option<TimelineError> {
        let err = self.join().err();
        self.failed = None;
        err
    }

    /// Run `f` on the sink once the worker is idle.
    pub(crate) fn with_sink<R>(
        &mut self,
        f: impl FnOnce(&mut S) -> TimelineResult<R>,
    ) -> TimelineResult<R> {
        self.join()?;
        f(self.sink_mut()?)
    }

    pub(crate) fn reset_written(&mut self) {
        self.written = 0;
    }

    pub(crate) fn into_sink(mut self) -> TimelineResult<S> {
        self.discard();
        self.take_sink()
    }

    fn take_sink(&mut self) -> TimelineResult<S> {
        self.sink
            .take()
            .ok_or_else(|| TimelineError::validation("encode sink is unavailable"))
    }

    fn sink_mut(&mut self) -> TimelineResult<&mut S> {
        self.sink
            .as_mut()
            .ok_or_else(|| TimelineError::validation("encode sink is unavailable"))
    }
}

impl<S: FrameSink + 'static> Drop for EncodePipeline<S> {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            let _ = job.join();
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/encode.rs"]
mod tests;
