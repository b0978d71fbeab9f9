use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::RenderSessionOpts;
use crate::event::list::EventList;
use crate::event::model::Event;
use crate::foundation::core::{TICKS_PER_SECOND, Timecode};
use crate::foundation::error::{IoKind, TimelineError, TimelineResult};
use crate::foundation::ids::{ClipId, EventId};
use crate::render::encode::EncodePipeline;
use crate::render::runtime::{
    ActiveEffect, AudioRenderer, AudioSegment, EffectRuntime, FrameSource, InstanceChain, Layer,
};
use crate::render::sink::{FrameSink, SinkConfig};

/// Where a [`RenderSession`] stands between steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    /// Planned but not started; the next step begins the sink.
    Ready,
    /// Work remains.
    Processing,
    /// Paused by the caller; steps do nothing until [`RenderSession::resume`].
    EffectsPaused,
    /// Every frame and audio block was written.
    Complete,
    /// The last frame write failed; the next step retries it.
    WriteFrameError,
    /// The last audio block could not be written; the next step retries it.
    WriteAudioError,
    /// Source audio for the last block could not be read; the next step retries it.
    ReadAudioError,
}

impl RenderState {
    /// Whether the session stopped on an I/O failure.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::WriteFrameError | Self::WriteAudioError | Self::ReadAudioError
        )
    }
}

/// Shared cancellation flag, checked at the top of every step.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear a previous request so the session can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Render statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Output frames the sink accepted.
    pub frames_written: u64,
    /// Source frame events skipped because the output grid passed over them.
    pub frames_dropped: u64,
    /// Output frames that repeated the previous source frame.
    pub frames_duplicated: u64,
    /// Audio blocks written.
    pub audio_blocks: u64,
    /// Effect events replayed into the runtime.
    pub effect_events: u64,
}

/// The collaborators a session drives.
pub struct Collaborators<'a> {
    /// Source of track pixels.
    pub frames: &'a mut dyn FrameSource,
    /// Effect runtime; also composites the layers.
    pub effects: &'a mut dyn EffectRuntime,
    /// Audio mixer. `None` disables audio regardless of options.
    pub audio: Option<&'a mut dyn AudioRenderer>,
}

#[derive(Clone, Copy, Debug)]
struct PlayingAudio {
    track: i32,
    clip: ClipId,
    seek: f64,
    velocity: f64,
    since: Timecode,
}

/// Resumable, step-wise renderer over an ordered [`EventList`].
///
/// Each [`RenderSession::step`] does one bounded unit of work: replay one
/// effect event, write one video frame, or write one audio block. Output
/// frames sit on the `opts.fps` grid between the first and last frame event;
/// each shows the nearest frame event, so source frames may be dropped or
/// repeated. Frame writes run on a one-deep background encode pipeline.
///
/// I/O failures leave the session in an error [`RenderState`]; stepping again
/// retries the failed unit, [`RenderSession::cancel`] rolls everything back.
pub struct RenderSession<'a, S: FrameSink + 'static> {
    list: &'a mut EventList,
    opts: RenderSessionOpts,
    frames: &'a mut dyn FrameSource,
    effects: &'a mut dyn EffectRuntime,
    audio: Option<&'a mut dyn AudioRenderer>,
    encoder: EncodePipeline<S>,
    cancel: CancelToken,
    dest_clip: Option<ClipId>,

    state: RenderState,
    paused_in: RenderState,
    render_video: bool,
    render_audio: bool,

    cursor: Option<EventId>,
    first_slot: i64,
    total_frames: u64,
    next_frame: u64,
    last_shown: Option<EventId>,

    instances: HashMap<EventId, InstanceChain>,
    active_map: Vec<EventId>,

    playing: Vec<PlayingAudio>,
    audio_origin: Timecode,
    audio_from: Timecode,
    audio_end: Timecode,
    flush_to: Option<Timecode>,

    stats: RenderStats,
}

impl<'a, S: FrameSink + 'static> RenderSession<'a, S> {
    /// Plan a render of `list` into `sink`.
    ///
    /// The list must be ordered; run [`crate::reorder_noquant`] first when it
    /// holds no-quantise events.
    pub fn new(
        list: &'a mut EventList,
        opts: RenderSessionOpts,
        collaborators: Collaborators<'a>,
        sink: S,
    ) -> TimelineResult<Self> {
        opts.validate()?;
        if list.is_unordered() {
            return Err(TimelineError::validation(
                "event list is unordered; reorder no-quantise events before rendering",
            ));
        }
        let render_video = opts.render_video;
        let render_audio = opts.render_audio && collaborators.audio.is_some();
        let mut session = Self {
            list,
            opts,
            frames: collaborators.frames,
            effects: collaborators.effects,
            audio: collaborators.audio,
            encoder: EncodePipeline::new(sink),
            cancel: CancelToken::new(),
            dest_clip: None,
            state: RenderState::Ready,
            paused_in: RenderState::Ready,
            render_video,
            render_audio,
            cursor: None,
            first_slot: 0,
            total_frames: 0,
            next_frame: 0,
            last_shown: None,
            instances: HashMap::new(),
            active_map: Vec::new(),
            playing: Vec::new(),
            audio_origin: Timecode::ZERO,
            audio_from: Timecode::ZERO,
            audio_end: Timecode::ZERO,
            flush_to: None,
            stats: RenderStats::default(),
        };
        session.plan()?;
        Ok(session)
    }

    /// Observe `token` instead of the session's own.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Tag audio blocks with the clip being rendered into.
    pub fn with_dest_clip(mut self, clip: ClipId) -> Self {
        self.dest_clip = Some(clip);
        self
    }

    /// Token that cancels this session from any thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current state.
    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Options the session was planned with.
    pub fn opts(&self) -> &RenderSessionOpts {
        &self.opts
    }

    /// Statistics so far.
    pub fn stats(&self) -> RenderStats {
        RenderStats {
            frames_written: self.encoder.written(),
            ..self.stats
        }
    }

    /// Number of output frames the pass will produce.
    pub fn total_frames(&self) -> u64 {
        if self.render_video {
            self.total_frames
        } else {
            0
        }
    }

    /// Index of the next output frame.
    pub fn next_frame(&self) -> u64 {
        self.next_frame
    }

    /// Effect instances currently alive in the runtime.
    pub fn live_instances(&self) -> usize {
        self.instances.values().map(|c| c.len()).sum()
    }

    /// Sink, when no write is in flight.
    pub fn sink(&self) -> Option<&S> {
        self.encoder.sink()
    }

    /// Finish with the session and take the sink back.
    pub fn into_sink(self) -> TimelineResult<S> {
        self.encoder.into_sink()
    }

    /// Entry point mirroring the classic render call: with `reset` the pass
    /// is re-planned for the given outputs, otherwise one step is taken.
    pub fn render_events(
        &mut self,
        reset: bool,
        render_video: bool,
        render_audio: bool,
    ) -> TimelineResult<RenderState> {
        if reset {
            self.reset(render_video, render_audio)?;
            return Ok(self.state);
        }
        self.step()
    }

    /// Abandon any pass in progress and plan a fresh one.
    pub fn reset(&mut self, render_video: bool, render_audio: bool) -> TimelineResult<()> {
        if self.state != RenderState::Ready && self.state != RenderState::Complete {
            self.rollback()?;
        }
        self.render_video = render_video;
        self.render_audio = render_audio && self.audio.is_some();
        self.plan()
    }

    /// Pause. Steps return [`RenderState::EffectsPaused`] without working.
    pub fn pause(&mut self) {
        if self.state != RenderState::EffectsPaused {
            self.paused_in = self.state;
            self.state = RenderState::EffectsPaused;
        }
    }

    /// Undo [`RenderSession::pause`].
    pub fn resume(&mut self) {
        if self.state == RenderState::EffectsPaused {
            self.state = self.paused_in;
        }
    }

    /// Request that audio be written up to `tc` before anything else.
    pub fn flush_audio_to(&mut self, tc: Timecode) {
        self.flush_to = Some(tc.min(self.audio_end));
    }

    /// Cancel now: drop the output written so far and return to
    /// [`RenderState::Ready`].
    pub fn cancel(&mut self) -> TimelineResult<()> {
        self.rollback()
    }

    /// Step until the pass completes.
    pub fn run_to_completion(&mut self) -> TimelineResult<RenderStats> {
        loop {
            match self.step()? {
                RenderState::Complete => return Ok(self.stats()),
                RenderState::EffectsPaused => {
                    return Err(TimelineError::validation("render session is paused"));
                }
                _ => {}
            }
        }
    }

    /// Do one unit of work and report the resulting state.
    #[tracing::instrument(skip(self), fields(frame = self.next_frame))]
    pub fn step(&mut self) -> TimelineResult<RenderState> {
        if self.cancel.is_cancelled() {
            self.rollback()?;
            tracing::warn!("render cancelled; output rolled back");
            return Err(TimelineError::Cancelled);
        }
        match self.state {
            RenderState::Complete | RenderState::EffectsPaused => return Ok(self.state),
            RenderState::Ready => {
                let cfg = SinkConfig {
                    width: self.opts.width,
                    height: self.opts.height,
                    fps: self.opts.fps,
                };
                self.encoder.with_sink(|s| s.begin(cfg))?;
                self.state = RenderState::Processing;
                tracing::debug!(
                    frames = self.total_frames(),
                    audio = self.render_audio,
                    "render started"
                );
            }
            RenderState::WriteFrameError => {
                self.encoder.retry()?;
                self.state = RenderState::Processing;
                tracing::debug!("frame write retried");
                return Ok(self.state);
            }
            RenderState::WriteAudioError | RenderState::ReadAudioError => {
                self.state = RenderState::Processing;
            }
            RenderState::Processing => {}
        }
        self.advance()
    }

    fn advance(&mut self) -> TimelineResult<RenderState> {
        if let Some(to) = self.flush_to {
            if self.render_audio && self.audio_from < to {
                let bound = self.next_audio_change()?.map_or(to, |tc| tc.min(to));
                if self.audio_from < bound {
                    return self.audio_block(bound);
                }
            } else {
                self.flush_to = None;
            }
        }

        // effects are replayed up to the source frame, which may sit on
        // either side of the output slot
        let source = if self.video_pending() {
            self.nearest_frame(self.frame_tc(self.next_frame))?
        } else {
            None
        };
        let target = match source {
            Some(id) => self.list.timecode(id)?,
            None if self.video_pending() => self.frame_tc(self.next_frame),
            None => Timecode::MAX,
        };

        while let Some(id) = self.cursor {
            let (tc, has_audio, is_effect, next) = {
                let node = self.list.node(id)?;
                (
                    node.timecode(),
                    node.event().audio().is_some(),
                    node.event().is_effect_event(),
                    node.next(),
                )
            };
            if tc > target {
                break;
            }
            if has_audio && self.render_audio {
                if self.audio_from < tc {
                    return self.audio_block(tc);
                }
                self.apply_audio(id, tc)?;
            }
            if is_effect {
                self.apply_effect_event(id)?;
                self.cursor = next;
                self.stats.effect_events += 1;
                return Ok(self.state);
            }
            self.cursor = next;
        }

        if self.video_pending() {
            return self.render_frame(source);
        }
        if self.render_audio && self.audio_from < self.audio_end {
            return self.audio_block(self.audio_end);
        }
        self.finish()
    }

    /// Timecode of the next unapplied audio change.
    fn next_audio_change(&self) -> TimelineResult<Option<Timecode>> {
        let mut cur = self.cursor;
        while let Some(id) = cur {
            let node = self.list.node(id)?;
            if node.event().audio().is_some() {
                return Ok(Some(node.timecode()));
            }
            cur = node.next();
        }
        Ok(None)
    }

    fn video_pending(&self) -> bool {
        self.render_video && self.next_frame < self.total_frames
    }

    fn frame_tc(&self, k: u64) -> Timecode {
        self.opts
            .fps
            .frame_to_tc(self.first_slot.saturating_add(k as i64))
    }

    fn plan(&mut self) -> TimelineResult<()> {
        let fps = self.opts.fps;
        let mut frames = self
            .list
            .iter()
            .filter(|(_, n)| matches!(n.event(), Event::Frame(_)))
            .map(|(_, n)| n.timecode());
        let first = frames.next();
        let last = frames.last().or(first);

        let first_event = self.list.get_first().map(|id| self.list.timecode(id)).transpose()?;
        let last_event = self.list.get_last().map(|id| self.list.timecode(id)).transpose()?;

        match (first, last) {
            (Some(f), Some(l)) => {
                self.first_slot = fps.tc_to_frame_round(f);
                let last_slot = fps.tc_to_frame_round(l);
                self.total_frames = u64::try_from(last_slot - self.first_slot + 1).unwrap_or(0);
            }
            _ => {
                self.first_slot = 0;
                self.total_frames = 0;
            }
        }

        self.audio_origin = first_event.unwrap_or(Timecode::ZERO);
        let video_end = if self.total_frames > 0 {
            self.frame_tc(self.total_frames)
        } else {
            Timecode::ZERO
        };
        self.audio_end = last_event.unwrap_or(Timecode::ZERO).max(video_end);

        self.state = RenderState::Ready;
        self.paused_in = RenderState::Ready;
        self.cursor = self.list.get_first();
        self.next_frame = 0;
        self.last_shown = None;
        self.active_map.clear();
        self.playing.clear();
        self.audio_from = self.audio_origin;
        self.flush_to = None;
        self.stats = RenderStats::default();
        self.encoder.reset_written();
        Ok(())
    }

    fn apply_audio(&mut self, id: EventId, tc: Timecode) -> TimelineResult<()> {
        let Some(changes) = self.list.event(id)?.audio() else {
            return Ok(());
        };
        for a in changes {
            self.playing.retain(|p| p.track != a.track);
            if a.velocity != 0.0 {
                self.playing.push(PlayingAudio {
                    track: a.track,
                    clip: a.clip,
                    seek: a.seek,
                    velocity: a.velocity,
                    since: tc,
                });
            }
        }
        Ok(())
    }

    fn apply_effect_event(&mut self, id: EventId) -> TimelineResult<()> {
        match self.list.event(id)?.clone() {
            Event::FilterInit(fi) => {
                let chain = self.effects.instantiate(fi.filter)?;
                for (i, &h) in chain.iter().enumerate() {
                    if let Err(err) = self.effects.init(h) {
                        for &done in &chain[..i] {
                            if let Err(undo) = self.effects.deinit(done) {
                                tracing::warn!(
                                    init = %id,
                                    error = %undo,
                                    "partial chain teardown failed"
                                );
                            }
                        }
                        return Err(err);
                    }
                }
                tracing::debug!(init = %id, instances = chain.len(), "filter instantiated");
                self.instances.insert(id, chain);
            }
            Event::FilterDeinit(fd) => {
                if let Some(chain) = self.instances.remove(&fd.init()) {
                    for &h in &chain {
                        self.effects.deinit(h)?;
                    }
                    tracing::debug!(init = %fd.init(), "filter deinitialised");
                }
            }
            Event::ParamChange(pc) => {
                if let Some(chain) = self.instances.get(&pc.init()) {
                    for &h in chain {
                        self.effects.set_parameter_value(h, pc.index(), &pc.value)?;
                    }
                }
            }
            Event::FilterMap(m) => {
                self.active_map = m.inits().to_vec();
            }
            Event::Frame(_) | Event::AudioFrame(_) | Event::Marker(_) => {}
        }
        Ok(())
    }

    fn render_frame(&mut self, chosen: Option<EventId>) -> TimelineResult<RenderState> {
        let k = self.next_frame;
        let tc = self.frame_tc(k);
        let layers = match chosen {
            Some(id) => self.pull_layers(id, tc)?,
            None => Vec::new(),
        };
        let out = if layers.is_empty() {
            Layer::blank(self.opts.width, self.opts.height)
        } else {
            let active = self.active_effects()?;
            self.effects.apply(&layers, &active, tc)?
        };

        if let Err(err) = self.encoder.dispatch(k, out) {
            self.state = RenderState::WriteFrameError;
            tracing::warn!(error = %err, frame = k, "frame write failed");
            return Err(err);
        }

        if let Some(id) = chosen {
            match self.last_shown {
                Some(prev) if prev == id => self.stats.frames_duplicated += 1,
                Some(prev) => self.stats.frames_dropped += self.frames_between(prev, id),
                None => {}
            }
            self.last_shown = Some(id);
        }
        self.next_frame += 1;
        Ok(self.state)
    }

    /// Frame event nearest `tc`; ties go to the earlier one.
    fn nearest_frame(&self, tc: Timecode) -> TimelineResult<Option<EventId>> {
        let before = self.list.get_frame_event_at_or_before(tc, self.last_shown);
        let after = self.list.get_frame_event_at_or_after(tc, self.last_shown);
        Ok(match (before, after) {
            (Some(b), Some(a)) => {
                let db = tc.since(self.list.timecode(b)?);
                let da = self.list.timecode(a)?.since(tc);
                if da < db { Some(a) } else { Some(b) }
            }
            (b, a) => b.or(a),
        })
    }

    fn frames_between(&self, from: EventId, to: EventId) -> u64 {
        let mut n = 0;
        let mut cur = self.list.get_next(from);
        while let Some(c) = cur {
            if c == to {
                break;
            }
            if self
                .list
                .get(c)
                .is_some_and(|node| matches!(node.event(), Event::Frame(_)))
            {
                n += 1;
            }
            cur = self.list.get_next(c);
        }
        n
    }

    fn pull_layers(&mut self, id: EventId, tc: Timecode) -> TimelineResult<Vec<Layer>> {
        let tracks = match self.list.event(id)? {
            Event::Frame(f) => f.tracks.clone(),
            _ => return Err(TimelineError::malformed(format!("{id} is not a frame"))),
        };
        let mut layers = Vec::new();
        layers.try_reserve(tracks.len())?;
        for (i, t) in tracks.iter().enumerate() {
            if t.is_blank() {
                layers.push(Layer::blank(self.opts.width, self.opts.height));
                continue;
            }
            let clip = self.frames.primary_source(t.clip);
            layers.push(self.frames.pull_frame(i, clip, t.frame, tc)?);
        }
        Ok(layers)
    }

    fn active_effects(&self) -> TimelineResult<Vec<ActiveEffect>> {
        let mut out = Vec::new();
        for init in &self.active_map {
            let Some(chain) = self.instances.get(init) else {
                continue;
            };
            let fi = self.list.filter_init(*init)?;
            for &instance in chain {
                out.push(ActiveEffect {
                    instance,
                    filter: fi.filter,
                    in_tracks: fi.in_tracks.clone(),
                    out_tracks: fi.out_tracks.clone(),
                });
            }
        }
        Ok(out)
    }

    fn audio_block(&mut self, limit: Timecode) -> TimelineResult<RenderState> {
        let to = limit
            .min(self.audio_from.offset(self.opts.max_audio_block.0))
            .min(self.audio_end)
            .max(self.audio_from);
        let segment = self.audio_segment(self.audio_from, to)?;
        let Some(renderer) = self.audio.as_deref_mut() else {
            self.audio_from = to;
            return Ok(self.state);
        };
        match renderer.render_audio_segment(&segment) {
            Ok(()) => {
                self.audio_from = to;
                self.stats.audio_blocks += 1;
                Ok(self.state)
            }
            Err(err) => {
                self.state = match err.io_kind() {
                    Some(IoKind::ReadAudio) => RenderState::ReadAudioError,
                    _ => RenderState::WriteAudioError,
                };
                tracing::warn!(error = %err, from = %segment.from_tc, "audio block failed");
                Err(err)
            }
        }
    }

    fn audio_segment(&self, from: Timecode, to: Timecode) -> TimelineResult<AudioSegment> {
        let tracks = self
            .playing
            .iter()
            .map(|p| p.track)
            .max()
            .and_then(|t| usize::try_from(t + 1).ok())
            .unwrap_or(0);
        let vis = if tracks > 0 {
            self.list
                .get_track_visibility_at_tc(from, tracks, self.opts.bleedthrough)?
        } else {
            Vec::new()
        };
        let volume = |track: i32| match usize::try_from(track) {
            Ok(t) => vis.get(t).copied().unwrap_or(0.0),
            Err(_) => 1.0,
        };
        Ok(AudioSegment {
            tracks: self.playing.iter().map(|p| p.track).collect(),
            clips: self.playing.iter().map(|p| p.clip).collect(),
            dest_clip: self.dest_clip,
            velocities: self.playing.iter().map(|p| p.velocity).collect(),
            seeks: self
                .playing
                .iter()
                .map(|p| p.seek + from.since(p.since) as f64 / TICKS_PER_SECOND as f64 * p.velocity)
                .collect(),
            from_tc: from,
            to_tc: to,
            volumes: self.playing.iter().map(|p| volume(p.track)).collect(),
            sample_rate: self.opts.audio_sample_rate,
        })
    }

    fn finish(&mut self) -> TimelineResult<RenderState> {
        if let Err(err) = self.encoder.join() {
            self.state = RenderState::WriteFrameError;
            tracing::warn!(error = %err, "final frame write failed");
            return Err(err);
        }
        self.encoder.with_sink(|s| s.end())?;
        self.deinit_all()?;
        self.state = RenderState::Complete;
        tracing::debug!(stats = ?self.stats(), "render complete");
        Ok(self.state)
    }

    fn deinit_all(&mut self) -> TimelineResult<()> {
        let mut inits: Vec<EventId> = self.instances.keys().copied().collect();
        inits.sort();
        for init in inits {
            if let Some(chain) = self.instances.remove(&init) {
                for h in chain {
                    self.effects.deinit(h)?;
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> TimelineResult<()> {
        if let Some(err) = self.encoder.discard() {
            tracing::warn!(error = %err, "in-flight frame discarded");
        }
        self.encoder.with_sink(|s| s.truncate(0))?;
        if let Some(audio) = self.audio.as_deref_mut() {
            audio.truncate(self.audio_origin)?;
        }
        self.deinit_all()?;
        self.plan()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/session.rs"]
mod tests;
