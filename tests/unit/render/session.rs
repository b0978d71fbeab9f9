use std::collections::HashSet;

use super::*;
use crate::event::model::{AudioFrameEvent, AudioTrack, FilterInfo, FilterInitEvent, FrameEvent, ParamValue};
use crate::foundation::ids::FilterId;
use crate::render::runtime::InstanceHandle;
use crate::render::sink::InMemorySink;

struct Clips {
    fail_reads: u32,
}

impl FrameSource for Clips {
    fn pull_frame(
        &mut self,
        track: usize,
        clip: ClipId,
        frame: i64,
        _tc: Timecode,
    ) -> TimelineResult<Layer> {
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return Err(TimelineError::io(IoKind::ReadFrame, "clip offline"));
        }
        Ok(Layer {
            width: 1,
            height: 1,
            data: vec![clip.0 as u8, frame as u8, track as u8, 255],
        })
    }
}

#[derive(Default)]
struct Fx {
    next: u64,
    live: HashSet<InstanceHandle>,
    sets: Vec<(InstanceHandle, usize, ParamValue)>,
    applied: Vec<usize>,
}

impl EffectRuntime for Fx {
    fn instantiate(&mut self, _filter: FilterId) -> TimelineResult<InstanceChain> {
        self.next += 1;
        Ok(InstanceChain::from_slice(&[InstanceHandle(self.next)]))
    }

    fn init(&mut self, instance: InstanceHandle) -> TimelineResult<()> {
        self.live.insert(instance);
        Ok(())
    }

    fn deinit(&mut self, instance: InstanceHandle) -> TimelineResult<()> {
        self.live.remove(&instance);
        Ok(())
    }

    fn set_parameter_value(
        &mut self,
        instance: InstanceHandle,
        index: usize,
        value: &ParamValue,
    ) -> TimelineResult<()> {
        self.sets.push((instance, index, value.clone()));
        Ok(())
    }

    fn get_parameter_value(&self, instance: InstanceHandle, index: usize) -> Option<ParamValue> {
        self.sets
            .iter()
            .rev()
            .find(|(h, i, _)| *h == instance && *i == index)
            .map(|(_, _, v)| v.clone())
    }

    fn apply(
        &mut self,
        layers: &[Layer],
        active: &[ActiveEffect],
        _tc: Timecode,
    ) -> TimelineResult<Layer> {
        self.applied.push(active.len());
        Ok(layers[0].clone())
    }
}

#[derive(Default)]
struct Mixer {
    fail_next: Option<IoKind>,
    segments: Vec<AudioSegment>,
    truncated: Vec<Timecode>,
}

impl AudioRenderer for Mixer {
    fn render_audio_segment(&mut self, segment: &AudioSegment) -> TimelineResult<()> {
        if let Some(kind) = self.fail_next.take() {
            return Err(TimelineError::io(kind, "device busy"));
        }
        self.segments.push(segment.clone());
        Ok(())
    }

    fn truncate(&mut self, tc: Timecode) -> TimelineResult<()> {
        self.truncated.push(tc);
        self.segments.retain(|s| s.from_tc < tc);
        Ok(())
    }
}

#[derive(Default)]
struct FlakySink {
    fail_next: u32,
    written: Vec<u64>,
}

impl FrameSink for FlakySink {
    fn begin(&mut self, _cfg: SinkConfig) -> TimelineResult<()> {
        self.written.clear();
        Ok(())
    }

    fn push_frame(&mut self, idx: u64, _frame: &Layer) -> TimelineResult<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(TimelineError::io(IoKind::WriteFrame, "disk full"));
        }
        self.written.push(idx);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> TimelineResult<()> {
        self.written.retain(|&i| i < len);
        Ok(())
    }

    fn end(&mut self) -> TimelineResult<()> {
        Ok(())
    }
}

fn video_opts() -> RenderSessionOpts {
    RenderSessionOpts {
        render_audio: false,
        ..RenderSessionOpts::default()
    }
}

fn audio_opts() -> RenderSessionOpts {
    RenderSessionOpts {
        render_video: false,
        max_audio_block: Timecode(50),
        ..RenderSessionOpts::default()
    }
}

fn frames_at(tcs: &[i64]) -> EventList {
    let mut list = EventList::new();
    for (i, &tc) in tcs.iter().enumerate() {
        list.append_frame_event(Timecode(tc), FrameEvent::single(1, i as i64 + 1))
            .unwrap();
    }
    list
}

fn shown(sink: &InMemorySink) -> Vec<u8> {
    sink.frames.iter().map(|(_, l)| l.data[1]).collect()
}

fn audio_list() -> EventList {
    let mut list = EventList::new();
    let start = AudioTrack {
        track: 0,
        clip: ClipId(5),
        seek: 0.0,
        velocity: 1.0,
    };
    list.append_frame_event(Timecode(0), FrameEvent::single(1, 1).with_audio([start]))
        .unwrap();
    for (i, tc) in [40, 80, 120].into_iter().enumerate() {
        list.append_frame_event(Timecode(tc), FrameEvent::single(1, i as i64 + 2))
            .unwrap();
    }
    let stop = AudioTrack {
        velocity: 0.0,
        ..start
    };
    list.insert_audio_frame_event_at(Timecode(100), AudioFrameEvent { audio: vec![stop] }, None)
        .unwrap();
    list
}

#[test]
fn video_pass_writes_one_frame_per_grid_slot() {
    let mut list = frames_at(&[0, 40, 80]);
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut session = RenderSession::new(
        &mut list,
        video_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: None,
        },
        InMemorySink::new(),
    )
    .unwrap();
    assert_eq!(session.total_frames(), 3);

    let stats = session.run_to_completion().unwrap();
    assert_eq!(stats.frames_written, 3);
    assert_eq!(session.state(), RenderState::Complete);
    let sink = session.into_sink().unwrap();
    assert!(sink.is_ended());
    assert_eq!(sink.frames.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(shown(&sink), vec![1, 2, 3]);
}

#[test]
fn nearest_source_frame_is_shown() {
    let mut list = frames_at(&[0, 30, 45, 100]);
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut session = RenderSession::new(
        &mut list,
        video_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: None,
        },
        InMemorySink::new(),
    )
    .unwrap();
    let stats = session.run_to_completion().unwrap();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.frames_duplicated, 1);
    assert_eq!(shown(&session.into_sink().unwrap()), vec![1, 3, 4, 4]);
}

#[test]
fn effect_events_drive_the_runtime() {
    let mut list = frames_at(&[0, 40, 80, 120]);
    let info = FilterInfo {
        num_params: 1,
        ..FilterInfo::default()
    };
    list.add_filter_instance(
        Timecode(40),
        Timecode(80),
        FilterInitEvent::new(FilterId::from_name("blur"), info, [0], [0]),
        &[ParamValue::Float(2.0)],
    )
    .unwrap();

    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut session = RenderSession::new(
        &mut list,
        video_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: None,
        },
        InMemorySink::new(),
    )
    .unwrap();
    let stats = session.run_to_completion().unwrap();
    assert_eq!(stats.effect_events, 5);
    assert_eq!(session.live_instances(), 0);
    drop(session);

    assert_eq!(fx.applied, vec![0, 1, 0, 0]);
    assert_eq!(fx.sets, vec![(InstanceHandle(1), 0, ParamValue::Float(2.0))]);
    assert!(fx.live.is_empty());
}

#[test]
fn effects_follow_the_source_frame_not_the_output_slot() {
    let mut list = frames_at(&[0, 41, 120]);
    list.add_filter_instance(
        Timecode(41),
        Timecode(200),
        FilterInitEvent::new(FilterId::from_name("blur"), FilterInfo::default(), [0], [0]),
        &[],
    )
    .unwrap();

    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut session = RenderSession::new(
        &mut list,
        video_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: None,
        },
        InMemorySink::new(),
    )
    .unwrap();
    let stats = session.run_to_completion().unwrap();
    assert_eq!(stats.frames_duplicated, 1);
    assert_eq!(shown(&session.into_sink().unwrap()), vec![1, 2, 2, 3]);

    // source frame 2 sits inside the blur window every time it is shown
    assert_eq!(fx.applied, vec![0, 1, 1, 1]);
    assert!(fx.live.is_empty());
}

/// Two-instance chain whose second init and every teardown fail.
#[derive(Default)]
struct BrittleFx {
    torn_down: Vec<InstanceHandle>,
}

impl EffectRuntime for BrittleFx {
    fn instantiate(&mut self, _filter: FilterId) -> TimelineResult<InstanceChain> {
        Ok(InstanceChain::from_slice(&[InstanceHandle(1), InstanceHandle(2)]))
    }

    fn init(&mut self, instance: InstanceHandle) -> TimelineResult<()> {
        if instance == InstanceHandle(2) {
            return Err(TimelineError::validation("init refused"));
        }
        Ok(())
    }

    fn deinit(&mut self, instance: InstanceHandle) -> TimelineResult<()> {
        self.torn_down.push(instance);
        Err(TimelineError::validation("teardown refused"))
    }

    fn set_parameter_value(
        &mut self,
        _instance: InstanceHandle,
        _index: usize,
        _value: &ParamValue,
    ) -> TimelineResult<()> {
        Ok(())
    }

    fn get_parameter_value(&self, _instance: InstanceHandle, _index: usize) -> Option<ParamValue> {
        None
    }

    fn apply(
        &mut self,
        layers: &[Layer],
        _active: &[ActiveEffect],
        _tc: Timecode,
    ) -> TimelineResult<Layer> {
        Ok(layers[0].clone())
    }
}

#[test]
fn failed_chain_init_reports_the_init_error() {
    let mut list = frames_at(&[0, 40]);
    list.add_filter_instance(
        Timecode(0),
        Timecode(40),
        FilterInitEvent::new(FilterId::from_name("glow"), FilterInfo::default(), [0], [0]),
        &[],
    )
    .unwrap();
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, BrittleFx::default());
    let mut session = RenderSession::new(
        &mut list,
        video_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: None,
        },
        InMemorySink::new(),
    )
    .unwrap();

    let err = session.step().unwrap_err();
    assert_eq!(err.to_string(), TimelineError::validation("init refused").to_string());
    assert_eq!(session.live_instances(), 0);
    drop(session);
    assert_eq!(fx.torn_down, vec![InstanceHandle(1)]);
}

#[test]
fn pause_holds_the_session() {
    let mut list = frames_at(&[0, 40]);
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut session = RenderSession::new(
        &mut list,
        video_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: None,
        },
        InMemorySink::new(),
    )
    .unwrap();
    assert_eq!(session.step().unwrap(), RenderState::Processing);
    session.pause();
    assert_eq!(session.step().unwrap(), RenderState::EffectsPaused);
    assert_eq!(session.next_frame(), 1);
    assert!(session.run_to_completion().is_err());

    session.resume();
    assert_eq!(session.state(), RenderState::Processing);
    session.run_to_completion().unwrap();
    assert_eq!(session.stats().frames_written, 2);
}

#[test]
fn failed_frame_write_is_retried_in_order() {
    let mut list = frames_at(&[0, 40, 80]);
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let sink = FlakySink {
        fail_next: 1,
        ..FlakySink::default()
    };
    let mut session = RenderSession::new(
        &mut list,
        video_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: None,
        },
        sink,
    )
    .unwrap();

    let err = loop {
        match session.step() {
            Ok(_) => continue,
            Err(e) => break e,
        }
    };
    assert!(err.is_retryable());
    assert_eq!(session.state(), RenderState::WriteFrameError);
    assert_eq!(session.step().unwrap(), RenderState::Processing);

    let stats = session.run_to_completion().unwrap();
    assert_eq!(stats.frames_written, 3);
    assert_eq!(session.into_sink().unwrap().written, vec![0, 1, 2]);
}

#[test]
fn cancellation_rolls_output_back() {
    let mut list = frames_at(&[0, 40, 80, 120]);
    let info = FilterInfo::default();
    list.add_filter_instance(
        Timecode(0),
        Timecode(120),
        FilterInitEvent::new(FilterId::from_name("tint"), info, [0], [0]),
        &[],
    )
    .unwrap();
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut mixer = Mixer::default();
    let token = CancelToken::new();
    let mut session = RenderSession::new(
        &mut list,
        RenderSessionOpts::default(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: Some(&mut mixer),
        },
        InMemorySink::new(),
    )
    .unwrap()
    .with_cancel_token(token.clone());

    for _ in 0..4 {
        session.step().unwrap();
    }
    assert!(session.live_instances() > 0);
    token.cancel();
    assert!(matches!(session.step(), Err(TimelineError::Cancelled)));
    assert_eq!(session.state(), RenderState::Ready);
    assert_eq!(session.live_instances(), 0);
    assert!(session.sink().unwrap().frames.is_empty());

    token.reset();
    let stats = session.run_to_completion().unwrap();
    assert_eq!(stats.frames_written, 4);
    drop(session);
    assert_eq!(mixer.truncated, vec![Timecode(0)]);
    assert!(fx.live.is_empty());
}

#[test]
fn audio_is_batched_and_split_at_changes() {
    let mut list = audio_list();
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut mixer = Mixer::default();
    let mut session = RenderSession::new(
        &mut list,
        audio_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: Some(&mut mixer),
        },
        InMemorySink::new(),
    )
    .unwrap()
    .with_dest_clip(ClipId(9));
    let stats = session.run_to_completion().unwrap();
    assert_eq!(stats.frames_written, 0);
    assert_eq!(stats.audio_blocks, 4);
    drop(session);

    let spans: Vec<(i64, i64)> = mixer
        .segments
        .iter()
        .map(|s| (s.from_tc.0, s.to_tc.0))
        .collect();
    assert_eq!(spans, vec![(0, 50), (50, 100), (100, 150), (150, 160)]);
    let second = &mixer.segments[1];
    assert_eq!(second.tracks, vec![0]);
    assert_eq!(second.clips, vec![ClipId(5)]);
    assert_eq!(second.dest_clip, Some(ClipId(9)));
    assert!((second.seeks[0] - 0.05).abs() < 1e-9);
    assert_eq!(second.volumes, vec![1.0]);
    assert!(mixer.segments[2].tracks.is_empty());
}

#[test]
fn audio_read_failure_is_retried() {
    let mut list = audio_list();
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut mixer = Mixer {
        fail_next: Some(IoKind::ReadAudio),
        ..Mixer::default()
    };
    let mut session = RenderSession::new(
        &mut list,
        audio_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: Some(&mut mixer),
        },
        InMemorySink::new(),
    )
    .unwrap();
    let err = session.step().unwrap_err();
    assert_eq!(err.io_kind(), Some(IoKind::ReadAudio));
    assert_eq!(session.state(), RenderState::ReadAudioError);
    assert!(session.state().is_error());

    let stats = session.run_to_completion().unwrap();
    assert_eq!(stats.audio_blocks, 4);
}

#[test]
fn flush_writes_audio_ahead_of_video() {
    let mut list = audio_list();
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut mixer = Mixer::default();
    let opts = RenderSessionOpts {
        max_audio_block: Timecode(50),
        ..RenderSessionOpts::default()
    };
    let mut session = RenderSession::new(
        &mut list,
        opts,
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: Some(&mut mixer),
        },
        InMemorySink::new(),
    )
    .unwrap();
    session.flush_audio_to(Timecode(80));
    for _ in 0..3 {
        session.step().unwrap();
    }
    assert_eq!(session.next_frame(), 1);
    drop(session);
    let spans: Vec<(i64, i64)> = mixer
        .segments
        .iter()
        .map(|s| (s.from_tc.0, s.to_tc.0))
        .collect();
    assert_eq!(spans, vec![(0, 50), (50, 80)]);
}

#[test]
fn read_frame_failure_leaves_the_frame_pending() {
    let mut list = frames_at(&[0, 40]);
    let (mut clips, mut fx) = (Clips { fail_reads: 1 }, Fx::default());
    let mut session = RenderSession::new(
        &mut list,
        video_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: None,
        },
        InMemorySink::new(),
    )
    .unwrap();
    let err = session.step().unwrap_err();
    assert_eq!(err.io_kind(), Some(IoKind::ReadFrame));
    assert_eq!(session.next_frame(), 0);
    session.run_to_completion().unwrap();
    assert_eq!(shown(&session.into_sink().unwrap()), vec![1, 2]);
}

#[test]
fn unordered_lists_are_rejected() {
    let mut list = frames_at(&[100]);
    list.append_noquant_event(Timecode(50), Event::Frame(FrameEvent::single(1, 9)))
        .unwrap();
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let res = RenderSession::new(
        &mut list,
        video_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: None,
        },
        InMemorySink::new(),
    );
    assert!(matches!(res, Err(TimelineError::Validation(_))));
}

#[test]
fn reset_replans_for_new_outputs() {
    let mut list = audio_list();
    let (mut clips, mut fx) = (Clips { fail_reads: 0 }, Fx::default());
    let mut mixer = Mixer::default();
    let mut session = RenderSession::new(
        &mut list,
        audio_opts(),
        Collaborators {
            frames: &mut clips,
            effects: &mut fx,
            audio: Some(&mut mixer),
        },
        InMemorySink::new(),
    )
    .unwrap();
    session.render_events(false, false, true).unwrap();
    assert_eq!(
        session.render_events(true, true, false).unwrap(),
        RenderState::Ready
    );
    assert_eq!(session.total_frames(), 4);
    let stats = session.run_to_completion().unwrap();
    assert_eq!(stats.frames_written, 4);
    assert_eq!(stats.audio_blocks, 0);
}
