use super::*;
use crate::event::model::{
    AudioTrack, FilterInfo, FilterInitEvent, FilterMapEvent, MarkerEvent, ParamValue,
};
use crate::foundation::ids::{ClipId, FilterId};

fn fps25() -> Fps {
    Fps::new(25, 1).unwrap()
}

fn snapshot(list: &EventList) -> Vec<(i64, Event)> {
    list.iter()
        .map(|(_, n)| (n.timecode().0, n.event().clone()))
        .collect()
}

fn frame_tcs(list: &EventList) -> Vec<i64> {
    list.iter()
        .filter(|(_, n)| n.event().as_frame().is_some())
        .map(|(_, n)| n.timecode().0)
        .collect()
}

fn marker(list: &mut EventList, tc: i64, kind: MarkerKind) -> EventId {
    list.insert_marker_event_at(Timecode(tc), MarkerEvent::new(kind), None)
        .unwrap()
}

fn frame(list: &mut EventList, tc: i64, n: i64) -> EventId {
    list.insert_frame_event_at(Timecode(tc), FrameEvent::single(1, n), None)
        .unwrap()
}

#[test]
fn frames_are_dropped_and_duplicated_onto_the_grid() {
    let mut list = EventList::new();
    for (tc, n) in [(0, 1), (30, 2), (45, 3), (100, 4)] {
        frame(&mut list, tc, n);
    }
    let report = quantise_events_in_place(&mut list, fps25()).unwrap();

    assert_eq!(frame_tcs(&list), vec![0, 40, 80, 120]);
    assert_eq!(report.frames_dropped, 1);
    assert_eq!(report.frames_duplicated, 1);
    let shown: Vec<i64> = list
        .iter()
        .filter_map(|(_, n)| n.event().as_frame().map(|f| f.tracks[0].frame))
        .collect();
    assert_eq!(shown, vec![1, 3, 3, 4]);
    list.check_integrity().unwrap();
}

#[test]
fn dropped_frames_keep_their_audio() {
    let mut list = EventList::new();
    let audio = AudioTrack {
        track: 0,
        clip: ClipId(2),
        seek: 1.5,
        velocity: 1.0,
    };
    list.append_frame_event(Timecode(0), FrameEvent::single(1, 1).with_audio([audio]))
        .unwrap();
    list.append_frame_event(Timecode(10), FrameEvent::single(1, 2))
        .unwrap();

    quantise_events_in_place(&mut list, fps25()).unwrap();
    let kinds: Vec<_> = list.iter().map(|(_, n)| n.event().kind()).collect();
    assert_eq!(
        kinds,
        vec![crate::event::model::EventKind::AudioFrame, crate::event::model::EventKind::Frame]
    );
    let first = list.get_first().unwrap();
    assert_eq!(list.event(first).unwrap().audio(), Some(&[audio][..]));
}

#[test]
fn quantising_twice_changes_nothing() {
    let mut list = EventList::new();
    marker(&mut list, 0, MarkerKind::RecordStart);
    for (tc, n) in [(0, 1), (33, 2), (70, 3), (95, 4), (180, 5)] {
        frame(&mut list, tc, n);
    }
    marker(&mut list, 190, MarkerKind::RecordEnd);
    let info = FilterInfo {
        num_params: 1,
        ..FilterInfo::default()
    };
    let init = list
        .add_filter_instance(
            Timecode(12),
            Timecode(150),
            FilterInitEvent::new(FilterId::from_name("fade"), info, [0], [0]),
            &[ParamValue::Float(0.0)],
        )
        .unwrap();
    list.append_param_change_event(init, 0, Timecode(77), ParamValue::Float(1.0))
        .unwrap();
    list.check_integrity().unwrap();

    let once = quantise_events(&list, fps25()).unwrap();
    once.check_integrity().unwrap();
    let twice = quantise_events(&once, fps25()).unwrap();
    assert_eq!(snapshot(&once), snapshot(&twice));

    assert_eq!(frame_tcs(&once), vec![0, 40, 80, 120, 160, 200]);
    assert_eq!(once.timecode(init).unwrap(), Timecode(0));
    assert_eq!(once.window_end(init).unwrap(), Timecode(160));
}

#[test]
fn collapsed_instances_are_removed() {
    let mut list = EventList::new();
    frame(&mut list, 0, 1);
    frame(&mut list, 40, 2);
    let init = list
        .add_filter_instance(
            Timecode(10),
            Timecode(15),
            FilterInitEvent::new(FilterId(9), FilterInfo::default(), [0], [0]),
            &[],
        )
        .unwrap();

    let report = quantise_events_in_place(&mut list, fps25()).unwrap();
    assert_eq!(report.instances_removed, 1);
    assert!(!list.contains(init));
    assert_eq!(list.len(), 2);
    list.check_integrity().unwrap();
}

#[test]
fn record_pauses_are_not_filled() {
    let mut list = EventList::new();
    frame(&mut list, 0, 1);
    frame(&mut list, 40, 2);
    marker(&mut list, 40, MarkerKind::RecordEnd);
    marker(&mut list, 200, MarkerKind::RecordStart);
    frame(&mut list, 200, 3);
    frame(&mut list, 280, 4);

    let report = quantise_events_in_place(&mut list, fps25()).unwrap();
    assert_eq!(frame_tcs(&list), vec![0, 40, 200, 240, 280]);
    assert_eq!(report.frames_duplicated, 1);
}

#[test]
fn noquant_events_keep_their_timecodes() {
    let mut list = EventList::new();
    frame(&mut list, 0, 1);
    frame(&mut list, 41, 2);
    let late = list
        .append_noquant_event(Timecode(33), Event::AudioFrame(AudioFrameEvent::default()))
        .unwrap();

    quantise_events_in_place(&mut list, fps25()).unwrap();
    assert!(!list.is_unordered());
    assert_eq!(list.timecode(late).unwrap(), Timecode(33));
    assert_eq!(frame_tcs(&list), vec![0, 40]);
    list.check_integrity().unwrap();
}

#[test]
fn close_gaps_preserves_recorded_spans() {
    let mut list = EventList::new();
    marker(&mut list, 0, MarkerKind::RecordStart);
    for tc in [0, 40, 80] {
        frame(&mut list, tc, tc + 1);
    }
    marker(&mut list, 100, MarkerKind::RecordEnd);
    let stray = list
        .insert_audio_frame_event_at(Timecode(150), AudioFrameEvent::default(), None)
        .unwrap();
    marker(&mut list, 300, MarkerKind::RecordStart);
    for tc in [300, 340] {
        frame(&mut list, tc, tc + 1);
    }
    marker(&mut list, 380, MarkerKind::RecordEnd);

    // pair the k-th record start with the k-th record end
    let spans = |list: &EventList| -> i64 {
        let mut starts = Vec::new();
        let mut ends = Vec::new();
        for (_, n) in list.iter() {
            match n.event().as_marker().map(|m| m.kind) {
                Some(MarkerKind::RecordStart) => starts.push(n.timecode()),
                Some(MarkerKind::RecordEnd) => ends.push(n.timecode()),
                _ => {}
            }
        }
        starts.iter().zip(&ends).map(|(s, e)| e.since(*s)).sum()
    };
    let before = spans(&list);

    let report = close_gaps(&mut list, Timecode::ZERO).unwrap();
    assert_eq!(spans(&list), before);
    assert_eq!(report.gaps_closed, 1);
    assert_eq!(report.removed_ticks, 200);
    assert_eq!(report.retarget_delta, Some(200));
    assert_eq!(frame_tcs(&list), vec![0, 40, 80, 100, 140]);
    assert_eq!(list.timecode(stray).unwrap(), Timecode(100));

    let tcs: Vec<i64> = list.iter().map(|(_, n)| n.timecode().0).collect();
    assert!(tcs.windows(2).all(|w| w[0] <= w[1]));
    assert!(tcs.iter().all(|&t| t >= 0));
    list.check_integrity().unwrap();
}

#[test]
fn consecutive_gaps_collapse_cumulatively() {
    let mut list = EventList::new();
    frame(&mut list, 0, 1);
    marker(&mut list, 100, MarkerKind::RecordEnd);
    marker(&mut list, 200, MarkerKind::RecordStart);
    marker(&mut list, 200, MarkerKind::RecordEnd);
    marker(&mut list, 300, MarkerKind::RecordStart);
    let last = frame(&mut list, 300, 2);

    let report = close_gaps(&mut list, Timecode::ZERO).unwrap();
    assert_eq!(report.gaps_closed, 2);
    assert_eq!(report.removed_ticks, 200);
    assert_eq!(report.retarget_delta, Some(100));
    assert_eq!(list.timecode(last).unwrap(), Timecode(100));
}

#[test]
fn play_start_becomes_zero() {
    let mut list = EventList::new();
    let early = frame(&mut list, 20, 1);
    let later = frame(&mut list, 140, 2);
    close_gaps(&mut list, Timecode(40)).unwrap();
    assert_eq!(list.timecode(early).unwrap(), Timecode(0));
    assert_eq!(list.timecode(later).unwrap(), Timecode(100));
}

#[test]
fn reorder_noquant_merges_audio_thread_maps() {
    let mut list = EventList::new();
    for tc in [0, 40, 80, 120] {
        frame(&mut list, tc, tc + 1);
    }
    let a = list
        .add_filter_instance(
            Timecode(0),
            Timecode(80),
            FilterInitEvent::new(FilterId(1), FilterInfo::default(), [0], [0]),
            &[],
        )
        .unwrap();
    let b = list
        .insert_filter_init_event_at(
            Timecode(40),
            FilterInitEvent::new(FilterId(2), FilterInfo::default(), [0], [0]),
            None,
        )
        .unwrap();
    list.insert_filter_deinit_event_at(Timecode(120), b, None)
        .unwrap();
    list.append_noquant_event(Timecode(40), Event::FilterMap(FilterMapEvent { inits: vec![b] }))
        .unwrap();
    assert!(list.is_unordered());

    let moved = reorder_noquant(&mut list).unwrap();
    assert!(moved > 0);
    assert!(!list.is_unordered());
    list.check_integrity().unwrap();
    assert_eq!(list.active_instances_at(Timecode(50)), vec![a, b]);
    assert_eq!(list.active_instances_at(Timecode(90)), vec![b]);
    assert!(list.active_instances_at(Timecode(130)).is_empty());
    assert!(list.iter().all(|(_, n)| !n.is_noquant()));
}

#[test]
fn quantizer_state_keeps_retarget_across_passes() {
    let opts = QuantiseOpts {
        fps: fps25(),
        close_gaps: true,
        play_start: Timecode::ZERO,
    };
    let mut state = QuantizerState::new(opts).unwrap();
    let mut list = EventList::new();
    frame(&mut list, 0, 1);
    marker(&mut list, 40, MarkerKind::RecordEnd);
    marker(&mut list, 120, MarkerKind::RecordStart);
    frame(&mut list, 130, 2);

    state.run(&mut list).unwrap();
    assert_eq!(state.retarget_delta(), Some(80));
    assert_eq!(frame_tcs(&list), vec![0, 40]);

    state.run(&mut list).unwrap();
    assert_eq!(state.passes(), 2);
    assert_eq!(state.retarget_delta(), Some(80));
    assert_eq!(state.last_gaps().gaps_closed, 0);

    state.reset();
    assert_eq!(state.passes(), 0);
    assert!(QuantizerState::new(QuantiseOpts {
        fps: Fps { num: 0, den: 1 },
        ..opts
    })
    .is_err());
}

#[test]
fn closed_gaps_stay_closed_across_passes() {
    let opts = QuantiseOpts {
        fps: fps25(),
        close_gaps: true,
        play_start: Timecode::ZERO,
    };
    let mut state = QuantizerState::new(opts).unwrap();
    let mut list = EventList::new();
    frame(&mut list, 0, 1);
    frame(&mut list, 40, 2);
    marker(&mut list, 40, MarkerKind::RecordEnd);
    marker(&mut list, 400, MarkerKind::RecordStart);
    for (tc, n) in [(400, 3), (440, 4), (480, 5)] {
        frame(&mut list, tc, n);
    }

    state.run(&mut list).unwrap();
    assert_eq!(frame_tcs(&list), vec![0, 40, 80, 120]);
    assert!(list.iter().all(|(_, n)| n.event().as_marker().is_none()));
    let first = snapshot(&list);

    state.run(&mut list).unwrap();
    assert_eq!(snapshot(&list), first);
    assert_eq!(state.last_gaps(), GapReport::default());
    list.check_integrity().unwrap();
}

#[test]
fn close_gaps_repairs_instances_recorded_inside_a_gap() {
    let mut list = EventList::new();
    frame(&mut list, 0, 1);
    let straddling = list
        .add_filter_instance(
            Timecode(10),
            Timecode(30),
            FilterInitEvent::new(FilterId(1), FilterInfo::default(), [0], [0]),
            &[],
        )
        .unwrap();
    marker(&mut list, 20, MarkerKind::RecordEnd);
    let inside = list
        .add_filter_instance(
            Timecode(30),
            Timecode(40),
            FilterInitEvent::new(FilterId(2), FilterInfo::default(), [0], [0]),
            &[],
        )
        .unwrap();
    marker(&mut list, 50, MarkerKind::RecordStart);
    frame(&mut list, 60, 2);

    let report = close_gaps(&mut list, Timecode::ZERO).unwrap();
    assert_eq!(report.gaps_closed, 1);
    assert_eq!(report.instances_removed, 1);
    assert!(!list.contains(inside));
    list.check_integrity().unwrap();

    assert_eq!(frame_tcs(&list), vec![0, 30]);
    assert_eq!(list.timecode(straddling).unwrap(), Timecode(10));
    assert_eq!(list.active_instances_at(Timecode(10)), vec![straddling]);
    assert!(list.active_instances_at(Timecode(20)).is_empty());
}

#[test]
fn redundant_record_end_inside_a_gap_is_dropped() {
    let mut list = EventList::new();
    frame(&mut list, 0, 1);
    marker(&mut list, 40, MarkerKind::RecordEnd);
    marker(&mut list, 60, MarkerKind::RecordEnd);
    marker(&mut list, 200, MarkerKind::RecordStart);
    let late = frame(&mut list, 240, 2);

    let first = close_gaps(&mut list, Timecode::ZERO).unwrap();
    assert_eq!(first.removed_ticks, 160);
    assert!(list.iter().all(|(_, n)| n.event().as_marker().is_none()));

    let second = close_gaps(&mut list, Timecode::ZERO).unwrap();
    assert_eq!(second.gaps_closed, 0);
    assert_eq!(list.timecode(late).unwrap(), Timecode(80));
}
