//! Quantiser and rebase passes.
//!
//! Recording produces irregular timecodes: frames arrive whenever the
//! capture loop got to them, recording pauses leave gaps, and the audio
//! thread appends its events out of band. These passes turn such a list into
//! one whose frames sit exactly on an output grid.

use crate::config::QuantiseOpts;
use crate::event::list::EventList;
use crate::event::model::{AudioFrameEvent, Event, FrameEvent, MarkerKind};
use crate::foundation::core::{Fps, Timecode};
use crate::foundation::error::TimelineResult;
use crate::foundation::ids::EventId;

/// Outcome of [`close_gaps`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GapReport {
    /// Record-end/record-start gaps collapsed.
    pub gaps_closed: usize,
    /// Total ticks removed by collapsing.
    pub removed_ticks: i64,
    /// Length of the first collapsed gap. Rendering back onto the clip that
    /// was being recorded over shifts by this much.
    pub retarget_delta: Option<i64>,
    /// Instances removed because their window fell inside a gap.
    pub instances_removed: usize,
}

/// Outcome of a quantise pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuantiseReport {
    /// Frames that shared an output slot with a later frame.
    pub frames_dropped: u64,
    /// Frames inserted to fill empty output slots.
    pub frames_duplicated: u64,
    /// Non-frame events whose timecode changed.
    pub events_retimed: u64,
    /// Instances whose init and deinit landed on the same grid point.
    pub instances_removed: u64,
}

impl QuantiseReport {
    fn absorb(&mut self, other: &QuantiseReport) {
        self.frames_dropped += other.frames_dropped;
        self.frames_duplicated += other.frames_duplicated;
        self.events_retimed += other.events_retimed;
        self.instances_removed += other.instances_removed;
    }
}

/// Collapse every gap between a record end and the following record start.
///
/// One forward pass keeps a running offset; every event is shifted back by
/// it, `play_start` becomes zero, and events recorded inside a gap are pinned
/// to the point where the gap closed. Consecutive gaps with nothing between
/// them collapse cumulatively. The markers bounding a collapsed gap are
/// deleted, so neighbouring recorded spans merge into one and a second pass
/// finds nothing left to close. Instances whose window collapsed inside a gap
/// are removed and the filter maps are repaired.
#[tracing::instrument(skip(list), fields(events = list.len()))]
pub fn close_gaps(list: &mut EventList, play_start: Timecode) -> TimelineResult<GapReport> {
    if list.is_unordered() {
        reorder_noquant(list)?;
    }
    let mut report = GapReport::default();
    let mut offset = play_start.0;
    let mut gap_from: Option<(Timecode, EventId)> = None;
    let mut last_out = Timecode::ZERO;
    let mut spent: Vec<EventId> = Vec::new();

    for id in list.ids() {
        let node = list.node(id)?;
        let tc = node.timecode();
        let marker = node.event().as_marker().map(|m| m.kind);

        if marker == Some(MarkerKind::RecordStart)
            && let Some((end, opened_by)) = gap_from.take()
        {
            let gap = tc.since(end).max(0);
            offset += gap;
            report.gaps_closed += 1;
            report.removed_ticks += gap;
            report.retarget_delta.get_or_insert(gap);
            spent.try_reserve(2)?;
            spent.push(opened_by);
            spent.push(id);
        }

        let src = gap_from.map_or(tc, |(end, _)| end.min(tc));
        let out = Timecode(src.0 - offset).max(last_out);
        list.retime(id, out)?;
        last_out = out;

        if marker == Some(MarkerKind::RecordEnd) {
            match gap_from {
                None => gap_from = Some((tc, id)),
                Some(_) => {
                    spent.try_reserve(1)?;
                    spent.push(id);
                }
            }
        }
    }
    for id in spent {
        list.delete(id)?;
    }
    list.sort_stable()?;
    report.instances_removed = drop_collapsed_instances(list, false)?;
    list.prune_inactive_map_entries()?;
    list.dedupe_filter_maps()?;

    tracing::debug!(
        gaps = report.gaps_closed,
        removed = report.removed_ticks,
        collapsed = report.instances_removed,
        "closed record gaps"
    );
    Ok(report)
}

/// Restore `(timecode, rank)` order after unordered no-quantise appends.
///
/// Misplaced runs are re-spliced at their timecodes (equal keys keep their
/// recorded order). No-quantise filter maps are then merged with the map in
/// force before them, the instances they name are threaded through every map
/// of their window, and the result is pruned back to one duplicate-free map
/// sequence. Returns how many events changed position.
#[tracing::instrument(skip(list), fields(events = list.len()))]
pub fn reorder_noquant(list: &mut EventList) -> TimelineResult<usize> {
    let moved = list.sort_stable()?;

    let noquant_maps: Vec<EventId> = list
        .iter()
        .filter(|(_, n)| n.is_noquant() && matches!(n.event(), Event::FilterMap(_)))
        .map(|(id, _)| id)
        .collect();

    let mut touched: Vec<EventId> = Vec::new();
    for map in noquant_maps {
        let tc = list.timecode(map)?;
        let own = list.filter_map_inits(map)?.to_vec();
        let mut merged = match list.get_filter_map_before(map, None) {
            Some(prev) => list.filter_map_inits(prev)?.to_vec(),
            None => Vec::new(),
        };
        for &init in &own {
            if !list.contains(init) || !list.is_active_at(init, tc)? {
                continue;
            }
            list.add_init_event_to_filter_map(&mut merged, init, Some(&own))?;
            if !touched.contains(&init) {
                touched.push(init);
            }
        }
        if let Event::FilterMap(m) = list.event_mut(map)? {
            m.inits = merged;
        }
        list.set_noquant(map, false)?;
    }

    for init in touched {
        list.rebuild_filter_maps_for(init)?;
    }
    list.prune_inactive_map_entries()?;
    list.dedupe_filter_maps()?;
    list.set_unordered(false);

    if moved > 0 {
        tracing::debug!(moved, "reordered no-quantise events");
    }
    Ok(moved)
}

/// Quantise a copy of `list` onto the `fps` grid.
///
/// Output slots run from the first frame's slot to the last frame's slot.
/// Each slot shows the latest frame whose rounded slot is not after it, so
/// frames sharing a slot are dropped (their audio survives as an audio-only
/// event) and empty slots repeat the previous frame, except across a record
/// end. Other events snap to the nearest grid point; param changes are then
/// clamped into their owner's window, and instances whose window collapses
/// are removed. No-quantise events keep their timecodes.
///
/// Quantising an already quantised list at the same rate changes nothing.
pub fn quantise_events(list: &EventList, fps: Fps) -> TimelineResult<EventList> {
    let mut out = list.clone();
    quantise_into(&mut out, fps)?;
    Ok(out)
}

/// Quantise `list` in place. On error `list` is left as it was.
pub fn quantise_events_in_place(list: &mut EventList, fps: Fps) -> TimelineResult<QuantiseReport> {
    let mut work = list.clone();
    let report = quantise_into(&mut work, fps)?;
    *list = work;
    Ok(report)
}

#[tracing::instrument(skip(list), fields(events = list.len()))]
fn quantise_into(list: &mut EventList, fps: Fps) -> TimelineResult<QuantiseReport> {
    let fps = Fps::new(fps.num, fps.den)?;
    if list.is_unordered() {
        reorder_noquant(list)?;
    }
    let mut report = QuantiseReport::default();

    let mut frames: Vec<(EventId, i64)> = Vec::new();
    let mut others: Vec<(EventId, Timecode)> = Vec::new();
    let mut pauses: Vec<Timecode> = Vec::new();
    for (id, node) in list.iter() {
        if node.is_noquant() {
            continue;
        }
        match node.event() {
            Event::Frame(_) => frames.push((id, fps.tc_to_frame_round(node.timecode()))),
            other => {
                if other
                    .as_marker()
                    .is_some_and(|m| m.kind == MarkerKind::RecordEnd)
                {
                    pauses.push(fps.snap_tc(node.timecode()));
                }
                others.push((id, node.timecode()));
            }
        }
    }

    let mut survivors: Vec<(EventId, i64)> = Vec::with_capacity(frames.len());
    for (i, &(id, slot)) in frames.iter().enumerate() {
        let superseded = frames.get(i + 1).is_some_and(|&(_, next)| next == slot);
        if superseded {
            report.frames_dropped += 1;
            let audio = match list.event(id)? {
                Event::Frame(f) => f.audio.clone(),
                _ => Vec::new(),
            };
            if audio.is_empty() {
                list.delete(id)?;
            } else {
                list.replace(id, Event::AudioFrame(AudioFrameEvent { audio }))?;
                list.retime(id, fps.frame_to_tc(slot))?;
            }
            continue;
        }
        list.retime(id, fps.frame_to_tc(slot))?;
        survivors.push((id, slot));
    }

    for &(id, tc) in &others {
        let snapped = fps.snap_tc(tc);
        if snapped != tc {
            list.retime(id, snapped)?;
            report.events_retimed += 1;
        }
    }
    for &(id, _) in &others {
        let Some(init) = list.event(id)?.as_param_change().map(|pc| pc.init()) else {
            continue;
        };
        let before = list.timecode(id)?;
        let lo = list.timecode(init)?;
        let hi = list.window_end(init)?;
        let clamped = before.clamp(lo, hi.max(lo));
        if clamped != before {
            list.retime(id, clamped)?;
        }
    }
    list.sort_stable()?;

    report.instances_removed += drop_collapsed_instances(list, true)? as u64;

    for pair in survivors.windows(2) {
        let (from, slot) = pair[0];
        let (_, next_slot) = pair[1];
        if next_slot <= slot + 1
            || paused_between(&pauses, fps.frame_to_tc(slot), fps.frame_to_tc(next_slot))
        {
            continue;
        }
        let tracks = match list.event(from)? {
            Event::Frame(f) => f.tracks.clone(),
            _ => continue,
        };
        let mut hint = Some(from);
        for n in slot + 1..next_slot {
            let dup = FrameEvent {
                tracks: tracks.clone(),
                ..FrameEvent::default()
            };
            hint = Some(list.insert_event_at(fps.frame_to_tc(n), Event::Frame(dup), hint)?);
            report.frames_duplicated += 1;
        }
    }

    list.prune_inactive_map_entries()?;
    list.dedupe_filter_maps()?;

    tracing::debug!(
        dropped = report.frames_dropped,
        duplicated = report.frames_duplicated,
        retimed = report.events_retimed,
        collapsed = report.instances_removed,
        "quantised event list"
    );
    Ok(report)
}

/// Remove every instance whose deinit is not after its init. With
/// `skip_noquant`, no-quantise inits are left alone.
fn drop_collapsed_instances(list: &mut EventList, skip_noquant: bool) -> TimelineResult<usize> {
    let collapsed: Vec<EventId> = list
        .iter()
        .filter_map(|(id, n)| {
            let fi = n.event().as_filter_init()?;
            let deinit = list.get(fi.deinit()?)?;
            let pinned = skip_noquant && n.is_noquant();
            (!pinned && deinit.timecode() <= n.timecode()).then_some(id)
        })
        .collect();
    for &init in &collapsed {
        list.remove_filter_from_event_list(init)?;
    }
    Ok(collapsed.len())
}

/// Whether recording paused in `[from, to)`. `pauses` is sorted.
fn paused_between(pauses: &[Timecode], from: Timecode, to: Timecode) -> bool {
    let i = pauses.partition_point(|&p| p < from);
    pauses.get(i).is_some_and(|&p| p < to)
}

/// Quantiser state carried across passes of one recording session.
///
/// Each [`QuantizerState::run`] reorders no-quantise events, optionally
/// closes record gaps, and quantises, all or nothing.
#[derive(Clone, Debug)]
pub struct QuantizerState {
    opts: QuantiseOpts,
    retarget_delta: Option<i64>,
    last_gaps: GapReport,
    totals: QuantiseReport,
    passes: u64,
}

impl QuantizerState {
    /// New state for `opts`.
    pub fn new(opts: QuantiseOpts) -> TimelineResult<Self> {
        Fps::new(opts.fps.num, opts.fps.den)?;
        Ok(Self {
            opts,
            retarget_delta: None,
            last_gaps: GapReport::default(),
            totals: QuantiseReport::default(),
            passes: 0,
        })
    }

    /// Options in use.
    pub fn opts(&self) -> &QuantiseOpts {
        &self.opts
    }

    /// Run one pass over `list`.
    pub fn run(&mut self, list: &mut EventList) -> TimelineResult<QuantiseReport> {
        let mut work = list.clone();
        if work.is_unordered() {
            reorder_noquant(&mut work)?;
        }
        let gaps = if self.opts.close_gaps {
            Some(close_gaps(&mut work, self.opts.play_start)?)
        } else {
            None
        };
        let report = quantise_into(&mut work, self.opts.fps)?;
        *list = work;

        if let Some(gaps) = gaps {
            if self.retarget_delta.is_none() {
                self.retarget_delta = gaps.retarget_delta;
            }
            self.last_gaps = gaps;
        }
        self.totals.absorb(&report);
        self.passes += 1;
        Ok(report)
    }

    /// Shift recorded on the first closed gap, kept across passes.
    pub fn retarget_delta(&self) -> Option<i64> {
        self.retarget_delta
    }

    /// Gap report of the latest pass that closed gaps.
    pub fn last_gaps(&self) -> GapReport {
        self.last_gaps
    }

    /// Sum of every pass's report.
    pub fn totals(&self) -> QuantiseReport {
        self.totals
    }

    /// Number of completed passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Forget everything but the options.
    pub fn reset(&mut self) {
        self.retarget_delta = None;
        self.last_gaps = GapReport::default();
        self.totals = QuantiseReport::default();
        self.passes = 0;
    }
}

#[cfg(test)]
#[path = "../tests/unit/quantise.rs"]
mod tests;
