use smallvec::SmallVec;

use crate::foundation::core::Timecode;
use crate::foundation::ids::{ClipId, EventId, FilterId};

/// One track's contribution to a frame event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackFrame {
    /// Source clip.
    pub clip: ClipId,
    /// 1-based frame number in the source clip; `<= 0` is blank.
    pub frame: i64,
}

impl TrackFrame {
    /// An empty track slot.
    pub const BLANK: TrackFrame = TrackFrame {
        clip: ClipId(0),
        frame: 0,
    };

    /// Construct a track slot showing `frame` of `clip`.
    pub fn new(clip: i32, frame: i64) -> Self {
        Self {
            clip: ClipId(clip),
            frame,
        }
    }

    /// Whether this slot shows nothing.
    pub fn is_blank(&self) -> bool {
        !self.clip.is_valid() || self.frame <= 0
    }
}

/// Audio state change for one track: start, seek or stop playback of a clip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioTrack {
    /// Track number; negative tracks are backing-audio tracks.
    pub track: i32,
    /// Clip supplying the audio.
    pub clip: ClipId,
    /// Seek position in the clip, seconds.
    pub seek: f64,
    /// Playback velocity; `0.0` stops the track.
    pub velocity: f64,
}

/// Frame display event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameEvent {
    /// Per-track frames, indexed by track number.
    pub tracks: SmallVec<[TrackFrame; 4]>,
    /// Audio changes that take effect with this frame.
    pub audio: Vec<AudioTrack>,
    /// Offset into a scrap file holding the rendered pixels, if any.
    pub scrap_offset: Option<u64>,
    /// Text drawn over the output frame.
    pub overlay_text: Option<String>,
}

impl FrameEvent {
    /// Build a frame event from per-track slots.
    pub fn new(tracks: impl IntoIterator<Item = TrackFrame>) -> Self {
        Self {
            tracks: tracks.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Single-track frame event.
    pub fn single(clip: i32, frame: i64) -> Self {
        Self::new([TrackFrame::new(clip, frame)])
    }

    /// Attach audio changes.
    pub fn with_audio(mut self, audio: impl IntoIterator<Item = AudioTrack>) -> Self {
        self.audio = audio.into_iter().collect();
        self
    }

    /// Whether any track shows a non-blank frame.
    pub fn has_visible_track(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_blank())
    }

    /// Slot for `track`, or blank when the track is beyond this event.
    pub fn track(&self, track: usize) -> TrackFrame {
        self.tracks.get(track).copied().unwrap_or(TrackFrame::BLANK)
    }
}

/// Audio-only event, usually recorded by the audio thread.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioFrameEvent {
    /// Audio changes.
    pub audio: Vec<AudioTrack>,
}

/// Transition parameter description for audio-transition filters.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransitionParam {
    /// Index of the parameter holding the transition position.
    pub index: usize,
    /// Value meaning "fully first input".
    pub min: f64,
    /// Value meaning "fully second input".
    pub max: f64,
}

/// Static facts about a filter, captured when its init event is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FilterInfo {
    /// Evaluate after all non-process-last instances in a filter map.
    pub process_last: bool,
    /// Set for audio-transition filters.
    pub transition: Option<TransitionParam>,
    /// Number of parameters (one change chain each).
    pub num_params: usize,
}

/// Host-side binding of a filter instance to a key and mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostKey {
    /// Key slot.
    pub key: i32,
    /// Mode within the key slot.
    pub mode: i32,
}

/// Head and tail of one parameter's change chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParamChain {
    pub(crate) first: Option<EventId>,
    pub(crate) last: Option<EventId>,
}

impl ParamChain {
    /// Earliest change.
    pub fn first(&self) -> Option<EventId> {
        self.first
    }

    /// Latest change.
    pub fn last(&self) -> Option<EventId> {
        self.last
    }
}

/// Start of an effect instance's active window.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterInitEvent {
    /// Filter identity.
    pub filter: FilterId,
    /// Filter facts.
    pub info: FilterInfo,
    /// Input tracks, in channel order.
    pub in_tracks: SmallVec<[i32; 2]>,
    /// Output tracks, in channel order.
    pub out_tracks: SmallVec<[i32; 2]>,
    /// Per-input-channel enable counts.
    pub in_count: Vec<u32>,
    /// Per-output-channel enable counts.
    pub out_count: Vec<u32>,
    /// Optional host key binding.
    pub host_key: Option<HostKey>,
    pub(crate) deinit: Option<EventId>,
    pub(crate) chains: Vec<ParamChain>,
}

impl FilterInitEvent {
    /// New, unpaired init payload.
    pub fn new(
        filter: FilterId,
        info: FilterInfo,
        in_tracks: impl IntoIterator<Item = i32>,
        out_tracks: impl IntoIterator<Item = i32>,
    ) -> Self {
        let in_tracks: SmallVec<[i32; 2]> = in_tracks.into_iter().collect();
        let out_tracks: SmallVec<[i32; 2]> = out_tracks.into_iter().collect();
        Self {
            filter,
            info,
            in_count: vec![1; in_tracks.len()],
            out_count: vec![1; out_tracks.len()],
            in_tracks,
            out_tracks,
            host_key: None,
            deinit: None,
            chains: vec![ParamChain::default(); info.num_params],
        }
    }

    /// Bind to a host key/mode.
    pub fn with_host_key(mut self, key: i32, mode: i32) -> Self {
        self.host_key = Some(HostKey { key, mode });
        self
    }

    /// Paired deinit, once known.
    pub fn deinit(&self) -> Option<EventId> {
        self.deinit
    }

    /// Change chain for parameter `index`.
    pub fn chain(&self, index: usize) -> Option<&ParamChain> {
        self.chains.get(index)
    }

    /// All parameter chains.
    pub fn chains(&self) -> &[ParamChain] {
        &self.chains
    }

    /// Whether `track` is one of this instance's inputs or outputs.
    pub fn touches_track(&self, track: i32) -> bool {
        self.in_tracks.contains(&track) || self.out_tracks.contains(&track)
    }

    pub(crate) fn reset_links(&mut self) {
        self.deinit = None;
        self.chains = vec![ParamChain::default(); self.info.num_params];
    }
}

/// End of an effect instance's active window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterDeinitEvent {
    pub(crate) init: EventId,
}

impl FilterDeinitEvent {
    /// The init this deinit closes.
    pub fn init(&self) -> EventId {
        self.init
    }
}

/// Parameter value payload.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ParamValue {
    /// Integer parameter.
    Int(i64),
    /// Floating-point parameter.
    Float(f64),
    /// Switch parameter.
    Bool(bool),
    /// Text parameter.
    Text(String),
    /// Multi-valued numeric parameter (colours, points).
    FloatVec(Vec<f64>),
}

impl ParamValue {
    /// Scalar view of numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            ParamValue::FloatVec(v) => v.first().copied(),
            ParamValue::Text(_) => None,
        }
    }

    /// Interpolate towards `other` by `t` in `[0, 1]`.
    ///
    /// Numeric values interpolate linearly; everything else steps at `t >= 1`.
    pub fn lerp(&self, other: &ParamValue, t: f64) -> ParamValue {
        let t = t.clamp(0.0, 1.0);
        match (self, other) {
            (ParamValue::Float(a), ParamValue::Float(b)) => ParamValue::Float(a + (b - a) * t),
            (ParamValue::Int(a), ParamValue::Int(b)) => {
                ParamValue::Int((*a as f64 + (*b - *a) as f64 * t).round() as i64)
            }
            (ParamValue::FloatVec(a), ParamValue::FloatVec(b)) if a.len() == b.len() => {
                ParamValue::FloatVec(a.iter().zip(b).map(|(x, y)| x + (y - x) * t).collect())
            }
            _ => {
                if t >= 1.0 {
                    other.clone()
                } else {
                    self.clone()
                }
            }
        }
    }
}

/// A new value for one parameter of one instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamChangeEvent {
    pub(crate) init: EventId,
    pub(crate) index: usize,
    /// New value.
    pub value: ParamValue,
    pub(crate) next_change: Option<EventId>,
    pub(crate) prev_change: Option<EventId>,
}

impl ParamChangeEvent {
    /// Owning filter init.
    pub fn init(&self) -> EventId {
        self.init
    }

    /// Parameter index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Next change in this parameter's chain.
    pub fn next_change(&self) -> Option<EventId> {
        self.next_change
    }

    /// Previous change in this parameter's chain.
    pub fn prev_change(&self) -> Option<EventId> {
        self.prev_change
    }
}

/// Ordered set of active instances from this point until superseded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterMapEvent {
    pub(crate) inits: Vec<EventId>,
}

impl FilterMapEvent {
    /// Map over `inits`, in evaluation order.
    pub fn new(inits: impl IntoIterator<Item = EventId>) -> Self {
        Self {
            inits: inits.into_iter().collect(),
        }
    }

    /// Active instance inits, in evaluation order.
    pub fn inits(&self) -> &[EventId] {
        &self.inits
    }
}

/// Marker kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// Recording (re)started here.
    RecordStart,
    /// Recording stopped here.
    RecordEnd,
    /// Start of an inserted block.
    BlockStart,
    /// Following events were appended out of order.
    BlockUnordered,
}

/// Typed marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkerEvent {
    /// Marker kind.
    pub kind: MarkerKind,
    /// Auxiliary value (block number, clip number, ...).
    pub aux: Option<i32>,
}

impl MarkerEvent {
    /// Marker without auxiliary data.
    pub fn new(kind: MarkerKind) -> Self {
        Self { kind, aux: None }
    }
}

/// Fieldless discriminant of [`Event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::Frame`].
    Frame,
    /// [`Event::AudioFrame`].
    AudioFrame,
    /// [`Event::FilterInit`].
    FilterInit,
    /// [`Event::FilterDeinit`].
    FilterDeinit,
    /// [`Event::ParamChange`].
    ParamChange,
    /// [`Event::FilterMap`].
    FilterMap,
    /// [`Event::Marker`].
    Marker,
}

/// A timeline event.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Frame display.
    Frame(FrameEvent),
    /// Audio-only change.
    AudioFrame(AudioFrameEvent),
    /// Effect instance activation.
    FilterInit(FilterInitEvent),
    /// Effect instance deactivation.
    FilterDeinit(FilterDeinitEvent),
    /// Parameter change.
    ParamChange(ParamChangeEvent),
    /// Active-instance set.
    FilterMap(FilterMapEvent),
    /// Marker.
    Marker(MarkerEvent),
}

impl Event {
    /// Discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Frame(_) => EventKind::Frame,
            Event::AudioFrame(_) => EventKind::AudioFrame,
            Event::FilterInit(_) => EventKind::FilterInit,
            Event::FilterDeinit(_) => EventKind::FilterDeinit,
            Event::ParamChange(_) => EventKind::ParamChange,
            Event::FilterMap(_) => EventKind::FilterMap,
            Event::Marker(_) => EventKind::Marker,
        }
    }

    /// Equal-timecode precedence; lower sorts first.
    ///
    /// Record/block starts lead, then inits, frame content, param changes,
    /// maps, deinits, and finally record ends.
    pub fn rank(&self) -> u8 {
        match self {
            Event::Marker(m) => match m.kind {
                MarkerKind::RecordStart | MarkerKind::BlockStart => 0,
                MarkerKind::RecordEnd | MarkerKind::BlockUnordered => 6,
            },
            Event::FilterInit(_) => 1,
            Event::Frame(_) | Event::AudioFrame(_) => 2,
            Event::ParamChange(_) => 3,
            Event::FilterMap(_) => 4,
            Event::FilterDeinit(_) => 5,
        }
    }

    /// Audio changes carried by this event, if any.
    pub fn audio(&self) -> Option<&[AudioTrack]> {
        match self {
            Event::Frame(f) if !f.audio.is_empty() => Some(&f.audio),
            Event::AudioFrame(a) => Some(&a.audio),
            _ => None,
        }
    }

    /// Whether replaying this event has effect-runtime side effects.
    pub fn is_effect_event(&self) -> bool {
        matches!(
            self,
            Event::FilterInit(_) | Event::FilterDeinit(_) | Event::ParamChange(_) | Event::FilterMap(_)
        )
    }

    /// Frame payload.
    pub fn as_frame(&self) -> Option<&FrameEvent> {
        match self {
            Event::Frame(f) => Some(f),
            _ => None,
        }
    }

    /// Init payload.
    pub fn as_filter_init(&self) -> Option<&FilterInitEvent> {
        match self {
            Event::FilterInit(f) => Some(f),
            _ => None,
        }
    }

    /// Deinit payload.
    pub fn as_filter_deinit(&self) -> Option<&FilterDeinitEvent> {
        match self {
            Event::FilterDeinit(f) => Some(f),
            _ => None,
        }
    }

    /// Param change payload.
    pub fn as_param_change(&self) -> Option<&ParamChangeEvent> {
        match self {
            Event::ParamChange(p) => Some(p),
            _ => None,
        }
    }

    /// Filter map payload.
    pub fn as_filter_map(&self) -> Option<&FilterMapEvent> {
        match self {
            Event::FilterMap(m) => Some(m),
            _ => None,
        }
    }

    /// Marker payload.
    pub fn as_marker(&self) -> Option<&MarkerEvent> {
        match self {
            Event::Marker(m) => Some(m),
            _ => None,
        }
    }
}

/// A node of the event list: an event plus its position and links.
#[derive(Clone, Debug)]
pub struct EventNode {
    pub(crate) tc: Timecode,
    pub(crate) prev: Option<EventId>,
    pub(crate) next: Option<EventId>,
    pub(crate) linked: bool,
    pub(crate) noquant: bool,
    pub(crate) event: Event,
}

impl EventNode {
    /// Timecode.
    pub fn timecode(&self) -> Timecode {
        self.tc
    }

    /// Payload.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Previous node in the list.
    pub fn prev(&self) -> Option<EventId> {
        self.prev
    }

    /// Next node in the list.
    pub fn next(&self) -> Option<EventId> {
        self.next
    }

    /// Exempt from quantisation (audio-thread origin).
    pub fn is_noquant(&self) -> bool {
        self.noquant
    }

    pub(crate) fn key(&self) -> (Timecode, u8) {
        (self.tc, self.event.rank())
    }
}
