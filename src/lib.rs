//! Event-list timeline engine.
//!
//! A recording is an ordered list of timestamped events: frames, audio
//! changes, effect instance lifetimes, parameter changes and filter maps
//! naming the instances active at each point. The crate keeps that graph
//! consistent under edits and renders it:
//!
//! - Build and edit an [`EventList`]
//! - Snap it onto a frame grid with [`quantise_events`] or a [`QuantizerState`]
//! - Drive a [`RenderSession`] step by step into a [`FrameSink`]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod edit;
mod event;
mod filter_map;
mod foundation;
mod params;
mod quantise;
mod render;
mod visibility;

pub use crate::foundation::core::{Fps, TICKS_PER_SECOND, Timecode};
pub use crate::foundation::error::{IoFailure, IoKind, TimelineError, TimelineResult};
pub use crate::foundation::ids::{ClipId, EventId, FilterId};

pub use crate::event::list::{EventList, Iter, ListMeta};
pub use crate::event::model::{
    AudioFrameEvent, AudioTrack, Event, EventKind, EventNode, FilterDeinitEvent, FilterInfo,
    FilterInitEvent, FilterMapEvent, FrameEvent, HostKey, MarkerEvent, MarkerKind, ParamChain,
    ParamChangeEvent, ParamValue, TrackFrame, TransitionParam,
};

pub use crate::config::{EngineConfig, QuantiseOpts, RenderSessionOpts};
pub use crate::filter_map::{compare_filter_maps, remove_event_from_filter_map};
pub use crate::quantise::{
    GapReport, QuantiseReport, QuantizerState, close_gaps, quantise_events,
    quantise_events_in_place, reorder_noquant,
};
pub use crate::render::runtime::{
    ActiveEffect, AudioRenderer, AudioSegment, EffectRuntime, FrameSource, InstanceChain,
    InstanceHandle, Layer,
};
pub use crate::render::session::{
    CancelToken, Collaborators, RenderSession, RenderState, RenderStats,
};
pub use crate::render::sink::{FrameSink, InMemorySink, SinkConfig};
