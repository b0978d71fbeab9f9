/// Stable handle to a node in an [`crate::EventList`] slab.
///
/// The generation makes handles to deleted nodes detectable: once a slot is
/// reused, old handles no longer resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl EventId {
    /// Slot index, mainly useful for diagnostics.
    pub fn index(self) -> u32 {
        self.index
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Opaque identity of an effect filter, derived from its name hash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct FilterId(pub u64);

impl FilterId {
    /// Hash a filter name (for example a plugin package/name/author key).
    pub fn from_name(name: &str) -> Self {
        FilterId(xxhash_rust::xxh3::xxh3_64(name.as_bytes()))
    }
}

/// Source clip identifier. Values `<= 0` mean "no clip".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct ClipId(pub i32);

impl ClipId {
    /// Whether this refers to a real clip.
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}
