//! Track identity as seen by the mixer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

/// Unique identifier for tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub u64);

/// Shared track state. The mixer only looks at identity and the
/// mute/solo-derived enable flag; everything else belongs to the track model.
#[derive(Debug)]
pub struct Track {
    id: TrackId,
    name: String,
    muted: AtomicBool,
}

/// Strong handle held by the track owner
pub type TrackRef = Arc<Track>;
/// Weak handle held by play handles
pub type WeakTrack = Weak<Track>;

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>) -> TrackRef {
        Arc::new(Self {
            id,
            name: name.into(),
            muted: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Set by the track container from its mute and solo state
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }
}
