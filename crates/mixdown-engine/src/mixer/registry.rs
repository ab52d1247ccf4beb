//! Active play handles and audio ports

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use mixdown_core::{StereoBuffer, TrackId, WeakTrack};
use tracing::{debug, warn};

use crate::audio_port::AudioPort;
use crate::play_handle::{PlayHandle, PlayHandleId, RenderContext};

/// A registered handle plus its per-period scratch output
pub(crate) struct HandleSlot {
    pub id: PlayHandleId,
    pub handle: Box<dyn PlayHandle>,
    pub scratch: StereoBuffer,
    pub faulted: bool,
    pub finished: bool,
    pub rendered_period: Option<u64>,
}

impl HandleSlot {
    fn new(id: PlayHandleId, handle: Box<dyn PlayHandle>) -> Self {
        Self {
            id,
            handle,
            scratch: StereoBuffer::stereo(0),
            faulted: false,
            finished: false,
            rendered_period: None,
        }
    }

    /// Render one period into the scratch buffer. A panic marks the slot faulted.
    pub fn render(&mut self, ctx: &RenderContext) {
        if self.faulted {
            return;
        }
        self.scratch.resize_frames(ctx.frames);
        self.scratch.clear();

        let handle = &mut self.handle;
        let scratch = &mut self.scratch;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handle.render(ctx, scratch);
            handle.is_finished()
        }));
        match result {
            Ok(finished) => self.finished = finished,
            Err(_) => {
                warn!(handle = %self.id, kind = ?self.handle.kind(), "Play handle panicked during render, dropping it");
                self.faulted = true;
                self.scratch.clear();
            }
        }
        self.rendered_period = Some(ctx.period);
    }
}

pub(crate) type SharedSlot = Arc<Mutex<HandleSlot>>;

pub(crate) fn lock_slot(slot: &SharedSlot) -> MutexGuard<'_, HandleSlot> {
    match slot.lock() {
        Ok(s) => s,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) struct Entry {
    pub id: PlayHandleId,
    /// Owning track id (None if it was already gone at registration)
    pub owner: Option<(Option<TrackId>, WeakTrack)>,
    pub port: Option<Arc<AudioPort>>,
    pub slot: SharedSlot,
}

impl Entry {
    /// Owner track is muted (a dropped owner also counts)
    pub fn is_silenced(&self) -> bool {
        match &self.owner {
            Some((_, track)) => track.upgrade().map(|t| t.is_muted()).unwrap_or(true),
            None => false,
        }
    }

    pub fn is_orphaned(&self) -> bool {
        matches!(&self.owner, Some((_, track)) if track.strong_count() == 0)
    }
}

/// State guarded by the global mixer lock
pub(crate) struct Registry {
    pub entries: Vec<Entry>,
    pub pending_removal: HashSet<PlayHandleId>,
    pub ports: Vec<Arc<AudioPort>>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            pending_removal: HashSet::new(),
            ports: Vec::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, handle: Box<dyn PlayHandle>) -> PlayHandleId {
        let id = PlayHandleId(self.next_id);
        self.next_id += 1;

        let owner = handle.owner().map(|weak| (weak.upgrade().map(|track| track.id()), weak));
        let port = handle.audio_port();
        if let Some(port) = &port {
            self.add_port(port.clone());
        }
        debug!(handle = %id, kind = ?handle.kind(), "Play handle registered");
        self.entries.push(Entry {
            id,
            owner,
            port,
            slot: Arc::new(Mutex::new(HandleSlot::new(id, handle))),
        });
        id
    }

    pub fn contains(&self, id: PlayHandleId) -> bool {
        self.entries.iter().any(|e| e.id == id) && !self.pending_removal.contains(&id)
    }

    /// Returns false when the handle is not active
    pub fn mark_removed(&mut self, id: PlayHandleId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.pending_removal.insert(id)
    }

    pub fn mark_track_removed(&mut self, track: TrackId) -> usize {
        let ids: Vec<PlayHandleId> = self
            .entries
            .iter()
            .filter(|e| matches!(e.owner, Some((Some(owner), _)) if owner == track))
            .map(|e| e.id)
            .collect();
        ids.into_iter().filter(|id| self.mark_removed(*id)).count()
    }

    pub fn mark_all_removed(&mut self) -> usize {
        let ids: Vec<PlayHandleId> = self.entries.iter().map(|e| e.id).collect();
        ids.into_iter().filter(|id| self.mark_removed(*id)).count()
    }

    pub fn active_count(&self) -> usize {
        self.entries.len() - self.pending_removal.len()
    }

    /// Drop handles marked for removal. Only called between worker passes.
    pub fn apply_removals(&mut self) {
        if self.pending_removal.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_removal);
        self.entries.retain(|e| !pending.contains(&e.id));
        debug!(removed = pending.len(), "Applied deferred removals");
    }

    /// Drop finished, faulted, orphaned and removed handles
    pub fn retire(&mut self) {
        let pending = std::mem::take(&mut self.pending_removal);
        self.entries.retain(|entry| {
            if pending.contains(&entry.id) || entry.is_orphaned() {
                return false;
            }
            let slot = lock_slot(&entry.slot);
            !(slot.finished || slot.faulted)
        });
    }

    pub fn add_port(&mut self, port: Arc<AudioPort>) -> bool {
        if self.ports.iter().any(|p| Arc::ptr_eq(p, &port)) {
            return false;
        }
        debug!(port = port.name(), "Audio port registered");
        self.ports.push(port);
        true
    }

    pub fn remove_port(&mut self, port: &Arc<AudioPort>) -> bool {
        let before = self.ports.len();
        self.ports.retain(|p| !Arc::ptr_eq(p, port));
        before != self.ports.len()
    }

    pub fn has_port(&self, port: &Arc<AudioPort>) -> bool {
        self.ports.iter().any(|p| Arc::ptr_eq(p, port))
    }
}
