//! Latest detection result per room.
//!
//! The key set is fixed at construction from the room registry. Each slot holds
//! an `Arc<DetectionResult>` that is swapped whole under a write lock, so a
//! reader sees either the old snapshot or the new one, never a mix. Readers
//! hold the lock only long enough to clone the `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::detect::DetectionResult;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::RoomRegistry;

pub struct DetectionCache {
    slots: HashMap<String, RwLock<Option<Arc<DetectionResult>>>>,
}

impl DetectionCache {
    pub fn new<'a>(room_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let slots = room_ids
            .into_iter()
            .map(|id| (id.to_string(), RwLock::new(None)))
            .collect();
        Self { slots }
    }

    pub fn for_registry(registry: &RoomRegistry) -> Self {
        Self::new(registry.ids())
    }

    /// Replace the room's current result.
    ///
    /// Returns `Ok(false)` without publishing when the cache already holds a
    /// result with the same or a later sequence number.
    pub fn set(&self, result: impl Into<Arc<DetectionResult>>) -> PipelineResult<bool> {
        let result: Arc<DetectionResult> = result.into();
        let slot = self
            .slots
            .get(result.room_id())
            .ok_or_else(|| PipelineError::UnknownRoom(result.room_id().to_string()))?;
        let mut current = slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.as_ref() {
            if existing.sequence() >= result.sequence() {
                return Ok(false);
            }
        }
        *current = Some(result);
        Ok(true)
    }

    /// Current result, or `None` before the room's first completed cycle and
    /// for rooms outside the registry.
    pub fn get(&self, room_id: &str) -> Option<Arc<DetectionResult>> {
        self.slots
            .get(room_id)?
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.slots.contains_key(room_id)
    }

    /// Number of rooms that have a published result.
    pub fn populated(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.read().unwrap_or_else(PoisonError::into_inner).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
