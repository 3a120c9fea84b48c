//! Static room configuration.
//!
//! The registry is built once at startup and never mutated. Its id space is
//! the key space of the detection cache and of the scheduler's per-room
//! pipelines.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{PipelineError, PipelineResult};

/// One monitored room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    pub id: String,
    pub name: String,
    pub capacity: u32,
    /// Backing source: a video file or a directory of still images.
    pub source: PathBuf,
    pub equipment: Vec<String>,
}

impl RoomConfig {
    pub fn new(id: &str, name: &str, capacity: u32, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            capacity,
            source: source.into(),
            equipment: Vec::new(),
        }
    }

    pub fn with_equipment<I, S>(mut self, equipment: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.equipment = equipment.into_iter().map(Into::into).collect();
        self
    }

    /// File name of the backing source, as shown to API consumers.
    pub fn video_feed(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// Immutable, id-keyed set of rooms. Iteration follows load order.
#[derive(Clone, Debug)]
pub struct RoomRegistry {
    rooms: Vec<RoomConfig>,
    index: HashMap<String, usize>,
}

impl RoomRegistry {
    pub fn new(rooms: Vec<RoomConfig>) -> PipelineResult<Self> {
        if rooms.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one room must be configured".to_string(),
            ));
        }
        let mut index = HashMap::with_capacity(rooms.len());
        for (pos, room) in rooms.iter().enumerate() {
            if room.id.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(
                    "room id must not be empty".to_string(),
                ));
            }
            if room.capacity == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "room '{}' must have a capacity greater than zero",
                    room.id
                )));
            }
            if index.insert(room.id.clone(), pos).is_some() {
                return Err(PipelineError::InvalidConfig(format!(
                    "duplicate room id '{}'",
                    room.id
                )));
            }
        }
        Ok(Self { rooms, index })
    }

    pub fn get(&self, room_id: &str) -> Option<&RoomConfig> {
        self.index.get(room_id).map(|&pos| &self.rooms[pos])
    }

    /// Look up a room, rejecting ids outside the registry.
    pub fn require(&self, room_id: &str) -> PipelineResult<&RoomConfig> {
        self.get(room_id)
            .ok_or_else(|| PipelineError::UnknownRoom(room_id.to_string()))
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.index.contains_key(room_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoomConfig> {
        self.rooms.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(|room| room.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
