//! Per-room video sources.
//!
//! A `VideoSource` owns one backing reader for one room:
//! - a directory of stills (always available)
//! - a video file (feature: ingest-file-ffmpeg)
//!
//! State machine: `Uninitialized -> Real` when the reader opens,
//! `Uninitialized -> Placeholder` when it does not. `Real` loops on end of
//! stream. `Placeholder` only leaves through an explicit `reopen`.
//!
//! `next_frame` never fails. A real source that cannot produce a frame for
//! one call hands out the room's placeholder frame for that call.

#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod image_sequence;
pub mod placeholder;

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::frame::Frame;

pub use image_sequence::ImageSequenceReader;

/// A decoder over one backing source.
///
/// `read_frame` returns `Ok(None)` at end of stream; the caller decides
/// whether to `rewind`.
pub trait FrameReader: Send {
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Reposition at the first frame.
    fn rewind(&mut self) -> Result<()>;

    fn describe(&self) -> String;
}

/// Opens a reader for a source path.
pub type ReaderFactory = Arc<dyn Fn(&Path) -> Result<Box<dyn FrameReader>> + Send + Sync>;

/// Default factory: directories are still sequences, files are videos.
pub fn open_reader(path: &Path) -> Result<Box<dyn FrameReader>> {
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceReader::open(path)?));
    }
    if !path.exists() {
        anyhow::bail!("video source {} not found", path.display());
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Box::new(file_ffmpeg::FfmpegFileReader::open(path)?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        anyhow::bail!(
            "video file {} requires the ingest-file-ffmpeg feature",
            path.display()
        )
    }
}

pub fn default_factory() -> ReaderFactory {
    Arc::new(open_reader)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Uninitialized,
    Real,
    Placeholder,
}

/// Snapshot of a source's position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceState {
    pub mode: SourceMode,
    /// Frames read since the last wrap (or open).
    pub cursor: u64,
    /// Completed passes over the backing stream.
    pub loops: u64,
}

pub struct VideoSource {
    room_id: String,
    path: PathBuf,
    factory: ReaderFactory,
    mode: SourceMode,
    reader: Option<Box<dyn FrameReader>>,
    cursor: u64,
    loops: u64,
    last_error: Option<String>,
}

impl VideoSource {
    pub fn new(room_id: &str, path: impl Into<PathBuf>) -> Self {
        Self::with_factory(room_id, path, default_factory())
    }

    pub fn with_factory(room_id: &str, path: impl Into<PathBuf>, factory: ReaderFactory) -> Self {
        Self {
            room_id: room_id.to_string(),
            path: path.into(),
            factory,
            mode: SourceMode::Uninitialized,
            reader: None,
            cursor: 0,
            loops: 0,
            last_error: None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn state(&self) -> SourceState {
        SourceState {
            mode: self.mode,
            cursor: self.cursor,
            loops: self.loops,
        }
    }

    /// Why the last open attempt failed, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Open the backing reader. A no-op once the source has left
    /// `Uninitialized`; use `reopen` to retry.
    pub fn open(&mut self) -> SourceMode {
        if self.mode != SourceMode::Uninitialized {
            return self.mode;
        }
        match (self.factory)(&self.path) {
            Ok(reader) => {
                log::info!(
                    "room {}: video source opened: {}",
                    self.room_id,
                    reader.describe()
                );
                self.reader = Some(reader);
                self.mode = SourceMode::Real;
                self.last_error = None;
            }
            Err(err) => {
                log::warn!(
                    "room {}: video source {} unavailable, using placeholder: {:#}",
                    self.room_id,
                    self.path.display(),
                    err
                );
                self.mode = SourceMode::Placeholder;
                self.last_error = Some(format!("{:#}", err));
            }
        }
        self.cursor = 0;
        self.loops = 0;
        self.mode
    }

    /// Release the current reader and open the source again.
    pub fn reopen(&mut self) -> SourceMode {
        self.release();
        self.mode = SourceMode::Uninitialized;
        self.open()
    }

    /// Next frame. Opens lazily, loops at end of stream, never fails.
    pub fn next_frame(&mut self) -> Frame {
        if self.mode == SourceMode::Uninitialized {
            self.open();
        }
        let Some(reader) = self.reader.as_mut() else {
            return placeholder::render(&self.room_id);
        };

        match reader.read_frame() {
            Ok(Some(frame)) => {
                self.cursor += 1;
                return frame;
            }
            Ok(None) => {}
            Err(err) => {
                log::warn!("room {}: frame read failed: {:#}", self.room_id, err);
                return placeholder::render(&self.room_id);
            }
        }

        // End of stream: restart at position 0 and hand out the first frame.
        if let Err(err) = reader.rewind() {
            log::warn!("room {}: rewind failed: {:#}", self.room_id, err);
            return placeholder::render(&self.room_id);
        }
        self.loops += 1;
        self.cursor = 0;
        match reader.read_frame() {
            Ok(Some(frame)) => {
                self.cursor = 1;
                log::debug!("room {}: source looped ({} passes)", self.room_id, self.loops);
                frame
            }
            Ok(None) => {
                log::warn!("room {}: source is empty after rewind", self.room_id);
                placeholder::render(&self.room_id)
            }
            Err(err) => {
                log::warn!("room {}: frame read after rewind failed: {:#}", self.room_id, err);
                placeholder::render(&self.room_id)
            }
        }
    }

    fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            log::info!("room {}: released {}", self.room_id, reader.describe());
        }
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.release();
    }
}
