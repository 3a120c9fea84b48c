//! Directory-of-stills frame reader.
//!
//! Frames are the JPEG/PNG files of one directory, decoded in file-name order.
//! Decoding happens in memory on each read; nothing is cached between reads.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::FrameReader;
use crate::frame::{Frame, FrameOrigin};

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageSequenceReader {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequenceReader {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to list frame directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!(
                "frame directory {} contains no jpeg/png files",
                dir.display()
            ));
        }
        files.sort();
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameReader for ImageSequenceReader {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        let index = self.cursor as u64;
        self.cursor += 1;
        let decoded = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        Ok(Some(Frame::new(
            decoded.into_raw(),
            width,
            height,
            FrameOrigin::Source { index },
        )))
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} ({} stills)", self.dir.display(), self.files.len())
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn write_still(dir: &Path, name: &str, value: u8) {
        RgbImage::from_pixel(4, 3, Rgb([value, value, value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn reads_in_name_order_then_reports_end() {
        let dir = tempdir().unwrap();
        write_still(dir.path(), "b.png", 20);
        write_still(dir.path(), "a.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut reader = ImageSequenceReader::open(dir.path()).unwrap();
        assert_eq!(reader.len(), 2);
        let first = reader.read_frame().unwrap().unwrap();
        assert_eq!(first.pixels()[0], 10);
        assert_eq!((first.width, first.height), (4, 3));
        let second = reader.read_frame().unwrap().unwrap();
        assert_eq!(second.pixels()[0], 20);
        assert!(reader.read_frame().unwrap().is_none());

        reader.rewind().unwrap();
        assert_eq!(reader.read_frame().unwrap().unwrap().pixels()[0], 10);
    }

    #[test]
    fn empty_directory_fails_to_open() {
        let dir = tempdir().unwrap();
        assert!(ImageSequenceReader::open(dir.path()).is_err());
    }
}
