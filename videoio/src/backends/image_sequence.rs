use crate::{is_image_path, FrameSink, FrameSource, Result, VideoError};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Image files of a directory, in file-name order.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
}

impl ImageSequenceSource {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref();
        if !directory.is_dir() {
            return Err(VideoError::NotFound(directory.to_path_buf()));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_path(p))
            .collect();
        paths.sort();

        let (width, height) = match paths.first() {
            Some(first) => image::image_dimensions(first)?,
            None => (0, 0),
        };

        Ok(Self {
            paths,
            next: 0,
            width,
            height,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let frame = image::open(path)?.into_rgb8();
        self.next += 1;
        Ok(Some(frame))
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.paths.len() as u64)
    }

    fn frame_rate(&self) -> Option<f64> {
        None
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn skip(&mut self, n: u64) -> Result<u64> {
        let remaining = (self.paths.len() - self.next) as u64;
        let skipped = n.min(remaining);
        self.next += skipped as usize;
        Ok(skipped)
    }
}

/// Writes `{prefix}_{index:06}.png` files into a directory.
#[derive(Debug)]
pub struct ImageSequenceWriter {
    directory: PathBuf,
    prefix: String,
    written: Vec<PathBuf>,
    created_directory: bool,
    finished: bool,
}

impl ImageSequenceWriter {
    pub fn new<P: AsRef<Path>>(directory: P, prefix: &str) -> Result<Self> {
        let directory = directory.as_ref();
        let created_directory = !directory.exists();
        if created_directory {
            fs::create_dir_all(directory)?;
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            written: Vec::new(),
            created_directory,
            finished: false,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl FrameSink for ImageSequenceWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if self.finished {
            return Err(VideoError::InvalidParameters("write after finish".to_string()));
        }
        let filename = format!("{}_{:06}.png", self.prefix, self.written.len());
        let path = self.directory.join(filename);

        frame.save(&path)?;
        self.written.push(path);
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written.len() as u64
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        for path in self.written.drain(..) {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove partial frame");
            }
        }
        if self.created_directory {
            let _ = fs::remove_dir(&self.directory);
        }
        self.finished = true;
    }
}
