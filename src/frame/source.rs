//! Stereo frame acquisition.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, VoError};

/// Image geometry handed to the egomotion estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDims {
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
}

impl ImageDims {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stride: width,
        }
    }
}

/// One synchronized left/right image pair.
#[derive(Debug, Clone)]
pub struct StereoPair<I> {
    /// Position of the pair in the source sequence.
    pub index: usize,
    pub left: I,
    pub right: I,
    pub dims: ImageDims,
}

/// Ordered supplier of stereo pairs. Returns `Ok(None)` once exhausted.
pub trait FrameSource {
    type Image;

    fn next_pair(&mut self) -> Result<Option<StereoPair<Self::Image>>>;

    /// Number of pairs still to come, when known.
    fn remaining(&self) -> Option<usize> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    type Image = S::Image;

    fn next_pair(&mut self) -> Result<Option<StereoPair<Self::Image>>> {
        (**self).next_pair()
    }

    fn remaining(&self) -> Option<usize> {
        (**self).remaining()
    }
}

/// Decodes a single image file.
pub trait ImageLoader {
    type Image;

    fn load(&self, path: &Path) -> anyhow::Result<(Self::Image, ImageDims)>;
}

/// Reads pairs from an alternating left/right file list.
pub struct ImageListSource<L: ImageLoader> {
    source_folder: PathBuf,
    entries: Vec<String>,
    loader: L,
    next: usize,
    end: usize,
}

impl<L: ImageLoader> ImageListSource<L> {
    /// `entries` alternates left and right filenames relative to `source_folder`.
    pub fn new(source_folder: impl Into<PathBuf>, entries: Vec<String>, loader: L) -> Self {
        let end = entries.len() / 2;
        Self {
            source_folder: source_folder.into(),
            entries,
            loader,
            next: 0,
            end,
        }
    }

    /// Restrict to pairs `start..end` (pair indices, `end` exclusive).
    pub fn with_range(mut self, start: usize, end: Option<usize>) -> Self {
        let total = self.entries.len() / 2;
        self.end = end.unwrap_or(total).min(total);
        self.next = start.min(self.end);
        self
    }

    fn load_one(&self, pair: usize, name: &str) -> Result<(L::Image, ImageDims)> {
        let path = self.source_folder.join(name);
        self.loader.load(&path).map_err(|e| VoError::FrameLoad {
            frame: pair,
            reason: format!("{}: {e:#}", path.display()),
        })
    }
}

impl<L: ImageLoader> FrameSource for ImageListSource<L> {
    type Image = L::Image;

    fn next_pair(&mut self) -> Result<Option<StereoPair<L::Image>>> {
        if self.next >= self.end {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;

        let (left, dims) = self.load_one(index, &self.entries[2 * index])?;
        let (right, right_dims) = self.load_one(index, &self.entries[2 * index + 1])?;
        if dims != right_dims {
            return Err(VoError::FrameLoad {
                frame: index,
                reason: format!("left {dims:?} and right {right_dims:?} sizes differ"),
            });
        }
        debug!(pair = index, left = %self.entries[2 * index], "loaded stereo pair");

        Ok(Some(StereoPair {
            index,
            left,
            right,
            dims,
        }))
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.end - self.next)
    }
}
