//! File-level orchestration: where the background, overlay, merged
//! document and preview live, and which steps can run with what exists.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::compose::{self, MergedPage, PageSize};
use crate::raster::{self, PreviewImage};
use crate::render::{OverlayPage, ProfileRenderer};
use crate::style::StyleConfig;
use crate::track::{self, TrackSample};
use crate::{OverlayError, Result};

/// File name of the preview image, written next to the merged document.
pub const PREVIEW_FILE_NAME: &str = "pdf_snip.png";

#[derive(Debug)]
pub struct OverlayWorkspace {
    background: PathBuf,
    overlay: PathBuf,
    merged: PathBuf,
    /// Parsed tracks keyed by the SHA-256 of their file contents.
    tracks: HashMap<String, TrackSample>,
}

impl OverlayWorkspace {
    pub fn new(
        background: impl Into<PathBuf>,
        overlay: impl Into<PathBuf>,
        merged: impl Into<PathBuf>,
    ) -> Self {
        Self {
            background: background.into(),
            overlay: overlay.into(),
            merged: merged.into(),
            tracks: HashMap::new(),
        }
    }

    pub fn background_path(&self) -> &Path {
        &self.background
    }

    pub fn overlay_path(&self) -> &Path {
        &self.overlay
    }

    pub fn merged_path(&self) -> &Path {
        &self.merged
    }

    pub fn preview_path(&self) -> PathBuf {
        self.merged
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(PREVIEW_FILE_NAME)
    }

    /// Whether both the background PDF and `track` exist on disk.
    pub fn inputs_available(&self, track: &Path) -> bool {
        self.background.is_file() && track.is_file()
    }

    pub fn page_size(&self) -> Result<PageSize> {
        compose::page_size(&read_input(&self.background, "background PDF")?)
    }

    /// Parse `path`, reusing the previous result when the file is unchanged.
    pub fn load_track(&mut self, path: &Path) -> Result<TrackSample> {
        let data = read_input(path, "track file")?;
        let fingerprint = track::track_fingerprint(&data);
        if let Some(sample) = self.tracks.get(&fingerprint) {
            debug!(path = %path.display(), "track unchanged, reusing parsed samples");
            return Ok(sample.clone());
        }
        let sample = track::parse_track(&data)?;
        self.tracks.insert(fingerprint, sample.clone());
        Ok(sample)
    }

    /// Render `sample` at the background's page size and write the overlay.
    pub fn render_overlay(
        &self,
        renderer: &ProfileRenderer,
        sample: &TrackSample,
        style: &StyleConfig,
    ) -> Result<OverlayPage> {
        let size = self.page_size()?;
        let page = renderer.render(sample, size, style)?;
        fs::write(&self.overlay, &page.bytes)?;
        info!(path = %self.overlay.display(), "wrote overlay PDF");
        Ok(page)
    }

    /// Stamp the overlay file onto the background and write the merged file.
    pub fn merge(&self) -> Result<MergedPage> {
        let background = read_input(&self.background, "background PDF")?;
        let overlay = read_input(&self.overlay, "overlay PDF")?;
        let merged = compose::merge(&background, &overlay)?;
        fs::write(&self.merged, &merged.bytes)?;
        info!(path = %self.merged.display(), "wrote merged PDF");
        Ok(merged)
    }

    /// Rasterize the merged document if it exists, else the background.
    pub fn write_preview(&self) -> Result<PreviewImage> {
        let source = if self.merged.is_file() {
            &self.merged
        } else if self.background.is_file() {
            &self.background
        } else {
            return Err(OverlayError::InputMissing(
                "neither merged nor background PDF exists".into(),
            ));
        };
        let image = raster::rasterize(&fs::read(source)?)?;
        let target = self.preview_path();
        image.write_to(&target)?;
        info!(
            source = %source.display(),
            path = %target.display(),
            "wrote preview"
        );
        Ok(image)
    }
}

fn read_input(path: &Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => OverlayError::InputMissing(format!("{} {}", what, path.display())),
        _ => OverlayError::Io(err),
    })
}
