//! Render a GPX distance/elevation profile onto a transparent PDF page and
//! stamp it on top of the first page of an existing PDF.

use thiserror::Error;

pub mod compose;
pub mod font;
pub mod pdf_backend;
pub mod raster;
pub mod render;
pub mod smoothing;
pub mod style;
pub mod ticks;
pub mod track;
pub mod workspace;

pub use compose::{merge, page_size, MergedPage, PageSize, Placement};
pub use font::FontResource;
pub use raster::{rasterize, PreviewImage, PREVIEW_ZOOM};
pub use render::{OverlayPage, ProfileRenderer, ProfileSeries};
pub use style::{StyleConfig, TextBlock};
pub use track::{default_floor, load_track, parse_track, track_fingerprint, TrackSample, FLOOR_FACTOR};
pub use workspace::OverlayWorkspace;

/// PDF user space units per inch.
pub const POINTS_PER_INCH: f64 = 72.0;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("failed to parse GPX file: {0}")]
    Gpx(String),
    #[error("no track in GPX file")]
    NoTrack,
    #[error("{count} tracks in GPX file, only a single track is supported")]
    MultipleTracks { count: usize },
    #[error("track has no segment")]
    NoSegment,
    #[error("{count} segments in track, only a single segment is supported")]
    MultipleSegments { count: usize },
    #[error("track point {index} has no elevation")]
    MissingElevation { index: usize },
    #[error("invalid sample at index {index}: {reason}")]
    InvalidSample { index: usize, reason: String },
    #[error("font asset unusable: {0}")]
    Font(String),
    #[error("character {0:?} cannot be encoded with the embedded font")]
    Encoding(char),
    #[error("document has no pages")]
    NoPages,
    #[error("page is rotated by {0} degrees, rotated pages are not supported")]
    Rotated(i64),
    #[error("encrypted documents are not supported")]
    Encrypted,
    #[error("malformed page: {0}")]
    Page(String),
}

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("input missing: {0}")]
    InputMissing(String),
    #[error("cannot render profile: {0}")]
    Geometry(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("plotting error: {0}")]
    Render(String),
    #[error("rasterization failed: {0}")]
    Raster(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;
