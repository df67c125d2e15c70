use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{FormatError, OverlayError, Result};

/// The y-axis floor sits this fraction of the lowest elevation.
pub const FLOOR_FACTOR: f64 = 0.95;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Ordered (distance, elevation) samples of a single track segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackSample {
    name: Option<String>,
    distance_km: Vec<f64>,
    elevation_m: Vec<f64>,
}

impl TrackSample {
    /// Build a sample from `(distance_km, elevation_m)` pairs.
    ///
    /// Distances must be finite, non-negative and non-decreasing; elevations
    /// must be finite.
    pub fn new(points: impl IntoIterator<Item = (f64, f64)>) -> Result<Self> {
        let (distance_km, elevation_m): (Vec<f64>, Vec<f64>) = points.into_iter().unzip();
        let mut last = 0.0;
        for (index, (&d, &e)) in distance_km.iter().zip(elevation_m.iter()).enumerate() {
            let reason = if !d.is_finite() || !e.is_finite() {
                Some("non-finite value")
            } else if d < 0.0 {
                Some("negative distance")
            } else if d < last {
                Some("distance decreases")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(FormatError::InvalidSample {
                    index,
                    reason: reason.to_string(),
                }
                .into());
            }
            last = d;
        }
        Ok(Self {
            name: None,
            distance_km,
            elevation_m,
        })
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.distance_km.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance_km.is_empty()
    }

    pub fn distance_km(&self) -> &[f64] {
        &self.distance_km
    }

    pub fn elevation_m(&self) -> &[f64] {
        &self.elevation_m
    }

    pub fn total_distance_km(&self) -> f64 {
        self.distance_km.last().copied().unwrap_or(0.0)
    }

    pub fn min_elevation(&self) -> Option<f64> {
        self.elevation_m.iter().copied().reduce(f64::min)
    }

    pub fn max_elevation(&self) -> Option<f64> {
        self.elevation_m.iter().copied().reduce(f64::max)
    }
}

/// Default y-axis floor: `FLOOR_FACTOR` times the lowest recorded elevation.
pub fn default_floor(sample: &TrackSample) -> Option<f64> {
    sample.min_elevation().map(|min| min * FLOOR_FACTOR)
}

/// Read and parse a GPX file from disk.
pub fn load_track(path: &Path) -> Result<TrackSample> {
    let data = fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => OverlayError::InputMissing(format!("track file {}", path.display())),
        _ => OverlayError::Io(err),
    })?;
    parse_track(&data)
}

/// Parse a GPX byte stream holding exactly one track with exactly one segment.
pub fn parse_track(input: &[u8]) -> Result<TrackSample> {
    let gpx = gpx::read(Cursor::new(input)).map_err(|e| FormatError::Gpx(e.to_string()))?;

    let track = match gpx.tracks.len() {
        0 => return Err(FormatError::NoTrack.into()),
        1 => &gpx.tracks[0],
        count => return Err(FormatError::MultipleTracks { count }.into()),
    };
    let segment = match track.segments.len() {
        0 => return Err(FormatError::NoSegment.into()),
        1 => &track.segments[0],
        count => return Err(FormatError::MultipleSegments { count }.into()),
    };

    let mut points = Vec::with_capacity(segment.points.len());
    let mut cumulative_km = 0.0;
    let mut last_lat_lon: Option<(f64, f64)> = None;
    for (index, point) in segment.points.iter().enumerate() {
        let elevation = point
            .elevation
            .ok_or(FormatError::MissingElevation { index })?;
        let geo = point.point();
        let (lat, lon) = (geo.y(), geo.x());
        if let Some((last_lat, last_lon)) = last_lat_lon {
            cumulative_km += haversine_km(last_lat, last_lon, lat, lon);
        }
        last_lat_lon = Some((lat, lon));
        points.push((cumulative_km, elevation));
    }

    debug!(
        points = points.len(),
        distance_km = cumulative_km,
        "parsed GPX segment"
    );
    Ok(TrackSample::new(points)?.with_name(track.name.clone()))
}

/// Hex SHA-256 of the raw file, used by callers to skip re-parsing.
pub fn track_fingerprint(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpx_doc(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="tests" xmlns="http://www.topografix.com/GPX/1/1">
{body}
</gpx>"#
        )
    }

    fn segment(points: &[(f64, f64, f64)]) -> String {
        let pts: String = points
            .iter()
            .map(|(lat, lon, ele)| {
                format!(r#"<trkpt lat="{lat}" lon="{lon}"><ele>{ele}</ele></trkpt>"#)
            })
            .collect();
        format!("<trkseg>{pts}</trkseg>")
    }

    #[test]
    fn test_haversine_km() {
        let dist = haversine_km(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111.195).abs() < 0.2);
    }

    #[test]
    fn parses_single_segment() {
        let doc = gpx_doc(&format!(
            "<trk><name>Ride</name>{}</trk>",
            segment(&[(0.0, 0.0, 100.0), (0.0, 0.01, 110.0), (0.0, 0.02, 105.0)])
        ));
        let sample = parse_track(doc.as_bytes()).unwrap();
        assert_eq!(sample.len(), 3);
        assert_eq!(sample.name(), Some("Ride"));
        assert_eq!(sample.elevation_m(), &[100.0, 110.0, 105.0]);
        assert_eq!(sample.distance_km()[0], 0.0);
        assert!((sample.total_distance_km() - 2.2239).abs() < 0.01);
    }

    #[test]
    fn rejects_missing_track() {
        let doc = gpx_doc("");
        let err = parse_track(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, OverlayError::Format(FormatError::NoTrack)));
    }

    #[test]
    fn rejects_multiple_tracks() {
        let seg = segment(&[(0.0, 0.0, 1.0), (0.0, 0.1, 2.0)]);
        let doc = gpx_doc(&format!("<trk>{seg}</trk><trk>{seg}</trk>"));
        let err = parse_track(doc.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::Format(FormatError::MultipleTracks { count: 2 })
        ));
    }

    #[test]
    fn rejects_multiple_segments() {
        let seg = segment(&[(0.0, 0.0, 1.0), (0.0, 0.1, 2.0)]);
        let doc = gpx_doc(&format!("<trk>{seg}{seg}{seg}</trk>"));
        let err = parse_track(doc.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::Format(FormatError::MultipleSegments { count: 3 })
        ));
    }

    #[test]
    fn rejects_track_without_segment() {
        let doc = gpx_doc("<trk><name>empty</name></trk>");
        let err = parse_track(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, OverlayError::Format(FormatError::NoSegment)));
    }

    #[test]
    fn rejects_point_without_elevation() {
        let doc = gpx_doc(
            r#"<trk><trkseg><trkpt lat="0" lon="0"><ele>5</ele></trkpt><trkpt lat="0" lon="0.1"></trkpt></trkseg></trk>"#,
        );
        let err = parse_track(doc.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::Format(FormatError::MissingElevation { index: 1 })
        ));
    }

    #[test]
    fn default_floor_is_scaled_minimum() {
        let sample = TrackSample::new(vec![(0.0, 1000.0), (2.0, 800.0), (5.0, 1200.0)]).unwrap();
        assert_eq!(default_floor(&sample), Some(800.0 * FLOOR_FACTOR));

        let reordered =
            TrackSample::new(vec![(0.0, 1200.0), (2.0, 1000.0), (5.0, 800.0)]).unwrap();
        assert_eq!(default_floor(&reordered), default_floor(&sample));
    }

    #[test]
    fn rejects_decreasing_distance() {
        let err = TrackSample::new(vec![(0.0, 1.0), (2.0, 1.0), (1.0, 1.0)]).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::Format(FormatError::InvalidSample { index: 2, .. })
        ));
    }

    #[test]
    fn missing_file_is_input_missing() {
        let err = load_track(Path::new("/definitely/not/here.gpx")).unwrap_err();
        assert!(matches!(err, OverlayError::InputMissing(_)));
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(track_fingerprint(b"abc"), track_fingerprint(b"abc"));
        assert_ne!(track_fingerprint(b"abc"), track_fingerprint(b"abd"));
        assert_eq!(track_fingerprint(b"").len(), 64);
    }
}
