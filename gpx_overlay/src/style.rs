use serde::{Deserialize, Serialize};

use crate::{OverlayError, Result};

const EDGE_TOLERANCE: f64 = 1e-9;

/// A free-floating text annotation anchored at a page-normalized position.
#[derive(Clone, Debug, PartialEq)]
pub struct TextBlock<'a> {
    pub text: &'a str,
    pub font_size: f64,
    /// Horizontal anchor, 0 = left page edge, 1 = right page edge.
    pub x: f64,
    /// Vertical anchor, 0 = bottom page edge, 1 = top page edge.
    pub y: f64,
}

impl TextBlock<'_> {
    pub fn is_visible(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Rendering parameters for the profile overlay.
///
/// A flat record so that a partial JSON object (or a handful of CLI flags)
/// overrides exactly the fields it names. Font sizes and line widths are in
/// points, positions are fractions of the page with the origin bottom-left.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Explicit y-axis floor in metres. `None` selects [`crate::default_floor`].
    pub zero_level: Option<f64>,
    pub label_font_size: f64,
    pub ticks_font_size: f64,
    pub x_label_text: String,
    pub y_label_text: String,
    pub grid_line_width: f64,
    pub bins_x_axis: u32,
    pub bins_y_axis: u32,
    /// Data rectangle as `left, bottom, width, height` fractions of the page.
    pub plot_left: f64,
    pub plot_bottom: f64,
    pub plot_width: f64,
    pub plot_height: f64,
    /// Standard deviation of the Gaussian smoothing kernel, in samples. 0 disables smoothing.
    pub smoothing_sigma: f64,
    pub information_text: String,
    pub information_font_size: f64,
    pub information_x: f64,
    pub information_y: f64,
    pub title_text: String,
    pub title_font_size: f64,
    pub title_x: f64,
    pub title_y: f64,
    pub subtitle_text: String,
    pub subtitle_font_size: f64,
    pub subtitle_x: f64,
    pub subtitle_y: f64,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            zero_level: None,
            label_font_size: 20.0,
            ticks_font_size: 16.0,
            x_label_text: "Entfernung - [km]".to_string(),
            y_label_text: "Höhe - [hm]".to_string(),
            grid_line_width: 3.0,
            bins_x_axis: 25,
            bins_y_axis: 25,
            plot_left: 0.05,
            plot_bottom: 0.05,
            plot_width: 0.93,
            plot_height: 0.6,
            smoothing_sigma: 0.0,
            information_text: String::new(),
            information_font_size: 30.0,
            information_x: 0.8,
            information_y: 0.2,
            title_text: String::new(),
            title_font_size: 50.0,
            title_x: 0.5,
            title_y: 0.9,
            subtitle_text: String::new(),
            subtitle_font_size: 50.0,
            subtitle_x: 0.5,
            subtitle_y: 0.8,
        }
    }
}

impl StyleConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| OverlayError::InvalidParameter(format!("style JSON: {}", e)))
    }

    pub fn title(&self) -> TextBlock<'_> {
        TextBlock {
            text: &self.title_text,
            font_size: self.title_font_size,
            x: self.title_x,
            y: self.title_y,
        }
    }

    pub fn subtitle(&self) -> TextBlock<'_> {
        TextBlock {
            text: &self.subtitle_text,
            font_size: self.subtitle_font_size,
            x: self.subtitle_x,
            y: self.subtitle_y,
        }
    }

    pub fn information(&self) -> TextBlock<'_> {
        TextBlock {
            text: &self.information_text,
            font_size: self.information_font_size,
            x: self.information_x,
            y: self.information_y,
        }
    }

    /// Right edge of the data rectangle as a page fraction.
    pub fn plot_right(&self) -> f64 {
        self.plot_left + self.plot_width
    }

    pub fn plot_top(&self) -> f64 {
        self.plot_bottom + self.plot_height
    }

    pub fn validate(&self) -> Result<()> {
        let unit_fields = [
            ("plot_left", self.plot_left),
            ("plot_bottom", self.plot_bottom),
            ("plot_width", self.plot_width),
            ("plot_height", self.plot_height),
            ("title_x", self.title_x),
            ("title_y", self.title_y),
            ("subtitle_x", self.subtitle_x),
            ("subtitle_y", self.subtitle_y),
            ("information_x", self.information_x),
            ("information_y", self.information_y),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{} must lie in [0, 1], got {}", name, value)));
            }
        }
        if self.plot_width <= 0.0 || self.plot_height <= 0.0 {
            return Err(invalid("plot_width and plot_height must be positive".into()));
        }
        if self.plot_right() > 1.0 + EDGE_TOLERANCE {
            return Err(invalid(format!(
                "plot_left + plot_width must not exceed 1, got {}",
                self.plot_right()
            )));
        }
        if self.plot_top() > 1.0 + EDGE_TOLERANCE {
            return Err(invalid(format!(
                "plot_bottom + plot_height must not exceed 1, got {}",
                self.plot_top()
            )));
        }

        let sizes = [
            ("label_font_size", self.label_font_size),
            ("ticks_font_size", self.ticks_font_size),
            ("title_font_size", self.title_font_size),
            ("subtitle_font_size", self.subtitle_font_size),
            ("information_font_size", self.information_font_size),
        ];
        for (name, value) in sizes {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("{} must be positive, got {}", name, value)));
            }
        }

        if !self.grid_line_width.is_finite() || self.grid_line_width < 0.0 {
            return Err(invalid(format!(
                "grid_line_width must be non-negative, got {}",
                self.grid_line_width
            )));
        }
        if self.bins_x_axis == 0 || self.bins_y_axis == 0 {
            return Err(invalid("axis bin counts must be at least 1".into()));
        }
        if !self.smoothing_sigma.is_finite() || self.smoothing_sigma < 0.0 {
            return Err(invalid(format!(
                "smoothing_sigma must be non-negative, got {}",
                self.smoothing_sigma
            )));
        }
        if let Some(level) = self.zero_level {
            if !level.is_finite() {
                return Err(invalid("zero_level must be finite".into()));
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> OverlayError {
    OverlayError::InvalidParameter(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let style = StyleConfig::default();
        style.validate().unwrap();
        assert_eq!(style.bins_x_axis, 25);
        assert_eq!(style.title().font_size, 50.0);
        assert_eq!((style.information_x, style.information_y), (0.8, 0.2));
        assert!(!style.title().is_visible());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let style = StyleConfig::from_json(
            r#"{"smoothing_sigma": 2.5, "title_text": "Downhill XC Race", "title_font_size": 70}"#,
        )
        .unwrap();
        assert_eq!(style.smoothing_sigma, 2.5);
        let title = style.title();
        assert_eq!(title.text, "Downhill XC Race");
        assert_eq!(title.font_size, 70.0);
        assert_eq!((title.x, title.y), (0.5, 0.9));
        assert_eq!(style.label_font_size, 20.0);
        assert_eq!(style.zero_level, None);
    }

    #[test]
    fn rejects_unknown_json_types() {
        let err = StyleConfig::from_json(r#"{"bins_x_axis": "many"}"#).unwrap_err();
        assert!(matches!(err, OverlayError::InvalidParameter(_)));
    }

    #[test]
    fn plot_box_is_origin_plus_extent() {
        let style = StyleConfig::default();
        assert!((style.plot_right() - 0.98).abs() < 1e-12);
        assert!((style.plot_top() - 0.65).abs() < 1e-12);

        let full = StyleConfig {
            plot_left: 0.4,
            plot_width: 0.6,
            plot_bottom: 0.0,
            plot_height: 1.0,
            ..StyleConfig::default()
        };
        full.validate().unwrap();
    }

    #[test]
    fn rejects_plot_box_past_the_page() {
        let wide = StyleConfig {
            plot_left: 0.5,
            plot_width: 0.6,
            ..StyleConfig::default()
        };
        assert!(matches!(
            wide.validate(),
            Err(OverlayError::InvalidParameter(_))
        ));
        let tall = StyleConfig {
            plot_bottom: 0.5,
            plot_height: 0.6,
            ..StyleConfig::default()
        };
        assert!(tall.validate().is_err());
        let empty = StyleConfig {
            plot_width: 0.0,
            ..StyleConfig::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn rejects_negative_sigma() {
        let style = StyleConfig {
            smoothing_sigma: -1.0,
            ..StyleConfig::default()
        };
        assert!(style.validate().is_err());
    }
}
