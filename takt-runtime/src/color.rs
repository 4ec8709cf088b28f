//! Duration-to-color mapping.
//!
//! A `ColorPicker` is configured with descending thresholds (in seconds) and a
//! palette holding one more color than there are thresholds, ordered worst to
//! best. A value at or above the highest threshold gets the worst color, a
//! value below the lowest gets the best, and anything in between is linearly
//! interpolated per channel within its bracketing threshold pair.

use crate::error::ConfigError;

/// A 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

const RED: Rgb = Rgb(255, 0, 0);
const ORANGE: Rgb = Rgb(255, 215, 0);
const YELLOW: Rgb = Rgb(255, 255, 200);
const GREEN: Rgb = Rgb(0, 255, 0);

/// Maps a duration in seconds to an interpolated color.
#[derive(Debug, Clone)]
pub struct ColorPicker {
    thresholds: Vec<f64>,
    colors: Vec<Rgb>,
}

impl ColorPicker {
    /// Build a picker over 1 to 3 descending thresholds using the built-in
    /// red-to-green palette.
    pub fn new(thresholds: &[f64]) -> Result<Self, ConfigError> {
        let colors: &[Rgb] = match thresholds.len() {
            1 => &[RED, GREEN],
            2 => &[RED, ORANGE, GREEN],
            3 => &[RED, ORANGE, YELLOW, GREEN],
            n => return Err(ConfigError::ThresholdCount(n)),
        };
        Self::with_colors(thresholds, colors)
    }

    /// Build a picker with a custom palette, ordered worst to best. The
    /// palette must hold exactly one more color than there are thresholds.
    pub fn with_colors(thresholds: &[f64], colors: &[Rgb]) -> Result<Self, ConfigError> {
        if thresholds.is_empty() {
            return Err(ConfigError::ThresholdCount(0));
        }
        if colors.len() != thresholds.len() + 1 {
            return Err(ConfigError::PaletteMismatch {
                thresholds: thresholds.len(),
                colors: colors.len(),
            });
        }
        let descending = thresholds.windows(2).all(|w| w[0] > w[1]);
        if !descending || *thresholds.last().unwrap() <= 0.0 {
            return Err(ConfigError::NotDescending(thresholds.to_vec()));
        }
        Ok(Self {
            thresholds: thresholds.to_vec(),
            colors: colors.to_vec(),
        })
    }

    /// The lowest threshold, used by the renderer's hide/collapse filters.
    pub fn lowest_threshold(&self) -> f64 {
        *self.thresholds.last().unwrap()
    }

    /// Pick the color for a raw duration in seconds.
    pub fn pick(&self, value: f64) -> Rgb {
        if value >= self.thresholds[0] {
            return self.colors[0];
        }
        for i in 0..self.thresholds.len() - 1 {
            let start = self.thresholds[i];
            let stop = self.thresholds[i + 1];
            if value >= stop {
                let fraction = (value - start) / (stop - start);
                return lerp(self.colors[i], self.colors[i + 1], fraction);
            }
        }
        // Below the lowest threshold.
        *self.colors.last().unwrap()
    }
}

fn lerp(first: Rgb, second: Rgb, fraction: f64) -> Rgb {
    let channel = |a: u8, b: u8| (f64::from(a) + fraction * (f64::from(b) - f64::from(a))) as u8;
    Rgb(
        channel(first.0, second.0),
        channel(first.1, second.1),
        channel(first.2, second.2),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_color_at_or_above_highest_threshold() {
        let picker = ColorPicker::new(&[0.1, 0.01]).unwrap();
        assert_eq!(picker.pick(1.0), Rgb(255, 0, 0));
        assert_eq!(picker.pick(0.1), Rgb(255, 0, 0));
    }

    #[test]
    fn best_color_below_lowest_threshold() {
        let picker = ColorPicker::new(&[0.1, 0.01]).unwrap();
        assert_eq!(picker.pick(0.001), Rgb(0, 255, 0));
        assert_eq!(picker.pick(0.0), Rgb(0, 255, 0));
    }

    #[test]
    fn midpoint_interpolates_between_bracket_colors() {
        // 0.055 sits exactly halfway between 0.1 and 0.01, so the result is
        // the midpoint of red (255,0,0) and orange (255,215,0).
        let picker = ColorPicker::new(&[0.1, 0.01]).unwrap();
        assert_eq!(picker.pick(0.055), Rgb(255, 107, 0));
    }

    #[test]
    fn single_threshold_palette() {
        let picker = ColorPicker::new(&[0.5]).unwrap();
        assert_eq!(picker.pick(0.5), Rgb(255, 0, 0));
        assert_eq!(picker.pick(0.4), Rgb(0, 255, 0));
    }

    #[test]
    fn three_threshold_palette_has_four_stops() {
        let picker = ColorPicker::new(&[1.0, 0.1, 0.01]).unwrap();
        assert_eq!(picker.pick(2.0), Rgb(255, 0, 0));
        assert_eq!(picker.pick(0.005), Rgb(0, 255, 0));
    }

    #[test]
    fn rejects_bad_threshold_counts() {
        assert_eq!(
            ColorPicker::new(&[]).unwrap_err(),
            ConfigError::ThresholdCount(0)
        );
        assert!(matches!(
            ColorPicker::new(&[4.0, 3.0, 2.0, 1.0]).unwrap_err(),
            ConfigError::ThresholdCount(4)
        ));
    }

    #[test]
    fn rejects_palette_cardinality_mismatch() {
        let err = ColorPicker::with_colors(&[0.1, 0.01], &[RED, GREEN]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::PaletteMismatch {
                thresholds: 2,
                colors: 2
            }
        ));
    }

    #[test]
    fn rejects_non_descending_thresholds() {
        assert!(matches!(
            ColorPicker::new(&[0.01, 0.1]).unwrap_err(),
            ConfigError::NotDescending(_)
        ));
        assert!(matches!(
            ColorPicker::new(&[0.1, 0.0]).unwrap_err(),
            ConfigError::NotDescending(_)
        ));
    }
}
