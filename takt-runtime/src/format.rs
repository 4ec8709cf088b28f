//! Fixed-width duration rendering.
//!
//! A `TimeFormatter` renders one duration either as fixed-width decimal text
//! or as a proportional block bar made of eighth-block glyphs. `set_max` must
//! be called before a batch so the integer part of the largest value fits the
//! configured width and bars have a scale to fill against.

use anstyle::{Color, RgbColor, Style};

use crate::color::{ColorPicker, Rgb};

/// Eighth-block glyphs indexed by remainder sub-units; index 0 is empty.
const PARTIAL_BLOCKS: [&str; 8] = ["", "▏", "▎", "▍", "▌", "▋", "▊", "▉"];

/// Background tint separating bar glyphs from the trailing source text.
const BAR_TINT: Rgb = Rgb(0, 0, 0);
/// Distinct tint when the bar is on a log scale, as a visual reminder.
const LOG_TINT: Rgb = Rgb(128, 128, 128);

pub(crate) fn paint(text: &str, fg: Rgb, bg: Option<Rgb>, bold: bool) -> String {
    let mut style = Style::new().fg_color(Some(Color::Rgb(RgbColor(fg.0, fg.1, fg.2))));
    if let Some(bg) = bg {
        style = style.bg_color(Some(Color::Rgb(RgbColor(bg.0, bg.1, bg.2))));
    }
    if bold {
        style = style.bold();
    }
    format!("{}{}{}", style.render(), text, style.render_reset())
}

/// Renders durations (in seconds) at a fixed display width.
#[derive(Debug, Clone)]
pub struct TimeFormatter {
    width: usize,
    precision: usize,
    max: f64,
    bar: bool,
    log: bool,
    picker: ColorPicker,
}

impl TimeFormatter {
    pub fn new(width: usize, picker: ColorPicker, bar: bool, log: bool) -> Self {
        Self {
            width,
            precision: width.saturating_sub(2).max(1),
            max: 0.0,
            bar,
            log,
            picker,
        }
    }

    /// Record the largest duration of the upcoming batch. Derives the decimal
    /// precision so the integer part always fits, and fixes the bar scale.
    pub fn set_max(&mut self, max: f64) {
        let int_digits = format!("{}", max.max(0.0) as u64).len();
        self.precision = self.width.saturating_sub(int_digits + 1).max(1);
        self.max = max;
    }

    /// Render one in-body duration (bar or decimal, per configuration).
    pub fn format(&self, secs: f64) -> String {
        if self.bar {
            let tint = if self.log { LOG_TINT } else { BAR_TINT };
            paint(&self.bar_cells(secs), self.picker.pick(secs), Some(tint), false)
        } else {
            paint(&self.decimal(secs), self.picker.pick(secs), None, false)
        }
    }

    /// Render a total line: always decimal, bold, and untinted.
    pub fn format_total(&self, secs: f64) -> String {
        paint(&self.decimal(secs), self.picker.pick(secs), None, true)
    }

    fn decimal(&self, secs: f64) -> String {
        if secs == 0.0 {
            // Width spaces, not "0": keeps columns aligned without noise.
            " ".repeat(self.width)
        } else {
            format!("{secs:>w$.p$}", w = self.width, p = self.precision)
        }
    }

    fn bar_cells(&self, secs: f64) -> String {
        let span = (self.width * 8) as f64;
        let size = if self.max <= 0.0 {
            0
        } else if self.log && secs != 0.0 {
            ((1.0 + secs).ln() / (1.0 + self.max).ln() * span) as usize
        } else {
            (secs / self.max * span) as usize
        };
        let (full, rem) = (size / 8, size % 8);
        let mut cells = "█".repeat(full);
        cells.push_str(PARTIAL_BLOCKS[rem]);
        let used = full + usize::from(rem > 0);
        cells.push_str(&" ".repeat(self.width.saturating_sub(used)));
        cells
    }
}
