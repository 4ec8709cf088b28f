//! Report assembly: headers, per-line rows, hide/collapse filtering, totals.

use crate::color::{ColorPicker, Rgb};
use crate::engine::Report;
use crate::error::ConfigError;
use crate::format::{paint, TimeFormatter};

pub const DEFAULT_WIDTH: usize = 5;
pub const DEFAULT_THRESHOLDS: [f64; 2] = [0.1, 0.01];

const HEADER_COLOR: Rgb = Rgb(0, 255, 255);
/// Placeholder emitted once per contiguous run of collapsed lines.
const GAP_MARKER: &str = "⋯";

/// Display configuration for [`render`], usually parsed from a format
/// string of the form `<width><flags>[:<thresholds>]`.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub width: usize,
    /// Descending duration boundaries in seconds.
    pub thresholds: Vec<f64>,
    /// Render durations as proportional block bars instead of decimals.
    pub bar: bool,
    /// Size bars on a log scale. Meaningless without `bar`.
    pub log: bool,
    /// Drop lines at or below the lowest threshold.
    pub hide: bool,
    /// Replace runs of lines at or below the lowest threshold with one
    /// gap marker per run.
    pub collapse: bool,
    /// Skip whole blocks whose total is at or below this many seconds.
    pub min_total: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            bar: false,
            log: false,
            hide: false,
            collapse: false,
            min_total: 0.0,
        }
    }
}

impl RenderOptions {
    /// Parse a display format string: a decimal width (default 5), then
    /// single-character flags in any order (`b` bar, `l` log scale, `h`
    /// hide, `c` collapse), then optionally `:` and comma-separated
    /// descending thresholds in seconds.
    ///
    /// Bad widths, unknown flags, and malformed or non-descending
    /// thresholds fail here, before any tracing output depends on them.
    pub fn parse(fmt: &str) -> Result<Self, ConfigError> {
        let mut options = Self::default();
        let (head, thresholds) = match fmt.split_once(':') {
            Some((head, rest)) => (head, Some(rest)),
            None => (fmt, None),
        };

        let digits = head.len() - head.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits > 0 {
            options.width = head[..digits]
                .parse()
                .map_err(|_| ConfigError::InvalidWidth(head[..digits].to_string()))?;
        }
        for flag in head[digits..].chars() {
            match flag {
                'b' => options.bar = true,
                'l' => options.log = true,
                'h' => options.hide = true,
                'c' => options.collapse = true,
                other => return Err(ConfigError::UnknownFlag(other)),
            }
        }
        // Log scale only affects bar sizing.
        if !options.bar {
            options.log = false;
        }

        if let Some(list) = thresholds {
            options.thresholds = list
                .split(',')
                .map(|t| {
                    t.trim()
                        .parse::<f64>()
                        .map_err(|_| ConfigError::InvalidThreshold(t.to_string()))
                })
                .collect::<Result<_, _>>()?;
        }
        // Validate cardinality and ordering eagerly.
        ColorPicker::new(&options.thresholds)?;
        Ok(options)
    }
}

/// Turn a finalized report into the final ANSI-colored text block.
///
/// Blocks whose total is at or below `min_total` are omitted entirely:
/// header, lines, and total together.
pub fn render(report: &Report, options: &RenderOptions) -> Result<String, ConfigError> {
    let picker = ColorPicker::new(&options.thresholds)?;
    let lowest = picker.lowest_threshold();
    let mut out = String::new();

    for block in &report.blocks {
        if block.total.as_secs_f64() <= options.min_total {
            continue;
        }

        let mut formatter =
            TimeFormatter::new(options.width, picker.clone(), options.bar, options.log);
        let max_line = block
            .lines
            .iter()
            .map(|l| l.time.as_secs_f64())
            .fold(0.0, f64::max);
        formatter.set_max(max_line);

        out.push_str("Timings in ");
        out.push_str(&paint(&block.name, HEADER_COLOR, None, true));
        if options.log {
            out.push_str(" (log scale)");
        }
        out.push_str(":\n");

        let lno_width = block
            .lines
            .iter()
            .map(|l| l.number.to_string().len())
            .max()
            .unwrap_or(1);

        let mut in_gap = false;
        for line in &block.lines {
            let secs = line.time.as_secs_f64();
            let quiet = secs <= lowest;
            if options.hide && quiet {
                continue;
            }
            if options.collapse && quiet {
                if !in_gap {
                    out.push_str(&format!(
                        "{:w$} {GAP_MARKER:>lno_width$}\n",
                        "",
                        w = options.width
                    ));
                    in_gap = true;
                }
                continue;
            }
            in_gap = false;
            out.push_str(&format!(
                "{} {:>lno_width$} {}\n",
                formatter.format(secs),
                line.number,
                line.text
            ));
        }

        out.push_str(&"─".repeat(options.width));
        out.push('\n');
        out.push_str(&formatter.format_total(block.total.as_secs_f64()));
        out.push_str("\n\n");
    }

    Ok(out.trim_end().to_string())
}
