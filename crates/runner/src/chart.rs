//! Trigger charts.
//!
//! `SvgChartDrawer` writes a self-contained SVG with three stacked panels
//! sharing one time axis: candlesticks, volume, and the strategy's indicator
//! columns. A dashed marker is drawn at the trigger time on every panel.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tracing::{info, warn};

use common::{Error, Result, Series};
use strategy::PlotConfig;

/// Candles kept on a chart.
pub const CHART_CANDLES: usize = 100;

#[async_trait]
pub trait ChartRenderer: Send + Sync {
    /// Render `series` and return the path of the written file.
    async fn render(
        &self,
        series: &Series,
        symbol: &str,
        interval: &str,
        strategy_id: &str,
        trigger_time: DateTime<Utc>,
        plot: &PlotConfig,
    ) -> Result<PathBuf>;
}

pub struct SvgChartDrawer {
    base_dir: PathBuf,
    offset: FixedOffset,
}

impl SvgChartDrawer {
    /// Charts go under `base_dir`; dates on the chart and in the file layout
    /// are shown at `offset` from UTC.
    pub fn new(base_dir: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            base_dir: base_dir.into(),
            offset,
        }
    }

    /// `<base>/<YYYY-MM-DD>/<strategy_id>/<symbol>/<YYYYmmdd_HHMMSS>.svg`
    pub fn chart_path(&self, symbol: &str, strategy_id: &str, trigger_time: DateTime<Utc>) -> PathBuf {
        let local = trigger_time.with_timezone(&self.offset);
        self.base_dir
            .join(local.format("%Y-%m-%d").to_string())
            .join(strategy_id)
            .join(symbol)
            .join(format!("{}.svg", local.format("%Y%m%d_%H%M%S")))
    }
}

#[async_trait]
impl ChartRenderer for SvgChartDrawer {
    async fn render(
        &self,
        series: &Series,
        symbol: &str,
        interval: &str,
        strategy_id: &str,
        trigger_time: DateTime<Utc>,
        plot: &PlotConfig,
    ) -> Result<PathBuf> {
        info!(symbol, interval, strategy_id, "Drawing chart");
        let data = series.tail(CHART_CANDLES);
        if data.is_empty() {
            return Err(Error::Chart("no data to plot".into()));
        }

        let svg = draw_svg(&data, &format!("{symbol} - {interval}"), trigger_time, plot, self.offset);
        let path = self.chart_path(symbol, strategy_id, trigger_time);
        write_file(&path, svg).await?;

        info!(path = %path.display(), "Chart saved");
        Ok(path)
    }
}

async fn write_file(path: &Path, contents: String) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

// ─── Layout ───────────────────────────────────────────────────────────────────

const WIDTH: f64 = 1200.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 40.0;
const TITLE_HEIGHT: f64 = 40.0;
const PANEL_GAP: f64 = 20.0;
const AXIS_HEIGHT: f64 = 60.0;
// height ratios 3:1:1
const PRICE_HEIGHT: f64 = 480.0;
const VOLUME_HEIGHT: f64 = 160.0;
const INDICATOR_HEIGHT: f64 = 160.0;

const UP_COLOR: &str = "#2e7d32";
const DOWN_COLOR: &str = "#c62828";
const VOLUME_COLOR: &str = "#1565c0";
const TRIGGER_COLOR: &str = "purple";
const LINE_COLORS: [&str; 6] = ["#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b"];

struct Panel {
    top: f64,
    height: f64,
    min: f64,
    max: f64,
}

impl Panel {
    fn new(top: f64, height: f64, min: f64, max: f64) -> Self {
        // flat data would divide by zero
        let (min, max) = if (max - min).abs() < f64::EPSILON {
            (min - 1.0, max + 1.0)
        } else {
            (min, max)
        };
        Self { top, height, min, max }
    }

    fn y(&self, value: f64) -> f64 {
        self.top + self.height * (1.0 - (value - self.min) / (self.max - self.min))
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

struct XAxis {
    step: f64,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
    rows: usize,
}

impl XAxis {
    fn x(&self, index: usize) -> f64 {
        MARGIN_LEFT + self.step * (index as f64 + 0.5)
    }

    /// Position of an arbitrary time, interpolated between row centres and
    /// clamped to the plot area.
    fn x_at(&self, t: DateTime<Utc>) -> f64 {
        if self.rows < 2 || self.last <= self.first {
            return self.x(0);
        }
        let span = (self.last - self.first).num_milliseconds() as f64;
        let frac = ((t - self.first).num_milliseconds() as f64 / span).clamp(0.0, 1.0);
        self.x(0) + frac * (self.x(self.rows - 1) - self.x(0))
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Render the chart document. `data` must not be empty.
fn draw_svg(
    data: &Series,
    title: &str,
    trigger_time: DateTime<Utc>,
    plot: &PlotConfig,
    offset: FixedOffset,
) -> String {
    let candles = data.candles();
    let rows = candles.len();
    let plot_width = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let axis = XAxis {
        step: plot_width / rows as f64,
        first: candles[0].open_time,
        last: candles[rows - 1].open_time,
        rows,
    };

    let (lo, hi) = bounds(candles.iter().flat_map(|c| [c.low, c.high])).unwrap_or((0.0, 1.0));
    let price = Panel::new(TITLE_HEIGHT, PRICE_HEIGHT, lo, hi);
    let (_, vmax) = bounds(candles.iter().map(|c| c.volume)).unwrap_or((0.0, 1.0));
    let volume = Panel::new(price.bottom() + PANEL_GAP, VOLUME_HEIGHT, 0.0, vmax);

    let columns: Vec<(&str, &[Option<f64>])> = plot
        .indicator_columns
        .iter()
        .filter_map(|name| match data.indicator(name) {
            Some(values) => Some((name.as_str(), values)),
            None => {
                warn!(indicator = %name, "Indicator not found in data");
                None
            }
        })
        .collect();
    let (ilo, ihi) = bounds(columns.iter().flat_map(|(_, v)| v.iter().flatten().copied()))
        .unwrap_or((0.0, 1.0));
    let indicators = Panel::new(volume.bottom() + PANEL_GAP, INDICATOR_HEIGHT, ilo, ihi);

    let height = indicators.bottom() + AXIS_HEIGHT;
    let mut svg = String::with_capacity(64 * 1024);

    // write! into a String cannot fail
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{height}" viewBox="0 0 {WIDTH} {height}" font-family="sans-serif" font-size="11">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="24" font-size="16" text-anchor="middle">{}</text>"#,
        WIDTH / 2.0,
        escape(title)
    );

    for (panel, label) in [(&price, "Price"), (&volume, "Volume"), (&indicators, "Indicators")] {
        frame(&mut svg, panel, label);
    }

    // candles
    let body_width = (axis.step * 0.6).max(1.0);
    for (i, c) in candles.iter().enumerate() {
        let x = axis.x(i);
        let color = if c.close >= c.open { UP_COLOR } else { DOWN_COLOR };
        let top = price.y(c.open.max(c.close));
        let bottom = price.y(c.open.min(c.close));
        let _ = writeln!(
            svg,
            r#"<line x1="{x:.2}" y1="{:.2}" x2="{x:.2}" y2="{:.2}" stroke="{color}"/>"#,
            price.y(c.high),
            price.y(c.low)
        );
        let _ = writeln!(
            svg,
            r#"<rect x="{:.2}" y="{top:.2}" width="{body_width:.2}" height="{:.2}" fill="{color}"/>"#,
            x - body_width / 2.0,
            (bottom - top).max(0.5)
        );

        let vy = volume.y(c.volume.max(0.0));
        let _ = writeln!(
            svg,
            r#"<rect x="{:.2}" y="{vy:.2}" width="{body_width:.2}" height="{:.2}" fill="{VOLUME_COLOR}" fill-opacity="0.5"/>"#,
            x - body_width / 2.0,
            volume.bottom() - vy
        );
    }

    // indicator lines, broken where a value is undefined
    for (n, (name, values)) in columns.iter().enumerate() {
        let color = LINE_COLORS[n % LINE_COLORS.len()];
        let mut d = String::new();
        let mut pen_down = false;
        for (i, v) in values.iter().enumerate() {
            match v {
                Some(v) if v.is_finite() => {
                    let cmd = if pen_down { 'L' } else { 'M' };
                    let _ = write!(d, "{cmd}{:.2},{:.2} ", axis.x(i), indicators.y(*v));
                    pen_down = true;
                }
                _ => pen_down = false,
            }
        }
        if !d.is_empty() {
            let _ = writeln!(
                svg,
                r#"<path d="{}" fill="none" stroke="{color}" stroke-width="1.5"/>"#,
                d.trim_end()
            );
        }
        let ly = indicators.top + 14.0 + 14.0 * n as f64;
        let lx = MARGIN_LEFT + 8.0;
        let _ = writeln!(
            svg,
            r#"<line x1="{lx}" y1="{:.1}" x2="{}" y2="{:.1}" stroke="{color}" stroke-width="2"/><text x="{}" y="{ly:.1}">{}</text>"#,
            ly - 4.0,
            lx + 16.0,
            ly - 4.0,
            lx + 20.0,
            escape(name)
        );
    }

    // trigger marker across all panels
    let tx = axis.x_at(trigger_time);
    for panel in [&price, &volume, &indicators] {
        let _ = writeln!(
            svg,
            r#"<line x1="{tx:.2}" y1="{:.2}" x2="{tx:.2}" y2="{:.2}" stroke="{TRIGGER_COLOR}" stroke-dasharray="6,4"/>"#,
            panel.top,
            panel.bottom()
        );
    }

    // time labels under the last panel
    let ticks = rows.min(6);
    for k in 0..ticks {
        let i = if ticks == 1 { 0 } else { k * (rows - 1) / (ticks - 1) };
        let label = candles[i].open_time.with_timezone(&offset).format("%Y-%m-%d %H:%M");
        let _ = writeln!(
            svg,
            r#"<text x="{:.2}" y="{:.2}" text-anchor="end" transform="rotate(-45 {:.2} {:.2})">{label}</text>"#,
            axis.x(i),
            indicators.bottom() + 14.0,
            axis.x(i),
            indicators.bottom() + 14.0
        );
    }

    svg.push_str("</svg>\n");
    svg
}

fn frame(svg: &mut String, panel: &Panel, label: &str) {
    let plot_width = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let _ = writeln!(
        svg,
        r##"<rect x="{MARGIN_LEFT}" y="{:.2}" width="{plot_width}" height="{:.2}" fill="none" stroke="#999"/>"##,
        panel.top, panel.height
    );
    let _ = writeln!(
        svg,
        r#"<text x="{:.2}" y="{:.2}" text-anchor="end">{}</text><text x="{:.2}" y="{:.2}" text-anchor="end">{}</text>"#,
        MARGIN_LEFT - 6.0,
        panel.top + 10.0,
        format_value(panel.max),
        MARGIN_LEFT - 6.0,
        panel.bottom(),
        format_value(panel.min)
    );
    let _ = writeln!(
        svg,
        r#"<text x="16" y="{:.2}" transform="rotate(-90 16 {:.2})" text-anchor="middle">{label}</text>"#,
        panel.top + panel.height / 2.0,
        panel.top + panel.height / 2.0
    );
}

fn format_value(v: f64) -> String {
    if v.abs() >= 1_000_000.0 {
        format!("{:.2}M", v / 1_000_000.0)
    } else if v.abs() >= 1.0 {
        format!("{v:.2}")
    } else {
        format!("{v:.6}")
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use common::Candle;

    fn series(rows: usize) -> Series {
        let candles = (0..rows)
            .map(|i| {
                let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
                let close = 100.0 + (i as f64).sin() * 5.0;
                Candle {
                    open_time: t,
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0 + i as f64,
                    close_time: t + Duration::seconds(3_599),
                }
            })
            .collect();
        Series::new(candles)
    }

    #[test]
    fn path_uses_offset_date_and_strategy_id() {
        let drawer = SvgChartDrawer::new("data/charts", FixedOffset::east_opt(8 * 3_600).unwrap());
        // 20:30 UTC is already the next day at +08:00
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 20, 30, 15).unwrap();
        assert_eq!(
            drawer.chart_path("BTCUSDT", "a1b2c3d4", t),
            PathBuf::from("data/charts/2024-06-02/a1b2c3d4/BTCUSDT/20240602_043015.svg")
        );
    }

    #[test]
    fn svg_has_one_candle_per_row_and_skips_missing_columns() {
        let data = series(120).tail(CHART_CANDLES);
        let closes = data.closes();
        let line: Vec<Option<f64>> = closes.iter().map(|c| Some(c * 0.5)).collect();
        let data = data.with_indicator("macd", line);
        let plot = PlotConfig::new(["macd", "not_there"]);
        let t = data.last_open_time().unwrap();

        let svg = draw_svg(&data, "BTCUSDT - 1h", t, &plot, FixedOffset::east_opt(0).unwrap());

        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches(r#"fill-opacity="0.5""#).count(), CHART_CANDLES);
        assert_eq!(svg.matches("<path ").count(), 1);
        assert!(svg.contains(">macd</text>"));
        assert!(!svg.contains("not_there"));
        assert_eq!(svg.matches("stroke-dasharray").count(), 3);
    }

    #[tokio::test]
    async fn render_writes_file_under_layout() {
        let dir = tempfile::tempdir().unwrap();
        let drawer = SvgChartDrawer::new(dir.path(), FixedOffset::east_opt(0).unwrap());
        let data = series(30);
        let t = data.last_open_time().unwrap();

        let path = drawer
            .render(&data, "ETHUSDT", "1h", "deadbeef", t, &PlotConfig::default())
            .await
            .unwrap();

        // row 29 opens at 2024-06-02 05:00 UTC
        assert!(path.starts_with(dir.path().join("2024-06-02").join("deadbeef").join("ETHUSDT")));
        assert_eq!(path.file_name().unwrap(), "20240602_050000.svg");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("ETHUSDT - 1h"));
    }

    #[tokio::test]
    async fn empty_series_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let drawer = SvgChartDrawer::new(dir.path(), FixedOffset::east_opt(0).unwrap());
        let err = drawer
            .render(&Series::empty(), "BTCUSDT", "1h", "x", Utc::now(), &PlotConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Chart(_)));
    }
}
