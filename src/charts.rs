//! Server-side HTML/SVG rendering for the reporting pages.
//!
//! Markup lives in `templates/`; this module only computes what goes in it.

use askama::Template;
use chrono::{TimeZone, Utc};

use crate::store::{MetricRecord, StatusClass};

const HOUR: i64 = 3600;
const DAY: i64 = HOUR * 24;

// ─── Layout ──────────────────────────────────────────────────────

const MAX_X_LABELS: usize = 12;
const Y_TICKS: u32 = 4;

/// Fixed chart geometry; `left..right` and `top..bottom` bound the plot.
#[derive(Debug, Clone, Copy)]
struct Frame {
    width: f64,
    height: f64,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
}

const FRAME: Frame = Frame {
    width: 800.0,
    height: 320.0,
    left: 70.0,
    right: 780.0,
    top: 40.0,
    bottom: 270.0,
};

impl Frame {
    fn plot_width(&self) -> f64 {
        self.right - self.left
    }

    fn plot_height(&self) -> f64 {
        self.bottom - self.top
    }

    fn middle(&self) -> f64 {
        self.top + self.plot_height() / 2.0
    }

    fn centre(&self) -> f64 {
        self.left + self.plot_width() / 2.0
    }

    fn slot(&self, n: usize) -> f64 {
        self.plot_width() / n.max(1) as f64
    }

    /// Centre of slot `i` out of `n`.
    fn x_at(&self, i: usize, n: usize) -> f64 {
        let slot = self.slot(n);
        self.left + slot * i as f64 + slot / 2.0
    }

    fn y_at(&self, value: f64, max: f64) -> f64 {
        if max <= 0.0 {
            return self.bottom;
        }
        self.bottom - (value / max) * self.plot_height()
    }
}

fn class_colour(class: StatusClass) -> &'static str {
    match class {
        StatusClass::Informational => "#9e9e9e",
        StatusClass::Success => "#43a047",
        StatusClass::Redirection => "#1e88e5",
        StatusClass::ClientError => "#fb8c00",
        StatusClass::ServerError => "#e53935",
    }
}

// ─── Pages ───────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "overview.html")]
struct OverviewPage<'a> {
    urls: &'a [String],
}

#[derive(Template)]
#[template(path = "charts.html")]
struct ChartPage<'a> {
    url: &'a str,
    response_time: Chart,
    status: Chart,
}

/// Landing page listing every monitored URL.
pub fn render_overview(urls: &[String]) -> askama::Result<String> {
    OverviewPage { urls }.render()
}

/// Chart page for one URL.
pub fn render_page(url: &str, records: &[MetricRecord]) -> askama::Result<String> {
    ChartPage {
        url,
        response_time: response_time_chart(url, records),
        status: status_chart(url, records),
    }
    .render()
}

// ─── Charts ──────────────────────────────────────────────────────

struct Tick {
    y: f64,
    label_x: f64,
    label_y: f64,
    value: f64,
}

struct AxisLabel {
    x: f64,
    y: f64,
    text: String,
}

struct Bar {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    fill: &'static str,
    label: &'static str,
    count: i64,
}

struct LegendEntry {
    x: f64,
    y: f64,
    text_x: f64,
    text_y: f64,
    fill: &'static str,
    label: &'static str,
}

/// One inline SVG chart. No ticks means no data in the window.
#[derive(Template)]
#[template(path = "chart.html")]
pub struct Chart {
    title: String,
    y_name: &'static str,
    frame: Frame,
    ticks: Vec<Tick>,
    x_labels: Vec<AxisLabel>,
    line: Option<String>,
    bars: Vec<Bar>,
    legend: Vec<LegendEntry>,
}

impl Chart {
    fn blank(title: String, y_name: &'static str) -> Self {
        Self {
            title,
            y_name,
            frame: FRAME,
            ticks: Vec::new(),
            x_labels: Vec::new(),
            line: None,
            bars: Vec::new(),
            legend: Vec::new(),
        }
    }

    fn with_axes(mut self, records: &[MetricRecord], max: f64) -> Self {
        self.ticks = (0..=Y_TICKS)
            .map(|step| {
                let value = max * f64::from(step) / f64::from(Y_TICKS);
                let y = FRAME.y_at(value, max);
                Tick {
                    y,
                    label_x: FRAME.left - 6.0,
                    label_y: y + 3.0,
                    value,
                }
            })
            .collect();

        let labels = time_labels(records);
        let n = labels.len();
        let every = n.div_ceil(MAX_X_LABELS).max(1);
        self.x_labels = labels
            .into_iter()
            .enumerate()
            .step_by(every)
            .map(|(i, text)| AxisLabel {
                x: FRAME.x_at(i, n),
                y: FRAME.bottom + 16.0,
                text,
            })
            .collect();
        self
    }
}

/// X-axis labels; the format coarsens as the covered span grows.
pub fn time_labels(records: &[MetricRecord]) -> Vec<String> {
    let (first, last) = match (records.first(), records.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => return Vec::new(),
    };

    let span = last - first;
    let format = if span > DAY * 7 {
        "%Y-%m-%d"
    } else if span > DAY {
        "%m-%d %Hh"
    } else {
        "%H:%M"
    };

    records
        .iter()
        .map(|r| match Utc.timestamp_opt(r.timestamp, 0).single() {
            Some(t) => t.format(format).to_string(),
            None => r.timestamp.to_string(),
        })
        .collect()
}

/// Line chart of average response time per bucket, in milliseconds.
pub fn response_time_chart(url: &str, records: &[MetricRecord]) -> Chart {
    let chart = Chart::blank(format!("Request Response Time for {url}"), "Duration (ms)");
    if records.is_empty() {
        return chart;
    }

    let values: Vec<f64> = records
        .iter()
        .map(|r| r.average_response_ms().unwrap_or(0.0))
        .collect();
    let max = values.iter().cloned().fold(0.0_f64, f64::max);

    let points = values
        .iter()
        .enumerate()
        .map(|(i, v)| format!("{:.1},{:.1}", FRAME.x_at(i, values.len()), FRAME.y_at(*v, max)))
        .collect::<Vec<_>>()
        .join(" ");

    Chart {
        line: Some(points),
        ..chart.with_axes(records, max)
    }
}

/// Stacked bars of status-class counts per bucket.
pub fn status_chart(url: &str, records: &[MetricRecord]) -> Chart {
    let chart = Chart::blank(format!("Response Status for {url}"), "Requests");
    if records.is_empty() {
        return chart;
    }

    let max = records.iter().map(|r| r.count).max().unwrap_or(0) as f64;
    let slot = FRAME.slot(records.len());
    let width = (slot * 0.7).max(1.0);

    let mut bars = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let x = FRAME.left + slot * i as f64 + (slot - width) / 2.0;
        let mut base = 0.0;
        for class in StatusClass::ALL {
            let count = record.class_count(class);
            if count <= 0 {
                continue;
            }
            let top = FRAME.y_at(base + count as f64, max);
            bars.push(Bar {
                x,
                y: top,
                width,
                height: FRAME.y_at(base, max) - top,
                fill: class_colour(class),
                label: class.label(),
                count,
            });
            base += count as f64;
        }
    }

    let legend = StatusClass::ALL
        .iter()
        .enumerate()
        .map(|(i, class)| {
            let x = FRAME.left + i as f64 * 60.0;
            let y = FRAME.height - 14.0;
            LegendEntry {
                x,
                y,
                text_x: x + 14.0,
                text_y: y + 9.0,
                fill: class_colour(*class),
                label: class.label(),
            }
        })
        .collect();

    Chart {
        bars,
        legend,
        ..chart.with_axes(records, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: i64, count_2xx: i64, count_5xx: i64, response_time: i64) -> MetricRecord {
        MetricRecord {
            count: count_2xx + count_5xx,
            count_2xx,
            count_5xx,
            response_time,
            ..MetricRecord::empty("http://a.test/", timestamp)
        }
    }

    #[test]
    fn label_format_follows_span() {
        let short = [record(0, 1, 0, 1), record(3_600, 1, 0, 1)];
        assert_eq!(time_labels(&short), vec!["00:00", "01:00"]);

        let days = [record(0, 1, 0, 1), record(2 * DAY + 5 * HOUR, 1, 0, 1)];
        assert_eq!(time_labels(&days), vec!["01-01 00h", "01-03 05h"]);

        let weeks = [record(0, 1, 0, 1), record(8 * DAY, 1, 0, 1)];
        assert_eq!(time_labels(&weeks), vec!["1970-01-01", "1970-01-09"]);

        assert!(time_labels(&[]).is_empty());
    }

    #[test]
    fn charts_render_every_bucket() {
        let records = [record(900, 1, 1, 150_000), record(1200, 3, 0, 30_000)];
        let line = response_time_chart("http://a.test/", &records).render().unwrap();
        assert!(line.contains("<polyline"));
        assert!(line.contains("Request Response Time for"));
        assert!(!line.contains("No data in this window"));

        let bars = status_chart("http://a.test/", &records).render().unwrap();
        assert_eq!(bars.matches("<title>2xx: ").count(), 2);
        assert_eq!(bars.matches("<title>5xx: 1</title>").count(), 1);
        assert!(!bars.contains("<polyline"));
    }

    #[test]
    fn x_labels_are_thinned_on_long_ranges() {
        let records: Vec<_> = (0..48).map(|i| record(i * 300, 1, 0, 1)).collect();
        let chart = status_chart("http://a.test/", &records);
        assert_eq!(chart.x_labels.len(), 12);
        assert_eq!(chart.bars.len(), 48);
        assert_eq!(chart.ticks.len(), 5);
    }

    #[test]
    fn empty_window_says_so() {
        let html = render_page("http://a.test/", &[]).unwrap();
        assert_eq!(html.matches("No data in this window").count(), 2);
        assert!(html.contains("<!DOCTYPE html>"));
    }

    #[test]
    fn overview_escapes_and_links() {
        let html = render_overview(&["http://a.test/?q=<x>&y".to_string()]).unwrap();
        assert!(html.contains("&lt;x&gt;&amp;y"));
        assert!(!html.contains("<x>"));
        assert!(html.contains("/charts?url=http%3A%2F%2Fa.test%2F%3Fq%3D%3Cx%3E%26y"));
        assert!(html.contains("/metrics?url=http%3A%2F%2Fa.test%2F%3Fq%3D%3Cx%3E%26y"));
    }

    #[test]
    fn chart_titles_are_escaped() {
        let html = render_page("http://a.test/<script>", &[]).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
