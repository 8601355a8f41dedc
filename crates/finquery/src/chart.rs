//! Chart generation: choose a [`ChartSpec`] for a result and render it as SVG.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::types::{
    ChartSpec, ChartType, FinError, FinResult, IntentType, ResultFrame, UserQuery, Value,
};

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 500;

/// Most categories a by-category result may have and still be charted.
pub const MAX_CATEGORY_ROWS: usize = 20;

const TIME_COLUMNS: [&str; 5] = ["date", "time_period", "month", "year", "day"];

const PALETTE: [&str; 10] = [
    "#636efa", "#ef553b", "#00cc96", "#ab63fa", "#ffa15a", "#19d3f3", "#ff6692", "#b6e880",
    "#ff97ff", "#fecb52",
];

/// Whether a result is worth drawing.
pub fn should_chart(frame: &ResultFrame, query: &UserQuery) -> bool {
    if frame.is_empty() {
        return false;
    }
    match query.intent {
        IntentType::SpendingOverTime | IntentType::Comparison => true,
        IntentType::SpendingByCategory => (2..=MAX_CATEGORY_ROWS).contains(&frame.rowcount()),
        _ => false,
    }
}

fn is_scalar_comparison(frame: &ResultFrame) -> bool {
    frame.column_index("current_value").is_some()
        && frame.column_index("previous_value").is_some()
        && frame.column_index("category").is_none()
}

/// The frame a chart is drawn from.
///
/// A scalar comparison becomes a two-row `period`/`value` frame.
pub fn chart_frame<'a>(frame: &'a ResultFrame, query: &UserQuery) -> Cow<'a, ResultFrame> {
    if query.intent != IntentType::Comparison || !is_scalar_comparison(frame) || frame.is_empty() {
        return Cow::Borrowed(frame);
    }
    let cell = |col: &str| frame.value(0, col).cloned().unwrap_or(Value::Null);
    let mut reshaped = ResultFrame::new(
        vec!["period".into(), "value".into()],
        vec![
            vec![Value::Text("Current".into()), cell("current_value")],
            vec![Value::Text("Previous".into()), cell("previous_value")],
        ],
    );
    reshaped.sql = frame.sql.clone();
    Cow::Owned(reshaped)
}

/// `time_period` to `Time Period`.
pub fn title_case(column: &str) -> String {
    column
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn pick_axes(frame: &ResultFrame) -> Option<(String, String)> {
    let x = TIME_COLUMNS
        .iter()
        .find(|c| frame.column_index(c).is_some())
        .map(|c| c.to_string())
        .or_else(|| {
            frame
                .columns
                .iter()
                .find(|c| !frame.is_numeric_column(c))
                .cloned()
        })?;

    let y = frame
        .columns
        .iter()
        .find(|c| **c != x && frame.is_numeric_column(c))
        .or_else(|| {
            frame.columns.iter().find(|c| {
                **c != x && frame.column_values(c).iter().any(|v| v.as_f64().is_some())
            })
        })
        .cloned()?;

    Some((x, y))
}

impl ChartSpec {
    /// Choose chart type, axes and titles for a result. `None` when nothing fits.
    pub fn infer(frame: &ResultFrame, query: &UserQuery) -> Option<ChartSpec> {
        if frame.is_empty() {
            return None;
        }
        let data = chart_frame(frame, query);
        let (x_axis, y_axis) = pick_axes(&data)?;

        let chart_type = match query.intent {
            IntentType::Comparison => ChartType::Bar,
            IntentType::SpendingByCategory if data.rowcount() <= 10 => ChartType::Pie,
            IntentType::SpendingByCategory => ChartType::Bar,
            IntentType::SpendingOverTime => ChartType::Line,
            _ if query.granularity.is_some() => ChartType::Line,
            _ => ChartType::Bar,
        };

        let x_label = title_case(&x_axis);
        let y_label = title_case(&y_axis);
        let title = match query.intent {
            IntentType::Comparison => format!("Comparison of {y_label}"),
            IntentType::SpendingByCategory => format!("Spending by {x_label}"),
            IntentType::SpendingOverTime => format!("{y_label} Over Time"),
            _ if query.granularity.is_some() => format!("{y_label} Over Time"),
            _ => format!("{y_label} by {x_label}"),
        };

        Some(ChartSpec {
            chart_type,
            x_axis,
            y_axis,
            title,
            x_label,
            y_label,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            color_scheme: "default".to_string(),
        })
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn truncate(label: &str, max: usize) -> String {
    if label.chars().count() <= max {
        label.to_string()
    } else {
        let mut s: String = label.chars().take(max.saturating_sub(1)).collect();
        s.push('…');
        s
    }
}

/// Short axis label: 1250000 -> 1.2M.
fn compact(v: f64) -> String {
    let a = v.abs();
    if a >= 1_000_000.0 {
        format!("{:.1}M", v / 1_000_000.0)
    } else if a >= 1_000.0 {
        format!("{:.1}k", v / 1_000.0)
    } else if a >= 10.0 || a == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

struct Plot {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    min: f64,
    max: f64,
}

impl Plot {
    fn new(spec: &ChartSpec, values: &[f64]) -> Self {
        let min = values.iter().cloned().fold(0.0f64, f64::min);
        let mut max = values.iter().cloned().fold(0.0f64, f64::max);
        if max == min {
            max = min + 1.0;
        }
        Self {
            left: 80.0,
            top: 50.0,
            width: spec.width as f64 - 100.0,
            height: spec.height as f64 - 120.0,
            min,
            max,
        }
    }

    fn y(&self, v: f64) -> f64 {
        self.top + self.height * (1.0 - (v - self.min) / (self.max - self.min))
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Writes SVG charts into a directory.
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    output_dir: PathBuf,
}

impl ChartRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render `frame` according to `spec` and return the file written.
    pub fn render(&self, spec: &ChartSpec, frame: &ResultFrame) -> FinResult<PathBuf> {
        let x_idx = frame
            .column_index(&spec.x_axis)
            .ok_or_else(|| FinError::Chart(format!("column {} not in result", spec.x_axis)))?;
        let y_idx = frame
            .column_index(&spec.y_axis)
            .ok_or_else(|| FinError::Chart(format!("column {} not in result", spec.y_axis)))?;

        let points: Vec<(String, f64)> = frame
            .rows
            .iter()
            .filter_map(|row| {
                let value = row.get(y_idx)?.as_f64()?;
                let label = row.get(x_idx).map(|v| v.to_string()).unwrap_or_default();
                Some((label, value))
            })
            .collect();
        if points.is_empty() {
            return Err(FinError::Chart(format!(
                "column {} has no numeric values",
                spec.y_axis
            )));
        }

        let body = match spec.chart_type {
            ChartType::Pie => pie(spec, &points)?,
            ChartType::Bar => bars(spec, &points),
            ChartType::Line => series(spec, &points, false, true),
            ChartType::Area => series(spec, &points, true, true),
            ChartType::Scatter => series(spec, &points, false, false),
        };

        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif">"#,
            w = spec.width,
            h = spec.height
        );
        let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="30" text-anchor="middle" font-size="18">{}</text>"#,
            spec.width / 2,
            escape(&spec.title)
        );
        svg.push_str(&body);
        svg.push_str("</svg>\n");

        std::fs::create_dir_all(&self.output_dir)?;
        let id = Uuid::new_v4().simple().to_string();
        let name = format!(
            "chart_{}_{}.svg",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &id[..8]
        );
        let path = self.output_dir.join(name);
        std::fs::write(&path, svg)?;

        info!(path = %path.display(), chart = spec.chart_type.as_str(), points = points.len(), "chart saved");
        Ok(path)
    }
}

fn axes(spec: &ChartSpec, plot: &Plot) -> String {
    let mut out = String::new();
    let right = plot.left + plot.width;
    let _ = writeln!(
        out,
        r##"<line x1="{l}" y1="{t}" x2="{l}" y2="{b}" stroke="#333"/><line x1="{l}" y1="{z:.1}" x2="{r}" y2="{z:.1}" stroke="#333"/>"##,
        l = plot.left,
        t = plot.top,
        b = plot.bottom(),
        r = right,
        z = plot.y(0.0),
    );
    for i in 0..=4 {
        let v = plot.min + (plot.max - plot.min) * i as f64 / 4.0;
        let y = plot.y(v);
        let _ = writeln!(
            out,
            r##"<line x1="{l}" y1="{y:.1}" x2="{r}" y2="{y:.1}" stroke="#eee"/><text x="{tx}" y="{ty:.1}" text-anchor="end" font-size="11">{label}</text>"##,
            l = plot.left,
            r = right,
            tx = plot.left - 6.0,
            ty = y + 4.0,
            label = compact(v),
        );
    }
    let _ = writeln!(
        out,
        r#"<text x="{x}" y="{y}" text-anchor="middle" font-size="13">{label}</text>"#,
        x = plot.left + plot.width / 2.0,
        y = spec.height as f64 - 10.0,
        label = escape(&spec.x_label),
    );
    let _ = writeln!(
        out,
        r#"<text x="20" y="{y}" text-anchor="middle" font-size="13" transform="rotate(-90 20 {y})">{label}</text>"#,
        y = plot.top + plot.height / 2.0,
        label = escape(&spec.y_label),
    );
    out
}

fn x_label(out: &mut String, x: f64, y: f64, label: &str) {
    let _ = writeln!(
        out,
        r#"<text x="{x:.1}" y="{y:.1}" text-anchor="middle" font-size="11">{}</text>"#,
        escape(&truncate(label, 12))
    );
}

fn bars(spec: &ChartSpec, points: &[(String, f64)]) -> String {
    let values: Vec<f64> = points.iter().map(|p| p.1).collect();
    let plot = Plot::new(spec, &values);
    let mut out = axes(spec, &plot);
    let slot = plot.width / points.len() as f64;
    let bar_width = slot * 0.7;
    let zero = plot.y(0.0);

    for (i, (label, value)) in points.iter().enumerate() {
        let x = plot.left + slot * i as f64 + (slot - bar_width) / 2.0;
        let y = plot.y(*value);
        let (top, height) = if y < zero { (y, zero - y) } else { (zero, y - zero) };
        let _ = writeln!(
            out,
            r#"<rect x="{x:.1}" y="{top:.1}" width="{bar_width:.1}" height="{height:.1}" fill="{}"><title>{}: {}</title></rect>"#,
            PALETTE[i % PALETTE.len()],
            escape(label),
            compact(*value),
        );
        x_label(&mut out, x + bar_width / 2.0, plot.bottom() + 18.0, label);
    }
    out
}

fn series(spec: &ChartSpec, points: &[(String, f64)], fill: bool, connect: bool) -> String {
    let values: Vec<f64> = points.iter().map(|p| p.1).collect();
    let plot = Plot::new(spec, &values);
    let mut out = axes(spec, &plot);
    let step = if points.len() > 1 {
        plot.width / (points.len() - 1) as f64
    } else {
        0.0
    };
    let offset = if points.len() > 1 { 0.0 } else { plot.width / 2.0 };
    let coords: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .map(|(i, v)| (plot.left + offset + step * i as f64, plot.y(*v)))
        .collect();
    let path: Vec<String> = coords.iter().map(|(x, y)| format!("{x:.1},{y:.1}")).collect();
    let color = PALETTE[0];

    if fill {
        let zero = plot.y(0.0);
        let (first_x, _) = coords[0];
        let (last_x, _) = coords[coords.len() - 1];
        let _ = writeln!(
            out,
            r#"<polygon points="{first_x:.1},{zero:.1} {} {last_x:.1},{zero:.1}" fill="{color}" fill-opacity="0.3"/>"#,
            path.join(" ")
        );
    }
    if connect {
        let _ = writeln!(
            out,
            r#"<polyline points="{}" fill="none" stroke="{color}" stroke-width="2"/>"#,
            path.join(" ")
        );
    }

    // keep roughly a dozen x labels
    let every = (points.len() / 12).max(1);
    for (i, ((x, y), (label, value))) in coords.iter().zip(points.iter()).enumerate() {
        let _ = writeln!(
            out,
            r#"<circle cx="{x:.1}" cy="{y:.1}" r="3.5" fill="{color}"><title>{}: {}</title></circle>"#,
            escape(label),
            compact(*value),
        );
        if i % every == 0 {
            x_label(&mut out, *x, plot.bottom() + 18.0, label);
        }
    }
    out
}

fn pie(spec: &ChartSpec, points: &[(String, f64)]) -> FinResult<String> {
    let total: f64 = points.iter().map(|p| p.1.max(0.0)).sum();
    if total <= 0.0 {
        return Err(FinError::Chart("pie chart needs positive values".into()));
    }

    let cx = spec.width as f64 * 0.35;
    let cy = spec.height as f64 / 2.0 + 15.0;
    let r = (spec.height as f64 / 2.0 - 60.0).max(20.0);
    let legend_x = spec.width as f64 * 0.68;
    let mut out = String::new();
    let mut angle = -std::f64::consts::FRAC_PI_2;

    let slices: Vec<&(String, f64)> = points.iter().filter(|p| p.1 > 0.0).collect();
    for (i, (label, value)) in slices.iter().map(|p| (&p.0, p.1)).enumerate() {
        let share = value / total;
        let color = PALETTE[i % PALETTE.len()];
        if slices.len() == 1 {
            let _ = writeln!(out, r#"<circle cx="{cx:.1}" cy="{cy:.1}" r="{r:.1}" fill="{color}"/>"#);
        } else {
            let end = angle + share * std::f64::consts::TAU;
            let (x1, y1) = (cx + r * angle.cos(), cy + r * angle.sin());
            let (x2, y2) = (cx + r * end.cos(), cy + r * end.sin());
            let large = if share > 0.5 { 1 } else { 0 };
            let _ = writeln!(
                out,
                r#"<path d="M {cx:.1} {cy:.1} L {x1:.2} {y1:.2} A {r:.1} {r:.1} 0 {large} 1 {x2:.2} {y2:.2} Z" fill="{color}" stroke="white"><title>{}: {}</title></path>"#,
                escape(label),
                compact(value),
            );
            angle = end;
        }
        let ly = 70.0 + 22.0 * i as f64;
        let _ = writeln!(
            out,
            r#"<rect x="{legend_x:.1}" y="{:.1}" width="12" height="12" fill="{color}"/><text x="{:.1}" y="{ly:.1}" font-size="12">{} ({:.1}%)</text>"#,
            ly - 10.0,
            legend_x + 18.0,
            escape(&truncate(label, 24)),
            share * 100.0,
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeGranularity;

    fn query(intent: IntentType) -> UserQuery {
        let mut q = UserQuery::new("q");
        q.intent = intent;
        q
    }

    fn by_category(n: usize) -> ResultFrame {
        ResultFrame::new(
            vec!["category".into(), "total".into(), "transaction_count".into()],
            (0..n)
                .map(|i| {
                    vec![
                        Value::Text(format!("Cat {i}")),
                        Value::Float(1000.0 * (i + 1) as f64),
                        Value::Integer(i as i64 + 1),
                    ]
                })
                .collect(),
        )
    }

    fn over_time() -> ResultFrame {
        ResultFrame::new(
            vec!["time_period".into(), "total".into()],
            vec![
                vec![Value::Text("2025-05".into()), Value::Float(300.0)],
                vec![Value::Text("2025-06".into()), Value::Float(450.0)],
                vec![Value::Text("2025-07".into()), Value::Float(120.0)],
            ],
        )
    }

    fn scalar_comparison() -> ResultFrame {
        ResultFrame::new(
            vec![
                "current_value".into(),
                "previous_value".into(),
                "difference".into(),
                "pct_change".into(),
            ],
            vec![vec![
                Value::Float(1200.0),
                Value::Float(1000.0),
                Value::Float(200.0),
                Value::Float(20.0),
            ]],
        )
    }

    #[test]
    fn test_should_chart_rules() {
        assert!(!should_chart(&ResultFrame::default(), &query(IntentType::SpendingOverTime)));
        assert!(should_chart(&over_time(), &query(IntentType::SpendingOverTime)));
        assert!(should_chart(&scalar_comparison(), &query(IntentType::Comparison)));
        assert!(!should_chart(&by_category(1), &query(IntentType::SpendingByCategory)));
        assert!(should_chart(&by_category(2), &query(IntentType::SpendingByCategory)));
        assert!(should_chart(&by_category(20), &query(IntentType::SpendingByCategory)));
        assert!(!should_chart(&by_category(21), &query(IntentType::SpendingByCategory)));
        assert!(!should_chart(&by_category(5), &query(IntentType::TopItems)));
    }

    #[test]
    fn test_infer_by_category() {
        let spec = ChartSpec::infer(&by_category(3), &query(IntentType::SpendingByCategory)).unwrap();
        assert_eq!(spec.chart_type, ChartType::Pie);
        assert_eq!(spec.x_axis, "category");
        assert_eq!(spec.y_axis, "total");
        assert_eq!(spec.title, "Spending by Category");

        let spec = ChartSpec::infer(&by_category(12), &query(IntentType::SpendingByCategory)).unwrap();
        assert_eq!(spec.chart_type, ChartType::Bar);
    }

    #[test]
    fn test_infer_over_time() {
        let spec = ChartSpec::infer(&over_time(), &query(IntentType::SpendingOverTime)).unwrap();
        assert_eq!(spec.chart_type, ChartType::Line);
        assert_eq!(spec.x_axis, "time_period");
        assert_eq!(spec.x_label, "Time Period");
        assert_eq!(spec.title, "Total Over Time");
        assert_eq!((spec.width, spec.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
    }

    #[test]
    fn test_infer_generic_with_granularity() {
        let mut q = query(IntentType::Breakdown);
        q.granularity = Some(TimeGranularity::Week);
        let spec = ChartSpec::infer(&over_time(), &q).unwrap();
        assert_eq!(spec.chart_type, ChartType::Line);

        let spec = ChartSpec::infer(&by_category(3), &query(IntentType::Breakdown)).unwrap();
        assert_eq!(spec.chart_type, ChartType::Bar);
        assert_eq!(spec.title, "Total by Category");
    }

    #[test]
    fn test_scalar_comparison_reshaped() {
        let q = query(IntentType::Comparison);
        let frame = scalar_comparison();
        let data = chart_frame(&frame, &q);
        assert_eq!(data.columns, vec!["period", "value"]);
        assert_eq!(data.numeric(1, "value"), Some(1000.0));

        let spec = ChartSpec::infer(&frame, &q).unwrap();
        assert_eq!(spec.chart_type, ChartType::Bar);
        assert_eq!((spec.x_axis.as_str(), spec.y_axis.as_str()), ("period", "value"));
        assert_eq!(spec.title, "Comparison of Value");
    }

    #[test]
    fn test_render_all_types() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ChartRenderer::new(dir.path().join("charts"));
        let frame = over_time();
        let mut spec = ChartSpec::infer(&frame, &query(IntentType::SpendingOverTime)).unwrap();

        for chart_type in [
            ChartType::Bar,
            ChartType::Line,
            ChartType::Pie,
            ChartType::Area,
            ChartType::Scatter,
        ] {
            spec.chart_type = chart_type;
            let path = renderer.render(&spec, &frame).unwrap();
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("svg"));
            let svg = std::fs::read_to_string(&path).unwrap();
            assert!(svg.starts_with("<svg"));
            assert!(svg.contains("Total Over Time"));
            assert!(svg.trim_end().ends_with("</svg>"));
        }
    }

    #[test]
    fn test_render_failures() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ChartRenderer::new(dir.path());
        let frame = over_time();
        let mut spec = ChartSpec::infer(&frame, &query(IntentType::SpendingOverTime)).unwrap();

        spec.y_axis = "missing".into();
        assert!(matches!(renderer.render(&spec, &frame), Err(FinError::Chart(_))));

        spec.y_axis = "time_period".into();
        assert!(matches!(renderer.render(&spec, &frame), Err(FinError::Chart(_))));

        let zeros = ResultFrame::new(
            vec!["category".into(), "total".into()],
            vec![vec![Value::Text("A".into()), Value::Float(0.0)]],
        );
        let mut pie_spec = spec.clone();
        pie_spec.chart_type = ChartType::Pie;
        pie_spec.x_axis = "category".into();
        pie_spec.y_axis = "total".into();
        assert!(renderer.render(&pie_spec, &zeros).is_err());
    }

    #[test]
    fn test_title_case_and_escape() {
        assert_eq!(title_case("transaction_count"), "Transaction Count");
        assert_eq!(escape("Food & <Drinks>"), "Food &amp; &lt;Drinks&gt;");
    }
}
