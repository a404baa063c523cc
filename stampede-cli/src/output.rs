//! Report rendering for the console

use anyhow::{Context, Result};
use colored::*;
use stampede_engine::{RunReport, StopReason, Verdict};
use stampede_metrics::{Aggregate, MetricSnapshot, ThresholdResult};
use std::fmt::Write as _;
use std::path::Path;

/// Width of the dotted metric-name column
const NAME_WIDTH: usize = 34;

/// Render a run report as human readable text
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  {} {} ({})",
        "run".bold(),
        report.name.bright_cyan(),
        report.run_id
    );
    let _ = writeln!(
        out,
        "  started {}, ran {:.1}s, seed {}, stop: {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.duration_secs,
        report.seed,
        stop_reason(report.stop_reason)
    );
    let _ = writeln!(
        out,
        "  iterations {}, vus max {}, interrupted {}",
        report.iterations, report.vus_max, report.interrupted
    );

    if !report.thresholds.results.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  {}", "thresholds".bold());
        for result in &report.thresholds.results {
            let _ = writeln!(out, "    {}", threshold_line(result));
        }
    }
    if let Some(aborted_by) = &report.aborted_by {
        let _ = writeln!(
            out,
            "    {} aborted by {} {}",
            "!".bright_red().bold(),
            aborted_by.metric,
            aborted_by.expression
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "  {}", "metrics".bold());
    let mut metrics: Vec<&MetricSnapshot> = report.metrics.iter().collect();
    metrics.sort_by(|a, b| a.name.cmp(&b.name));
    for metric in metrics {
        let _ = writeln!(out, "    {}", metric_line(metric));
    }

    let _ = writeln!(out);
    let verdict = match report.verdict {
        Verdict::Pass => format!("✅ {}", report.verdict).bright_green().bold(),
        Verdict::Fail => format!("❌ {}", report.verdict).bright_red().bold(),
    };
    let _ = writeln!(out, "  {}", verdict);

    out
}

/// Serialize the report as pretty JSON
pub fn render_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize run report")
}

/// Write the JSON report to a file, creating parent directories
pub fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create report directory")?;
        }
    }
    std::fs::write(path, render_json(report)?)
        .with_context(|| format!("Failed to write report to {:?}", path))
}

fn stop_reason(reason: StopReason) -> ColoredString {
    match reason {
        StopReason::Completed => reason.to_string().normal(),
        StopReason::Cancelled => reason.to_string().bright_yellow(),
        StopReason::ThresholdAborted => reason.to_string().bright_red(),
    }
}

fn threshold_line(result: &ThresholdResult) -> String {
    let mark = if result.passed {
        "✓".bright_green().bold()
    } else {
        "✗".bright_red().bold()
    };
    let observed = match result.observed {
        Some(value) => format!("{:.4}", value),
        None => "no data".to_string(),
    };
    format!(
        "{} {} {} (observed {})",
        mark, result.metric, result.expression, observed
    )
}

fn metric_line(metric: &MetricSnapshot) -> String {
    let dots = NAME_WIDTH.saturating_sub(metric.name.len());
    let name = format!("{}{}:", metric.name, ".".repeat(dots));
    format!("{} {}", name, summary(&metric.aggregate))
}

fn summary(aggregate: &Aggregate) -> String {
    match aggregate {
        Aggregate::Counter(c) => format!("{} {:.2}/s", number(c.count), c.rate),
        Aggregate::Gauge(g) => format!(
            "{} min={} max={}",
            number(g.value),
            number(g.min),
            number(g.max)
        ),
        Aggregate::Rate(r) => format!(
            "{:.2}% {} {} {} {}",
            r.rate * 100.0,
            "✓".green(),
            r.passes,
            "✗".red(),
            r.fails
        ),
        Aggregate::Trend(t) => format!(
            "avg={:.2} min={:.2} med={:.2} max={:.2} p(90)={:.2} p(95)={:.2} p(99)={:.2}",
            t.avg, t.min, t.med, t.max, t.p90, t.p95, t.p99
        ),
        Aggregate::Histogram(h) => format!(
            "count={} avg={:.2} min={:.2} p(50)~{:.2} p(95)~{:.2} max={:.2}",
            h.count, h.avg, h.min, h.p50, h.p95, h.max
        ),
    }
}

fn number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stampede_metrics::{MetricKind, MetricRegistry, MetricValue, ThresholdReport};
    use uuid::Uuid;

    fn report() -> RunReport {
        let registry = MetricRegistry::new();
        registry.register("http_req_duration", MetricKind::Trend);
        registry.register("checks", MetricKind::Rate);
        registry.register("vus", MetricKind::Gauge);
        for ms in [100.0, 200.0, 300.0, 400.0] {
            registry
                .record("http_req_duration", MetricValue::Number(ms))
                .unwrap();
        }
        for passed in [true, true, true, false] {
            registry.record("checks", MetricValue::Bool(passed)).unwrap();
        }
        registry.record("vus", MetricValue::Number(3.0)).unwrap();

        let thresholds = ThresholdReport {
            results: vec![
                ThresholdResult {
                    metric: "http_req_duration".to_string(),
                    expression: "p(95)<500".to_string(),
                    observed: Some(400.0),
                    bound: 500.0,
                    passed: true,
                },
                ThresholdResult {
                    metric: "errors".to_string(),
                    expression: "rate<0.1".to_string(),
                    observed: None,
                    bound: 0.1,
                    passed: true,
                },
            ],
            passed: true,
        };

        RunReport {
            run_id: Uuid::new_v4(),
            name: "load".to_string(),
            started_at: Utc::now(),
            duration_secs: 12.5,
            seed: 42,
            stop_reason: StopReason::Completed,
            verdict: RunReport::verdict_for(&thresholds, StopReason::Completed),
            iterations: 17,
            interrupted: 0,
            vus_max: 3,
            aborted_by: None,
            thresholds,
            metrics: registry.snapshot_all(),
        }
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&report());

        assert!(text.contains("iterations 17, vus max 3, interrupted 0"));
        assert!(text.contains("http_req_duration p(95)<500 (observed 400.0000)"));
        assert!(text.contains("errors rate<0.1 (observed no data)"));
        assert!(text.contains("75.00%"));
        assert!(text.contains("med=250.00"));
        assert!(text.contains("PASS"));
    }

    #[test]
    fn test_render_json() {
        let json = render_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["verdict"], "PASS");
        assert_eq!(value["stop_reason"], "completed");
        assert_eq!(value["iterations"], 17);
        assert!(value.get("aborted_by").is_none());
        assert_eq!(value["thresholds"]["results"][1]["observed"], serde_json::Value::Null);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");

        write_json(&report(), &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"verdict\": \"PASS\""));
    }

    #[test]
    fn test_number() {
        assert_eq!(number(3.0), "3");
        assert_eq!(number(2.5), "2.50");
    }
}
