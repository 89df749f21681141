//! Evaluation reports
//!
//! Raw and point-adjusted metrics side by side, in text, JSON, Markdown or
//! CSV form.

use std::fmt::{self, Write};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::adjust::BoundaryPolicy;
use super::metrics::Evaluation;
use super::threshold::{ThresholdMethod, ThresholdSelection};
use crate::error::{Result, UsadError};

/// Caveat attached to every report
pub const ADJUSTMENT_NOTE: &str = "Adjusted metrics use point adjustment: a detection within the slack \
window of a true anomaly counts as correct. This inflates accuracy, precision, recall and F1 \
relative to the original threshold-based predictions.";

/// Report output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Markdown,
    Csv,
}

/// Window counts of the evaluated test set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSetSummary {
    /// Held-out normal windows (label 0)
    pub normal_windows: usize,
    /// Attack-capture windows
    pub attack_windows: usize,
    /// Windows labelled 1
    pub anomalous_windows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub generated_at: DateTime<Utc>,
    pub threshold: f32,
    pub method: ThresholdMethod,
    pub slack: usize,
    pub boundary: BoundaryPolicy,
    /// Area under the ROC curve of the raw scores
    pub score_auc: f64,
    pub test_set: TestSetSummary,
    /// Metrics of `score > threshold`
    pub original: Evaluation,
    /// Metrics after point adjustment
    pub adjusted: Evaluation,
    pub note: String,
}

impl EvaluationReport {
    pub fn new(
        selection: &ThresholdSelection,
        slack: usize,
        boundary: BoundaryPolicy,
        test_set: TestSetSummary,
        original: Evaluation,
        adjusted: Evaluation,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            threshold: selection.threshold,
            method: selection.method,
            slack,
            boundary,
            score_auc: selection.score_auc,
            test_set,
            original,
            adjusted,
            note: ADJUSTMENT_NOTE.to_string(),
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ReportFormat::Markdown => Ok(render_with(|out| self.write_markdown(out))),
            ReportFormat::Csv => Ok(render_with(|out| self.write_csv(out))),
            ReportFormat::Text => Ok(render_with(|out| self.write_text(out))),
        }
    }

    /// Render and write to `path`.
    pub fn save(&self, path: &Path, format: ReportFormat) -> Result<()> {
        let body = self.render(format)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| UsadError::file(parent, e))?;
        }
        fs::write(path, body).map_err(|e| UsadError::file(path, e))?;
        info!("Wrote {:?} report to {}", format, path.display());
        Ok(())
    }

    fn rows(&self) -> [(&'static str, &Evaluation); 2] {
        [("original", &self.original), ("adjusted", &self.adjusted)]
    }

    fn write_text(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "═══════════════════════════════════════════════════════════════")?;
        writeln!(out, "                   USAD EVALUATION REPORT")?;
        writeln!(out, "═══════════════════════════════════════════════════════════════")?;
        writeln!(out, "Generated: {}\n", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;

        writeln!(out, "THRESHOLD")?;
        writeln!(out, "───────────────────────────────────────────────────────────────")?;
        writeln!(out, "  Threshold:         {:.6} ({})", self.threshold, self.method)?;
        writeln!(out, "  Score AUC:         {:.4}", self.score_auc)?;
        writeln!(out, "  Slack:             {} ({})", self.slack, self.boundary)?;
        writeln!(
            out,
            "  Test windows:      {} normal + {} attack ({} anomalous)",
            self.test_set.normal_windows,
            self.test_set.attack_windows,
            self.test_set.anomalous_windows
        )?;
        writeln!(out)?;

        for (name, eval) in self.rows() {
            writeln!(out, "{}", name.to_uppercase())?;
            writeln!(out, "───────────────────────────────────────────────────────────────")?;
            writeln!(out, "  Accuracy:          {:.4}", eval.accuracy)?;
            writeln!(out, "  Precision:         {:.4}", eval.precision)?;
            writeln!(out, "  Recall:            {:.4}", eval.recall)?;
            writeln!(out, "  AUC:               {:.4}", eval.auc)?;
            writeln!(out, "  F1 Score:          {:.4}", eval.f1)?;
            let [[tn, fp], [fn_, tp]] = eval.confusion.counts();
            let [[tn_pct, fp_pct], [fn_pct, tp_pct]] = eval.confusion.percentages();
            writeln!(out, "  Confusion:         TN={} FP={} FN={} TP={}", tn, fp, fn_, tp)?;
            writeln!(
                out,
                "  Confusion (%):     TN={:.1} FP={:.1} FN={:.1} TP={:.1}",
                tn_pct, fp_pct, fn_pct, tp_pct
            )?;
            writeln!(out)?;
        }

        writeln!(out, "NOTE: {}", self.note)
    }

    fn write_markdown(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "# USAD Evaluation Report")?;
        writeln!(out, "Generated: {}\n", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;

        writeln!(out, "## Threshold\n")?;
        writeln!(out, "| Setting | Value |")?;
        writeln!(out, "|---------|-------|")?;
        writeln!(out, "| Threshold | {:.6} |", self.threshold)?;
        writeln!(out, "| Method | {} |", self.method)?;
        writeln!(out, "| Score AUC | {:.4} |", self.score_auc)?;
        writeln!(out, "| Slack | {} ({}) |", self.slack, self.boundary)?;
        writeln!(
            out,
            "| Test windows | {} normal + {} attack |",
            self.test_set.normal_windows, self.test_set.attack_windows
        )?;
        writeln!(out)?;

        writeln!(out, "## Metrics\n")?;
        writeln!(out, "| Predictions | Accuracy | Precision | Recall | AUC | F1 | TN | FP | FN | TP |")?;
        writeln!(out, "|-------------|----------|-----------|--------|-----|----|----|----|----|----|")?;
        for (name, eval) in self.rows() {
            let [[tn, fp], [fn_, tp]] = eval.confusion.counts();
            writeln!(
                out,
                "| {} | {:.4} | {:.4} | {:.4} | {:.4} | {:.4} | {} | {} | {} | {} |",
                name, eval.accuracy, eval.precision, eval.recall, eval.auc, eval.f1, tn, fp, fn_, tp
            )?;
        }
        writeln!(out)?;
        writeln!(out, "> {}", self.note)
    }

    fn write_csv(&self, out: &mut String) -> fmt::Result {
        writeln!(
            out,
            "predictions,threshold,method,slack,accuracy,precision,recall,auc,f1,tn,fp,fn,tp"
        )?;
        for (name, eval) in self.rows() {
            let [[tn, fp], [fn_, tp]] = eval.confusion.counts();
            writeln!(
                out,
                "{},{},{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{},{},{},{}",
                name,
                self.threshold,
                self.method,
                self.slack,
                eval.accuracy,
                eval.precision,
                eval.recall,
                eval.auc,
                eval.f1,
                tn,
                fp,
                fn_,
                tp
            )?;
        }
        Ok(())
    }
}

fn render_with(write: impl FnOnce(&mut String) -> fmt::Result) -> String {
    let mut out = String::new();
    // fmt::Write for String never fails
    let _ = write(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::threshold::select_threshold;
    use tempfile::TempDir;

    fn report() -> EvaluationReport {
        let scores = [0.1, 0.2, 0.3, 0.9, 0.8, 0.25];
        let labels = [0, 0, 0, 1, 1, 1];
        let selection = select_threshold(&scores, &labels, ThresholdMethod::Youden).unwrap();
        let predictions = crate::evaluation::threshold::predict(&scores, selection.threshold);
        let original = Evaluation::compute(&labels, &predictions).unwrap();
        let adjusted = Evaluation::compute(&labels, &labels).unwrap();
        let test_set = TestSetSummary {
            normal_windows: 3,
            attack_windows: 3,
            anomalous_windows: 3,
        };
        EvaluationReport::new(&selection, 5, BoundaryPolicy::Clip, test_set, original, adjusted)
    }

    #[test]
    fn test_text_report_shows_both_and_note() {
        let text = report().render(ReportFormat::Text).unwrap();
        assert!(text.contains("ORIGINAL"));
        assert!(text.contains("ADJUSTED"));
        assert!(text.contains("point adjustment"));
    }

    #[test]
    fn test_json_report_round_trips() {
        let report = report();
        let json = report.render(ReportFormat::Json).unwrap();
        let parsed: EvaluationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.original, report.original);
        assert_eq!(parsed.adjusted, report.adjusted);
        assert_eq!(parsed.method, ThresholdMethod::Youden);
        assert!(json.contains("\"youden\""));
    }

    #[test]
    fn test_csv_has_two_rows() {
        let csv = report().render(ReportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("original,"));
        assert!(lines[2].starts_with("adjusted,"));
    }

    #[test]
    fn test_markdown_contains_note() {
        let md = report().render(ReportFormat::Markdown).unwrap();
        assert!(md.starts_with("# USAD Evaluation Report"));
        assert!(md.contains(ADJUSTMENT_NOTE));
    }

    #[test]
    fn test_save_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("eval.md");
        report().save(&path, ReportFormat::Markdown).unwrap();
        assert!(path.exists());
    }
}
