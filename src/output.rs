use std::io::{self, Write};

use serde::Serialize;

use crate::coordinator::{RunOutcome, RunReport};
use crate::watermark::CommitOutcome;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Serialize)]
struct ReportView<'a> {
    #[serde(flatten)]
    outcome: &'a RunOutcome,
    watermark: Option<&'a CommitOutcome>,
    watermark_error: Option<String>,
}

pub struct ReportOutput;

impl ReportOutput {
    pub fn print(report: &RunReport, mode: OutputMode) -> io::Result<()> {
        match mode {
            OutputMode::Json => Self::print_json(report),
            OutputMode::Human => Self::print_summary(report),
        }
    }

    fn print_json(report: &RunReport) -> io::Result<()> {
        let view = ReportView {
            outcome: &report.outcome,
            watermark: report.commit.as_ref().ok(),
            watermark_error: report.commit.as_ref().err().map(|err| err.to_string()),
        };
        let json = serde_json::to_string_pretty(&view).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }

    fn print_summary(report: &RunReport) -> io::Result<()> {
        let outcome = &report.outcome;
        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "downloaded {}, already on disk {}, skipped {}, failed {}",
            outcome.completed, outcome.already_present, outcome.skipped, outcome.failed
        )?;
        let watermark = match &report.commit {
            Ok(CommitOutcome::Advanced { to, .. }) => format!("advanced to {to}"),
            Ok(CommitOutcome::Unchanged { watermark: Some(w) }) => format!("unchanged at {w}"),
            Ok(CommitOutcome::Unchanged { watermark: None }) => "not recorded".to_string(),
            Ok(CommitOutcome::RolledBack { .. }) => "not updated (run incomplete)".to_string(),
            Ok(CommitOutcome::Untracked) => "not tracked".to_string(),
            Err(err) => format!("error: {err}"),
        };
        writeln!(stdout, "watermark {watermark}")?;
        Ok(())
    }
}
