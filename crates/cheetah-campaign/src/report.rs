//! Campaign outcome: per-run status, the campaign marker, CSV summary and `submit-all.sh`.

use std::fmt::Write as _;
use std::path::PathBuf;

use cheetah_core::errors::{CampError, ErrorInfo};
use cheetah_core::provenance::{CampaignProvenance, SchemaVersion, MANIFEST_SCHEMA};
use cheetah_machine::SchedulerAdapter;
use cheetah_spec::RunBindings;
use serde::{Deserialize, Serialize};

use crate::manifest::SCRIPT_FILE;
use crate::render::shell_quote;

/// Campaign marker file at the campaign root.
pub const CAMPAIGN_FILE: &str = "cheetah.campaign.json";
/// Campaign report file at the campaign root.
pub const REPORT_FILE: &str = "cheetah.report.json";
/// CSV summary at the campaign root.
pub const SUMMARY_FILE: &str = "cheetah.summary.csv";
/// Script submitting every materialized run.
pub const SUBMIT_ALL_FILE: &str = "submit-all.sh";

/// Lifecycle stage of a run inside the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStage {
    /// Templates and resources are being resolved.
    Rendering,
    /// Directories, inputs and manifest are on disk.
    Materialized,
    /// `submit.sh` is on disk.
    Scripted,
    /// Every step succeeded.
    Done,
}

/// Final status of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum RunStatus {
    /// Rendered, materialized and scripted.
    Done,
    /// Stopped while moving into `stage`.
    Failed {
        /// Stage that could not be reached.
        stage: RunStage,
        /// Cause of the failure.
        error: CampError,
    },
    /// Skipped after the failure threshold was reached.
    Cancelled,
}

impl RunStatus {
    /// Short label used in the CSV summary.
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Done => "done",
            RunStatus::Failed { .. } => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run ordinal.
    pub index: usize,
    /// Run directory name.
    pub run_dir: String,
    /// Parameter bindings.
    pub bindings: RunBindings,
    /// Final status.
    pub status: RunStatus,
    /// Nodes requested, once rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    /// Files and links created.
    #[serde(default)]
    pub files_written: usize,
    /// Files already present with identical content.
    #[serde(default)]
    pub files_unchanged: usize,
    /// Generated script, kept for dry runs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl RunReport {
    /// Report for a run that was never started.
    pub fn cancelled(index: usize, run_dir: String, bindings: RunBindings) -> Self {
        Self {
            index,
            run_dir,
            bindings,
            status: RunStatus::Cancelled,
            nodes: None,
            files_written: 0,
            files_unchanged: 0,
            script: None,
        }
    }

    /// True when the run completed.
    pub fn is_done(&self) -> bool {
        matches!(self.status, RunStatus::Done)
    }
}

/// Marker written at the campaign root identifying what produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignMarker {
    /// Schema of campaign artefacts.
    pub schema: SchemaVersion,
    /// Campaign name.
    pub campaign: String,
    /// Machine name.
    pub machine: String,
    /// Scheduler of the machine.
    pub scheduler: String,
    /// Runs after exclusions.
    pub run_count: usize,
    /// Hashes and timestamp.
    pub provenance: CampaignProvenance,
}

/// Result of compiling a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignReport {
    /// Schema of the report.
    pub schema: SchemaVersion,
    /// Campaign name.
    pub campaign: String,
    /// Machine name.
    pub machine: String,
    /// Absolute campaign root.
    pub root: PathBuf,
    /// Whether the campaign was compiled without touching the filesystem.
    pub dry_run: bool,
    /// Runs that completed.
    pub done: usize,
    /// Runs that failed.
    pub failed: usize,
    /// Runs skipped after the failure threshold.
    pub cancelled: usize,
    /// Per-run outcomes ordered by index.
    pub runs: Vec<RunReport>,
    /// Hashes and timestamp.
    pub provenance: CampaignProvenance,
}

impl CampaignReport {
    /// Builds a report from run outcomes; `runs` must be sorted by index.
    pub fn new(
        campaign: &str,
        machine: &str,
        root: PathBuf,
        dry_run: bool,
        runs: Vec<RunReport>,
        provenance: CampaignProvenance,
    ) -> Self {
        let count = |label: &str| {
            runs.iter()
                .filter(|run| run.status.label() == label)
                .count()
        };
        Self {
            schema: MANIFEST_SCHEMA,
            campaign: campaign.to_string(),
            machine: machine.to_string(),
            root,
            dry_run,
            done: count("done"),
            failed: count("failed"),
            cancelled: count("cancelled"),
            runs,
            provenance,
        }
    }

    /// Total runs considered.
    pub fn total(&self) -> usize {
        self.runs.len()
    }

    /// Failed runs as `(index, error)` pairs.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &CampError)> {
        self.runs.iter().filter_map(|run| match &run.status {
            RunStatus::Failed { error, .. } => Some((run.index, error)),
            _ => None,
        })
    }

    /// Process exit code: 0 when every run is done, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 && self.cancelled == 0 {
            0
        } else {
            1
        }
    }

    /// CSV summary: one row per run with status and parameter columns.
    pub fn summary_csv(&self) -> Result<Vec<u8>, CampError> {
        let csv_error =
            |err: csv::Error| CampError::Serde(ErrorInfo::new("summary_csv", err.to_string()));
        let params: Vec<String> = self
            .runs
            .first()
            .map(|run| run.bindings.iter().map(|(name, _)| name.to_string()).collect())
            .unwrap_or_default();
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![
            "run_index".to_string(),
            "run_dir".to_string(),
            "status".to_string(),
            "failed_stage".to_string(),
            "error_code".to_string(),
            "nodes".to_string(),
        ];
        header.extend(params.iter().cloned());
        writer.write_record(&header).map_err(csv_error)?;
        for run in &self.runs {
            let (stage, code) = match &run.status {
                RunStatus::Failed { stage, error } => {
                    (format!("{stage:?}").to_lowercase(), error.info().code.clone())
                }
                _ => (String::new(), String::new()),
            };
            let mut record = vec![
                run.index.to_string(),
                run.run_dir.clone(),
                run.status.label().to_string(),
                stage,
                code,
                run.nodes.map(|nodes| nodes.to_string()).unwrap_or_default(),
            ];
            record.extend(params.iter().map(|name| {
                run.bindings
                    .get(name)
                    .map(ToString::to_string)
                    .unwrap_or_default()
            }));
            writer.write_record(&record).map_err(csv_error)?;
        }
        writer.into_inner().map_err(|err| {
            CampError::Serde(ErrorInfo::new("summary_csv", err.to_string()))
        })
    }

    /// Shell script submitting every completed run with the scheduler's submit command.
    pub fn submit_all_script(&self, adapter: &dyn SchedulerAdapter) -> String {
        let mut out = String::from("#!/bin/bash\n");
        let _ = writeln!(
            out,
            "# submit {} of {} runs of {}",
            self.done,
            self.total(),
            self.campaign
        );
        out.push_str("cd \"$(dirname \"$0\")\" || exit 1\n");
        for run in self.runs.iter().filter(|run| run.is_done()) {
            let _ = writeln!(
                out,
                "(cd {} && {} {})",
                shell_quote(&run.run_dir),
                adapter.submit_command(),
                SCRIPT_FILE
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cheetah_machine::SchedulerKind;
    use cheetah_spec::Scalar;

    fn bindings(size: i64) -> RunBindings {
        [("size", Scalar::Int(size))].into_iter().collect()
    }

    fn report() -> CampaignReport {
        let mut runs = vec![
            RunReport::cancelled(0, "run-000".into(), bindings(10)),
            RunReport::cancelled(1, "run-001".into(), bindings(20)),
            RunReport::cancelled(2, "run-002".into(), bindings(30)),
        ];
        runs[0].status = RunStatus::Done;
        runs[0].nodes = Some(2);
        runs[1].status = RunStatus::Failed {
            stage: RunStage::Materialized,
            error: CampError::Io(ErrorInfo::new("input_missing", "no such file")),
        };
        CampaignReport::new(
            "heat",
            "titan",
            PathBuf::from("/camp"),
            false,
            runs,
            CampaignProvenance::default(),
        )
    }

    #[test]
    fn counts_and_exit_code() {
        let report = report();
        assert_eq!((report.done, report.failed, report.cancelled), (1, 1, 1));
        assert_eq!(report.exit_code(), 1);
        let failures: Vec<usize> = report.failures().map(|(index, _)| index).collect();
        assert_eq!(failures, vec![1]);
    }

    #[test]
    fn csv_lists_every_run_with_parameters() {
        let csv = String::from_utf8(report().summary_csv().expect("csv")).expect("utf8");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "run_index,run_dir,status,failed_stage,error_code,nodes,size");
        assert_eq!(lines[1], "0,run-000,done,,,2,10");
        assert_eq!(lines[2], "1,run-001,failed,materialized,input_missing,,20");
        assert_eq!(lines[3], "2,run-002,cancelled,,,,30");
    }

    #[test]
    fn submit_all_only_lists_completed_runs() {
        let script = report().submit_all_script(SchedulerKind::Pbs.adapter());
        assert!(script.contains("(cd run-000 && qsub submit.sh)\n"));
        assert!(!script.contains("run-001"));
    }

    #[test]
    fn failed_status_serializes_with_family() {
        let json = serde_json::to_value(&report().runs[1].status).expect("json");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["stage"], "materialized");
        assert_eq!(json["error"]["family"], "Io");
    }
}
