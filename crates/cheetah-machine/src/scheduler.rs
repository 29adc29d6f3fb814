use std::fmt;
use std::str::FromStr;

use cheetah_core::errors::{CampError, ErrorInfo};
use serde::{Deserialize, Serialize};

/// Batch scheduler families understood by the composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SchedulerKind {
    /// No batch system; scripts are executed directly.
    None,
    /// PBS / Torque.
    Pbs,
    /// Cobalt (ALCF).
    Cobalt,
    /// SLURM.
    Slurm,
}

impl SchedulerKind {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::None => "none",
            SchedulerKind::Pbs => "pbs",
            SchedulerKind::Cobalt => "cobalt",
            SchedulerKind::Slurm => "slurm",
        }
    }

    /// The adapter implementing this scheduler's script syntax.
    pub fn adapter(&self) -> &'static dyn SchedulerAdapter {
        match self {
            SchedulerKind::None => &DirectAdapter,
            SchedulerKind::Pbs => &PbsAdapter,
            SchedulerKind::Cobalt => &CobaltAdapter,
            SchedulerKind::Slurm => &SlurmAdapter,
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerKind {
    type Err = CampError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "local" => Ok(SchedulerKind::None),
            "pbs" | "torque" => Ok(SchedulerKind::Pbs),
            "cobalt" => Ok(SchedulerKind::Cobalt),
            "slurm" => Ok(SchedulerKind::Slurm),
            other => Err(CampError::Configuration(
                ErrorInfo::new("machine.unknown-scheduler", "unsupported scheduler kind")
                    .with_context("scheduler", other)
                    .with_hint("expected one of none, pbs, cobalt, slurm"),
            )),
        }
    }
}

impl TryFrom<String> for SchedulerKind {
    type Error = CampError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchedulerKind> for String {
    fn from(kind: SchedulerKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Abstract batch job request for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Job name shown by the scheduler.
    pub name: String,
    /// Nodes reserved for the job.
    pub nodes: u32,
    /// Walltime in seconds.
    pub walltime: u64,
    /// Queue or partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Project or allocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Scheduler stdout file, relative to the run directory.
    pub stdout: String,
    /// Scheduler stderr file, relative to the run directory.
    pub stderr: String,
}

/// Translation from a [`JobRequest`] to one scheduler's directive syntax.
pub trait SchedulerAdapter: Send + Sync {
    /// Scheduler family implemented by this adapter.
    fn kind(&self) -> SchedulerKind;

    /// Comment prefix marking a directive line, if the scheduler has one.
    fn directive_prefix(&self) -> Option<&'static str>;

    /// Directive bodies (without prefix) for the job.
    fn directive_bodies(&self, job: &JobRequest) -> Vec<String>;

    /// Command used to submit a job script.
    fn submit_command(&self) -> &'static str;

    /// Environment variable holding the job id inside the job.
    fn job_id_var(&self) -> Option<&'static str>;

    /// Complete directive lines: the job's directives followed by `extra`
    /// bodies, all under this scheduler's prefix.
    fn directives(&self, job: &JobRequest, extra: &[String]) -> Vec<String> {
        let Some(prefix) = self.directive_prefix() else {
            return Vec::new();
        };
        self.directive_bodies(job)
            .iter()
            .chain(extra)
            .map(|body| format!("{prefix} {body}"))
            .collect()
    }
}

/// Formats seconds as `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_walltime(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Direct execution without batch directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAdapter;

impl SchedulerAdapter for DirectAdapter {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::None
    }

    fn directive_prefix(&self) -> Option<&'static str> {
        None
    }

    fn directive_bodies(&self, _job: &JobRequest) -> Vec<String> {
        Vec::new()
    }

    fn submit_command(&self) -> &'static str {
        "bash"
    }

    fn job_id_var(&self) -> Option<&'static str> {
        None
    }
}

/// PBS / Torque `#PBS` directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct PbsAdapter;

impl SchedulerAdapter for PbsAdapter {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Pbs
    }

    fn directive_prefix(&self) -> Option<&'static str> {
        Some("#PBS")
    }

    fn directive_bodies(&self, job: &JobRequest) -> Vec<String> {
        let mut lines = vec![format!("-N {}", job.name)];
        if let Some(account) = &job.account {
            lines.push(format!("-A {account}"));
        }
        if let Some(queue) = &job.queue {
            lines.push(format!("-q {queue}"));
        }
        lines.push(format!("-l nodes={}", job.nodes));
        lines.push(format!("-l walltime={}", format_walltime(job.walltime)));
        lines.push(format!("-o {}", job.stdout));
        lines.push(format!("-e {}", job.stderr));
        lines
    }

    fn submit_command(&self) -> &'static str {
        "qsub"
    }

    fn job_id_var(&self) -> Option<&'static str> {
        Some("PBS_JOBID")
    }
}

/// Cobalt `#COBALT` directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct CobaltAdapter;

impl SchedulerAdapter for CobaltAdapter {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Cobalt
    }

    fn directive_prefix(&self) -> Option<&'static str> {
        Some("#COBALT")
    }

    fn directive_bodies(&self, job: &JobRequest) -> Vec<String> {
        let mut lines = vec![format!("--jobname {}", job.name)];
        if let Some(account) = &job.account {
            lines.push(format!("-A {account}"));
        }
        if let Some(queue) = &job.queue {
            lines.push(format!("-q {queue}"));
        }
        lines.push(format!("-n {}", job.nodes));
        lines.push(format!("-t {}", format_walltime(job.walltime)));
        lines.push(format!("-o {}", job.stdout));
        lines.push(format!("-e {}", job.stderr));
        lines
    }

    fn submit_command(&self) -> &'static str {
        "qsub"
    }

    fn job_id_var(&self) -> Option<&'static str> {
        Some("COBALT_JOBID")
    }
}

/// SLURM `#SBATCH` directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlurmAdapter;

impl SchedulerAdapter for SlurmAdapter {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Slurm
    }

    fn directive_prefix(&self) -> Option<&'static str> {
        Some("#SBATCH")
    }

    fn directive_bodies(&self, job: &JobRequest) -> Vec<String> {
        let mut lines = vec![format!("--job-name={}", job.name)];
        if let Some(account) = &job.account {
            lines.push(format!("--account={account}"));
        }
        if let Some(queue) = &job.queue {
            lines.push(format!("--partition={queue}"));
        }
        lines.push(format!("--nodes={}", job.nodes));
        lines.push(format!("--time={}", format_walltime(job.walltime)));
        lines.push(format!("--output={}", job.stdout));
        lines.push(format!("--error={}", job.stderr));
        lines
    }

    fn submit_command(&self) -> &'static str {
        "sbatch"
    }

    fn job_id_var(&self) -> Option<&'static str> {
        Some("SLURM_JOB_ID")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobRequest {
        JobRequest {
            name: "heat-run-003".into(),
            nodes: 4,
            walltime: 5400,
            queue: Some("debug".into()),
            account: Some("csc143".into()),
            stdout: "cheetah.job.stdout".into(),
            stderr: "cheetah.job.stderr".into(),
        }
    }

    #[test]
    fn walltime_is_hours_minutes_seconds() {
        assert_eq!(format_walltime(5400), "01:30:00");
        assert_eq!(format_walltime(59), "00:00:59");
        assert_eq!(format_walltime(100 * 3600 + 61), "100:01:01");
    }

    #[test]
    fn pbs_directives() {
        let lines = SchedulerKind::Pbs
            .adapter()
            .directives(&job(), &["-l gres=atlas1".to_string()]);
        assert_eq!(
            lines,
            vec![
                "#PBS -N heat-run-003",
                "#PBS -A csc143",
                "#PBS -q debug",
                "#PBS -l nodes=4",
                "#PBS -l walltime=01:30:00",
                "#PBS -o cheetah.job.stdout",
                "#PBS -e cheetah.job.stderr",
                "#PBS -l gres=atlas1",
            ]
        );
    }

    #[test]
    fn cobalt_and_slurm_use_their_own_syntax() {
        let cobalt = SchedulerKind::Cobalt.adapter().directives(&job(), &[]);
        assert!(cobalt.contains(&"#COBALT -n 4".to_string()));
        assert!(cobalt.contains(&"#COBALT -t 01:30:00".to_string()));

        let slurm = SchedulerKind::Slurm.adapter().directives(&job(), &[]);
        assert!(slurm.contains(&"#SBATCH --nodes=4".to_string()));
        assert!(slurm.contains(&"#SBATCH --partition=debug".to_string()));
        assert!(slurm.contains(&"#SBATCH --time=01:30:00".to_string()));
        assert_eq!(SchedulerKind::Slurm.adapter().submit_command(), "sbatch");
    }

    #[test]
    fn direct_adapter_has_no_directives() {
        let adapter = SchedulerKind::None.adapter();
        assert!(adapter.directives(&job(), &["ignored".to_string()]).is_empty());
        assert_eq!(adapter.kind(), SchedulerKind::None);
    }

    #[test]
    fn unknown_kind_is_configuration_error() {
        let err = "lsf".parse::<SchedulerKind>().expect_err("lsf");
        assert!(err.is_fatal());
        assert_eq!(err.info().code, "machine.unknown-scheduler");
        assert_eq!("Torque".parse::<SchedulerKind>().expect("torque"), SchedulerKind::Pbs);
    }
}
