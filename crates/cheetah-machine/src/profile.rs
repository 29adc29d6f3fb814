use std::fs;
use std::path::{Path, PathBuf};

use cheetah_core::errors::{CampError, ErrorInfo};
use cheetah_core::hash::stable_hash_string;
use cheetah_core::serde::from_yaml_slice;
use serde::{Deserialize, Serialize};

use crate::launcher::LauncherSpec;
use crate::scheduler::{SchedulerAdapter, SchedulerKind};

fn config_error(code: &str, message: impl Into<String>, machine: &str) -> CampError {
    CampError::Configuration(ErrorInfo::new(code, message).with_context("machine", machine))
}

/// Batch defaults applied when the experiment does not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefaults {
    /// Default queue or partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Default project or allocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Default walltime in seconds.
    #[serde(default = "JobDefaults::default_walltime")]
    pub walltime: u64,
}

impl JobDefaults {
    fn default_walltime() -> u64 {
        3600
    }
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            queue: None,
            account: None,
            walltime: Self::default_walltime(),
        }
    }
}

/// Run directory naming and input placement conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConventions {
    /// Prefix of every run directory name.
    #[serde(default = "FilesystemConventions::default_run_prefix")]
    pub run_prefix: String,
    /// Minimum number of digits in the run index.
    #[serde(default = "FilesystemConventions::default_pad_width")]
    pub pad_width: usize,
    /// Root prepended to relative campaign roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<PathBuf>,
    /// Symlink inputs instead of copying them when the input leaves the mode open.
    #[serde(default)]
    pub link_inputs: bool,
}

impl FilesystemConventions {
    fn default_run_prefix() -> String {
        "run-".to_string()
    }

    fn default_pad_width() -> usize {
        3
    }
}

impl Default for FilesystemConventions {
    fn default() -> Self {
        Self {
            run_prefix: Self::default_run_prefix(),
            pad_width: Self::default_pad_width(),
            scratch_root: None,
            link_inputs: false,
        }
    }
}

/// Description of one target machine: scheduler, launcher and conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineProfile {
    /// Machine name.
    pub name: String,
    /// Batch scheduler family.
    pub scheduler: SchedulerKind,
    /// Processes that fit on one node.
    pub processes_per_node: u32,
    /// MPI launcher; components run bare when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher: Option<LauncherSpec>,
    /// Batch defaults.
    #[serde(default)]
    pub defaults: JobDefaults,
    /// Directive bodies appended after the generated ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_directives: Vec<String>,
    /// Shell lines emitted before any launch (module loads, exports).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submit_env: Vec<String>,
    /// Filesystem conventions.
    #[serde(default)]
    pub filesystem: FilesystemConventions,
}

impl MachineProfile {
    /// Profile for a machine without a batch system or launcher.
    pub fn new(name: impl Into<String>, scheduler: SchedulerKind, processes_per_node: u32) -> Self {
        Self {
            name: name.into(),
            scheduler,
            processes_per_node,
            launcher: None,
            defaults: JobDefaults::default(),
            extra_directives: Vec::new(),
            submit_env: Vec::new(),
            filesystem: FilesystemConventions::default(),
        }
    }

    /// Sets the MPI launcher.
    pub fn with_launcher(mut self, launcher: LauncherSpec) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Checks internal consistency of the profile.
    pub fn validate(&self) -> Result<(), CampError> {
        if self.name.trim().is_empty() {
            return Err(config_error("machine.name", "machine name must not be empty", ""));
        }
        if self.processes_per_node == 0 {
            return Err(config_error(
                "machine.processes-per-node",
                "processes_per_node must be positive",
                &self.name,
            ));
        }
        if self.defaults.walltime == 0 {
            return Err(config_error(
                "machine.walltime",
                "default walltime must be positive",
                &self.name,
            ));
        }
        let prefix = &self.filesystem.run_prefix;
        if prefix.is_empty() || prefix.contains(['/', '\\']) {
            return Err(config_error(
                "machine.run-prefix",
                "run prefix must be a non-empty file name fragment",
                &self.name,
            )
            .with_context("run_prefix", prefix.as_str()));
        }
        if let Some(launcher) = &self.launcher {
            if launcher.exe.trim().is_empty() || launcher.nprocs_flag.trim().is_empty() {
                return Err(config_error(
                    "machine.launcher",
                    "launcher needs an executable and a process-count flag",
                    &self.name,
                ));
            }
        }
        if self.scheduler == SchedulerKind::None && !self.extra_directives.is_empty() {
            return Err(config_error(
                "machine.extra-directives",
                "extra directives require a batch scheduler",
                &self.name,
            )
            .with_hint("remove extra_directives or select pbs, cobalt or slurm"));
        }
        Ok(())
    }

    /// Adapter for this profile's scheduler.
    pub fn adapter(&self) -> &'static dyn SchedulerAdapter {
        self.scheduler.adapter()
    }

    /// Parses and validates a profile from YAML bytes.
    pub fn from_yaml_slice(bytes: &[u8]) -> Result<Self, CampError> {
        let profile: MachineProfile = from_yaml_slice(bytes).map_err(|err| {
            CampError::Configuration(ErrorInfo::new(
                "machine.parse",
                err.info().message.clone(),
            ))
        })?;
        profile.validate()?;
        Ok(profile)
    }

    /// One of the built-in profiles (`local`, `titan`, `theta`, `cori`).
    pub fn builtin(name: &str) -> Result<Self, CampError> {
        crate::builtin::builtin_profile(name)
    }

    /// Deterministic hash of the profile.
    pub fn machine_hash(&self) -> Result<String, CampError> {
        stable_hash_string(self)
    }

    /// Campaign root after applying the scratch root to relative paths.
    pub fn resolve_root(&self, root: &Path) -> PathBuf {
        match &self.filesystem.scratch_root {
            Some(scratch) if root.is_relative() => scratch.join(root),
            _ => root.to_path_buf(),
        }
    }

    /// Digits used for run indices in a campaign of `run_count` runs.
    pub fn pad_width_for(&self, run_count: usize) -> usize {
        let largest = run_count.saturating_sub(1);
        let digits = largest.checked_ilog10().map_or(1, |log| log as usize + 1);
        digits.max(self.filesystem.pad_width)
    }

    /// Directory name of run `index`, zero padded to `width` digits.
    pub fn run_dir_name(&self, index: usize, width: usize) -> String {
        format!("{}{:0width$}", self.filesystem.run_prefix, index, width = width)
    }
}

/// Loads and validates a machine profile from a YAML file.
pub fn load_machine<P: AsRef<Path>>(path: P) -> Result<MachineProfile, CampError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|err| CampError::io("machine_read", path, err))?;
    MachineProfile::from_yaml_slice(&bytes)
        .map_err(|err| err.with_context("path", path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_dir_names_pad_to_the_wider_of_profile_and_count() {
        let profile = MachineProfile::new("local", SchedulerKind::None, 8);
        assert_eq!(profile.pad_width_for(4), 3);
        assert_eq!(profile.pad_width_for(1000), 3);
        assert_eq!(profile.pad_width_for(1001), 4);
        assert_eq!(profile.run_dir_name(7, 3), "run-007");
        assert_eq!(profile.run_dir_name(1234, 3), "run-1234");
    }

    #[test]
    fn extra_directives_need_a_scheduler() {
        let mut profile = MachineProfile::new("local", SchedulerKind::None, 8);
        profile.extra_directives.push("-l gres=x".into());
        let err = profile.validate().expect_err("no scheduler");
        assert!(matches!(err, CampError::Configuration(_)));
        assert_eq!(err.info().code, "machine.extra-directives");
        assert!(err.info().hint.as_deref().is_some_and(|hint| hint.contains("slurm")));
    }

    #[test]
    fn scratch_root_applies_to_relative_roots_only() {
        let mut profile = MachineProfile::new("hpc", SchedulerKind::Slurm, 32);
        profile.filesystem.scratch_root = Some(PathBuf::from("/scratch/me"));
        assert_eq!(
            profile.resolve_root(Path::new("study")),
            PathBuf::from("/scratch/me/study")
        );
        assert_eq!(profile.resolve_root(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn yaml_with_unknown_scheduler_is_configuration_error() {
        let yaml = b"name: x\nscheduler: lsf\nprocesses_per_node: 4\n";
        let err = MachineProfile::from_yaml_slice(yaml).expect_err("lsf");
        assert!(err.is_fatal());
        assert!(matches!(err, CampError::Configuration(_)));
    }

    #[test]
    fn zero_processes_per_node_is_rejected() {
        let profile = MachineProfile::new("x", SchedulerKind::Pbs, 0);
        assert_eq!(
            profile.validate().expect_err("ppn").info().code,
            "machine.processes-per-node"
        );
    }
}
