//! Per-run JSON artefacts: the parameter manifest and the executor pipeline description.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cheetah_core::errors::{CampError, ErrorInfo};
use cheetah_core::provenance::{SchemaVersion, MANIFEST_SCHEMA};
use cheetah_core::serde::from_json_slice;
use cheetah_machine::NodeLayout;
use cheetah_spec::RunBindings;
use serde::{Deserialize, Serialize};

use crate::render::RenderedRun;

/// Manifest file name inside every run directory.
pub const MANIFEST_FILE: &str = "cheetah.run-params.json";
/// Pipeline description file name inside every run directory.
pub const PIPELINE_FILE: &str = "cheetah.pipeline.json";
/// Submission script file name inside every run directory.
pub const SCRIPT_FILE: &str = "submit.sh";

/// Resolved launch summary of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentManifest {
    /// Component name.
    pub name: String,
    /// Working directory relative to the run directory.
    pub workdir: PathBuf,
    /// Full argv including the launcher.
    pub command: Vec<String>,
    /// Process placement.
    pub layout: NodeLayout,
    /// Threads per process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
}

/// Parameters and resolved layout of one run, written as `cheetah.run-params.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Manifest schema version.
    pub schema: SchemaVersion,
    /// Campaign name.
    pub campaign: String,
    /// Run ordinal.
    pub run_index: usize,
    /// Run directory name.
    pub run_dir: String,
    /// Parameter bindings of the run.
    pub bindings: RunBindings,
    /// Components of the run.
    pub components: Vec<ComponentManifest>,
    /// Nodes requested for the run.
    pub nodes: u32,
    /// Hash of the experiment that produced the run.
    pub spec_hash: String,
}

impl RunManifest {
    /// Builds the manifest of a rendered run.
    pub fn from_rendered(campaign: &str, spec_hash: &str, run: &RenderedRun) -> Self {
        Self {
            schema: MANIFEST_SCHEMA,
            campaign: campaign.to_string(),
            run_index: run.index,
            run_dir: run.dir_name.clone(),
            bindings: run.bindings.clone(),
            components: run
                .components
                .iter()
                .map(|component| ComponentManifest {
                    name: component.name.clone(),
                    workdir: component.workdir.clone(),
                    command: component.command.clone(),
                    layout: component.resources.layout,
                    threads: component.resources.threads,
                })
                .collect(),
            nodes: run.job.nodes,
            spec_hash: spec_hash.to_string(),
        }
    }
}

/// Reads the manifest of the run directory `run_dir`.
pub fn read_manifest(run_dir: &Path) -> Result<RunManifest, CampError> {
    let path = run_dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|err| CampError::io("manifest_read", &path, err))?;
    let manifest: RunManifest = from_json_slice(&bytes)?;
    if manifest.schema.major != MANIFEST_SCHEMA.major {
        return Err(CampError::Serde(
            ErrorInfo::new("manifest.schema", "unsupported manifest schema")
                .with_path(&path)
                .with_context("major", manifest.schema.major.to_string()),
        ));
    }
    Ok(manifest)
}

/// One component as the workflow executor sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Component name.
    pub name: String,
    /// Launcher or executable.
    pub exe: String,
    /// Remaining argv.
    pub args: Vec<String>,
    /// Environment for the process.
    pub env: BTreeMap<String, String>,
    /// Working directory relative to the pipeline working directory.
    pub working_dir: PathBuf,
    /// Total processes.
    pub nprocs: u32,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Pause after launch in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_after: Option<u64>,
    /// Stdout file.
    pub stdout_path: String,
    /// Stderr file.
    pub stderr_path: String,
    /// Exit code file.
    pub return_path: String,
}

/// Executor description of one run, written as `cheetah.pipeline.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDescription {
    /// Pipeline identifier (the run directory name).
    pub id: String,
    /// Absolute run directory.
    pub working_dir: PathBuf,
    /// Components in launch order.
    pub runs: Vec<PipelineRun>,
    /// Kill the remaining components when one fails.
    pub kill_on_partial_failure: bool,
    /// Post-processing script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_process_script: Option<String>,
    /// Post-processing arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_process_args: Vec<String>,
    /// Skip post-processing when a component failed.
    pub post_process_stop_on_failure: bool,
    /// Nodes requested for the run.
    pub total_nodes: u32,
}

impl PipelineDescription {
    /// Builds the executor description of a rendered run.
    pub fn from_rendered(run: &RenderedRun, kill_on_partial_failure: bool) -> Self {
        let runs = run
            .stages
            .iter()
            .flatten()
            .filter_map(|&idx| run.components.get(idx))
            .map(|component| {
                let (exe, args) = match component.command.split_first() {
                    Some((exe, args)) => (exe.clone(), args.to_vec()),
                    None => (component.exe.clone(), Vec::new()),
                };
                PipelineRun {
                    name: component.name.clone(),
                    exe,
                    args,
                    env: component.env.clone(),
                    working_dir: component.workdir.clone(),
                    nprocs: component.resources.layout.nprocs,
                    timeout: component.timeout,
                    sleep_after: component.sleep_after,
                    stdout_path: component.stdout_file(),
                    stderr_path: component.stderr_file(),
                    return_path: component.return_file(),
                }
            })
            .collect();
        let (script, args, stop) = match &run.post_process {
            Some(post) => match post.command.split_first() {
                Some((script, args)) => (Some(script.clone()), args.to_vec(), post.stop_on_failure),
                None => (None, Vec::new(), post.stop_on_failure),
            },
            None => (None, Vec::new(), false),
        };
        Self {
            id: run.dir_name.clone(),
            working_dir: run.dir.clone(),
            runs,
            kill_on_partial_failure,
            post_process_script: script,
            post_process_args: args,
            post_process_stop_on_failure: stop,
            total_nodes: run.job.nodes,
        }
    }
}
