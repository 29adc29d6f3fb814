use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use cheetah_core::errors::{CampError, ErrorInfo};
use cheetah_core::provenance::{now_rfc3339, CampaignProvenance, MANIFEST_SCHEMA};
use cheetah_core::serde::to_canonical_json_pretty;
use cheetah_machine::{load_machine, MachineProfile};
use cheetah_spec::{load_experiment, ExperimentSpec, Run};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::manifest::{PipelineDescription, RunManifest};
use crate::materialize::{materialize_run, write_checked, write_script};
use crate::render::Renderer;
use crate::report::{
    CampaignMarker, CampaignReport, RunReport, RunStage, RunStatus, CAMPAIGN_FILE, REPORT_FILE,
    SUBMIT_ALL_FILE, SUMMARY_FILE,
};
use crate::script::render_script;

/// What to do when runs fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Keep going and report every failure.
    #[default]
    Continue,
    /// Cancel the remaining runs once this many have failed.
    AbortAfter(usize),
}

/// Options governing campaign compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOpts {
    /// Render and script in memory without touching the filesystem.
    pub dry_run: bool,
    /// Number of runs processed in parallel.
    pub concurrency: usize,
    /// Reaction to failed runs.
    pub failure_policy: FailurePolicy,
    /// Add a generation timestamp comment to every script.
    pub stamp_generation_time: bool,
}

impl Default for CompileOpts {
    fn default() -> Self {
        Self {
            dry_run: false,
            concurrency: 1,
            failure_policy: FailurePolicy::Continue,
            stamp_generation_time: false,
        }
    }
}

/// Campaign-level progress, reported through tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStage {
    /// Specification and machine validated.
    Loaded,
    /// Run count known, run stream ready.
    Expanded,
    /// Every run processed and campaign files written.
    Compiled,
}

struct RunContext<'a> {
    renderer: Renderer<'a>,
    machine: &'a MachineProfile,
    campaign: &'a str,
    spec_hash: &'a str,
    kill_on_partial_failure: bool,
    stamp: Option<String>,
    opts: &'a CompileOpts,
    failures: AtomicUsize,
}

/// Compiles `spec` for `machine` into a campaign rooted at `root`.
///
/// Specification and configuration errors are returned before anything is
/// written. Per-run failures are captured in the report.
pub fn compile(
    spec: &ExperimentSpec,
    machine: &MachineProfile,
    root: &Path,
    opts: &CompileOpts,
) -> Result<CampaignReport, CampError> {
    machine.validate()?;
    if opts.failure_policy == FailurePolicy::AbortAfter(0) {
        return Err(CampError::Configuration(
            ErrorInfo::new("compile.abort-after", "abort-after threshold must be positive")
                .with_hint("use continue to never cancel runs"),
        ));
    }
    let plan = spec.plan()?;
    info!(campaign = %spec.name, machine = %machine.name, stage = ?CampaignStage::Loaded);

    let run_count = plan.run_count();
    let pad_width = machine.pad_width_for(run_count);
    let root = absolute(&machine.resolve_root(root))?;
    let app_dir = absolute(&spec.app_path())?;
    info!(
        campaign = %spec.name,
        runs = run_count,
        excluded = plan.upper_bound() - run_count,
        root = %root.display(),
        stage = ?CampaignStage::Expanded
    );

    let spec_hash = spec.spec_hash()?;
    let provenance = CampaignProvenance::new(spec_hash.clone(), machine.machine_hash()?);
    if !opts.dry_run {
        fs::create_dir_all(&root).map_err(|err| CampError::io("campaign_root", &root, err))?;
        let marker = CampaignMarker {
            schema: MANIFEST_SCHEMA,
            campaign: spec.name.clone(),
            machine: machine.name.clone(),
            scheduler: machine.scheduler.to_string(),
            run_count,
            provenance: provenance.clone(),
        };
        write_overwriting(&root.join(CAMPAIGN_FILE), &to_canonical_json_pretty(&marker)?)?;
    }

    let ctx = RunContext {
        renderer: Renderer::new(
            spec,
            machine,
            plan.graph().stages().to_vec(),
            app_dir,
            root.clone(),
            pad_width,
        ),
        machine,
        campaign: &spec.name,
        spec_hash: &spec_hash,
        kill_on_partial_failure: spec.kill_on_partial_failure,
        stamp: opts.stamp_generation_time.then(now_rfc3339),
        opts,
        failures: AtomicUsize::new(0),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.concurrency.max(1))
        .build()
        .map_err(|err| {
            CampError::Configuration(ErrorInfo::new("compile.thread-pool", err.to_string()))
        })?;
    let mut runs: Vec<RunReport> = pool.install(|| {
        plan.runs()
            .par_bridge()
            .map(|run| process_run(&ctx, run))
            .collect()
    });
    runs.sort_by_key(|run| run.index);

    let report = CampaignReport::new(
        &spec.name,
        &machine.name,
        root.clone(),
        opts.dry_run,
        runs,
        provenance,
    );
    if !opts.dry_run {
        write_overwriting(&root.join(REPORT_FILE), &to_canonical_json_pretty(&report)?)?;
        write_overwriting(&root.join(SUMMARY_FILE), &report.summary_csv()?)?;
        let submit_all = root.join(SUBMIT_ALL_FILE);
        write_overwriting(
            &submit_all,
            report.submit_all_script(machine.adapter()).as_bytes(),
        )?;
    }
    info!(
        campaign = %spec.name,
        done = report.done,
        failed = report.failed,
        cancelled = report.cancelled,
        stage = ?CampaignStage::Compiled
    );
    Ok(report)
}

/// Loads the experiment and machine from YAML files, then compiles.
pub fn compile_from_paths(
    spec_path: &Path,
    machine_path: &Path,
    root: &Path,
    opts: &CompileOpts,
) -> Result<CampaignReport, CampError> {
    let spec = load_experiment(spec_path)?;
    let machine = load_machine(machine_path)?;
    compile(&spec, &machine, root, opts)
}

fn process_run(ctx: &RunContext<'_>, run: Run) -> RunReport {
    let run_dir = ctx.renderer.dir_name(run.index);
    if let FailurePolicy::AbortAfter(limit) = ctx.opts.failure_policy {
        if ctx.failures.load(Ordering::SeqCst) >= limit {
            debug!(run = run.index, "cancelled");
            return RunReport::cancelled(run.index, run_dir, run.bindings);
        }
    }
    let mut report = RunReport::cancelled(run.index, run_dir, run.bindings.clone());
    report.status = match execute_run(ctx, &run, &mut report) {
        Ok(()) => {
            debug!(run = run.index, stage = ?RunStage::Done);
            RunStatus::Done
        }
        Err((stage, error)) => {
            ctx.failures.fetch_add(1, Ordering::SeqCst);
            let error = error
                .with_context("run", run.index.to_string())
                .with_context("run_dir", report.run_dir.as_str());
            warn!(run = run.index, stage = ?stage, error = %error, "run failed");
            RunStatus::Failed { stage, error }
        }
    };
    report
}

fn execute_run(
    ctx: &RunContext<'_>,
    run: &Run,
    report: &mut RunReport,
) -> Result<(), (RunStage, CampError)> {
    let at = |stage: RunStage| move |err: CampError| (stage, err);

    let rendered = ctx.renderer.render_run(run).map_err(at(RunStage::Rendering))?;
    report.nodes = Some(rendered.job.nodes);
    let manifest = RunManifest::from_rendered(ctx.campaign, ctx.spec_hash, &rendered);
    let manifest = to_canonical_json_pretty(&manifest).map_err(at(RunStage::Rendering))?;
    let pipeline = PipelineDescription::from_rendered(&rendered, ctx.kill_on_partial_failure);
    let pipeline = to_canonical_json_pretty(&pipeline).map_err(at(RunStage::Rendering))?;
    let script = render_script(&rendered, ctx.machine, ctx.stamp.as_deref());

    if ctx.opts.dry_run {
        report.script = Some(script);
        return Ok(());
    }
    let stats =
        materialize_run(&rendered, &manifest, &pipeline).map_err(at(RunStage::Materialized))?;
    debug!(run = run.index, stage = ?RunStage::Materialized, written = stats.written);
    let wrote = write_script(&rendered, &script).map_err(at(RunStage::Scripted))?;
    report.files_written = stats.written + usize::from(wrote);
    report.files_unchanged = stats.unchanged + usize::from(!wrote);
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf, CampError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd =
            std::env::current_dir().map_err(|err| CampError::io("current_dir", path, err))?;
        cwd.join(path)
    };
    Ok(joined
        .components()
        .filter(|part| !matches!(part, Component::CurDir))
        .collect())
}

fn write_overwriting(path: &Path, bytes: &[u8]) -> Result<(), CampError> {
    if path.is_file() {
        fs::remove_file(path).map_err(|err| CampError::io("campaign_file", path, err))?;
    }
    write_checked(path, bytes).map(|_| ())
}
