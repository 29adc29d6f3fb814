//! Pure rendering of one run: templates resolved, resources laid out, inputs planned.
//!
//! Nothing here touches the filesystem; rendering the same run twice gives
//! identical output.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use cheetah_core::errors::{CampError, ErrorInfo};
use cheetah_machine::{JobRequest, MachineProfile, NodeLayout};
use cheetah_spec::template::render;
use cheetah_spec::{
    ComponentSpec, ExperimentSpec, InputFile, InputScope, Quantity, Run, RunBindings,
    TransferMode, WorkdirPolicy, XmlStep,
};
use serde::{Deserialize, Serialize};

/// Scheduler stdout file written next to `submit.sh`.
pub const JOB_STDOUT: &str = "cheetah.job.stdout";
/// Scheduler stderr file written next to `submit.sh`.
pub const JOB_STDERR: &str = "cheetah.job.stderr";

/// Quotes a word for POSIX shells; safe words are left untouched.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "_-./=:,+@%".contains(ch));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Space-separated, shell-quoted words.
pub fn shell_join<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|word| shell_quote(word.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// XML attribute edit with its path parsed and value rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedXmlEdit {
    /// Element path below the document root.
    pub steps: Vec<XmlStep>,
    /// Attribute to set.
    pub attribute: String,
    /// Rendered attribute value.
    pub value: String,
}

/// One file transfer into the run tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputOp {
    /// Source path.
    pub source: PathBuf,
    /// Destination relative to the run directory.
    pub dest: PathBuf,
    /// Copy or symlink.
    pub mode: TransferMode,
    /// Edits applied to the copy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xml_edits: Vec<RenderedXmlEdit>,
}

/// Resource counts after template resolution and node layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedResources {
    /// Process placement.
    pub layout: NodeLayout,
    /// Threads per process, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
}

/// Everything needed to launch one component of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDescription {
    /// Component name.
    pub name: String,
    /// Resolved executable path.
    pub exe: String,
    /// Resolved arguments.
    pub args: Vec<String>,
    /// Arguments as one shell-quoted string.
    pub argument_string: String,
    /// Full argv including the machine launcher.
    pub command: Vec<String>,
    /// Resolved environment.
    pub env: BTreeMap<String, String>,
    /// Resolved resources.
    pub resources: ResolvedResources,
    /// Working directory relative to the run directory (`.` when shared).
    pub workdir: PathBuf,
    /// Inputs to transfer before launch.
    pub inputs: Vec<InputOp>,
    /// Timeout handed to the executor, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Pause after launching, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_after: Option<u64>,
}

impl LaunchDescription {
    /// True when the component runs in its own subdirectory.
    pub fn has_own_workdir(&self) -> bool {
        self.workdir != Path::new(".")
    }

    /// File receiving the component's stdout, relative to its workdir.
    pub fn stdout_file(&self) -> String {
        format!("cheetah.stdout.{}", self.name)
    }

    /// File receiving the component's stderr, relative to its workdir.
    pub fn stderr_file(&self) -> String {
        format!("cheetah.stderr.{}", self.name)
    }

    /// File receiving the component's exit code, relative to its workdir.
    pub fn return_file(&self) -> String {
        format!("cheetah.return.{}", self.name)
    }
}

/// Post-processing command for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPostProcess {
    /// Script followed by its arguments.
    pub command: Vec<String>,
    /// Skip when any component failed.
    pub stop_on_failure: bool,
}

/// A run with every component rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRun {
    /// Ordinal of the run.
    pub index: usize,
    /// Run directory name, e.g. `run-007`.
    pub dir_name: String,
    /// Absolute run directory.
    pub dir: PathBuf,
    /// Parameter bindings.
    pub bindings: RunBindings,
    /// Components in declaration order.
    pub components: Vec<LaunchDescription>,
    /// Launch stages as indices into `components`.
    pub stages: Vec<Vec<usize>>,
    /// Batch request for the run.
    pub job: JobRequest,
    /// Optional post-processing step.
    pub post_process: Option<RenderedPostProcess>,
}

/// Renders runs of one experiment for one machine.
#[derive(Debug, Clone)]
pub struct Renderer<'a> {
    spec: &'a ExperimentSpec,
    machine: &'a MachineProfile,
    stages: Vec<Vec<usize>>,
    app_dir: PathBuf,
    root: PathBuf,
    pad_width: usize,
}

impl<'a> Renderer<'a> {
    /// Creates a renderer.
    ///
    /// `app_dir` resolves relative executables and inputs, `root` is the
    /// campaign root, `stages` come from the experiment's dependency graph.
    pub fn new(
        spec: &'a ExperimentSpec,
        machine: &'a MachineProfile,
        stages: Vec<Vec<usize>>,
        app_dir: PathBuf,
        root: PathBuf,
        pad_width: usize,
    ) -> Self {
        Self {
            spec,
            machine,
            stages,
            app_dir,
            root,
            pad_width,
        }
    }

    /// Directory name for the run with the given ordinal.
    pub fn dir_name(&self, index: usize) -> String {
        self.machine.run_dir_name(index, self.pad_width)
    }

    /// Renders every component of `run`.
    pub fn render_run(&self, run: &Run) -> Result<RenderedRun, CampError> {
        let components = self
            .spec
            .components
            .iter()
            .map(|component| self.render_component(component, &run.bindings))
            .collect::<Result<Vec<_>, _>>()?;
        let dir_name = self.dir_name(run.index);
        let nodes = match self.spec.job.nodes {
            Some(nodes) => nodes,
            None => total_nodes(&components)?,
        };
        let job = JobRequest {
            name: format!("{}-{}", self.spec.name, dir_name),
            nodes,
            walltime: self
                .spec
                .job
                .walltime
                .unwrap_or(self.machine.defaults.walltime),
            queue: self
                .spec
                .job
                .queue
                .clone()
                .or_else(|| self.machine.defaults.queue.clone()),
            account: self
                .spec
                .job
                .account
                .clone()
                .or_else(|| self.machine.defaults.account.clone()),
            stdout: JOB_STDOUT.to_string(),
            stderr: JOB_STDERR.to_string(),
        };
        let post_process = match &self.spec.post_process {
            Some(post) => {
                let lookup = |name: &str| binding_text(&run.bindings, name);
                let script = render(&post.script, lookup)?;
                let mut command = vec![self.resolve_app_path(&script).display().to_string()];
                for arg in &post.args {
                    command.push(render(arg, lookup)?);
                }
                Some(RenderedPostProcess {
                    command,
                    stop_on_failure: post.stop_on_failure,
                })
            }
            None => None,
        };
        Ok(RenderedRun {
            index: run.index,
            dir: self.root.join(&dir_name),
            dir_name,
            bindings: run.bindings.clone(),
            components,
            stages: self.stages.clone(),
            job,
            post_process,
        })
    }

    /// Renders one component against a set of bindings.
    pub fn render_component(
        &self,
        component: &ComponentSpec,
        bindings: &RunBindings,
    ) -> Result<LaunchDescription, CampError> {
        let with_component =
            |err: CampError| err.with_context("component", component.name.as_str());
        let lookup = |name: &str| binding_text(bindings, name);

        let exe = render(&component.exe, lookup).map_err(with_component)?;
        let exe = self.resolve_app_path(&exe).display().to_string();
        let args = component
            .args
            .iter()
            .map(|arg| render(arg, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map_err(with_component)?;
        let env = component
            .env
            .iter()
            .map(|(key, value)| Ok((key.clone(), render(value, lookup)?)))
            .collect::<Result<BTreeMap<_, _>, CampError>>()
            .map_err(with_component)?;

        let resources = &component.resources;
        let nprocs = resolve_count("nprocs", &resources.nprocs, bindings)
            .map_err(with_component)?;
        let tasks_per_node =
            resolve_optional("tasks_per_node", &resources.tasks_per_node, bindings)
                .map_err(with_component)?;
        let nodes =
            resolve_optional("nodes", &resources.nodes, bindings).map_err(with_component)?;
        let threads =
            resolve_optional("threads", &resources.threads, bindings).map_err(with_component)?;
        let layout = NodeLayout::derive(
            nprocs,
            tasks_per_node,
            nodes,
            self.machine.processes_per_node,
        )
        .map_err(with_component)?;

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(exe.clone());
        argv.extend(args.iter().cloned());
        let command = match &self.machine.launcher {
            Some(launcher) => launcher.wrap(&layout, threads, &argv),
            None => argv,
        };

        let workdir = match component.workdir {
            WorkdirPolicy::Shared => PathBuf::from("."),
            WorkdirPolicy::Subdir => PathBuf::from(&component.name),
        };
        let inputs = component
            .inputs
            .iter()
            .map(|input| self.render_input(input, &workdir, bindings))
            .collect::<Result<Vec<_>, _>>()
            .map_err(with_component)?;

        Ok(LaunchDescription {
            name: component.name.clone(),
            argument_string: shell_join(&args),
            exe,
            args,
            command,
            env,
            resources: ResolvedResources { layout, threads },
            workdir,
            inputs,
            timeout: component.timeout,
            sleep_after: component.sleep_after,
        })
    }

    fn render_input(
        &self,
        input: &InputFile,
        workdir: &Path,
        bindings: &RunBindings,
    ) -> Result<InputOp, CampError> {
        let lookup = |name: &str| binding_text(bindings, name);
        let source = self.resolve_app_path(&render(&input.source, lookup)?);
        let dest = match &input.dest {
            Some(dest) => PathBuf::from(render(dest, lookup)?),
            None => match source.file_name() {
                Some(name) => PathBuf::from(name),
                None => {
                    return Err(CampError::Template(
                        ErrorInfo::new("input.no-file-name", "input source has no file name")
                            .with_path(&source)
                            .with_hint("set an explicit dest"),
                    ))
                }
            },
        };
        let escapes = dest.as_os_str().is_empty()
            || dest
                .components()
                .any(|part| !matches!(part, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(CampError::Template(
                ErrorInfo::new(
                    "input.dest",
                    "input destination must be a relative path inside the run",
                )
                .with_path(&dest),
            ));
        }
        let dest = match input.scope {
            InputScope::Component if workdir != Path::new(".") => workdir.join(dest),
            _ => dest,
        };
        let xml_edits = input
            .xml_edits
            .iter()
            .map(|edit| {
                Ok(RenderedXmlEdit {
                    steps: edit.steps()?,
                    attribute: edit.attribute.clone(),
                    value: render(&edit.value, lookup)?,
                })
            })
            .collect::<Result<Vec<_>, CampError>>()?;
        let mode = match input.mode {
            _ if !xml_edits.is_empty() => TransferMode::Copy,
            Some(mode) => mode,
            None if self.machine.filesystem.link_inputs => TransferMode::Symlink,
            None => TransferMode::Copy,
        };
        Ok(InputOp {
            source,
            dest,
            mode,
            xml_edits,
        })
    }

    fn resolve_app_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.app_dir.join(path)
        }
    }
}

fn total_nodes(components: &[LaunchDescription]) -> Result<u32, CampError> {
    components.iter().try_fold(0u32, |total, component| {
        total
            .checked_add(component.resources.layout.nodes)
            .ok_or_else(|| {
                resource_error(
                    "resource.too-large",
                    "node total of the run does not fit in 32 bits",
                    "nodes",
                )
                .with_context("component", component.name.as_str())
            })
    })
}

fn binding_text(bindings: &RunBindings, name: &str) -> Option<String> {
    bindings.get(name).map(ToString::to_string)
}

fn resource_error(code: &str, message: &str, field: &str) -> CampError {
    CampError::ResourceSpec(ErrorInfo::new(code, message).with_context("field", field))
}

fn resolve_count(
    field: &str,
    quantity: &Quantity,
    bindings: &RunBindings,
) -> Result<u32, CampError> {
    let value = match quantity {
        Quantity::Count(value) => *value,
        Quantity::Template(template) => {
            let text = render(template, |name| binding_text(bindings, name))?;
            text.trim().parse::<i64>().map_err(|_| {
                resource_error(
                    "resource.not-integer",
                    "resource did not resolve to an integer",
                    field,
                )
                .with_context("value", text.as_str())
            })?
        }
    };
    if value < 1 {
        return Err(
            resource_error("resource.min", "resource counts must be at least 1", field)
                .with_context("value", value.to_string()),
        );
    }
    u32::try_from(value).map_err(|_| {
        resource_error(
            "resource.too-large",
            "resource count does not fit in 32 bits",
            field,
        )
        .with_context("value", value.to_string())
    })
}

fn resolve_optional(
    field: &str,
    quantity: &Option<Quantity>,
    bindings: &RunBindings,
) -> Result<Option<u32>, CampError> {
    quantity
        .as_ref()
        .map(|quantity| resolve_count(field, quantity, bindings))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cheetah_machine::{LauncherSpec, SchedulerKind};
    use cheetah_spec::{Parameter, Scalar, SweepGroup, XmlEdit};

    fn machine() -> MachineProfile {
        MachineProfile::new("test", SchedulerKind::Pbs, 16).with_launcher(LauncherSpec {
            tasks_per_node_flag: Some("-N".into()),
            ..LauncherSpec::new("aprun", "-n")
        })
    }

    fn spec() -> ExperimentSpec {
        ExperimentSpec::new(
            "heat",
            vec![ComponentSpec::new("sim", "bin/sim")
                .args(["--size", "{size}", "--label", "run {size}"])
                .env("MODE", "fast-{size}")
                .nprocs("{procs}")
                .subdir()
                .input(InputFile::new("inputs/mesh-{size}.dat").to("mesh.dat"))
                .input(InputFile::new("shared.cfg").shared())],
        )
        .with_group(SweepGroup::product(
            "grid",
            vec![Parameter::new("size", [10, 20]), Parameter::new("procs", [4, 32])],
        ))
    }

    fn run(size: i64, procs: i64) -> Run {
        Run {
            index: 3,
            bindings: [("size", size), ("procs", procs)].into_iter().collect(),
        }
    }

    fn renderer<'a>(spec: &'a ExperimentSpec, machine: &'a MachineProfile) -> Renderer<'a> {
        Renderer::new(
            spec,
            machine,
            vec![vec![0]],
            PathBuf::from("/apps/heat"),
            PathBuf::from("/campaigns/heat"),
            3,
        )
    }

    #[test]
    fn renders_arguments_environment_and_layout() {
        let spec = spec();
        let machine = machine();
        let rendered = renderer(&spec, &machine).render_run(&run(10, 32)).expect("render");
        let sim = &rendered.components[0];
        assert_eq!(sim.exe, "/apps/heat/bin/sim");
        assert_eq!(sim.args, vec!["--size", "10", "--label", "run 10"]);
        assert_eq!(sim.argument_string, "--size 10 --label 'run 10'");
        assert_eq!(sim.env["MODE"], "fast-10");
        assert_eq!(sim.resources.layout.nodes, 2);
        assert_eq!(
            sim.command,
            vec![
                "aprun",
                "-n",
                "32",
                "-N",
                "16",
                "/apps/heat/bin/sim",
                "--size",
                "10",
                "--label",
                "run 10"
            ]
        );
        assert_eq!(rendered.dir_name, "run-003");
        assert_eq!(rendered.dir, PathBuf::from("/campaigns/heat/run-003"));
        assert_eq!(rendered.job.nodes, 2);
        assert_eq!(rendered.job.name, "heat-run-003");
    }

    #[test]
    fn inputs_follow_scope() {
        let spec = spec();
        let machine = machine();
        let rendered = renderer(&spec, &machine).render_run(&run(20, 4)).expect("render");
        let inputs = &rendered.components[0].inputs;
        assert_eq!(inputs[0].source, PathBuf::from("/apps/heat/inputs/mesh-20.dat"));
        assert_eq!(inputs[0].dest, PathBuf::from("sim/mesh.dat"));
        assert_eq!(inputs[1].dest, PathBuf::from("shared.cfg"));
        assert_eq!(inputs[1].mode, TransferMode::Copy);
    }

    #[test]
    fn rendering_is_repeatable() {
        let spec = spec();
        let machine = machine();
        let renderer = renderer(&spec, &machine);
        assert_eq!(
            renderer.render_run(&run(10, 4)).expect("first"),
            renderer.render_run(&run(10, 4)).expect("second")
        );
    }

    #[test]
    fn zero_processes_is_a_resource_error() {
        let spec = spec();
        let machine = machine();
        let err = renderer(&spec, &machine)
            .render_run(&run(10, 0))
            .expect_err("zero");
        assert!(matches!(err, CampError::ResourceSpec(_)));
        assert_eq!(err.info().code, "resource.min");
        assert_eq!(err.info().context["component"], "sim");
    }

    #[test]
    fn non_integer_resources_are_rejected() {
        let spec = spec();
        let machine = machine();
        let bindings: RunBindings = [("size", Scalar::from(10)), ("procs", Scalar::from("many"))]
            .into_iter()
            .collect();
        let err = renderer(&spec, &machine)
            .render_run(&Run { index: 0, bindings })
            .expect_err("text");
        assert_eq!(err.info().code, "resource.not-integer");
    }

    #[test]
    fn unknown_placeholder_is_a_template_error() {
        let spec = ExperimentSpec::new(
            "heat",
            vec![ComponentSpec::new("sim", "bin/sim").arg("{missing}")],
        );
        let machine = machine();
        let err = renderer(&spec, &machine)
            .render_run(&Run {
                index: 0,
                bindings: RunBindings::new(),
            })
            .expect_err("missing");
        assert!(matches!(err, CampError::Template(_)));
    }

    #[test]
    fn destinations_may_not_leave_the_run() {
        let spec = ExperimentSpec::new(
            "heat",
            vec![ComponentSpec::new("sim", "bin/sim")
                .input(InputFile::new("a.dat").to("../a.dat"))],
        );
        let machine = machine();
        let err = renderer(&spec, &machine)
            .render_run(&Run {
                index: 0,
                bindings: RunBindings::new(),
            })
            .expect_err("escape");
        assert_eq!(err.info().code, "input.dest");
    }

    #[test]
    fn node_total_overflow_is_a_resource_error() {
        let spec = ExperimentSpec::new(
            "heat",
            vec![
                ComponentSpec::new("a", "bin/a").nodes(3_000_000_000i64),
                ComponentSpec::new("b", "bin/b").nodes(3_000_000_000i64),
            ],
        );
        let machine = machine();
        let err = renderer(&spec, &machine)
            .render_run(&Run {
                index: 0,
                bindings: RunBindings::new(),
            })
            .expect_err("overflow");
        assert!(matches!(err, CampError::ResourceSpec(_)));
        assert_eq!(err.info().code, "resource.too-large");
        assert_eq!(err.info().context["component"], "b");
    }

    #[test]
    fn xml_edits_render_values_and_force_copies() {
        let spec = ExperimentSpec::new(
            "heat",
            vec![ComponentSpec::new("sim", "bin/sim").input(
                InputFile::new("adios.xml").edit_xml(XmlEdit::new(
                    "adios-group[name=heat]/var[name=T]",
                    "transform",
                    "{codec}",
                )),
            )],
        );
        let mut machine = machine();
        machine.filesystem.link_inputs = true;
        let bindings: RunBindings = [("codec", "sz")].into_iter().collect();
        let rendered = renderer(&spec, &machine)
            .render_run(&Run { index: 0, bindings })
            .expect("render");
        let input = &rendered.components[0].inputs[0];
        assert_eq!(input.mode, TransferMode::Copy);
        assert_eq!(input.xml_edits[0].value, "sz");
        assert_eq!(input.xml_edits[0].steps.len(), 2);
    }

    #[test]
    fn quoting_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a=b"), "a=b");
    }
}
