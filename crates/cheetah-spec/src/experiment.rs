use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use cheetah_core::errors::{CampError, ErrorInfo};
use cheetah_core::hash::stable_hash_string;
use cheetah_core::serde::{from_yaml_slice, to_yaml_string};
use serde::{Deserialize, Serialize};

use crate::component::{ComponentSpec, TransferMode};
use crate::deps::DependencyGraph;
use crate::param::{RunBindings, Scalar, SweepGroup};
use crate::sweep::SweepExpander;

fn spec_error(code: &str, message: impl Into<String>) -> CampError {
    CampError::Specification(ErrorInfo::new(code, message))
}

/// Exclusion rule: a run is dropped when every listed parameter has the listed value.
pub type ExclusionRule = BTreeMap<String, Scalar>;

/// Batch job settings that override the machine defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobOverrides {
    /// Queue or partition name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Project or allocation charged for the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Walltime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walltime: Option<u64>,
    /// Node count requested for every run, replacing the computed layout total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
}

/// Script run by the executor once every component of a run has exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcess {
    /// Script path template.
    pub script: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Skip the script when any component failed.
    #[serde(default)]
    pub stop_on_failure: bool,
}

/// Declarative experiment: components, their sweep, and run-level policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Campaign name, used in job names and the campaign marker.
    pub name: String,
    /// Directory holding executables and inputs; relative paths resolve
    /// against the directory of the spec file.
    #[serde(default = "ExperimentSpec::default_app_dir")]
    pub app_dir: PathBuf,
    /// Components launched in every run.
    pub components: Vec<ComponentSpec>,
    /// Sweep groups, combined as a Cartesian product in declaration order.
    #[serde(default)]
    pub sweep: Vec<SweepGroup>,
    /// Rules removing runs from the product.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ExclusionRule>,
    /// Batch settings overriding the machine defaults.
    #[serde(default)]
    pub job: JobOverrides,
    /// Ask the executor to kill the remaining components when one fails.
    #[serde(default)]
    pub kill_on_partial_failure: bool,
    /// Optional post-processing script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_process: Option<PostProcess>,
    /// Directory containing the spec on disk (ignored when serializing).
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// One bound point of the sweep with its contiguous ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    /// Ordinal after exclusions; names the run directory.
    pub index: usize,
    /// Parameter values for this run.
    pub bindings: RunBindings,
}

impl ExperimentSpec {
    fn default_app_dir() -> PathBuf {
        PathBuf::from(".")
    }

    /// Experiment with components and no sweep.
    pub fn new(name: impl Into<String>, components: Vec<ComponentSpec>) -> Self {
        Self {
            name: name.into(),
            app_dir: Self::default_app_dir(),
            components,
            sweep: Vec::new(),
            exclude: Vec::new(),
            job: JobOverrides::default(),
            kill_on_partial_failure: false,
            post_process: None,
            base_dir: PathBuf::new(),
        }
    }

    /// Sets the application directory.
    pub fn with_app_dir(mut self, app_dir: impl Into<PathBuf>) -> Self {
        self.app_dir = app_dir.into();
        self
    }

    /// Appends a sweep group.
    pub fn with_group(mut self, group: SweepGroup) -> Self {
        self.sweep.push(group);
        self
    }

    /// Appends an exclusion rule.
    pub fn excluding<K, V>(mut self, rule: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Scalar>,
    {
        self.exclude.push(
            rule.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Application directory resolved against the spec's base directory, with
    /// `.` segments removed.
    pub fn app_path(&self) -> PathBuf {
        let joined = if self.app_dir.is_absolute() {
            self.app_dir.clone()
        } else {
            self.base_dir.join(&self.app_dir)
        };
        let cleaned: PathBuf = joined
            .components()
            .filter(|part| !matches!(part, Component::CurDir))
            .collect();
        if cleaned.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            cleaned
        }
    }

    /// Deterministic hash of the specification contents.
    pub fn spec_hash(&self) -> Result<String, CampError> {
        stable_hash_string(self)
    }

    /// Canonical YAML representation.
    pub fn to_yaml_string(&self) -> Result<String, CampError> {
        to_yaml_string(self)
    }

    /// Validates the whole specification and prepares expansion.
    ///
    /// Every specification-level error is reported here, before any run is
    /// produced or any file is touched.
    pub fn plan(&self) -> Result<ExperimentPlan<'_>, CampError> {
        if !is_portable_name(&self.name) {
            return Err(CampError::Specification(
                ErrorInfo::new(
                    "experiment.name",
                    "experiment name may only contain letters, digits, '_', '.' and '-'",
                )
                .with_context("name", &self.name),
            ));
        }
        if self.components.is_empty() {
            return Err(spec_error(
                "experiment.no-components",
                "experiment declares no components",
            ));
        }
        let mut names = BTreeSet::new();
        for component in &self.components {
            validate_component_name(&component.name)?;
            if !names.insert(component.name.as_str()) {
                return Err(CampError::Specification(
                    ErrorInfo::new("experiment.duplicate-component", "component name repeated")
                        .with_context("component", &component.name),
                ));
            }
            if component.exe.trim().is_empty() {
                return Err(CampError::Specification(
                    ErrorInfo::new("experiment.no-exe", "component has no executable")
                        .with_context("component", &component.name),
                ));
            }
            validate_component_details(component)
                .map_err(|err| err.with_context("component", component.name.as_str()))?;
        }
        let graph = DependencyGraph::new(&self.components)?;
        let expander = SweepExpander::new(&self.sweep)?;
        let known: BTreeSet<&str> = expander.parameter_names().collect();
        for parameter in self.sweep.iter().flat_map(|group| group.parameters.iter()) {
            if parameter.values.iter().any(|value| !value.is_finite()) {
                return Err(CampError::Specification(
                    ErrorInfo::new(
                        "experiment.non-finite",
                        "parameter values must be finite numbers",
                    )
                    .with_context("parameter", &parameter.name),
                ));
            }
        }
        for rule in &self.exclude {
            if rule.is_empty() {
                return Err(spec_error(
                    "experiment.empty-exclusion",
                    "exclusion rule lists no parameters",
                ));
            }
            if let Some(unknown) = rule.keys().find(|key| !known.contains(key.as_str())) {
                return Err(CampError::Specification(
                    ErrorInfo::new(
                        "experiment.exclusion-unknown",
                        "exclusion rule names a parameter that is not swept",
                    )
                    .with_context("parameter", unknown),
                ));
            }
        }
        if self.job.walltime == Some(0) {
            return Err(spec_error("experiment.walltime", "walltime must be positive"));
        }
        if self.job.nodes == Some(0) {
            return Err(spec_error("experiment.nodes", "node override must be positive"));
        }
        Ok(ExperimentPlan {
            spec: self,
            graph,
            expander,
        })
    }

    /// Shorthand for [`ExperimentSpec::plan`] when only validity matters.
    pub fn validate(&self) -> Result<(), CampError> {
        self.plan().map(|_| ())
    }
}

fn is_portable_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
}

fn is_shell_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn validate_component_name(name: &str) -> Result<(), CampError> {
    if !is_portable_name(name) {
        return Err(CampError::Specification(
            ErrorInfo::new(
                "experiment.component-name",
                "component name may only contain letters, digits, '_', '.' and '-'",
            )
            .with_context("component", name),
        ));
    }
    Ok(())
}

fn validate_component_details(component: &ComponentSpec) -> Result<(), CampError> {
    if let Some(key) = component.env.keys().find(|key| !is_shell_identifier(key)) {
        return Err(CampError::Specification(
            ErrorInfo::new(
                "experiment.env-key",
                "environment variable names must be shell identifiers",
            )
            .with_context("key", key),
        ));
    }
    for input in component.inputs.iter().filter(|input| !input.xml_edits.is_empty()) {
        if input.mode == Some(TransferMode::Symlink) {
            return Err(CampError::Specification(
                ErrorInfo::new("input.xml-symlink", "edited XML inputs must be copied")
                    .with_context("source", &input.source)
                    .with_hint("drop mode: symlink from the input"),
            ));
        }
        for edit in &input.xml_edits {
            edit.steps()?;
            if !is_portable_name(&edit.attribute) {
                return Err(CampError::Specification(
                    ErrorInfo::new("input.xml-attribute", "XML attribute name is not valid")
                        .with_context("attribute", &edit.attribute),
                ));
            }
        }
    }
    Ok(())
}

/// Validated experiment ready for expansion.
#[derive(Debug, Clone)]
pub struct ExperimentPlan<'a> {
    spec: &'a ExperimentSpec,
    graph: DependencyGraph,
    expander: SweepExpander,
}

impl<'a> ExperimentPlan<'a> {
    /// The validated specification.
    pub fn spec(&self) -> &'a ExperimentSpec {
        self.spec
    }

    /// Dependency stages of the components.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Size of the product before exclusions.
    pub fn upper_bound(&self) -> usize {
        self.expander.total()
    }

    /// Number of runs left after exclusions.
    pub fn run_count(&self) -> usize {
        if self.spec.exclude.is_empty() {
            self.expander.total()
        } else {
            self.runs().count()
        }
    }

    /// Lazily yields the runs that survive the exclusion rules, numbered contiguously.
    pub fn runs(&self) -> impl Iterator<Item = Run> + Send + 'a {
        let spec: &'a ExperimentSpec = self.spec;
        let rules = &spec.exclude;
        self.expander
            .clone()
            .filter(move |bindings| !rules.iter().any(|rule| bindings.matches(rule)))
            .enumerate()
            .map(|(index, bindings)| Run { index, bindings })
    }
}

/// Loads an experiment from a YAML file and records its base directory.
pub fn load_experiment<P: AsRef<Path>>(path: P) -> Result<ExperimentSpec, CampError> {
    let spec_path = path.as_ref();
    let bytes = fs::read(spec_path).map_err(|err| CampError::io("experiment_read", spec_path, err))?;
    let mut spec: ExperimentSpec = from_yaml_slice(&bytes).map_err(|err| {
        CampError::Specification(
            ErrorInfo::new("experiment.parse", err.info().message.clone()).with_path(spec_path),
        )
    })?;
    spec.base_dir = spec_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{InputFile, XmlEdit};
    use crate::param::Parameter;

    fn experiment() -> ExperimentSpec {
        ExperimentSpec::new("demo", vec![ComponentSpec::new("sim", "bin/sim")]).with_group(
            SweepGroup::product(
                "grid",
                vec![Parameter::new("size", [10, 20]), Parameter::new("procs", [4, 8])],
            ),
        )
    }

    #[test]
    fn exclusions_keep_ordinals_contiguous() {
        let spec = experiment().excluding([("size", 10), ("procs", 8)]);
        let plan = spec.plan().expect("plan");
        let runs: Vec<Run> = plan.runs().collect();
        assert_eq!(plan.upper_bound(), 4);
        assert_eq!(plan.run_count(), 3);
        assert_eq!(runs.len(), 3);
        assert_eq!(
            runs.iter().map(|run| run.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(runs[1].bindings.get("size"), Some(&Scalar::Int(20)));
        assert_eq!(runs[1].bindings.get("procs"), Some(&Scalar::Int(4)));
    }

    #[test]
    fn exclusion_on_unknown_parameter_fails() {
        let spec = experiment().excluding([("ghost", 1)]);
        let err = spec.validate().expect_err("unknown");
        assert_eq!(err.info().code, "experiment.exclusion-unknown");
    }

    #[test]
    fn component_names_must_be_directory_safe() {
        let spec = ExperimentSpec::new("demo", vec![ComponentSpec::new("a/b", "x")]);
        let err = spec.validate().expect_err("bad name");
        assert_eq!(err.info().code, "experiment.component-name");
    }

    #[test]
    fn component_names_must_be_shell_safe() {
        for name in ["sim(1)", "$(touch${IFS}pwned)", "a b", "..", "x;y"] {
            let spec = ExperimentSpec::new("demo", vec![ComponentSpec::new(name, "x")]);
            let err = spec.validate().expect_err(name);
            assert_eq!(err.info().code, "experiment.component-name");
        }
        let spec = ExperimentSpec::new("demo", vec![ComponentSpec::new("sim_2.v-1", "x")]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn experiment_names_must_be_shell_safe() {
        for name in ["", "heat transfer", "heat'run"] {
            let spec = ExperimentSpec::new(name, vec![ComponentSpec::new("sim", "x")]);
            let err = spec.validate().expect_err(name);
            assert!(matches!(err, CampError::Specification(_)));
            assert_eq!(err.info().code, "experiment.name");
        }
    }

    #[test]
    fn environment_keys_must_be_identifiers() {
        let spec = ExperimentSpec::new(
            "demo",
            vec![ComponentSpec::new("sim", "x").env("A=1 B", "x")],
        );
        let err = spec.validate().expect_err("bad key");
        assert_eq!(err.info().code, "experiment.env-key");
        assert_eq!(err.info().context["component"], "sim");

        let spec = ExperimentSpec::new(
            "demo",
            vec![ComponentSpec::new("sim", "x").env("_OMP_2", "x")],
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn non_finite_parameter_values_fail() {
        let spec = ExperimentSpec::new("demo", vec![ComponentSpec::new("sim", "x")]).with_group(
            SweepGroup::zip("rates", vec![Parameter::new("rate", [0.5, f64::NAN])]),
        );
        let err = spec.validate().expect_err("nan");
        assert_eq!(err.info().code, "experiment.non-finite");
        assert_eq!(err.info().context["parameter"], "rate");
    }

    #[test]
    fn edited_xml_inputs_cannot_be_symlinked() {
        let input = InputFile::new("adios.xml")
            .mode(TransferMode::Symlink)
            .edit_xml(XmlEdit::new("group/var[name=T]", "transform", "sz"));
        let spec = ExperimentSpec::new("demo", vec![ComponentSpec::new("sim", "x").input(input)]);
        let err = spec.validate().expect_err("symlink");
        assert_eq!(err.info().code, "input.xml-symlink");

        let input = InputFile::new("adios.xml").edit_xml(XmlEdit::new("group//var", "a", "b"));
        let spec = ExperimentSpec::new("demo", vec![ComponentSpec::new("sim", "x").input(input)]);
        assert_eq!(spec.validate().expect_err("path").info().code, "input.xml-path");
    }

    #[test]
    fn duplicate_components_fail() {
        let spec = ExperimentSpec::new(
            "demo",
            vec![ComponentSpec::new("a", "x"), ComponentSpec::new("a", "y")],
        );
        assert!(matches!(spec.validate(), Err(CampError::Specification(_))));
    }

    #[test]
    fn app_path_resolves_against_base_dir() {
        let mut spec = experiment().with_app_dir("apps");
        spec.base_dir = PathBuf::from("/work/specs");
        assert_eq!(spec.app_path(), PathBuf::from("/work/specs/apps"));
        spec.app_dir = PathBuf::from("/abs/apps");
        assert_eq!(spec.app_path(), PathBuf::from("/abs/apps"));
    }

    #[test]
    fn app_path_drops_current_dir_segments() {
        let mut spec = experiment();
        spec.base_dir = PathBuf::from("/work/specs");
        assert_eq!(spec.app_path(), PathBuf::from("/work/specs"));
        assert_eq!(
            spec.app_path().join("bin/sim").display().to_string(),
            "/work/specs/bin/sim"
        );
        spec.app_dir = PathBuf::from("./apps/./bin");
        assert_eq!(spec.app_path(), PathBuf::from("/work/specs/apps/bin"));
        spec.base_dir = PathBuf::new();
        spec.app_dir = PathBuf::from(".");
        assert_eq!(spec.app_path(), PathBuf::from("."));
    }
}
