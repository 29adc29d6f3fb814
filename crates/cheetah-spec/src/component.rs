use std::collections::BTreeMap;

use cheetah_core::errors::{CampError, ErrorInfo};
use serde::{Deserialize, Serialize};

/// A count that is either fixed or derived from a parameter template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    /// Literal count.
    Count(i64),
    /// Template such as `"{procs}"`, resolved per run.
    Template(String),
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Quantity::Count(value)
    }
}

impl From<i32> for Quantity {
    fn from(value: i32) -> Self {
        Quantity::Count(i64::from(value))
    }
}

impl From<&str> for Quantity {
    fn from(value: &str) -> Self {
        Quantity::Template(value.to_string())
    }
}

/// Logical resources requested by one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Number of processes (MPI ranks).
    #[serde(default = "ResourceRequest::default_nprocs")]
    pub nprocs: Quantity,
    /// Explicit node count; derived from the node layout when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Quantity>,
    /// Ranks placed on each node; defaults to the machine's processes per node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_per_node: Option<Quantity>,
    /// OpenMP threads per rank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<Quantity>,
}

impl ResourceRequest {
    fn default_nprocs() -> Quantity {
        Quantity::Count(1)
    }
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            nprocs: Self::default_nprocs(),
            nodes: None,
            tasks_per_node: None,
            threads: None,
        }
    }
}

/// Where a component runs relative to its run directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WorkdirPolicy {
    /// Run directly in the run directory, shared with the other components.
    #[default]
    Shared,
    /// Run in `<run dir>/<component name>/`.
    Subdir,
}

/// Whether an input lands in the run directory or the component's workdir.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InputScope {
    /// Placed in the component working directory.
    #[default]
    Component,
    /// Placed in the run directory, visible to every component.
    Shared,
}

/// How an input is transferred into the run tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    /// Byte copy (directories copied recursively).
    Copy,
    /// Symbolic link to the absolute source path.
    Symlink,
}

/// One parsed step of an [`XmlEdit`] path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlStep {
    /// Element name.
    pub tag: String,
    /// Required `(attribute, value)` pair, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<(String, String)>,
}

impl XmlStep {
    fn parse(step: &str) -> Option<Self> {
        let (tag, filter) = match step.split_once('[') {
            None => (step, None),
            Some((tag, rest)) => {
                let (key, value) = rest.strip_suffix(']')?.split_once('=')?;
                let key = key.trim().trim_start_matches('@');
                let value = value.trim().trim_matches(|ch| ch == '"' || ch == '\'');
                if key.is_empty() {
                    return None;
                }
                (tag, Some((key.to_string(), value.to_string())))
            }
        };
        let tag = tag.trim();
        if tag.is_empty() || tag.contains([']', '=', ' ']) {
            return None;
        }
        Some(Self {
            tag: tag.to_string(),
            filter,
        })
    }
}

/// Attribute rewrite applied to a copied XML input, such as selecting an
/// I/O engine or a compression transform per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlEdit {
    /// Element path below the document root. Steps are separated by `/` and
    /// may filter on one attribute: `adios-group[name=heat]/global-bounds/var[name=T]`.
    pub path: String,
    /// Attribute set on every matching element.
    pub attribute: String,
    /// Value template, rendered per run.
    pub value: String,
}

impl XmlEdit {
    /// Creates an edit.
    pub fn new(
        path: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Parses the element path.
    pub fn steps(&self) -> Result<Vec<XmlStep>, CampError> {
        self.path
            .split('/')
            .map(XmlStep::parse)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                CampError::Specification(
                    ErrorInfo::new("input.xml-path", "XML edit path is malformed")
                        .with_context("path", &self.path)
                        .with_hint("use tag or tag[attribute=value] steps separated by '/'"),
                )
            })
    }
}

/// Input file distributed into each run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    /// Source path template, relative to the application directory unless absolute.
    pub source: String,
    /// Destination path template relative to the scope directory; defaults to the
    /// source file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    /// Target directory for the input.
    #[serde(default)]
    pub scope: InputScope,
    /// Transfer mode; the machine profile decides when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TransferMode>,
    /// Attribute edits applied to the copied file; forces a copy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xml_edits: Vec<XmlEdit>,
}

impl InputFile {
    /// Input copied under its own file name into the component workdir.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: None,
            scope: InputScope::Component,
            mode: None,
            xml_edits: Vec::new(),
        }
    }

    /// Sets the destination path.
    pub fn to(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    /// Places the input in the shared run directory.
    pub fn shared(mut self) -> Self {
        self.scope = InputScope::Shared;
        self
    }

    /// Forces the transfer mode.
    pub fn mode(mut self, mode: TransferMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Appends an XML attribute edit.
    pub fn edit_xml(mut self, edit: XmlEdit) -> Self {
        self.xml_edits.push(edit);
        self
    }
}

/// Ordering constraint against another component of the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    /// Start only after the other component has exited.
    #[default]
    Complete,
    /// Start only after the other component has been launched.
    Start,
}

/// Dependency edge declared on the dependent component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Name of the component that must complete or start first.
    pub component: String,
    /// Constraint kind.
    #[serde(default)]
    pub after: DependencyKind,
}

/// One executable unit of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Unique component name; also the subdirectory name under [`WorkdirPolicy::Subdir`].
    pub name: String,
    /// Executable path template, relative to the application directory unless absolute.
    pub exe: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variable templates exported before launch.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Requested resources.
    #[serde(default)]
    pub resources: ResourceRequest,
    /// Working directory layout.
    #[serde(default)]
    pub workdir: WorkdirPolicy,
    /// Inputs distributed into each run.
    #[serde(default)]
    pub inputs: Vec<InputFile>,
    /// Components this one waits for.
    #[serde(default)]
    pub depends_on: Vec<Dependency>,
    /// Per-run timeout in seconds handed to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Seconds the executor sleeps after launching this component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_after: Option<u64>,
}

impl ComponentSpec {
    /// Component with a single process, no arguments and a shared workdir.
    pub fn new(name: impl Into<String>, exe: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exe: exe.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            resources: ResourceRequest::default(),
            workdir: WorkdirPolicy::Shared,
            inputs: Vec::new(),
            depends_on: Vec::new(),
            timeout: None,
            sleep_after: None,
        }
    }

    /// Appends an argument template.
    pub fn arg(mut self, template: impl Into<String>) -> Self {
        self.args.push(template.into());
        self
    }

    /// Appends several argument templates.
    pub fn args<I, S>(mut self, templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(templates.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable template.
    pub fn env(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.env.insert(key.into(), template.into());
        self
    }

    /// Sets the process count.
    pub fn nprocs(mut self, nprocs: impl Into<Quantity>) -> Self {
        self.resources.nprocs = nprocs.into();
        self
    }

    /// Sets the explicit node count.
    pub fn nodes(mut self, nodes: impl Into<Quantity>) -> Self {
        self.resources.nodes = Some(nodes.into());
        self
    }

    /// Sets the thread count per process.
    pub fn threads(mut self, threads: impl Into<Quantity>) -> Self {
        self.resources.threads = Some(threads.into());
        self
    }

    /// Runs the component in its own subdirectory.
    pub fn subdir(mut self) -> Self {
        self.workdir = WorkdirPolicy::Subdir;
        self
    }

    /// Adds an input file.
    pub fn input(mut self, input: InputFile) -> Self {
        self.inputs.push(input);
        self
    }

    /// Waits for `component` to exit before starting.
    pub fn after_complete(mut self, component: impl Into<String>) -> Self {
        self.depends_on.push(Dependency {
            component: component.into(),
            after: DependencyKind::Complete,
        });
        self
    }

    /// Waits for `component` to be launched before starting.
    pub fn after_start(mut self, component: impl Into<String>) -> Self {
        self.depends_on.push(Dependency {
            component: component.into(),
            after: DependencyKind::Start,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_paths_parse_tags_and_filters() {
        let edit = XmlEdit::new(
            "adios-group[@name=\"heat\"]/global-bounds/var[name=T]",
            "transform",
            "{codec}",
        );
        let steps = edit.steps().expect("steps");
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].tag, "adios-group");
        assert_eq!(steps[0].filter, Some(("name".to_string(), "heat".to_string())));
        assert_eq!(steps[1].filter, None);
        assert_eq!(steps[2].filter, Some(("name".to_string(), "T".to_string())));
    }

    #[test]
    fn malformed_xml_paths_are_specification_errors() {
        for path in ["", "a//b", "var[name=T", "var[=T]", "[name=T]"] {
            let err = XmlEdit::new(path, "transform", "sz").steps().expect_err(path);
            assert_eq!(err.info().code, "input.xml-path");
        }
    }

    #[test]
    fn yaml_component_uses_defaults() {
        let yaml = r#"
name: sim
exe: bin/sim
args: ["--size", "{size}"]
resources:
  nprocs: "{procs}"
inputs:
  - source: inputs/mesh.dat
  - source: shared.cfg
    scope: shared
    mode: symlink
depends_on:
  - component: prep
"#;
        let component: ComponentSpec = serde_yaml::from_str(yaml).expect("component");
        assert_eq!(component.resources.nprocs, Quantity::Template("{procs}".into()));
        assert_eq!(component.workdir, WorkdirPolicy::Shared);
        assert_eq!(component.inputs[0].scope, InputScope::Component);
        assert_eq!(component.inputs[1].mode, Some(TransferMode::Symlink));
        assert_eq!(component.depends_on[0].after, DependencyKind::Complete);
    }
}
