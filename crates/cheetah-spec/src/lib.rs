#![deny(missing_docs)]
#![doc = "Experiment specification model for Cheetah campaigns: parameters, sweep expansion, components and their dependencies."]

/// Component descriptions: executables, resources, inputs and dependencies.
pub mod component;
/// Dependency validation and launch staging.
pub mod deps;
/// Experiment specification, validation and YAML loading.
pub mod experiment;
/// Parameter values, parameters, sweep groups and run bindings.
pub mod param;
/// Lazy Cartesian/zip sweep expansion.
pub mod sweep;
pub mod template;

pub use component::{
    ComponentSpec, Dependency, DependencyKind, InputFile, InputScope, Quantity, ResourceRequest,
    TransferMode, WorkdirPolicy, XmlEdit, XmlStep,
};
pub use deps::DependencyGraph;
pub use experiment::{
    load_experiment, ExclusionRule, ExperimentPlan, ExperimentSpec, JobOverrides, PostProcess, Run,
};
pub use param::{Parameter, ParameterKind, RunBindings, Scalar, SweepGroup, SweepMode};
pub use sweep::{group_row_count, SweepExpander};
