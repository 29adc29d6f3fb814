#![deny(missing_docs)]
#![doc = "Machine profiles, MPI launcher wrapping and batch scheduler adapters for Cheetah campaigns."]

/// Profiles shipped with the crate.
pub mod builtin;
/// MPI launcher flags and node layout.
pub mod launcher;
/// Machine profile model and loading.
pub mod profile;
/// Scheduler kinds and their directive syntax.
pub mod scheduler;

pub use builtin::{builtin_names, builtin_profile};
pub use launcher::{LauncherSpec, NodeLayout};
pub use profile::{load_machine, FilesystemConventions, JobDefaults, MachineProfile};
pub use scheduler::{
    format_walltime, CobaltAdapter, DirectAdapter, JobRequest, PbsAdapter, SchedulerAdapter,
    SchedulerKind, SlurmAdapter,
};
