#![deny(missing_docs)]
#![doc = "Campaign compiler for Cheetah: expands an experiment over a machine profile into run directories and submission scripts."]

/// Orchestration of rendering, materialization and scripting over every run.
pub mod compile;
pub mod manifest;
pub mod materialize;
pub mod render;
pub mod report;
pub mod script;
pub mod xml;

pub use compile::{compile, compile_from_paths, CampaignStage, CompileOpts, FailurePolicy};
pub use manifest::{
    read_manifest, ComponentManifest, PipelineDescription, PipelineRun, RunManifest,
    MANIFEST_FILE, PIPELINE_FILE, SCRIPT_FILE,
};
pub use materialize::{materialize_run, write_checked, write_script, MaterializeStats};
pub use render::{
    shell_join, shell_quote, InputOp, LaunchDescription, RenderedPostProcess, RenderedRun,
    RenderedXmlEdit, Renderer, ResolvedResources,
};
pub use report::{
    CampaignMarker, CampaignReport, RunReport, RunStage, RunStatus, CAMPAIGN_FILE, REPORT_FILE,
    SUBMIT_ALL_FILE, SUMMARY_FILE,
};
pub use script::render_script;
pub use xml::apply_xml_edits;
