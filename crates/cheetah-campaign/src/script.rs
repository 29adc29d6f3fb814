//! Submission script assembly.

use std::fmt::Write as _;

use cheetah_machine::MachineProfile;

use crate::render::{shell_join, shell_quote, LaunchDescription, RenderedRun};

/// Renders `submit.sh` for one run.
///
/// Output is a pure function of its inputs; `generated_at` adds a timestamp
/// comment only when given.
pub fn render_script(
    run: &RenderedRun,
    machine: &MachineProfile,
    generated_at: Option<&str>,
) -> String {
    let adapter = machine.adapter();
    let mut out = String::from("#!/bin/bash\n");
    for line in adapter.directives(&run.job, &machine.extra_directives) {
        out.push_str(&line);
        out.push('\n');
    }
    out.push('\n');
    let _ = writeln!(out, "# cheetah run {} on {}", run.dir_name, machine.name);
    if let Some(stamp) = generated_at {
        let _ = writeln!(out, "# generated {stamp}");
    }
    for line in &machine.submit_env {
        out.push_str(line);
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "RUN_DIR={}",
        shell_quote(&run.dir.display().to_string())
    );
    out.push_str("cd \"$RUN_DIR\" || exit 1\n");

    for (stage_idx, stage) in run.stages.iter().enumerate() {
        let _ = writeln!(out, "\n# stage {stage_idx}");
        let background = stage.len() > 1;
        for component in stage.iter().filter_map(|&idx| run.components.get(idx)) {
            push_launch(&mut out, component, background);
        }
        if background {
            out.push_str("wait\n");
        }
    }

    if let Some(post) = &run.post_process {
        out.push_str("\n# post-process\n");
        let command = format!("(cd \"$RUN_DIR\" && {})", shell_join(&post.command));
        if post.stop_on_failure {
            out.push_str("STATUS=0\n");
            for component in &run.components {
                let _ = writeln!(
                    out,
                    "[ \"$(cat \"$RUN_DIR\"/{} 2>/dev/null)\" = 0 ] || STATUS=1",
                    shell_quote(&return_path(component))
                );
            }
            let _ = writeln!(out, "if [ \"$STATUS\" -eq 0 ]; then\n    {command}\nfi");
        } else {
            let _ = writeln!(out, "{command}");
        }
    }
    out
}

fn return_path(component: &LaunchDescription) -> String {
    component
        .workdir
        .join(component.return_file())
        .display()
        .to_string()
}

fn push_launch(out: &mut String, component: &LaunchDescription, background: bool) {
    let _ = writeln!(out, "(");
    let _ = writeln!(
        out,
        "    cd \"$RUN_DIR\"/{} || exit 1",
        shell_quote(&component.workdir.display().to_string())
    );
    if let Some(threads) = component.resources.threads {
        let _ = writeln!(out, "    export OMP_NUM_THREADS={threads}");
    }
    for (key, value) in &component.env {
        let _ = writeln!(out, "    export {key}={}", shell_quote(value));
    }
    let timeout = component
        .timeout
        .map(|secs| format!("timeout {secs} "))
        .unwrap_or_default();
    let _ = writeln!(
        out,
        "    {timeout}{} > {} 2> {}",
        shell_join(&component.command),
        shell_quote(&component.stdout_file()),
        shell_quote(&component.stderr_file())
    );
    let _ = writeln!(
        out,
        "    echo $? > {}",
        shell_quote(&component.return_file())
    );
    if background {
        out.push_str(") &\n");
    } else {
        out.push_str(")\n");
    }
    if let Some(secs) = component.sleep_after {
        let _ = writeln!(out, "sleep {secs}");
    }
}
