use cheetah_core::errors::{CampError, ErrorInfo};
use serde::{Deserialize, Serialize};

/// MPI job launcher description (`mpiexec`, `aprun`, `srun`, ...).
///
/// Only the flags a launcher understands are set; a missing flag means the
/// corresponding value is not passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherSpec {
    /// Launcher executable.
    pub exe: String,
    /// Flag preceding the total process count.
    pub nprocs_flag: String,
    /// Flag preceding the node count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_flag: Option<String>,
    /// Flag preceding the processes-per-node count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_per_node_flag: Option<String>,
    /// Flag preceding the threads-per-process count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads_flag: Option<String>,
    /// Arguments inserted after the counts, before the executable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl LauncherSpec {
    /// Launcher with only a process-count flag.
    pub fn new(exe: impl Into<String>, nprocs_flag: impl Into<String>) -> Self {
        Self {
            exe: exe.into(),
            nprocs_flag: nprocs_flag.into(),
            nodes_flag: None,
            tasks_per_node_flag: None,
            threads_flag: None,
            extra_args: Vec::new(),
        }
    }

    /// Prefixes `command` with the launcher and its resource flags.
    pub fn wrap(&self, layout: &NodeLayout, threads: Option<u32>, command: &[String]) -> Vec<String> {
        let mut argv = vec![
            self.exe.clone(),
            self.nprocs_flag.clone(),
            layout.nprocs.to_string(),
        ];
        if let Some(flag) = &self.nodes_flag {
            argv.push(flag.clone());
            argv.push(layout.nodes.to_string());
        }
        if let Some(flag) = &self.tasks_per_node_flag {
            argv.push(flag.clone());
            argv.push(layout.tasks_per_node.to_string());
        }
        if let (Some(flag), Some(threads)) = (&self.threads_flag, threads) {
            argv.push(flag.clone());
            argv.push(threads.to_string());
        }
        argv.extend(self.extra_args.iter().cloned());
        argv.extend(command.iter().cloned());
        argv
    }
}

/// Placement of one component's processes onto nodes.
///
/// Components never share nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLayout {
    /// Total processes.
    pub nprocs: u32,
    /// Nodes occupied.
    pub nodes: u32,
    /// Processes placed on each node.
    pub tasks_per_node: u32,
}

impl NodeLayout {
    /// Derives the layout from the request and the machine's processes per node.
    ///
    /// An explicit node count wins; otherwise nodes are filled up to
    /// `tasks_per_node` (or the machine limit) and the count is rounded up.
    pub fn derive(
        nprocs: u32,
        tasks_per_node: Option<u32>,
        nodes: Option<u32>,
        machine_ppn: u32,
    ) -> Result<Self, CampError> {
        if let Some(tpn) = tasks_per_node {
            if tpn > machine_ppn {
                return Err(CampError::ResourceSpec(
                    ErrorInfo::new(
                        "layout.tasks-per-node",
                        "tasks per node exceeds the machine's processes per node",
                    )
                    .with_context("tasks_per_node", tpn.to_string())
                    .with_context("processes_per_node", machine_ppn.to_string()),
                ));
            }
        }
        if let Some(nodes) = nodes {
            let tasks_per_node = nprocs.div_ceil(nodes).max(1);
            if tasks_per_node > machine_ppn {
                return Err(CampError::ResourceSpec(
                    ErrorInfo::new(
                        "layout.too-few-nodes",
                        "requested nodes cannot hold every process",
                    )
                    .with_context("nprocs", nprocs.to_string())
                    .with_context("nodes", nodes.to_string())
                    .with_context("processes_per_node", machine_ppn.to_string()),
                ));
            }
            return Ok(Self {
                nprocs,
                nodes,
                tasks_per_node,
            });
        }
        let tasks_per_node = tasks_per_node.unwrap_or(machine_ppn).min(nprocs).max(1);
        Ok(Self {
            nprocs,
            nodes: nprocs.div_ceil(tasks_per_node),
            tasks_per_node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_nodes_up_to_machine_limit() {
        let layout = NodeLayout::derive(40, None, None, 16).expect("layout");
        assert_eq!(layout.nodes, 3);
        assert_eq!(layout.tasks_per_node, 16);

        let small = NodeLayout::derive(4, None, None, 16).expect("layout");
        assert_eq!((small.nodes, small.tasks_per_node), (1, 4));
    }

    #[test]
    fn explicit_tasks_per_node_spreads_processes() {
        let layout = NodeLayout::derive(16, Some(4), None, 16).expect("layout");
        assert_eq!((layout.nodes, layout.tasks_per_node), (4, 4));
        let err = NodeLayout::derive(16, Some(32), None, 16).expect_err("too dense");
        assert!(matches!(err, CampError::ResourceSpec(_)));
    }

    #[test]
    fn explicit_nodes_fix_the_count() {
        let layout = NodeLayout::derive(10, None, Some(4), 16).expect("layout");
        assert_eq!((layout.nodes, layout.tasks_per_node), (4, 3));
        assert!(NodeLayout::derive(64, None, Some(2), 16).is_err());
    }

    #[test]
    fn wrap_emits_only_known_flags() {
        let aprun = LauncherSpec {
            tasks_per_node_flag: Some("-N".into()),
            threads_flag: Some("-d".into()),
            ..LauncherSpec::new("aprun", "-n")
        };
        let layout = NodeLayout::derive(32, None, None, 16).expect("layout");
        let argv = aprun.wrap(&layout, Some(2), &["./sim".to_string(), "--fast".to_string()]);
        assert_eq!(argv, vec!["aprun", "-n", "32", "-N", "16", "-d", "2", "./sim", "--fast"]);

        let mpiexec = LauncherSpec::new("mpiexec", "-n");
        let argv = mpiexec.wrap(&layout, Some(2), &["./sim".to_string()]);
        assert_eq!(argv, vec!["mpiexec", "-n", "32", "./sim"]);
    }
}
