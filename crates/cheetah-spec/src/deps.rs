use std::collections::{BTreeMap, BTreeSet};

use cheetah_core::errors::{CampError, ErrorInfo};

use crate::component::{ComponentSpec, DependencyKind};

/// Validated dependency relation between the components of an experiment.
///
/// Indices refer to positions in the experiment's component list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    order: Vec<usize>,
    stages: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Checks references and acyclicity, then computes launch stages.
    pub fn new(components: &[ComponentSpec]) -> Result<Self, CampError> {
        let index: BTreeMap<&str, usize> = components
            .iter()
            .enumerate()
            .map(|(idx, component)| (component.name.as_str(), idx))
            .collect();

        let mut preds: Vec<Vec<(usize, DependencyKind)>> = vec![Vec::new(); components.len()];
        for (idx, component) in components.iter().enumerate() {
            for dep in &component.depends_on {
                let Some(&target) = index.get(dep.component.as_str()) else {
                    return Err(CampError::Specification(
                        ErrorInfo::new(
                            "deps.unknown-component",
                            "dependency names a component that is not declared",
                        )
                        .with_context("component", &component.name)
                        .with_context("depends_on", &dep.component),
                    ));
                };
                if target == idx {
                    return Err(CampError::Specification(
                        ErrorInfo::new("deps.self", "component depends on itself")
                            .with_context("component", &component.name),
                    ));
                }
                preds[idx].push((target, dep.after));
            }
        }

        let order = topological_order(components, &preds)?;

        let mut stage_of = vec![0usize; components.len()];
        for &idx in &order {
            stage_of[idx] = preds[idx]
                .iter()
                .map(|&(pred, kind)| match kind {
                    DependencyKind::Complete => stage_of[pred] + 1,
                    DependencyKind::Start => stage_of[pred],
                })
                .max()
                .unwrap_or(0);
        }
        let stage_count = stage_of.iter().copied().max().map_or(0, |max| max + 1);
        let mut stages = vec![Vec::new(); stage_count];
        for &idx in &order {
            stages[stage_of[idx]].push(idx);
        }
        Ok(Self { order, stages })
    }

    /// Component indices in a dependency-respecting order; ties keep declaration order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Groups of components launched together before a barrier.
    pub fn stages(&self) -> &[Vec<usize>] {
        &self.stages
    }
}

fn topological_order(
    components: &[ComponentSpec],
    preds: &[Vec<(usize, DependencyKind)>],
) -> Result<Vec<usize>, CampError> {
    let mut remaining: Vec<usize> = preds
        .iter()
        .map(|edges| edges.iter().map(|&(pred, _)| pred).collect::<BTreeSet<_>>().len())
        .collect();
    let mut succs: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    for (idx, edges) in preds.iter().enumerate() {
        for &(pred, _) in edges {
            succs[pred].insert(idx);
        }
    }
    let mut ready: BTreeSet<usize> = (0..components.len())
        .filter(|&idx| remaining[idx] == 0)
        .collect();
    let mut order = Vec::with_capacity(components.len());
    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &succ in &succs[idx] {
            remaining[succ] -= 1;
            if remaining[succ] == 0 {
                ready.insert(succ);
            }
        }
    }
    if order.len() != components.len() {
        let cycle: Vec<&str> = (0..components.len())
            .filter(|&idx| remaining[idx] > 0)
            .map(|idx| components[idx].name.as_str())
            .collect();
        return Err(CampError::Specification(
            ErrorInfo::new("deps.cycle", "component dependencies form a cycle")
                .with_context("components", cycle.join(",")),
        ));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(components: &[ComponentSpec], stages: &[Vec<usize>]) -> Vec<Vec<String>> {
        stages
            .iter()
            .map(|stage| stage.iter().map(|&idx| components[idx].name.clone()).collect())
            .collect()
    }

    #[test]
    fn independent_components_share_one_stage() {
        let components = vec![ComponentSpec::new("a", "a"), ComponentSpec::new("b", "b")];
        let graph = DependencyGraph::new(&components).expect("graph");
        assert_eq!(names(&components, graph.stages()), vec![vec!["a", "b"]]);
    }

    #[test]
    fn complete_edges_split_stages_and_start_edges_do_not() {
        let components = vec![
            ComponentSpec::new("analysis", "an").after_complete("sim"),
            ComponentSpec::new("sim", "sim"),
            ComponentSpec::new("stager", "st").after_start("sim"),
        ];
        let graph = DependencyGraph::new(&components).expect("graph");
        assert_eq!(
            names(&components, graph.stages()),
            vec![vec!["sim", "stager"], vec!["analysis"]]
        );
        assert_eq!(graph.order(), &[1, 0, 2]);
    }

    #[test]
    fn two_component_cycle_is_a_specification_error() {
        let components = vec![
            ComponentSpec::new("a", "a").after_complete("b"),
            ComponentSpec::new("b", "b").after_complete("a"),
        ];
        let err = DependencyGraph::new(&components).expect_err("cycle");
        assert!(matches!(err, CampError::Specification(ref info) if info.code == "deps.cycle"));
        assert_eq!(err.info().context["components"], "a,b");
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let components = vec![ComponentSpec::new("a", "a").after_start("ghost")];
        let err = DependencyGraph::new(&components).expect_err("unknown");
        assert_eq!(err.info().code, "deps.unknown-component");
    }
}
