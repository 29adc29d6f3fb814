use std::collections::{BTreeMap, BTreeSet};

use cheetah_core::errors::{CampError, ErrorInfo};

use crate::param::{Parameter, ParameterKind, RunBindings, Scalar, SweepGroup, SweepMode};

fn spec_error(code: &str, message: impl Into<String>, group: &SweepGroup) -> CampError {
    CampError::Specification(ErrorInfo::new(code, message).with_context("group", &group.name))
}

/// One independent dimension of the sweep: a set of zipped value columns.
#[derive(Debug, Clone)]
struct Axis {
    len: usize,
    columns: Vec<Vec<Scalar>>,
}

/// Position of a declared parameter inside the axis table.
#[derive(Debug, Clone)]
struct Slot {
    name: String,
    axis: usize,
    column: usize,
}

/// Lazy, deterministic expansion of sweep groups into run bindings.
///
/// Groups combine as a Cartesian product, first group outermost. Runs are
/// produced by decoding a mixed-radix counter, so the product never has to be
/// held in memory and any index can be produced directly with
/// [`SweepExpander::bindings_at`].
#[derive(Debug, Clone)]
pub struct SweepExpander {
    axes: Vec<Axis>,
    slots: Vec<Slot>,
    total: usize,
    next: usize,
}

impl SweepExpander {
    /// Validates the groups and prepares the expansion.
    pub fn new(groups: &[SweepGroup]) -> Result<Self, CampError> {
        let mut axes = Vec::new();
        let mut slots = Vec::new();
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for group in groups {
            validate_group(group)?;
            for param in &group.parameters {
                if let Some(previous) = owners.insert(&param.name, &group.name) {
                    return Err(CampError::DuplicateParameter(
                        ErrorInfo::new(
                            "sweep.duplicate-parameter",
                            format!("parameter `{}` is declared by more than one group", param.name),
                        )
                        .with_context("parameter", &param.name)
                        .with_context("first_group", previous)
                        .with_context("second_group", &group.name),
                    ));
                }
            }
            push_group_axes(group, &mut axes, &mut slots)?;
        }
        let mut total = 1usize;
        for axis in &axes {
            total = total.checked_mul(axis.len).ok_or_else(|| {
                CampError::Specification(
                    ErrorInfo::new("sweep.too-large", "sweep size overflows the run counter")
                        .with_hint("split the experiment into several campaigns"),
                )
            })?;
        }
        Ok(Self {
            axes,
            slots,
            total,
            next: 0,
        })
    }

    /// Total number of runs in the full product.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Parameter names in binding order.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.name.as_str())
    }

    /// Decodes the bindings for the run at `index` without iterating.
    pub fn bindings_at(&self, index: usize) -> Option<RunBindings> {
        if index >= self.total {
            return None;
        }
        let mut digits = vec![0usize; self.axes.len()];
        let mut rest = index;
        for (pos, axis) in self.axes.iter().enumerate().rev() {
            digits[pos] = rest % axis.len;
            rest /= axis.len;
        }
        let mut bindings = RunBindings::new();
        for slot in &self.slots {
            let value = self.axes[slot.axis].columns[slot.column][digits[slot.axis]].clone();
            bindings.insert(slot.name.clone(), value);
        }
        Some(bindings)
    }
}

impl Iterator for SweepExpander {
    type Item = RunBindings;

    fn next(&mut self) -> Option<Self::Item> {
        let bindings = self.bindings_at(self.next)?;
        self.next += 1;
        Some(bindings)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        self.next = self.next.saturating_add(n).min(self.total);
        self.next()
    }
}

impl ExactSizeIterator for SweepExpander {}

/// Number of rows a single group contributes to the product.
pub fn group_row_count(group: &SweepGroup) -> Result<usize, CampError> {
    validate_group(group)?;
    let mut axes = Vec::new();
    let mut slots = Vec::new();
    push_group_axes(group, &mut axes, &mut slots)?;
    axes.iter().try_fold(1usize, |acc, axis| {
        acc.checked_mul(axis.len).ok_or_else(|| {
            spec_error("sweep.too-large", "group size overflows the run counter", group)
        })
    })
}

fn validate_group(group: &SweepGroup) -> Result<(), CampError> {
    if group.parameters.is_empty() {
        return Err(spec_error(
            "sweep.empty-group",
            "sweep group declares no parameters",
            group,
        ));
    }
    let mut seen = BTreeSet::new();
    for param in &group.parameters {
        if param.name.trim().is_empty() {
            return Err(spec_error(
                "sweep.unnamed-parameter",
                "parameter name must not be empty",
                group,
            ));
        }
        if param.values.is_empty() {
            return Err(CampError::Specification(
                ErrorInfo::new("sweep.empty-values", "parameter has an empty value list")
                    .with_context("group", &group.name)
                    .with_context("parameter", &param.name),
            ));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(CampError::Specification(
                ErrorInfo::new(
                    "sweep.duplicate-in-group",
                    "parameter name repeated inside one group",
                )
                .with_context("group", &group.name)
                .with_context("parameter", &param.name),
            ));
        }
    }
    Ok(())
}

fn push_group_axes(
    group: &SweepGroup,
    axes: &mut Vec<Axis>,
    slots: &mut Vec<Slot>,
) -> Result<(), CampError> {
    match group.mode {
        SweepMode::Zip => {
            let axis = axes.len();
            let refs: Vec<&Parameter> = group.parameters.iter().collect();
            axes.push(zipped_axis(group, &refs)?);
            for (column, param) in group.parameters.iter().enumerate() {
                slots.push(Slot {
                    name: param.name.clone(),
                    axis,
                    column,
                });
            }
        }
        SweepMode::Product => {
            // Axis order follows the first declaration of each discrete
            // parameter or link label.
            let mut link_axes: BTreeMap<&str, usize> = BTreeMap::new();
            let mut members: Vec<Vec<&Parameter>> = Vec::new();
            let mut placement = Vec::with_capacity(group.parameters.len());
            for param in &group.parameters {
                let local = match param.kind() {
                    ParameterKind::Discrete => {
                        members.push(vec![param]);
                        members.len() - 1
                    }
                    ParameterKind::Linked(label) => match link_axes.get(label) {
                        Some(&local) => {
                            members[local].push(param);
                            local
                        }
                        None => {
                            members.push(vec![param]);
                            link_axes.insert(label, members.len() - 1);
                            members.len() - 1
                        }
                    },
                };
                placement.push((local, members[local].len() - 1));
            }
            let base = axes.len();
            for params in &members {
                axes.push(zipped_axis(group, params)?);
            }
            for (param, (local, column)) in group.parameters.iter().zip(placement) {
                slots.push(Slot {
                    name: param.name.clone(),
                    axis: base + local,
                    column,
                });
            }
        }
    }
    Ok(())
}

fn zipped_axis(group: &SweepGroup, params: &[&Parameter]) -> Result<Axis, CampError> {
    let len = params[0].values.len();
    if let Some(odd) = params.iter().find(|param| param.values.len() != len) {
        return Err(CampError::Specification(
            ErrorInfo::new(
                "sweep.zip-length",
                "zipped parameters must have value lists of equal length",
            )
            .with_context("group", &group.name)
            .with_context("parameter", &odd.name)
            .with_context("expected", len.to_string())
            .with_context("found", odd.values.len().to_string()),
        ));
    }
    Ok(Axis {
        len,
        columns: params.iter().map(|param| param.values.clone()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(bindings: &RunBindings) -> Vec<String> {
        bindings
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect()
    }

    #[test]
    fn product_group_enumerates_outer_to_inner() {
        let group = SweepGroup::product(
            "grid",
            vec![
                Parameter::new("size", [10, 20]),
                Parameter::new("procs", [4, 8]),
            ],
        );
        let runs: Vec<_> = SweepExpander::new(&[group]).expect("expander").collect();
        let rendered: Vec<Vec<String>> = runs.iter().map(pairs).collect();
        assert_eq!(
            rendered,
            vec![
                vec!["size=10", "procs=4"],
                vec!["size=10", "procs=8"],
                vec!["size=20", "procs=4"],
                vec!["size=20", "procs=8"],
            ]
        );
    }

    #[test]
    fn zip_group_pairs_rows() {
        let group = SweepGroup::zip(
            "rates",
            vec![
                Parameter::new("rate", [1, 2, 3]),
                Parameter::new("offset", [0, 10, 20]),
            ],
        );
        let runs: Vec<_> = SweepExpander::new(&[group]).expect("expander").collect();
        assert_eq!(runs.len(), 3);
        assert_eq!(pairs(&runs[2]), vec!["rate=3", "offset=20"]);
    }

    #[test]
    fn linked_parameters_share_an_axis_in_product_groups() {
        let group = SweepGroup::product(
            "mixed",
            vec![
                Parameter::new("nx", [8, 16]).linked("mesh"),
                Parameter::new("solver", ["cg", "gmres", "bicg"]),
                Parameter::new("ny", [4, 8]).linked("mesh"),
            ],
        );
        assert_eq!(group_row_count(&group).expect("rows"), 6);
        let expander = SweepExpander::new(&[group]).expect("expander");
        assert_eq!(expander.total(), 6);
        let names: Vec<_> = expander.parameter_names().collect();
        assert_eq!(names, vec!["nx", "solver", "ny"]);
        let last = expander.bindings_at(5).expect("index 5");
        assert_eq!(pairs(&last), vec!["nx=16", "solver=bicg", "ny=8"]);
    }

    #[test]
    fn empty_group_list_yields_single_empty_run() {
        let runs: Vec<_> = SweepExpander::new(&[]).expect("expander").collect();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].is_empty());
    }

    #[test]
    fn zero_length_values_are_rejected() {
        let group = SweepGroup::zip("g", vec![Parameter::new("a", Vec::<i64>::new())]);
        let err = SweepExpander::new(&[group]).expect_err("empty values");
        assert!(matches!(err, CampError::Specification(ref info) if info.code == "sweep.empty-values"));
    }

    #[test]
    fn mismatched_zip_lengths_are_rejected() {
        let group = SweepGroup::zip(
            "g",
            vec![
                Parameter::new("A", [1, 2, 3]),
                Parameter::new("B", ["x", "y"]),
            ],
        );
        let err = SweepExpander::new(&[group]).expect_err("zip mismatch");
        assert_eq!(err.info().code, "sweep.zip-length");
        assert_eq!(err.info().context.get("parameter").map(String::as_str), Some("B"));
    }

    #[test]
    fn duplicate_names_across_groups_fail() {
        let groups = [
            SweepGroup::zip("first", vec![Parameter::new("size", [1])]),
            SweepGroup::zip("second", vec![Parameter::new("size", [2])]),
        ];
        let err = SweepExpander::new(&groups).expect_err("duplicate");
        assert!(matches!(err, CampError::DuplicateParameter(_)));
    }

    #[test]
    fn nth_skips_without_losing_order() {
        let group = SweepGroup::product(
            "g",
            vec![Parameter::new("a", [1, 2, 3]), Parameter::new("b", [1, 2])],
        );
        let mut expander = SweepExpander::new(&[group]).expect("expander");
        let fourth = expander.nth(3).expect("fourth");
        assert_eq!(pairs(&fourth), vec!["a=2", "b=2"]);
        assert_eq!(expander.len(), 2);
        assert!(expander.nth(10).is_none());
    }
}
