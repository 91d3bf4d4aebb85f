//! Dependency resolution against a frozen snapshot index.
//!
//! Expands the requested package names into a [`BuildPlan`]: a topologically
//! ordered, duplicate-free sequence closed under the dependency relation.
//! Resolution is deterministic -- roots and dependency edges are visited in
//! name order, so two resolutions of the same input set yield byte-identical
//! plans.

use std::collections::{HashMap, HashSet, VecDeque};

use cranforge_schema::{IndexEntry, PackageIndex, PackageName};

/// Errors from resolving a requested package set. Both variants are fatal
/// for the whole batch: a partially resolvable request is reported, never
/// silently trimmed.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    /// A requested or transitively required package is absent from the
    /// snapshot.
    #[error("package '{0}' not found in snapshot index")]
    UnknownPackage(PackageName),

    /// The index contains a dependency cycle, which is an index-integrity
    /// fault in a pinned snapshot.
    #[error("circular dependency detected: {}", format_cycle(.0))]
    Cycle(Vec<PackageName>),
}

fn format_cycle(cycle: &[PackageName]) -> String {
    cycle
        .iter()
        .map(PackageName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A dependency-ordered build plan: every entry's dependencies appear
/// strictly before it, and the set is closed under the dependency relation
/// restricted to the requested roots.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    entries: Vec<IndexEntry>,
}

impl BuildPlan {
    /// The planned entries in build order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of packages in the plan.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the planned package names in build order.
    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.entries.iter().map(|e| &e.name)
    }

    /// Group the plan into layers of mutually independent packages using
    /// Kahn's algorithm: each layer's packages depend only on earlier
    /// layers, so everything within a layer may build in parallel. Layers
    /// are sorted by name for deterministic output.
    ///
    /// # Panics
    ///
    /// Panics if the plan's internal edge structure is inconsistent, which
    /// [`resolve`] never produces.
    pub fn layers(&self) -> Vec<Vec<PackageName>> {
        let in_plan: HashSet<&PackageName> = self.names().collect();

        let mut adjacency: HashMap<&PackageName, Vec<&PackageName>> = HashMap::new();
        let mut in_degree: HashMap<&PackageName, usize> =
            self.names().map(|n| (n, 0)).collect();

        for entry in &self.entries {
            for dep in entry.depends.iter().filter(|d| in_plan.contains(d)) {
                adjacency.entry(dep).or_default().push(&entry.name);
                *in_degree.get_mut(&entry.name).unwrap() += 1;
            }
        }

        let mut queue: Vec<&PackageName> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        queue.sort();
        let mut queue: VecDeque<&PackageName> = queue.into();

        let mut layers = Vec::new();
        while !queue.is_empty() {
            let mut layer = Vec::new();
            let mut next = Vec::new();

            while let Some(name) = queue.pop_front() {
                layer.push(name.clone());
                if let Some(dependents) = adjacency.get(name) {
                    for dependent in dependents {
                        let degree = in_degree.get_mut(dependent).unwrap();
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }

            layer.sort();
            layers.push(layer);
            next.sort();
            queue = next.into();
        }

        layers
    }
}

/// Resolve the requested names into a [`BuildPlan`] against `index`.
///
/// Depth-first post-order expansion with explicit visited/visiting sets, so
/// a cyclic index fails fast instead of overflowing the stack. Built-in
/// packages never appear as dependency edges (the parser strips them), but a
/// built-in requested explicitly resolves like any other name -- and fails
/// as unknown when the snapshot carries no entry for it.
///
/// # Errors
///
/// [`ResolveError::UnknownPackage`] names the first missing package;
/// [`ResolveError::Cycle`] names the members of the detected cycle.
pub fn resolve(
    roots: &[PackageName],
    index: &PackageIndex,
) -> Result<BuildPlan, ResolveError> {
    let mut sorted_roots: Vec<&PackageName> = roots.iter().collect();
    sorted_roots.sort();
    sorted_roots.dedup();

    let mut entries = Vec::new();
    let mut visited = HashSet::new();
    let mut visiting = Vec::new();

    for name in sorted_roots {
        visit(name, index, &mut entries, &mut visited, &mut visiting)?;
    }

    Ok(BuildPlan { entries })
}

fn visit(
    name: &PackageName,
    index: &PackageIndex,
    entries: &mut Vec<IndexEntry>,
    visited: &mut HashSet<PackageName>,
    visiting: &mut Vec<PackageName>,
) -> Result<(), ResolveError> {
    if visited.contains(name) {
        return Ok(());
    }

    if let Some(pos) = visiting.iter().position(|n| n == name) {
        let mut cycle = visiting[pos..].to_vec();
        cycle.push(name.clone());
        return Err(ResolveError::Cycle(cycle));
    }

    let entry = index
        .find(name.as_str())
        .ok_or_else(|| ResolveError::UnknownPackage(name.clone()))?
        .clone();

    visiting.push(name.clone());

    let mut deps = entry.depends.clone();
    deps.sort();
    for dep in &deps {
        visit(dep, index, entries, visited, visiting)?;
    }

    visiting.pop();
    visited.insert(name.clone());
    entries.push(entry);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, deps: &[&str]) -> IndexEntry {
        IndexEntry {
            name: PackageName::new(name),
            version: "1.0".into(),
            depends: deps.iter().map(|d| PackageName::new(d)).collect(),
            needs_compilation: false,
            path: None,
            sha256: None,
        }
    }

    fn mock_index(entries: Vec<IndexEntry>) -> PackageIndex {
        let mut index = PackageIndex::new();
        for e in entries {
            index.upsert(e);
        }
        index
    }

    fn names(plan: &BuildPlan) -> Vec<&str> {
        plan.names().map(PackageName::as_str).collect()
    }

    fn position(plan: &BuildPlan, name: &str) -> usize {
        plan.names().position(|n| n == name).unwrap()
    }

    #[test]
    fn simple_resolution() {
        let index = mock_index(vec![entry("a", &["b"]), entry("b", &[])]);
        let plan = resolve(&["a".into()], &index).unwrap();
        assert_eq!(names(&plan), vec!["b", "a"]);
    }

    #[test]
    fn diamond_resolution() {
        let index = mock_index(vec![
            entry("a", &["b", "c"]),
            entry("b", &["d"]),
            entry("c", &["d"]),
            entry("d", &[]),
        ]);

        let plan = resolve(&["a".into()], &index).unwrap();
        assert_eq!(plan.len(), 4);
        assert!(position(&plan, "d") < position(&plan, "b"));
        assert!(position(&plan, "d") < position(&plan, "c"));
        assert!(position(&plan, "b") < position(&plan, "a"));
        assert!(position(&plan, "c") < position(&plan, "a"));
    }

    #[test]
    fn dependency_precedes_both_roots() {
        // Requested [A, B] with A -> [C]: C always before A.
        let index = mock_index(vec![entry("A", &["C"]), entry("B", &[]), entry("C", &[])]);
        let plan = resolve(&["A".into(), "B".into()], &index).unwrap();
        assert!(position(&plan, "C") < position(&plan, "A"));
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn resolution_is_deterministic_across_root_order() {
        let index = mock_index(vec![
            entry("a", &["shared"]),
            entry("b", &["shared"]),
            entry("shared", &[]),
        ]);

        let forward = resolve(&["a".into(), "b".into()], &index).unwrap();
        let backward = resolve(&["b".into(), "a".into()], &index).unwrap();
        assert_eq!(names(&forward), names(&backward));
    }

    #[test]
    fn unknown_package_is_named() {
        let index = mock_index(vec![entry("a", &[])]);
        let err = resolve(&["X".into()], &index).unwrap_err();
        match err {
            ResolveError::UnknownPackage(name) => assert_eq!(name, "X"),
            other => panic!("expected UnknownPackage, got {other:?}"),
        }
    }

    #[test]
    fn unknown_transitive_dependency_aborts_batch() {
        let index = mock_index(vec![entry("a", &["ghost"])]);
        let err = resolve(&["a".into()], &index).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownPackage(name) if name == "ghost"));
    }

    #[test]
    fn cycle_is_detected_and_named() {
        let index = mock_index(vec![entry("a", &["b"]), entry("b", &["a"])]);
        let err = resolve(&["a".into()], &index).unwrap_err();
        match err {
            ResolveError::Cycle(cycle) => {
                assert!(cycle.iter().any(|n| n == "a"));
                assert!(cycle.iter().any(|n| n == "b"));
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_cycle_is_detected() {
        let index = mock_index(vec![entry("a", &["a"])]);
        assert!(matches!(
            resolve(&["a".into()], &index),
            Err(ResolveError::Cycle(_))
        ));
    }

    #[test]
    fn layers_group_independent_packages() {
        let index = mock_index(vec![
            entry("a", &["b", "c"]),
            entry("b", &["d"]),
            entry("c", &["d"]),
            entry("d", &[]),
        ]);

        let plan = resolve(&["a".into()], &index).unwrap();
        let layers = plan.layers();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec![PackageName::new("d")]);
        assert_eq!(
            layers[1],
            vec![PackageName::new("b"), PackageName::new("c")]
        );
        assert_eq!(layers[2], vec![PackageName::new("a")]);
    }

    #[test]
    fn layers_cover_every_plan_entry() {
        let index = mock_index(vec![
            entry("a", &["b"]),
            entry("b", &[]),
            entry("z", &[]),
        ]);
        let plan = resolve(&["a".into(), "z".into()], &index).unwrap();
        let total: usize = plan.layers().iter().map(Vec::len).sum();
        assert_eq!(total, plan.len());
    }
}
