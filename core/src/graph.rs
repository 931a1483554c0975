//! Dependency graph over calculation names.
//!
//! Nodes are calculations; an edge `a -> b` means the formula of `b` reads
//! `a`. Parameters are leaves and never appear as nodes.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

/// A cycle of calculations, first name repeated at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circular reference: {}", self.path.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

/// Result of ordering the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopoOrder {
    /// Calculation indices, precedents before dependents.
    pub order: Vec<usize>,
    /// Calculations on a cycle or downstream of one, in index order.
    pub blocked: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    parameters: HashSet<String>,
    references: Vec<BTreeSet<String>>,
    precedents: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Builds the graph from parameter names and, per calculation, its name
    /// and the names its formula references.
    ///
    /// A self reference is kept in [`references`](Self::references) but adds
    /// no edge. When two calculations share a name the first one wins, and a
    /// parameter always wins over a calculation of the same name.
    pub fn build<'a, P, C>(parameters: P, calculations: C) -> Self
    where
        P: IntoIterator<Item = &'a str>,
        C: IntoIterator<Item = (&'a str, BTreeSet<String>)>,
    {
        let mut graph = DependencyGraph {
            parameters: parameters.into_iter().map(str::to_string).collect(),
            ..Default::default()
        };

        for (i, (name, refs)) in calculations.into_iter().enumerate() {
            graph.names.push(name.to_string());
            if !graph.parameters.contains(name) {
                graph.index.entry(name.to_string()).or_insert(i);
            }
            graph.references.push(refs);
        }

        let count = graph.names.len();
        graph.precedents = vec![BTreeSet::new(); count];
        graph.dependents = vec![BTreeSet::new(); count];
        for node in 0..count {
            for name in &graph.references[node] {
                if let Some(&precedent) = graph.index.get(name) {
                    if precedent != node {
                        graph.precedents[node].insert(precedent);
                        graph.dependents[precedent].insert(node);
                    }
                }
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, node: usize) -> &str {
        &self.names[node]
    }

    pub fn node(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn references(&self, node: usize) -> &BTreeSet<String> {
        &self.references[node]
    }

    pub fn precedents(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.precedents[node].iter().copied()
    }

    pub fn references_itself(&self, node: usize) -> bool {
        self.references[node].contains(&self.names[node])
    }

    /// Referenced names that are neither a parameter nor a calculation.
    pub fn unknown_references(&self, node: usize) -> Vec<&str> {
        self.references[node]
            .iter()
            .filter(|name| !self.parameters.contains(*name) && !self.index.contains_key(*name))
            .map(String::as_str)
            .collect()
    }

    /// Kahn's algorithm. Nodes that never reach in-degree zero are blocked.
    pub fn topological_order(&self) -> TopoOrder {
        let count = self.len();
        let mut in_degree: Vec<usize> = self.precedents.iter().map(BTreeSet::len).collect();
        let mut ready: VecDeque<usize> = (0..count).filter(|&n| in_degree[n] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(node) = ready.pop_front() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        let emitted: HashSet<usize> = order.iter().copied().collect();
        let blocked = (0..count).filter(|n| !emitted.contains(n)).collect();
        TopoOrder { order, blocked }
    }

    /// Shortest cycle running through `node`, if any.
    pub fn cycle_through(&self, node: usize) -> Option<CycleError> {
        // Breadth-first over dependents until we come back to `node`.
        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut queue = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            for &next in &self.dependents[current] {
                if next == node {
                    let mut path = vec![current];
                    let mut cursor = current;
                    while cursor != node {
                        cursor = parent[&cursor];
                        path.push(cursor);
                    }
                    path.reverse();
                    path.push(node);
                    return Some(CycleError {
                        path: path.into_iter().map(|n| self.names[n].clone()).collect(),
                    });
                }
                if next != node && !parent.contains_key(&next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Any cycle in the graph.
    pub fn find_cycle(&self) -> Option<CycleError> {
        self.topological_order()
            .blocked
            .into_iter()
            .find_map(|node| self.cycle_through(node))
    }

    /// Dependency depth per calculation: 1 when it only reads parameters,
    /// otherwise one more than its deepest precedent. Blocked nodes get 0.
    pub fn levels(&self) -> Vec<u32> {
        let mut levels = vec![0u32; self.len()];
        for node in self.topological_order().order {
            levels[node] = 1 + self
                .precedents(node)
                .map(|p| levels[p])
                .max()
                .unwrap_or(0);
        }
        levels
    }

    /// Calculations that read `name` directly or through other calculations,
    /// in index order. `name` may be a parameter or a calculation.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let mut seen: BTreeSet<usize> = BTreeSet::new();
        let mut queue: VecDeque<usize> = (0..self.len())
            .filter(|&n| self.references[n].contains(name) && self.names[n] != name)
            .collect();
        while let Some(node) = queue.pop_front() {
            if seen.insert(node) {
                queue.extend(self.dependents[node].iter().copied());
            }
        }
        if let Some(own) = self.node(name) {
            seen.remove(&own);
        }
        seen.into_iter().map(|n| self.names[n].as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn refs(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn graph(calcs: &[(&'static str, &[&str])]) -> DependencyGraph {
        DependencyGraph::build(
            ["load", "ppue", "hours"],
            calcs.iter().map(|(name, r)| (*name, refs(r))),
        )
    }

    #[test]
    fn test_topological_order_puts_precedents_first() {
        // Declared out of order on purpose.
        let g = graph(&[
            ("annual_cost", &["annual_kwh"]),
            ("annual_kwh", &["cooling_kw", "hours"]),
            ("cooling_kw", &["load", "ppue"]),
        ]);
        let topo = g.topological_order();
        let names: Vec<&str> = topo.order.iter().map(|&n| g.name(n)).collect();
        assert_eq!(names, vec!["cooling_kw", "annual_kwh", "annual_cost"]);
        assert!(topo.blocked.is_empty());
        assert_eq!(g.levels(), vec![3, 2, 1]);
    }

    #[test]
    fn test_cycle_is_blocked_with_path() {
        let g = graph(&[
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &["a"]),
            ("d", &["a"]),
            ("e", &["load"]),
        ]);
        let topo = g.topological_order();
        assert_eq!(topo.order, vec![4]);
        assert_eq!(topo.blocked, vec![0, 1, 2, 3]);

        let cycle = g.cycle_through(0).unwrap();
        assert_eq!(cycle.path, vec!["a", "c", "b", "a"]);
        assert_eq!(cycle.to_string(), "circular reference: a -> c -> b -> a");

        // Downstream of the cycle, but not on it.
        assert!(g.cycle_through(3).is_none());
        assert!(g.find_cycle().is_some());
        assert_eq!(g.levels()[3], 0);
    }

    #[test]
    fn test_self_reference_adds_no_edge() {
        let g = graph(&[("x", &["x", "load"]), ("max_x", &["x"])]);
        assert!(g.references_itself(0));
        assert!(!g.references_itself(1));
        assert!(g.topological_order().blocked.is_empty());
    }

    #[test]
    fn test_parameter_shadows_calculation() {
        let g = graph(&[("ppue", &[]), ("double", &["ppue"])]);
        assert!(g.node("ppue").is_none());
        assert_eq!(g.precedents(1).count(), 0);
    }

    #[test]
    fn test_unknown_references() {
        let g = graph(&[("a", &["load", "missing", "b"]), ("b", &["ppue"])]);
        assert_eq!(g.unknown_references(0), vec!["missing"]);
        assert!(g.unknown_references(1).is_empty());
    }

    #[test]
    fn test_dependents_of_is_transitive() {
        let g = graph(&[
            ("cooling_kw", &["load", "ppue"]),
            ("annual_kwh", &["cooling_kw", "hours"]),
            ("annual_cost", &["annual_kwh"]),
            ("unrelated", &["hours"]),
        ]);
        assert_eq!(
            g.dependents_of("load"),
            vec!["cooling_kw", "annual_kwh", "annual_cost"]
        );
        assert_eq!(g.dependents_of("annual_kwh"), vec!["annual_cost"]);
        assert!(g.dependents_of("annual_cost").is_empty());
    }
}
