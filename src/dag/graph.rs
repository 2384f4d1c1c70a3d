// src/dag/graph.rs

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Result, SeqError};
use crate::sequence::Sequence;

/// Borrowed dependency graph over the steps and gates of a sequence.
///
/// Edge direction: dependency -> dependent. For
///
/// ```toml
/// [[steps]]
/// id = "b"
/// depends_on = ["a"]
/// ```
///
/// we add edge `a -> b`. Edges whose dependency is not a node of the graph
/// are dropped at construction time, so every algorithm here treats an
/// unknown dependency as a dead end. Referential integrity is checked by the
/// callers before they get here.
#[derive(Debug, Clone)]
pub struct DagGraph<'a> {
    graph: DiGraphMap<&'a str, ()>,
}

impl<'a> DagGraph<'a> {
    /// Build from `(id, depends_on)` pairs. Node order is preserved and is the
    /// order in which traversals start.
    pub fn from_nodes<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let nodes: Vec<_> = nodes.into_iter().collect();
        let mut graph = DiGraphMap::new();

        for (id, _) in &nodes {
            graph.add_node(*id);
        }
        for (id, deps) in &nodes {
            for dep in deps.iter() {
                if graph.contains_node(dep.as_str()) {
                    graph.add_edge(dep.as_str(), *id, ());
                }
            }
        }

        Self { graph }
    }

    /// Steps first, then gates, each in document order.
    pub fn from_sequence(seq: &'a Sequence) -> Self {
        Self::from_nodes(seq.nodes().map(|n| (n.id(), n.depends_on())))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.graph.nodes()
    }

    /// Depth-first cycle check starting from every node.
    ///
    /// On the first back edge found, fails with
    /// [`SeqError::CircularDependency`] carrying the path from the first
    /// occurrence of the repeated node through to the repeat, following
    /// `depends_on` links (`a -> b -> a` reads "a depends on b depends on a").
    pub fn validate(&self) -> Result<()> {
        let mut visited: HashSet<&'a str> = HashSet::new();

        for node in self.graph.nodes() {
            if !visited.contains(node) {
                self.visit(node, &mut visited)?;
            }
        }
        Ok(())
    }

    /// Depth-first walk from `root` on an explicit stack; each frame is a
    /// node on the current path plus the index of its next dependency.
    fn visit(&self, root: &'a str, visited: &mut HashSet<&'a str>) -> Result<()> {
        let mut frames: Vec<(&'a str, Vec<&'a str>, usize)> = Vec::new();
        let mut on_path: HashSet<&'a str> = HashSet::new();

        visited.insert(root);
        on_path.insert(root);
        frames.push((root, self.dependencies(root), 0));

        loop {
            let next = match frames.last_mut() {
                None => return Ok(()),
                Some((_, deps, i)) => {
                    let dep = deps.get(*i).copied();
                    *i += 1;
                    dep
                }
            };

            let Some(dep) = next else {
                if let Some((done, _, _)) = frames.pop() {
                    on_path.remove(done);
                }
                continue;
            };

            if on_path.contains(dep) {
                let start = frames.iter().position(|(n, _, _)| *n == dep).unwrap_or(0);
                let mut cycle: Vec<String> =
                    frames[start..].iter().map(|(n, _, _)| n.to_string()).collect();
                cycle.push(dep.to_string());
                return Err(SeqError::CircularDependency(cycle));
            }
            if !visited.insert(dep) {
                continue;
            }

            on_path.insert(dep);
            frames.push((dep, self.dependencies(dep), 0));
        }
    }

    fn dependencies(&self, node: &'a str) -> Vec<&'a str> {
        self.graph.neighbors_directed(node, Direction::Incoming).collect()
    }

    /// Kahn's algorithm.
    ///
    /// Nodes with in-degree zero are emitted in the order they reach zero
    /// (initial roots in node order). On a cyclic graph the result omits every
    /// node on or behind a cycle; call [`DagGraph::validate`] first when a
    /// complete order is required.
    pub fn topological_sort(&self) -> Vec<String> {
        let mut in_degree: HashMap<&'a str, usize> = self
            .graph
            .nodes()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut queue: VecDeque<&'a str> = self
            .graph
            .nodes()
            .filter(|n| in_degree.get(n).copied() == Some(0))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());

        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());

            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        order
    }
}
