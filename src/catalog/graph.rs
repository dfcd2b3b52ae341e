//! Prerequisite graph
//!
//! Modules are addressed by dense indices into the catalog's module list.
//! Edges are stored twice: `prerequisites[i]` lists what module `i` needs,
//! `dependents[i]` lists what module `i` unlocks. Prerequisite ids that do
//! not resolve to a module are kept aside as dangling references.

use std::collections::{BTreeSet, HashMap};

use crate::error::CatalogError;
use crate::types::ModuleId;

/// Validated, acyclic adjacency structure over module indices
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    ids: Vec<ModuleId>,
    index: HashMap<ModuleId, usize>,
    prerequisites: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    dangling: Vec<Vec<ModuleId>>,
    topo_order: Vec<usize>,
}

impl ModuleGraph {
    /// Build the graph from `(id, prerequisites)` pairs in catalog order.
    ///
    /// Fails on duplicate ids and on cycles. The reported cycle follows
    /// unlock edges and starts at its lexically smallest id.
    pub fn build<'a, I>(modules: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (&'a ModuleId, &'a [ModuleId])>,
    {
        let entries: Vec<(&ModuleId, &[ModuleId])> = modules.into_iter().collect();

        let mut ids = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());
        for (i, (id, _)) in entries.iter().enumerate() {
            if index.insert((*id).clone(), i).is_some() {
                return Err(CatalogError::DuplicateModule((*id).clone()));
            }
            ids.push((*id).clone());
        }

        let n = ids.len();
        let mut prerequisites = vec![Vec::new(); n];
        let mut dependents = vec![Vec::new(); n];
        let mut dangling = vec![Vec::new(); n];

        for (i, (_, prereqs)) in entries.iter().enumerate() {
            for prereq in prereqs.iter() {
                match index.get(prereq) {
                    Some(&p) => {
                        if !prerequisites[i].contains(&p) {
                            prerequisites[i].push(p);
                            dependents[p].push(i);
                        }
                    }
                    None => {
                        if !dangling[i].contains(prereq) {
                            dangling[i].push(prereq.clone());
                        }
                    }
                }
            }
        }

        for deps in dependents.iter_mut() {
            deps.sort_by(|a, b| ids[*a].cmp(&ids[*b]));
        }

        let mut graph = Self {
            ids,
            index,
            prerequisites,
            dependents,
            dangling,
            topo_order: Vec::new(),
        };
        graph.topo_order = graph.topological_sort()?;
        Ok(graph)
    }

    /// Kahn's algorithm with a lexically ordered ready set, so the order is
    /// stable across runs.
    fn topological_sort(&self) -> Result<Vec<usize>, CatalogError> {
        let n = self.ids.len();
        let mut indegree: Vec<usize> = self.prerequisites.iter().map(|p| p.len()).collect();
        let mut ready: BTreeSet<(&ModuleId, usize)> = (0..n)
            .filter(|&i| indegree[i] == 0)
            .map(|i| (&self.ids[i], i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            let (_, i) = next;
            order.push(i);
            for &d in &self.dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    ready.insert((&self.ids[d], d));
                }
            }
        }

        if order.len() == n {
            return Ok(order);
        }

        let remaining: Vec<bool> = (0..n).map(|i| indegree[i] > 0).collect();
        let cycle = self.find_cycle(&remaining);
        Err(CatalogError::CycleDetected { cycle })
    }

    /// Depth-first search along unlock edges restricted to nodes Kahn could
    /// not release. Every such node sits on or downstream of a cycle.
    ///
    /// Iterative, so catalogs with very long paths cannot exhaust the stack.
    fn find_cycle(&self, remaining: &[bool]) -> Vec<ModuleId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let mut starts: Vec<usize> = (0..self.ids.len()).filter(|&i| remaining[i]).collect();
        starts.sort_by(|a, b| self.ids[*a].cmp(&self.ids[*b]));

        let mut marks = vec![Mark::White; self.ids.len()];
        for start in starts {
            if marks[start] != Mark::White {
                continue;
            }

            // (node, index of the next dependent to look at)
            let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Gray;

            while let Some(frame) = frames.last_mut() {
                let (node, cursor) = *frame;
                let Some(&next) = self.dependents[node].get(cursor) else {
                    marks[node] = Mark::Black;
                    frames.pop();
                    continue;
                };
                frame.1 += 1;

                if !remaining[next] {
                    continue;
                }
                match marks[next] {
                    Mark::Gray => {
                        let begin = frames.iter().position(|&(n, _)| n == next).unwrap_or(0);
                        let cycle: Vec<usize> = frames[begin..].iter().map(|&(n, _)| n).collect();
                        return self.rotated(cycle);
                    }
                    Mark::White => {
                        marks[next] = Mark::Gray;
                        frames.push((next, 0));
                    }
                    Mark::Black => {}
                }
            }
        }

        Vec::new()
    }

    /// Cycle ids starting at the lexically smallest one
    fn rotated(&self, mut cycle: Vec<usize>) -> Vec<ModuleId> {
        let min_pos = cycle
            .iter()
            .enumerate()
            .min_by(|a, b| self.ids[*a.1].cmp(&self.ids[*b.1]))
            .map(|(pos, _)| pos)
            .unwrap_or(0);
        cycle.rotate_left(min_pos);
        cycle.into_iter().map(|i| self.ids[i].clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: &ModuleId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id(&self, index: usize) -> &ModuleId {
        &self.ids[index]
    }

    /// Resolved prerequisites of a module
    pub fn prerequisites(&self, index: usize) -> &[usize] {
        &self.prerequisites[index]
    }

    /// Modules that list this module as a prerequisite, in id order
    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// Prerequisite ids that are missing from the catalog
    pub fn dangling(&self, index: usize) -> &[ModuleId] {
        &self.dangling[index]
    }

    /// Module indices such that every module follows all its prerequisites
    pub fn topological_order(&self) -> &[usize] {
        &self.topo_order
    }
}
