//! Dependency graph over job ids.
//!
//! Nodes live in an arena indexed by position; a map translates job ids to
//! arena slots. Edges point from a dependent to its antecedents. Ids that are
//! referenced but not (yet) known get a leaf node.

use crate::domain::error::{DomainError, Result};
use crate::domain::job::JobId;
use std::collections::HashMap;

#[derive(Debug)]
struct Node {
    id: JobId,
    depends: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    index: HashMap<JobId, usize>,
    nodes: Vec<Node>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, id: &str) -> usize {
        if let Some(&slot) = self.index.get(id) {
            return slot;
        }
        let slot = self.nodes.len();
        self.nodes.push(Node {
            id: id.to_string(),
            depends: Vec::new(),
        });
        self.index.insert(id.to_string(), slot);
        slot
    }

    /// Add (or extend) a node with edges to its antecedents
    pub fn add_job(&mut self, id: &str, depends: &[JobId]) {
        let slot = self.slot(id);
        for antecedent in depends {
            let target = self.slot(antecedent);
            if !self.nodes[slot].depends.contains(&target) {
                self.nodes[slot].depends.push(target);
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Path `start -> ... -> start` if `start` reaches itself
    pub fn find_cycle_from(&self, start: &str) -> Option<Vec<JobId>> {
        let &origin = self.index.get(start)?;

        // Iterative DFS; `parent` doubles as the visited set.
        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut stack = vec![origin];

        while let Some(current) = stack.pop() {
            for &next in &self.nodes[current].depends {
                if next == origin {
                    let mut chain = Vec::new();
                    let mut cursor = current;
                    while cursor != origin {
                        chain.push(self.nodes[cursor].id.clone());
                        cursor = parent[&cursor];
                    }
                    chain.reverse();

                    let mut path = Vec::with_capacity(chain.len() + 2);
                    path.push(self.nodes[origin].id.clone());
                    path.extend(chain);
                    path.push(self.nodes[origin].id.clone());
                    return Some(path);
                }
                if !parent.contains_key(&next) {
                    parent.insert(next, current);
                    stack.push(next);
                }
            }
        }
        None
    }

    pub fn ensure_acyclic(&self, start: &str) -> Result<()> {
        match self.find_cycle_from(start) {
            Some(path) => Err(DomainError::CyclicDependency {
                job_id: start.to_string(),
                path: path.join(" -> "),
            }),
            None => Ok(()),
        }
    }
}
