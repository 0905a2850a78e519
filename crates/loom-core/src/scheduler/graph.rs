//! Task graph arena.
//!
//! Design:
//! - Nodes live in a `Vec`; `index` maps TaskId -> position. Edges are indices, so the
//!   arena owns everything and ownership stays acyclic whatever the logical graph is.
//! - Forward edges are the task's own `dependencies`; reverse edges (`dependents`) are
//!   kept on each node for O(1) "who is waiting for this task?".
//! - `unmet` is the Kahn in-degree: dependencies not yet Succeeded.
//! - Invariant: the graph is acyclic. Every submission is validated before insertion.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::{Task, TaskId, TaskStatus};
use crate::error::SchedulerError;

#[derive(Debug)]
pub(crate) struct Node {
    pub task: Task,

    /// Tasks that depend on this one.
    pub dependents: Vec<usize>,

    /// Dependencies that have not Succeeded yet.
    pub unmet: usize,

    /// Submission order, FIFO tie-break in the ready queue.
    pub seq: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TaskGraph {
    nodes: Vec<Node>,
    index: HashMap<TaskId, usize>,
    next_seq: u64,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn index_of(&self, id: TaskId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut Node {
        &mut self.nodes[index]
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.index_of(id).map(|i| &self.nodes[i].task)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Indices of the node's dependencies.
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        self.nodes[index]
            .task
            .dependencies
            .iter()
            .filter_map(|id| self.index_of(*id))
            .collect()
    }

    /// Everything reachable through reverse edges, breadth first, excluding `index`.
    pub fn transitive_dependents(&self, index: usize) -> Vec<usize> {
        let mut seen = HashSet::from([index]);
        let mut queue: VecDeque<usize> = self.nodes[index].dependents.iter().copied().collect();
        let mut out = Vec::new();
        while let Some(i) = queue.pop_front() {
            if !seen.insert(i) {
                continue;
            }
            out.push(i);
            queue.extend(self.nodes[i].dependents.iter().copied());
        }
        out
    }

    /// Validate a submission against the current graph without modifying it.
    ///
    /// Existing nodes never depend on incoming ones, so any cycle lies entirely
    /// inside the submission: Kahn's algorithm runs over the incoming tasks only.
    pub fn validate(&self, incoming: &[Task]) -> Result<(), SchedulerError> {
        let mut local: HashMap<TaskId, usize> = HashMap::with_capacity(incoming.len());
        for (i, task) in incoming.iter().enumerate() {
            if self.index.contains_key(&task.id) || local.insert(task.id, i).is_some() {
                return Err(SchedulerError::DuplicateTask(task.id));
            }
        }

        let mut in_degree = vec![0usize; incoming.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); incoming.len()];
        for (i, task) in incoming.iter().enumerate() {
            for dep in &task.dependencies {
                if *dep == task.id {
                    return Err(SchedulerError::SelfDependency(task.id));
                }
                if let Some(&j) = local.get(dep) {
                    in_degree[i] += 1;
                    dependents[j].push(i);
                } else if !self.index.contains_key(dep) {
                    return Err(SchedulerError::UnknownDependency {
                        task: task.id,
                        dependency: *dep,
                    });
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..incoming.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;
        while let Some(i) = queue.pop_front() {
            visited += 1;
            for &d in &dependents[i] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    queue.push_back(d);
                }
            }
        }
        if visited == incoming.len() {
            return Ok(());
        }

        Err(SchedulerError::CycleDetected {
            cycle: extract_cycle(incoming, &local, &in_degree),
        })
    }

    /// Insert validated tasks. Edges and `unmet` are wired here; statuses are left to the caller.
    pub fn insert(&mut self, tasks: Vec<Task>) -> Vec<usize> {
        let first = self.nodes.len();
        for task in tasks {
            self.index.insert(task.id, self.nodes.len());
            self.nodes.push(Node {
                task,
                dependents: Vec::new(),
                unmet: 0,
                seq: self.next_seq,
            });
            self.next_seq += 1;
        }

        let inserted: Vec<usize> = (first..self.nodes.len()).collect();
        for &i in &inserted {
            let deps = self.dependencies(i);
            let mut unmet = 0;
            for d in deps {
                self.nodes[d].dependents.push(i);
                if self.nodes[d].task.status != TaskStatus::Succeeded {
                    unmet += 1;
                }
            }
            self.nodes[i].unmet = unmet;
        }
        inserted
    }

    /// Recount `unmet` for one node from its dependencies' current statuses.
    pub fn recount_unmet(&mut self, index: usize) -> usize {
        let unmet = self
            .dependencies(index)
            .into_iter()
            .filter(|&d| self.nodes[d].task.status != TaskStatus::Succeeded)
            .count();
        self.nodes[index].unmet = unmet;
        unmet
    }
}

/// Nodes left with a positive in-degree after Kahn all have an unprocessed dependency
/// among themselves, so walking dependencies from any of them must revisit a node.
fn extract_cycle(
    incoming: &[Task],
    local: &HashMap<TaskId, usize>,
    in_degree: &[usize],
) -> Vec<TaskId> {
    let Some(start) = (0..incoming.len()).find(|&i| in_degree[i] > 0) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let next = incoming[current]
            .dependencies
            .iter()
            .filter_map(|id| local.get(id).copied())
            .find(|&j| in_degree[j] > 0);
        let Some(next) = next else {
            // Unreachable for a graph Kahn rejected; report what was walked.
            return path.iter().map(|&i| incoming[i].id).collect();
        };
        if let Some(&at) = position.get(&next) {
            return path[at..].iter().map(|&i| incoming[i].id).collect();
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> Task {
        Task::new(name)
    }

    #[test]
    fn insert_wires_reverse_edges_and_in_degree() {
        let a = task("a");
        let b = task("b").depends_on(a.id);
        let c = task("c").depends_on(a.id).depends_on(b.id);
        let (ia, ib, ic) = (0, 1, 2);

        let mut graph = TaskGraph::new();
        graph.validate(&[a.clone(), b.clone(), c.clone()]).unwrap();
        graph.insert(vec![a, b, c]);

        assert_eq!(graph.node(ia).unmet, 0);
        assert_eq!(graph.node(ib).unmet, 1);
        assert_eq!(graph.node(ic).unmet, 2);
        assert_eq!(graph.node(ia).dependents, vec![ib, ic]);
        assert_eq!(graph.transitive_dependents(ia), vec![ib, ic]);
    }

    #[test]
    fn dependencies_may_be_listed_before_they_appear() {
        let a = task("a");
        let b = task("b").depends_on(a.id);
        let graph = TaskGraph::new();
        assert!(graph.validate(&[b, a]).is_ok());
    }

    #[test]
    fn detect_simple_cycle() {
        let mut a = task("a");
        let b = task("b").depends_on(a.id);
        a.dependencies.insert(b.id);

        let err = TaskGraph::new().validate(&[a.clone(), b.clone()]).unwrap_err();
        let SchedulerError::CycleDetected { cycle } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains(&a.id) && cycle.contains(&b.id));
    }

    #[test]
    fn detect_longer_cycle_only_reports_its_members() {
        // root <- b <- c <- d <- b
        let root = task("root");
        let mut b = task("b").depends_on(root.id);
        let c = task("c").depends_on(b.id);
        let d = task("d").depends_on(c.id);
        b.dependencies.insert(d.id);

        let err = TaskGraph::new()
            .validate(&[root.clone(), b.clone(), c.clone(), d.clone()])
            .unwrap_err();
        let SchedulerError::CycleDetected { cycle } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(cycle.len(), 3);
        assert!(!cycle.contains(&root.id));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let a = task("a");
        let b = task("b").depends_on(a.id);
        let c = task("c").depends_on(a.id);
        let d = task("d").depends_on(b.id).depends_on(c.id);
        assert!(TaskGraph::new().validate(&[a, b, c, d]).is_ok());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut a = task("a");
        a.dependencies.insert(a.id);
        assert_eq!(
            TaskGraph::new().validate(&[a.clone()]),
            Err(SchedulerError::SelfDependency(a.id))
        );
    }

    #[test]
    fn unknown_and_duplicate_tasks_are_rejected() {
        let ghost = TaskId::generate();
        let a = task("a").depends_on(ghost);
        assert_eq!(
            TaskGraph::new().validate(&[a.clone()]),
            Err(SchedulerError::UnknownDependency {
                task: a.id,
                dependency: ghost,
            })
        );

        let b = task("b");
        let mut graph = TaskGraph::new();
        graph.insert(vec![b.clone()]);
        assert_eq!(
            graph.validate(&[b.clone()]),
            Err(SchedulerError::DuplicateTask(b.id))
        );
    }

    #[test]
    fn new_tasks_may_depend_on_existing_ones() {
        let a = task("a");
        let mut graph = TaskGraph::new();
        graph.insert(vec![a.clone()]);

        let b = task("b").depends_on(a.id);
        graph.validate(&[b.clone()]).unwrap();
        let inserted = graph.insert(vec![b]);
        assert_eq!(graph.node(inserted[0]).unmet, 1);
        assert_eq!(graph.node(0).dependents, inserted);
    }
}
