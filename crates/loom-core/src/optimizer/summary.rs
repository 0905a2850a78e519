//! Plan summaries: structure, fingerprint, embedding text and run metrics.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::domain::{PlanMetrics, PlanStructure, Task, TaskId, WorkerPairing};
use crate::domain::task::normalize_key;
use crate::scheduler::RunReport;

/// Shape of `tasks`. Dependencies outside the slice are ignored.
pub fn structure_of(tasks: &[Task]) -> PlanStructure {
    let index: HashMap<TaskId, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    let mut edge_count = 0;
    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.dependencies {
            if let Some(&j) = index.get(dep) {
                in_degree[i] += 1;
                dependents[j].push(i);
                edge_count += 1;
            }
        }
    }

    // Level-by-level Kahn: level = longest chain ending at the task.
    let mut level = vec![0usize; tasks.len()];
    let mut queue: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    while let Some(i) = queue.pop_front() {
        for &d in &dependents[i] {
            level[d] = level[d].max(level[i] + 1);
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                queue.push_back(d);
            }
        }
    }

    let mut widths: HashMap<usize, usize> = HashMap::new();
    for &l in &level {
        *widths.entry(l).or_default() += 1;
    }
    PlanStructure {
        task_count: tasks.len(),
        edge_count,
        depth: if tasks.is_empty() { 0 } else { level.iter().max().copied().unwrap_or(0) + 1 },
        max_width: widths.values().max().copied().unwrap_or(0),
    }
}

/// Pattern fingerprint: normalized goal, structure and the set of task keys.
///
/// Stable across processes (FNV-1a), so it can be stored and compared later.
pub fn fingerprint(goal: &str, structure: &PlanStructure, tasks: &[Task]) -> String {
    let keys: BTreeSet<String> = tasks.iter().map(Task::key).collect();
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}",
        normalize_key(goal),
        structure.task_count,
        structure.edge_count,
        structure.depth,
        structure.max_width,
        keys.into_iter().collect::<Vec<_>>().join(";"),
    );
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in canonical.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

/// Text embedded for similarity: goal, task descriptions in order, and the shape.
pub fn embedding_text(goal: &str, structure: &PlanStructure, tasks: &[Task]) -> String {
    let mut text = String::from(goal);
    for task in tasks {
        text.push('\n');
        text.push_str(&task.description);
    }
    text.push_str(&format!(
        "\n{} tasks, {} dependencies, depth {}, width {}",
        structure.task_count, structure.edge_count, structure.depth, structure.max_width
    ));
    text
}

impl PlanMetrics {
    /// Metrics of a finished scheduler run. `quality_score` is clamped to 0..1.
    pub fn from_run(
        report: &RunReport,
        quality_score: f64,
        worker_assignments: BTreeSet<WorkerPairing>,
    ) -> Self {
        Self {
            success_rate: report.metrics.success_rate,
            total_duration_ms: report.metrics.wall_clock_ms,
            quality_score: quality_score.clamp(0.0, 1.0),
            worker_assignments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RunMetrics;

    fn diamond() -> Vec<Task> {
        let a = Task::new("fetch");
        let b = Task::new("parse left").depends_on(a.id);
        let c = Task::new("parse right").depends_on(a.id);
        let d = Task::new("merge").depends_on(b.id).depends_on(c.id);
        vec![d, c, b, a]
    }

    #[test]
    fn structure_of_a_diamond() {
        assert_eq!(
            structure_of(&diamond()),
            PlanStructure {
                task_count: 4,
                edge_count: 4,
                depth: 3,
                max_width: 2,
            }
        );
        assert_eq!(
            structure_of(&[]),
            PlanStructure {
                task_count: 0,
                edge_count: 0,
                depth: 0,
                max_width: 0,
            }
        );
    }

    #[test]
    fn fingerprint_ignores_ids_and_case() {
        let first = diamond();
        let second = diamond();
        let s = structure_of(&first);
        assert_eq!(
            fingerprint("Nightly  Report", &s, &first),
            fingerprint("nightly report", &s, &second)
        );
        assert_ne!(
            fingerprint("nightly report", &s, &first),
            fingerprint("weekly report", &s, &first)
        );
    }

    #[test]
    fn metrics_from_run_report() {
        let report = RunReport {
            metrics: RunMetrics {
                total: 4,
                succeeded: 3,
                success_rate: 0.75,
                wall_clock_ms: 1200,
                ..RunMetrics::default()
            },
            tasks: Vec::new(),
            decisions: Vec::new(),
        };
        let pairing = WorkerPairing::new("fetch", "net-1");
        let metrics = PlanMetrics::from_run(&report, 1.4, BTreeSet::from([pairing.clone()]));
        assert_eq!(metrics.success_rate, 0.75);
        assert_eq!(metrics.total_duration_ms, 1200);
        assert_eq!(metrics.quality_score, 1.0);
        assert!(metrics.worker_assignments.contains(&pairing));
    }
}
