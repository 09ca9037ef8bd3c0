//! # Dependency Levels
//!
//! Validated view of a workflow's task DAG.
//!
//! ## Overview
//!
//! A task without prerequisites sits at level 0; every other task sits one
//! level above its deepest prerequisite. Tasks on the same level may run
//! concurrently, levels run in order. Construction rejects unknown task ids
//! and cycles, so every built graph is a DAG.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{LabflowError, Result};
use crate::models::{TaskDependency, TaskId, WorkflowId};

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Topological order, ties broken by input order
    order: Vec<TaskId>,
    prerequisites: HashMap<TaskId, Vec<TaskId>>,
    dependents: HashMap<TaskId, Vec<TaskId>>,
}

impl DependencyGraph {
    /// Build the graph for `tasks` (in `order_index` order)
    pub fn build(workflow_id: WorkflowId, tasks: &[TaskId], dependencies: &[TaskDependency]) -> Result<Self> {
        let known: HashSet<TaskId> = tasks.iter().copied().collect();
        let mut prerequisites: HashMap<TaskId, Vec<TaskId>> = tasks.iter().map(|t| (*t, Vec::new())).collect();
        let mut dependents: HashMap<TaskId, Vec<TaskId>> = tasks.iter().map(|t| (*t, Vec::new())).collect();

        let mut unknown = Vec::new();
        for dependency in dependencies {
            let (dependent, prerequisite) = (dependency.dependent_task_id, dependency.prerequisite_task_id);
            if !known.contains(&dependent) || !known.contains(&prerequisite) {
                unknown.push(format!(
                    "Dependency {dependent} -> {prerequisite} references a task outside workflow {workflow_id}"
                ));
                continue;
            }
            let entry = prerequisites.entry(dependent).or_default();
            if !entry.contains(&prerequisite) {
                entry.push(prerequisite);
                dependents.entry(prerequisite).or_default().push(dependent);
            }
        }
        if !unknown.is_empty() {
            return Err(LabflowError::Validation(unknown));
        }

        // Kahn's algorithm
        let mut in_degree: HashMap<TaskId, usize> =
            prerequisites.iter().map(|(task, prereqs)| (*task, prereqs.len())).collect();
        let mut ready: VecDeque<TaskId> = tasks.iter().copied().filter(|t| in_degree[t] == 0).collect();
        let mut order = Vec::with_capacity(tasks.len());

        while let Some(task) = ready.pop_front() {
            order.push(task);
            for dependent in &dependents[&task] {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(*dependent);
                    }
                }
            }
        }

        if order.len() != tasks.len() {
            let placed: HashSet<TaskId> = order.iter().copied().collect();
            let tasks_in_cycle: Vec<TaskId> = tasks.iter().copied().filter(|t| !placed.contains(t)).collect();
            return Err(LabflowError::DependencyCycle {
                workflow_id,
                tasks: tasks_in_cycle,
            });
        }

        Ok(Self {
            order,
            prerequisites,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn prerequisites(&self, task_id: TaskId) -> &[TaskId] {
        self.prerequisites.get(&task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, task_id: TaskId) -> &[TaskId] {
        self.dependents.get(&task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tasks with no prerequisites
    pub fn roots(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .copied()
            .filter(|t| self.prerequisites(*t).is_empty())
            .collect()
    }

    pub fn level_of(&self) -> HashMap<TaskId, usize> {
        let mut levels: HashMap<TaskId, usize> = HashMap::with_capacity(self.order.len());
        for task in &self.order {
            let level = self
                .prerequisites(*task)
                .iter()
                .filter_map(|p| levels.get(p))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            levels.insert(*task, level);
        }
        levels
    }

    /// Tasks grouped by level, lowest level first
    pub fn levels(&self) -> Vec<Vec<TaskId>> {
        let level_of = self.level_of();
        let depth = level_of.values().copied().max().map_or(0, |max| max + 1);
        let mut levels = vec![Vec::new(); depth];
        for task in &self.order {
            levels[level_of[task]].push(*task);
        }
        levels
    }

    /// Longest chain by summed duration. Tasks missing from `durations`
    /// count as zero.
    pub fn critical_path(&self, durations: &HashMap<TaskId, u64>) -> (Vec<TaskId>, u64) {
        let mut finish: HashMap<TaskId, u64> = HashMap::with_capacity(self.order.len());
        let mut via: HashMap<TaskId, TaskId> = HashMap::new();

        for task in &self.order {
            let own = durations.get(task).copied().unwrap_or(0);
            let best = self
                .prerequisites(*task)
                .iter()
                .filter_map(|p| finish.get(p).map(|f| (*p, *f)))
                .max_by_key(|(_, f)| *f);
            let start = match best {
                Some((prerequisite, f)) => {
                    via.insert(*task, prerequisite);
                    f
                }
                None => 0,
            };
            finish.insert(*task, start + own);
        }

        let Some((mut current, total)) = self
            .order
            .iter()
            .map(|t| (*t, finish[t]))
            .max_by_key(|(_, f)| *f)
        else {
            return (Vec::new(), 0);
        };

        let mut path = vec![current];
        while let Some(previous) = via.get(&current) {
            path.push(*previous);
            current = *previous;
        }
        path.reverse();
        (path, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(TaskId, TaskId)]) -> Vec<TaskDependency> {
        pairs.iter().map(|(d, p)| TaskDependency::new(1, *d, *p)).collect()
    }

    #[test]
    fn test_independent_tasks_share_level_zero() {
        let graph = DependencyGraph::build(1, &[1, 2, 3], &[]).unwrap();
        assert_eq!(graph.levels(), vec![vec![1, 2, 3]]);
        assert_eq!(graph.roots(), vec![1, 2, 3]);
    }

    #[test]
    fn test_chain_and_diamond_levels() {
        let chain = DependencyGraph::build(1, &[1, 2, 3], &edges(&[(2, 1), (3, 2)])).unwrap();
        assert_eq!(chain.levels(), vec![vec![1], vec![2], vec![3]]);

        let diamond =
            DependencyGraph::build(1, &[1, 2, 3, 4], &edges(&[(2, 1), (3, 1), (4, 2), (4, 3)])).unwrap();
        assert_eq!(diamond.levels(), vec![vec![1], vec![2, 3], vec![4]]);
        assert_eq!(diamond.dependents(1), &[2, 3]);
    }

    #[test]
    fn test_level_uses_deepest_prerequisite() {
        let graph = DependencyGraph::build(1, &[1, 2, 3], &edges(&[(2, 1), (3, 2), (3, 1)])).unwrap();
        assert_eq!(graph.level_of()[&3], 2);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let result = DependencyGraph::build(9, &[1, 2, 3], &edges(&[(2, 1), (1, 2)]));
        match result {
            Err(LabflowError::DependencyCycle { workflow_id, tasks }) => {
                assert_eq!(workflow_id, 9);
                assert_eq!(tasks, vec![1, 2]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(DependencyGraph::build(1, &[1], &edges(&[(1, 1)])).is_err());
    }

    #[test]
    fn test_unknown_task_is_rejected() {
        let result = DependencyGraph::build(1, &[1, 2], &edges(&[(2, 7)]));
        assert!(matches!(result, Err(LabflowError::Validation(_))));
    }

    #[test]
    fn test_critical_path() {
        let graph =
            DependencyGraph::build(1, &[1, 2, 3, 4], &edges(&[(2, 1), (3, 1), (4, 2), (4, 3)])).unwrap();
        let durations: HashMap<TaskId, u64> = [(1, 10), (2, 5), (3, 30), (4, 1)].into_iter().collect();
        let (path, total) = graph.critical_path(&durations);
        assert_eq!(path, vec![1, 3, 4]);
        assert_eq!(total, 41);

        let empty = DependencyGraph::build(1, &[], &[]).unwrap();
        assert_eq!(empty.critical_path(&HashMap::new()), (Vec::new(), 0));
    }
}
