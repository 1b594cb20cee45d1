use crate::error::{AppError, Result};
use crate::models::WorkflowStep;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Validated dependency graph of a workflow's steps
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl ExecutionPlan {
    /// Check ids and dependencies, then topologically sort (Kahn).
    ///
    /// Steps left over once no zero-indegree step remains form a cycle.
    pub fn build(steps: &[WorkflowStep]) -> Result<Self> {
        if steps.is_empty() {
            return Err(AppError::Validation("workflow must have at least one step".to_string()));
        }

        let mut ids = HashSet::with_capacity(steps.len());
        for step in steps {
            if step.step_id.trim().is_empty() {
                return Err(AppError::Validation("step_id must not be empty".to_string()));
            }
            if !ids.insert(step.step_id.as_str()) {
                return Err(AppError::Validation(format!("duplicate step_id '{}'", step.step_id)));
            }
        }

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::with_capacity(steps.len());
        let mut dependents: HashMap<String, Vec<String>> = steps
            .iter()
            .map(|s| (s.step_id.clone(), Vec::new()))
            .collect();
        let mut indegree: HashMap<&str, usize> = HashMap::with_capacity(steps.len());

        for step in steps {
            let mut deps: Vec<String> = Vec::with_capacity(step.depends_on.len());
            for dep in &step.depends_on {
                if dep == &step.step_id {
                    return Err(AppError::Validation(format!(
                        "step '{}' depends on itself",
                        step.step_id
                    )));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(AppError::Validation(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.step_id, dep
                    )));
                }
                if deps.contains(dep) {
                    continue;
                }
                deps.push(dep.clone());
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(step.step_id.clone());
                }
            }
            indegree.insert(step.step_id.as_str(), deps.len());
            dependencies.insert(step.step_id.clone(), deps);
        }

        // Declaration order breaks ties so the order is deterministic
        let mut queue: VecDeque<&str> = steps
            .iter()
            .map(|s| s.step_id.as_str())
            .filter(|id| indegree.get(id).copied() == Some(0))
            .collect();
        let mut order = Vec::with_capacity(steps.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(count) = indegree.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if order.len() < steps.len() {
            let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
            let cyclic: BTreeSet<String> = steps
                .iter()
                .map(|s| s.step_id.as_str())
                .filter(|id| !placed.contains(id))
                .map(str::to_string)
                .collect();
            return Err(AppError::Cycle {
                steps: cyclic.into_iter().collect(),
            });
        }

        Ok(Self {
            order,
            dependencies,
            dependents,
        })
    }

    /// Topological order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Steps with no dependencies, in topological order
    pub fn roots(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.dependencies(id).is_empty())
            .cloned()
            .collect()
    }

    pub fn dependencies(&self, step_id: &str) -> &[String] {
        self.dependencies
            .get(step_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn dependents(&self, step_id: &str) -> &[String] {
        self.dependents
            .get(step_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every step reachable through dependents, in topological order
    pub fn transitive_dependents(&self, step_id: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![step_id];
        while let Some(id) = stack.pop() {
            for dependent in self.dependents(id) {
                if seen.insert(dependent.as_str()) {
                    stack.push(dependent.as_str());
                }
            }
        }
        self.order
            .iter()
            .filter(|id| seen.contains(id.as_str()))
            .cloned()
            .collect()
    }
}
