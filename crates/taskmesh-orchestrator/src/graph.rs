use taskmesh_core::PlannedTask;
use tracing::{debug, warn};

/// Drop planned tasks whose role is not in `enabled_roles`, renumber the
/// survivors contiguously, and rewrite every `depends_on` list to the new
/// indices. Edges pointing at a dropped task are removed silently.
pub fn filter_plan(planned: Vec<PlannedTask>, enabled_roles: &[String]) -> Vec<PlannedTask> {
    let mut remap: Vec<Option<usize>> = Vec::with_capacity(planned.len());
    let mut surviving = Vec::with_capacity(planned.len());

    for (index, task) in planned.into_iter().enumerate() {
        if enabled_roles.iter().any(|r| r == &task.role) {
            remap.push(Some(surviving.len()));
            surviving.push(task);
        } else {
            debug!(index, role = %task.role, "Dropping planned task: role not enabled");
            remap.push(None);
        }
    }

    for task in &mut surviving {
        let before = task.depends_on.len();
        task.depends_on = task
            .depends_on
            .iter()
            .filter_map(|&dep| remap.get(dep).copied().flatten())
            .collect();
        if task.depends_on.len() < before {
            debug!(
                role = %task.role,
                dropped = before - task.depends_on.len(),
                "Removed dependency edges to filtered-out tasks"
            );
        }
    }

    surviving
}

/// Iterative topological leveling.
///
/// Each level holds the indices of tasks whose dependencies all belong to
/// earlier levels. If a round schedules nothing while tasks remain, the
/// graph has a cycle; the remaining tasks are forced into one final level
/// instead of failing the whole plan.
pub fn compute_levels(tasks: &[PlannedTask]) -> Vec<Vec<usize>> {
    let mut levels: Vec<Vec<usize>> = Vec::new();
    let mut scheduled = vec![false; tasks.len()];
    let mut remaining = tasks.len();

    while remaining > 0 {
        let level: Vec<usize> = tasks
            .iter()
            .enumerate()
            .filter(|(i, task)| {
                !scheduled[*i]
                    && task
                        .depends_on
                        .iter()
                        .all(|&dep| dep >= tasks.len() || scheduled[dep])
            })
            .map(|(i, _)| i)
            .collect();

        if level.is_empty() {
            let stuck: Vec<usize> = (0..tasks.len()).filter(|&i| !scheduled[i]).collect();
            warn!(
                tasks = ?stuck,
                "Dependency cycle detected; forcing remaining tasks into one final level"
            );
            levels.push(stuck);
            break;
        }

        for &i in &level {
            scheduled[i] = true;
        }
        remaining -= level.len();
        levels.push(level);
    }

    levels
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn task(role: &str, deps: Vec<usize>) -> PlannedTask {
        PlannedTask::new(role, "").with_depends_on(deps)
    }

    fn enabled(roles: &[&str]) -> Vec<String> {
        roles.iter().map(|r| (*r).to_string()).collect()
    }

    #[test]
    fn filter_drops_disabled_roles_and_rewrites_edges() {
        let plan = vec![
            task("search", vec![]),
            task("offline_role", vec![0]),
            task("writer", vec![0, 1]),
        ];
        let filtered = filter_plan(plan, &enabled(&["search", "writer"]));
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].role, "search");
        assert_eq!(filtered[1].role, "writer");
        // The edge to the dropped task is gone; the edge to search is
        // renumbered from 0 to 0.
        assert_eq!(filtered[1].depends_on, vec![0]);
    }

    #[test]
    fn filter_keeps_everything_when_all_enabled() {
        let plan = vec![task("a", vec![]), task("b", vec![0])];
        let filtered = filter_plan(plan, &enabled(&["a", "b"]));
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[1].depends_on, vec![0]);
    }

    #[test]
    fn linear_chain_yields_one_task_per_level() {
        let plan = vec![task("a", vec![]), task("b", vec![0]), task("c", vec![1])];
        let levels = compute_levels(&plan);
        assert_eq!(levels, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn independent_tasks_share_a_level() {
        let plan = vec![
            task("a", vec![]),
            task("b", vec![]),
            task("c", vec![0, 1]),
        ];
        let levels = compute_levels(&plan);
        assert_eq!(levels, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn every_dependency_lands_in_an_earlier_level() {
        let plan = vec![
            task("a", vec![]),
            task("b", vec![0]),
            task("c", vec![0]),
            task("d", vec![1, 2]),
            task("e", vec![0, 3]),
        ];
        let levels = compute_levels(&plan);

        let mut level_of = vec![0usize; plan.len()];
        for (depth, level) in levels.iter().enumerate() {
            for &i in level {
                level_of[i] = depth;
            }
        }
        for (i, t) in plan.iter().enumerate() {
            for &dep in &t.depends_on {
                assert!(
                    level_of[dep] < level_of[i],
                    "task {i} depends on {dep} in the same or a later level"
                );
            }
        }
    }

    #[test]
    fn cycle_degrades_to_forced_final_level() {
        let plan = vec![
            task("a", vec![]),
            task("b", vec![2]),
            task("c", vec![1]),
        ];
        let levels = compute_levels(&plan);
        assert_eq!(levels, vec![vec![0], vec![1, 2]]);
    }

    #[test]
    fn empty_plan_has_no_levels() {
        assert!(compute_levels(&[]).is_empty());
    }
}
