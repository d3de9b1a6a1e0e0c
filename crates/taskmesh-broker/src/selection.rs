use rand::Rng;
use taskmesh_core::{MeshError, MeshResult, WorkerRecord, WorkerStatus};

/// Pick a worker for a role from the candidate list.
///
/// Candidates must be available and enabled (defensively re-checked here);
/// `exclude` drops one worker id to avoid self-routing. Among the workers
/// tied for minimum load, the winner is chosen uniformly at random so that
/// equal workers share traffic instead of the first-registered one
/// starving the rest.
pub fn select_worker(
    role: &str,
    candidates: Vec<WorkerRecord>,
    exclude: Option<&str>,
) -> MeshResult<WorkerRecord> {
    let mut eligible: Vec<WorkerRecord> = candidates
        .into_iter()
        .filter(|w| w.status == WorkerStatus::Available && w.enabled)
        .filter(|w| exclude.map_or(true, |id| w.id != id))
        .collect();

    if eligible.is_empty() {
        return Err(MeshError::NoAgentAvailable(format!(
            "no available worker for role '{role}'{}",
            exclude.map(|id| format!(" (excluding {id})")).unwrap_or_default()
        )));
    }

    let min_load = eligible
        .iter()
        .map(|w| w.load)
        .fold(f64::INFINITY, f64::min);
    eligible.retain(|w| (w.load - min_load).abs() < 1e-9);

    let idx = if eligible.len() == 1 {
        0
    } else {
        rand::thread_rng().gen_range(0..eligible.len())
    };
    Ok(eligible.swap_remove(idx))
}
