//! Agent store persistence tests.

use pressroom::{AgentStatus, AgentStore, TaskStatus, Validation};
use tempfile::TempDir;

fn seeded_store(dir: &TempDir) -> AgentStore {
    AgentStore::load(dir.path().join("agents.json")).unwrap()
}

#[test]
fn test_save_then_load_round_trips_non_transient_fields() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    let agent = store
        .create(Some("Alpha".to_string()), "northern affairs", 0.8, true)
        .unwrap();
    store
        .update(&agent.id, |a| {
            a.goal = Some("G".to_string());
            a.halt = true;
            a.redo_tasklist = true; // transient, must not survive
            a.redo_task_id = Some(4); // transient, must not survive
        })
        .unwrap();

    let reloaded = seeded_store(&dir);
    let back = reloaded.get(&agent.id).unwrap();
    assert_eq!(back.name, "Alpha");
    assert_eq!(back.context, "northern affairs");
    assert_eq!(back.temperature, 0.8);
    assert!(back.auto);
    assert!(back.halt);
    assert_eq!(back.goal.as_deref(), Some("G"));
    assert_eq!(back.created_at, agent.created_at);
    assert!(!back.redo_tasklist);
    assert_eq!(back.redo_task_id, None);
}

#[test]
fn test_load_reclassifies_running_agents_to_created() {
    let dir = TempDir::new().unwrap();
    {
        let store = seeded_store(&dir);
        let agent = store.create(None, "", 0.5, false).unwrap();
        store.update_status(&agent.id, AgentStatus::Running).unwrap();
    }

    let reloaded = seeded_store(&dir);
    let agents = reloaded.list();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].status, AgentStatus::Created);
}

#[test]
fn test_load_corrects_completed_tasks_with_failed_validation() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = seeded_store(&dir);
        let agent = store.create(None, "", 0.5, false).unwrap();
        store
            .update(&agent.id, |a| {
                let mut bad = pressroom::Task::new(1, "T1", "D1", "E1");
                bad.status = TaskStatus::Completed;
                bad.validation = Some(Validation {
                    is_valid: false,
                    score:    10,
                    reason:   "rejected".to_string(),
                });
                let mut good = pressroom::Task::new(2, "T2", "D2", "E2");
                good.status = TaskStatus::Completed;
                good.validation = Some(Validation {
                    is_valid: true,
                    score:    90,
                    reason:   "ok".to_string(),
                });
                a.tasklist = Some(pressroom::Tasklist {
                    goal:  "G".to_string(),
                    tasks: vec![bad, good],
                });
            })
            .unwrap();
        agent.id
    };

    let reloaded = seeded_store(&dir);
    let tasks = reloaded.get(&id).unwrap().tasklist.unwrap().tasks;
    assert_eq!(tasks[0].status, TaskStatus::Failed, "inconsistency corrected on load");
    assert_eq!(tasks[1].status, TaskStatus::Completed);
}

#[test]
fn test_update_status_stamps_timestamps_on_transition() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    let agent = store.create(None, "", 0.5, false).unwrap();
    assert!(agent.started_at.is_none());

    let running = store.update_status(&agent.id, AgentStatus::Running).unwrap();
    assert!(running.started_at.is_some());
    assert!(running.completed_at.is_none());

    let completed = store.update_status(&agent.id, AgentStatus::Completed).unwrap();
    assert!(completed.completed_at.is_some());
}

#[test]
fn test_clear_completed_removes_terminal_agents() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    let done = store.create(None, "", 0.5, false).unwrap();
    let failed = store.create(None, "", 0.5, false).unwrap();
    let halted = store.create(None, "", 0.5, false).unwrap();
    store.update_status(&done.id, AgentStatus::Completed).unwrap();
    store.update_status(&failed.id, AgentStatus::Failed).unwrap();
    store.update_status(&halted.id, AgentStatus::Halted).unwrap();

    assert_eq!(store.clear_completed().unwrap(), 2);
    assert_eq!(store.len(), 1);
    assert!(store.exists(&halted.id));
    assert!(!store.exists(&done.id));
}

#[test]
fn test_delete_missing_agent_errors() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    assert!(store.delete("ghost").is_err());

    let agent = store.create(None, "", 0.5, false).unwrap();
    store.delete(&agent.id).unwrap();
    assert!(store.get(&agent.id).is_none());
    assert!(store.is_empty());
}

#[test]
fn test_corrupt_state_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agents.json");
    std::fs::write(&path, "{ not json").unwrap();
    let store = AgentStore::load(&path).unwrap();
    assert!(store.is_empty());
}
