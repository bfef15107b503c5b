//! Durable agent store: id → agent record, backed by one JSON document
//! replaced atomically on every mutation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::persist;
use crate::types::{Agent, AgentStatus, TaskStatus};

#[derive(Serialize, Deserialize)]
struct StateDocument {
    agents:       HashMap<String, Agent>,
    last_updated: DateTime<Utc>,
}

pub struct AgentStore {
    path:   PathBuf,
    agents: Mutex<HashMap<String, Agent>>,
}

impl AgentStore {
    /// Loads the state document, normalizing records left behind by a crash:
    /// agents persisted as `running` are reclassified to `created` (their
    /// worker is gone), and tasks marked `completed` with a failed validation
    /// are corrected to `failed`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut agents = HashMap::new();

        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<StateDocument>(&raw) {
                    Ok(document) => {
                        agents = document.agents;
                        tracing::info!(count = agents.len(), "loaded agents from state file");
                    }
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "failed to parse agent state, starting empty");
                    }
                },
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to read agent state, starting empty");
                }
            }
        } else {
            tracing::info!("no existing agent state file found");
        }

        for (id, agent) in agents.iter_mut() {
            agent.id = id.clone();

            if agent.status == AgentStatus::Running {
                agent.status = AgentStatus::Created;
            }

            if let Some(tasklist) = &mut agent.tasklist {
                for task in &mut tasklist.tasks {
                    let invalid = task
                        .validation
                        .as_ref()
                        .map(|v| !v.is_valid)
                        .unwrap_or(false);
                    if task.status == TaskStatus::Completed && invalid {
                        task.status = TaskStatus::Failed;
                        tracing::info!(
                            agent_id = %id,
                            task_id = task.id,
                            "corrected task status to failed due to invalid validation"
                        );
                    }
                }
            }
        }

        Ok(Self { path, agents: Mutex::new(agents) })
    }

    fn save_locked(&self, agents: &HashMap<String, Agent>) -> Result<()> {
        let document = StateDocument {
            agents:       agents.clone(),
            last_updated: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&document)?;
        persist::write_atomic(&self.path, &json)?;
        tracing::debug!(count = agents.len(), "saved agent state");
        Ok(())
    }

    // ── Operations ───────────────────────────────────────────────────────

    pub fn create(
        &self,
        name: Option<String>,
        context: impl Into<String>,
        temperature: f32,
        auto: bool,
    ) -> Result<Agent> {
        let agent = Agent::new(
            name.unwrap_or_else(|| "Journalist".to_string()),
            context,
            temperature,
            auto,
        );
        let mut agents = self.agents.lock().unwrap();
        agents.insert(agent.id.clone(), agent.clone());
        self.save_locked(&agents)?;
        tracing::info!(name = %agent.name, id = %agent.id, "created agent");
        Ok(agent)
    }

    pub fn get(&self, id: &str) -> Option<Agent> {
        self.agents.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Agent> {
        self.agents.lock().unwrap().values().cloned().collect()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.agents.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets the agent's status, auto-stamping `started_at` / `completed_at`
    /// on the transition in, and saves.
    pub fn update_status(&self, id: &str, status: AgentStatus) -> Result<Agent> {
        let mut agents = self.agents.lock().unwrap();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;

        agent.status = status;
        match status {
            AgentStatus::Running => agent.started_at = Some(Utc::now()),
            AgentStatus::Completed => agent.completed_at = Some(Utc::now()),
            _ => {}
        }

        let snapshot = agent.clone();
        self.save_locked(&agents)?;
        tracing::info!(agent_id = %id, %status, "updated agent status");
        Ok(snapshot)
    }

    /// Applies an arbitrary mutation to one agent, then saves.
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let mut agents = self.agents.lock().unwrap();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        mutate(agent);
        let snapshot = agent.clone();
        self.save_locked(&agents)?;
        Ok(snapshot)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut agents = self.agents.lock().unwrap();
        if agents.remove(id).is_none() {
            return Err(Error::AgentNotFound(id.to_string()));
        }
        self.save_locked(&agents)?;
        tracing::info!(agent_id = %id, "deleted agent");
        Ok(())
    }

    /// Removes all `completed` and `failed` agents. Returns the count removed.
    pub fn clear_completed(&self) -> Result<usize> {
        let mut agents = self.agents.lock().unwrap();
        let before = agents.len();
        agents.retain(|_, a| {
            !matches!(a.status, AgentStatus::Completed | AgentStatus::Failed)
        });
        let cleared = before - agents.len();
        if cleared > 0 {
            self.save_locked(&agents)?;
            tracing::info!(cleared, "cleared completed/failed agents");
        }
        Ok(cleared)
    }
}
