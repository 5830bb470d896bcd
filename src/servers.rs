//! Process supervision: tracks the background tasks that make up a running
//! node and notices when one of them dies early. Shape kept from the
//! teacher's `Servers` struct (builder methods, a broadcast channel other
//! tasks can watch for shutdown), generalized from DNS's four fixed
//! services to Playdar's three.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agent {
    Registry,
    Lan,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Stopped { agent: Agent },
}

#[derive(Debug)]
pub struct Servers {
    pub registry: Option<JoinHandle<()>>,
    pub lan: Option<JoinHandle<()>>,
    pub http: Option<JoinHandle<std::io::Result<()>>>,
    pub agent_tx: broadcast::Sender<AgentState>,
}

impl Default for Servers {
    fn default() -> Self {
        let (agent_tx, _) = broadcast::channel(64);
        Self {
            registry: None,
            lan: None,
            http: None,
            agent_tx,
        }
    }
}

impl Servers {
    pub fn build(agent_tx: broadcast::Sender<AgentState>) -> Self {
        Self {
            agent_tx,
            ..Default::default()
        }
    }

    pub fn with_registry(self, registry: JoinHandle<()>) -> Self {
        Self {
            registry: Some(registry),
            ..self
        }
    }

    pub fn with_lan(self, lan: JoinHandle<()>) -> Self {
        Self {
            lan: Some(lan),
            ..self
        }
    }

    pub fn with_http(self, http: JoinHandle<std::io::Result<()>>) -> Self {
        Self {
            http: Some(http),
            ..self
        }
    }

    fn send_stopped(&self, agent: Agent) {
        info!(?agent, "background task stopped");
        let _ = self.agent_tx.send(AgentState::Stopped { agent });
    }

    /// Polls each tracked task; returns true if any have finished (cleanly
    /// or otherwise), which `main` treats as a signal to shut the rest down.
    pub fn any_finished(&self) -> bool {
        let mut finished = false;
        if let Some(task) = &self.registry {
            if task.is_finished() {
                self.send_stopped(Agent::Registry);
                finished = true;
            }
        }
        if let Some(task) = &self.lan {
            if task.is_finished() {
                self.send_stopped(Agent::Lan);
                finished = true;
            }
        }
        if let Some(task) = &self.http {
            if task.is_finished() {
                self.send_stopped(Agent::Http);
                finished = true;
            }
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn any_finished_is_false_until_a_task_completes() {
        let (agent_tx, _) = broadcast::channel(8);
        let servers = Servers::build(agent_tx)
            .with_registry(tokio::spawn(async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            }))
            .with_http(tokio::spawn(async { Ok(()) }));

        assert!(!servers.any_finished());
    }
}
