use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::agent::{Agent, BuildStep, StepThreePatch, StepTwoPatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an agent already exists for this owner")]
    DuplicateOwner,

    #[error("slug is already taken")]
    DuplicateSlug,

    #[error("store failure: {0}")]
    Backend(String),
}

/// Document-store contract for agents: one record per agent, unique
/// constraints on owner and slug, and single-document find-and-update
/// semantics.
///
/// The `apply_*` operations are compare-and-set on the predecessor step,
/// so a field merge and its step advance land atomically — the gate can
/// never advance without the merge persisting, or vice versa. `insert`
/// must report owner and slug conflicts distinctly; the builder turns the
/// former into an idempotent read and the latter into a slug retry.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn insert(&self, agent: Agent) -> Result<Agent, StoreError>;

    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Option<Agent>, StoreError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Agent>, StoreError>;

    async fn find_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Agent>, StoreError>;

    /// Merge step-2 fields and advance 1 → 2 in one update. `None` when
    /// no owned agent at step 1 matched.
    async fn apply_step_two(
        &self,
        id: Uuid,
        owner_id: Uuid,
        patch: StepTwoPatch,
    ) -> Result<Option<Agent>, StoreError>;

    /// Merge step-3 fields and advance 2 → 3 in one update. `None` when
    /// no owned agent at step 2 matched.
    async fn apply_step_three(
        &self,
        id: Uuid,
        owner_id: Uuid,
        patch: StepThreePatch,
    ) -> Result<Option<Agent>, StoreError>;
}

/// In-memory [`AgentStore`]. Mirrors the unique-index behavior of the
/// Postgres implementation; backs the builder unit tests.
#[derive(Debug, Default)]
pub struct MemoryAgentStore {
    agents: Mutex<HashMap<Uuid, Agent>>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn insert(&self, agent: Agent) -> Result<Agent, StoreError> {
        let mut agents = self.agents.lock().unwrap();
        if agents.values().any(|a| a.owner_id == agent.owner_id) {
            return Err(StoreError::DuplicateOwner);
        }
        if agents.values().any(|a| a.slug == agent.slug) {
            return Err(StoreError::DuplicateSlug);
        }
        agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Option<Agent>, StoreError> {
        let agents = self.agents.lock().unwrap();
        Ok(agents.values().find(|a| a.owner_id == owner_id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Agent>, StoreError> {
        let agents = self.agents.lock().unwrap();
        Ok(agents.values().find(|a| a.slug == slug).cloned())
    }

    async fn find_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Agent>, StoreError> {
        let agents = self.agents.lock().unwrap();
        Ok(agents.get(&id).filter(|a| a.owner_id == owner_id).cloned())
    }

    async fn apply_step_two(
        &self,
        id: Uuid,
        owner_id: Uuid,
        patch: StepTwoPatch,
    ) -> Result<Option<Agent>, StoreError> {
        let mut agents = self.agents.lock().unwrap();
        let Some(agent) = agents
            .get_mut(&id)
            .filter(|a| a.owner_id == owner_id && a.current_step == BuildStep::StepOneComplete)
        else {
            return Ok(None);
        };
        agent.apply_step_two(&patch);
        Ok(Some(agent.clone()))
    }

    async fn apply_step_three(
        &self,
        id: Uuid,
        owner_id: Uuid,
        patch: StepThreePatch,
    ) -> Result<Option<Agent>, StoreError> {
        let mut agents = self.agents.lock().unwrap();
        let Some(agent) = agents
            .get_mut(&id)
            .filter(|a| a.owner_id == owner_id && a.current_step == BuildStep::StepTwoComplete)
        else {
            return Ok(None);
        };
        agent.apply_step_three(&patch);
        Ok(Some(agent.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::fixture_agent;

    #[tokio::test]
    async fn insert_enforces_owner_and_slug_uniqueness() {
        let store = MemoryAgentStore::new();
        let agent = fixture_agent();
        store.insert(agent.clone()).await.unwrap();

        // same owner, different slug
        let mut dup_owner = fixture_agent();
        dup_owner.owner_id = agent.owner_id;
        assert!(matches!(
            store.insert(dup_owner).await,
            Err(StoreError::DuplicateOwner)
        ));

        // different owner, same slug
        let mut dup_slug = fixture_agent();
        dup_slug.slug = agent.slug.clone();
        assert!(matches!(
            store.insert(dup_slug).await,
            Err(StoreError::DuplicateSlug)
        ));
    }

    #[tokio::test]
    async fn apply_step_two_is_gated_on_step_one() {
        let store = MemoryAgentStore::new();
        let agent = fixture_agent();
        let id = agent.id;
        let owner = agent.owner_id;
        store.insert(agent).await.unwrap();

        let updated = store
            .apply_step_two(id, owner, StepTwoPatch::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.current_step, BuildStep::StepTwoComplete);

        // second application finds no agent at step 1
        assert!(store
            .apply_step_two(id, owner, StepTwoPatch::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn apply_step_two_ignores_other_owners() {
        let store = MemoryAgentStore::new();
        let agent = fixture_agent();
        let id = agent.id;
        store.insert(agent).await.unwrap();

        assert!(store
            .apply_step_two(id, Uuid::now_v7(), StepTwoPatch::default())
            .await
            .unwrap()
            .is_none());
    }
}
