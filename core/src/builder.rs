use chrono::Utc;
use uuid::Uuid;

use crate::agent::{
    Agent, BuildStep, StepOneInput, StepThreeInput, StepThreePatch, StepTwoInput, StepTwoPatch,
    Tone, assign_entry_ids, is_hex_color,
};
use crate::error::AgentError;
use crate::files::StoredUpload;
use crate::identity::Identity;
use crate::slug::{MAX_SLUG_ATTEMPTS, slug_candidate};
use crate::store::{AgentStore, StoreError};

/// Classified step-1 attachments. The logo is required; the builder
/// rejects its absence so the check lives with the rest of the step-1
/// validation.
#[derive(Debug, Default)]
pub struct StepOneAttachments {
    pub logo: Option<StoredUpload>,
    pub banner: Option<StoredUpload>,
}

/// Classified step-3 attachments, both optional.
#[derive(Debug, Default)]
pub struct StepThreeAttachments {
    pub csv: Option<StoredUpload>,
    pub docs: Vec<StoredUpload>,
}

/// Result of the step-1 operation. `created` distinguishes a fresh agent
/// from the idempotent read of a pre-existing one.
#[derive(Debug)]
pub struct CreateOutcome {
    pub agent: Agent,
    pub created: bool,
}

/// The three-step creation/update protocol over an [`AgentStore`].
///
/// Holds no state of its own; every cross-request guarantee is delegated
/// to the store's per-document atomicity and unique constraints.
pub struct AgentBuilder<'a, S> {
    store: &'a S,
}

impl<'a, S: AgentStore> AgentBuilder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Step 1: create the identity's agent.
    ///
    /// If one already exists for the owner the call is an idempotent
    /// read — repeated submissions can never produce a second agent.
    /// The owner unique constraint closes the remaining create race: a
    /// duplicate-owner conflict on insert also resolves to the existing
    /// agent.
    pub async fn create_step_one(
        &self,
        identity: &Identity,
        input: StepOneInput,
        attachments: StepOneAttachments,
    ) -> Result<CreateOutcome, AgentError> {
        if let Some(existing) = self.store.find_by_owner(identity.subject_id).await? {
            return Ok(CreateOutcome {
                agent: existing,
                created: false,
            });
        }

        validate_step_one(&input)?;
        let logo = attachments
            .logo
            .ok_or_else(|| AgentError::validation("logoFile", "logoFile is required"))?;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if attempts > MAX_SLUG_ATTEMPTS {
                return Err(AgentError::SlugExhausted {
                    attempts: MAX_SLUG_ATTEMPTS,
                });
            }

            let slug = slug_candidate(&input.name);
            // Pre-check is an optimization; the unique constraint below
            // is the authority.
            if self.store.find_by_slug(&slug).await?.is_some() {
                continue;
            }

            let agent = Agent {
                id: Uuid::now_v7(),
                owner_id: identity.subject_id,
                name: input.name.clone(),
                slug,
                description: input.description.clone(),
                domain_expertise: input.domain_expertise.clone(),
                color_theme: input.color_theme.clone(),
                logo_file: logo.relative_path.clone(),
                banner_file: attachments
                    .banner
                    .as_ref()
                    .map(|b| b.relative_path.clone()),
                current_step: BuildStep::StepOneComplete,
                greeting: None,
                tone: None,
                custom_rules: None,
                conversation_starters: None,
                languages: None,
                enable_free_text: None,
                enable_branching_logic: None,
                conversation_flow: None,
                config_file: None,
                manual_entries: None,
                csv_file: None,
                doc_files: Vec::new(),
                created_at: Utc::now(),
            };

            match self.store.insert(agent).await {
                Ok(agent) => return Ok(CreateOutcome { agent, created: true }),
                Err(StoreError::DuplicateSlug) => continue,
                Err(StoreError::DuplicateOwner) => {
                    // Lost a concurrent create; fall back to the read.
                    let existing = self
                        .store
                        .find_by_owner(identity.subject_id)
                        .await?
                        .ok_or_else(|| {
                            AgentError::Store(StoreError::Backend(
                                "agent vanished after duplicate-owner conflict".to_string(),
                            ))
                        })?;
                    return Ok(CreateOutcome {
                        agent: existing,
                        created: false,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Step 2: merge conversation fields onto an agent at step 1.
    pub async fn update_step_two(
        &self,
        identity: &Identity,
        id: Uuid,
        input: StepTwoInput,
        config: Option<StoredUpload>,
    ) -> Result<Agent, AgentError> {
        let patch = validate_step_two(input, config)?;
        match self
            .store
            .apply_step_two(id, identity.subject_id, patch)
            .await?
        {
            Some(agent) => Ok(agent),
            None => Err(self
                .gate_failure(id, identity.subject_id, BuildStep::StepTwoComplete)
                .await),
        }
    }

    /// Step 3: merge knowledge fields onto an agent at step 2.
    pub async fn update_step_three(
        &self,
        identity: &Identity,
        id: Uuid,
        input: StepThreeInput,
        attachments: StepThreeAttachments,
    ) -> Result<Agent, AgentError> {
        let manual_entries = input.manual_entry.map(assign_entry_ids).transpose()?;
        let patch = StepThreePatch {
            manual_entries,
            csv_file: attachments.csv.map(|u| u.relative_path),
            doc_files: if attachments.docs.is_empty() {
                None
            } else {
                Some(
                    attachments
                        .docs
                        .into_iter()
                        .map(|u| u.relative_path)
                        .collect(),
                )
            },
        };

        match self
            .store
            .apply_step_three(id, identity.subject_id, patch)
            .await?
        {
            Some(agent) => Ok(agent),
            None => Err(self
                .gate_failure(id, identity.subject_id, BuildStep::StepThreeComplete)
                .await),
        }
    }

    pub async fn get_by_owner(&self, identity: &Identity) -> Result<Option<Agent>, AgentError> {
        Ok(self.store.find_by_owner(identity.subject_id).await?)
    }

    /// Public lookup — the only operation without an identity.
    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Agent>, AgentError> {
        Ok(self.store.find_by_slug(slug).await?)
    }

    /// A gated update matched no document. Work out why: the agent either
    /// doesn't exist for this owner, or sits at the wrong step.
    async fn gate_failure(&self, id: Uuid, owner_id: Uuid, requested: BuildStep) -> AgentError {
        match self.store.find_owned(id, owner_id).await {
            Ok(None) => AgentError::NotFound,
            Ok(Some(agent)) => AgentError::StepMismatch {
                requested: requested.number(),
                current: agent.current_step.number(),
            },
            Err(err) => err.into(),
        }
    }
}

fn validate_step_one(input: &StepOneInput) -> Result<(), AgentError> {
    for (field, value) in [
        ("name", &input.name),
        ("description", &input.description),
        ("domainExpertise", &input.domain_expertise),
        ("colorTheme", &input.color_theme),
    ] {
        if value.trim().is_empty() {
            return Err(AgentError::validation(
                field,
                format!("{field} must be provided"),
            ));
        }
    }
    if !is_hex_color(&input.color_theme) {
        return Err(AgentError::validation(
            "colorTheme",
            "colorTheme must be a valid hex color code (e.g. #007bff)",
        ));
    }
    Ok(())
}

fn validate_step_two(
    input: StepTwoInput,
    config: Option<StoredUpload>,
) -> Result<StepTwoPatch, AgentError> {
    let tone = input.tone.as_deref().map(Tone::parse).transpose()?;
    Ok(StepTwoPatch {
        greeting: input.greeting,
        tone,
        custom_rules: input.custom_rules,
        conversation_starters: input.conversation_starters,
        languages: input.languages,
        enable_free_text: input.enable_free_text,
        enable_branching_logic: input.enable_branching_logic,
        conversation_flow: input.conversation_flow,
        config_file: config.map(|u| u.relative_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ManualEntryInput;
    use crate::files::UploadPurpose;
    use crate::identity::Role;
    use crate::store::MemoryAgentStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn identity() -> Identity {
        Identity {
            subject_id: Uuid::now_v7(),
            role: Role::User,
        }
    }

    fn step_one_input() -> StepOneInput {
        StepOneInput {
            name: "Support Bot".to_string(),
            description: "Answers support questions".to_string(),
            domain_expertise: "customer support".to_string(),
            color_theme: "#007bff".to_string(),
        }
    }

    fn logo() -> StoredUpload {
        StoredUpload {
            purpose: UploadPurpose::Logo,
            relative_path: "images/logoFile-1-1.png".to_string(),
        }
    }

    fn with_logo() -> StepOneAttachments {
        StepOneAttachments {
            logo: Some(logo()),
            banner: None,
        }
    }

    async fn create(store: &MemoryAgentStore, identity: &Identity) -> Agent {
        AgentBuilder::new(store)
            .create_step_one(identity, step_one_input(), with_logo())
            .await
            .unwrap()
            .agent
    }

    #[tokio::test]
    async fn repeated_step_one_is_idempotent() {
        let store = MemoryAgentStore::new();
        let identity = identity();
        let builder = AgentBuilder::new(&store);

        let first = builder
            .create_step_one(&identity, step_one_input(), with_logo())
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.agent.current_step, BuildStep::StepOneComplete);

        let second = builder
            .create_step_one(&identity, step_one_input(), with_logo())
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.agent.id, first.agent.id);
        assert_eq!(second.agent.slug, first.agent.slug);
    }

    #[tokio::test]
    async fn step_one_requires_fields_logo_and_hex_color() {
        let store = MemoryAgentStore::new();
        let builder = AgentBuilder::new(&store);
        let identity = identity();

        let mut blank = step_one_input();
        blank.description = "  ".to_string();
        let err = builder
            .create_step_one(&identity, blank, with_logo())
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("description"));

        let mut bad_color = step_one_input();
        bad_color.color_theme = "blue".to_string();
        let err = builder
            .create_step_one(&identity, bad_color, with_logo())
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("colorTheme"));

        let err = builder
            .create_step_one(&identity, step_one_input(), StepOneAttachments::default())
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("logoFile"));

        // nothing persisted
        assert!(builder.get_by_owner(&identity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn step_two_happy_path_merges_and_advances() {
        let store = MemoryAgentStore::new();
        let identity = identity();
        let agent = create(&store, &identity).await;
        let builder = AgentBuilder::new(&store);

        let input = StepTwoInput {
            greeting: Some("Hi there".to_string()),
            tone: Some("Friendly".to_string()),
            enable_free_text: Some(false),
            ..Default::default()
        };
        let updated = builder
            .update_step_two(&identity, agent.id, input, None)
            .await
            .unwrap();

        assert_eq!(updated.current_step, BuildStep::StepTwoComplete);
        assert_eq!(updated.tone, Some(Tone::Friendly));
        assert_eq!(updated.greeting.as_deref(), Some("Hi there"));
        assert_eq!(updated.enable_free_text, Some(false));
        // untouched optionals stay unset
        assert!(updated.languages.is_none());
    }

    #[tokio::test]
    async fn step_two_rejects_unknown_tone() {
        let store = MemoryAgentStore::new();
        let identity = identity();
        let agent = create(&store, &identity).await;
        let builder = AgentBuilder::new(&store);

        let input = StepTwoInput {
            tone: Some("LOUD".to_string()),
            ..Default::default()
        };
        let err = builder
            .update_step_two(&identity, agent.id, input, None)
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("tone"));

        // rejected submission left the agent unchanged
        let unchanged = builder.get_by_owner(&identity).await.unwrap().unwrap();
        assert_eq!(unchanged.current_step, BuildStep::StepOneComplete);
        assert!(unchanged.tone.is_none());
    }

    #[tokio::test]
    async fn out_of_order_steps_are_rejected_and_leave_the_agent_unchanged() {
        let store = MemoryAgentStore::new();
        let identity = identity();
        let agent = create(&store, &identity).await;
        let builder = AgentBuilder::new(&store);

        // step 3 straight after step 1
        let err = builder
            .update_step_three(
                &identity,
                agent.id,
                StepThreeInput::default(),
                StepThreeAttachments::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::StepMismatch {
                requested: 3,
                current: 1
            }
        ));

        // step 2 twice
        builder
            .update_step_two(&identity, agent.id, StepTwoInput::default(), None)
            .await
            .unwrap();
        let err = builder
            .update_step_two(&identity, agent.id, StepTwoInput::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::StepMismatch {
                requested: 2,
                current: 2
            }
        ));

        let unchanged = builder.get_by_owner(&identity).await.unwrap().unwrap();
        assert_eq!(unchanged.current_step, BuildStep::StepTwoComplete);
        assert!(unchanged.manual_entries.is_none());
    }

    #[tokio::test]
    async fn cross_identity_updates_read_as_not_found() {
        let store = MemoryAgentStore::new();
        let owner = identity();
        let intruder = identity();
        let agent = create(&store, &owner).await;
        let builder = AgentBuilder::new(&store);

        let err = builder
            .update_step_two(&intruder, agent.id, StepTwoInput::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound));
    }

    #[tokio::test]
    async fn step_three_assigns_fresh_entry_ids() {
        let store = MemoryAgentStore::new();
        let identity = identity();
        let agent = create(&store, &identity).await;
        let builder = AgentBuilder::new(&store);
        builder
            .update_step_two(&identity, agent.id, StepTwoInput::default(), None)
            .await
            .unwrap();

        let input = StepThreeInput {
            manual_entry: Some(vec![ManualEntryInput {
                question: "Q".to_string(),
                answer: "A".to_string(),
            }]),
        };
        let updated = builder
            .update_step_three(&identity, agent.id, input, StepThreeAttachments::default())
            .await
            .unwrap();

        let entries = updated.manual_entries.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].question, "Q");
        assert!(!entries[0].id.is_nil());
        assert_eq!(updated.current_step, BuildStep::StepThreeComplete);
    }

    #[tokio::test]
    async fn public_slug_lookup_misses_are_not_errors() {
        let store = MemoryAgentStore::new();
        let builder = AgentBuilder::new(&store);
        assert!(builder.get_by_slug("no-such-slug_0000").await.unwrap().is_none());

        let identity = identity();
        let agent = create(&store, &identity).await;
        let found = builder.get_by_slug(&agent.slug).await.unwrap().unwrap();
        assert_eq!(found.id, agent.id);
    }

    /// Store shim that fails the first `failures` inserts with a slug
    /// conflict, as a saturated namespace would.
    struct CollidingStore {
        inner: MemoryAgentStore,
        remaining: AtomicU32,
    }

    impl CollidingStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryAgentStore::new(),
                remaining: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl AgentStore for CollidingStore {
        async fn insert(&self, agent: Agent) -> Result<Agent, StoreError> {
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::DuplicateSlug);
            }
            self.inner.insert(agent).await
        }

        async fn find_by_owner(&self, owner_id: Uuid) -> Result<Option<Agent>, StoreError> {
            self.inner.find_by_owner(owner_id).await
        }

        async fn find_by_slug(&self, slug: &str) -> Result<Option<Agent>, StoreError> {
            self.inner.find_by_slug(slug).await
        }

        async fn find_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Agent>, StoreError> {
            self.inner.find_owned(id, owner_id).await
        }

        async fn apply_step_two(
            &self,
            id: Uuid,
            owner_id: Uuid,
            patch: StepTwoPatch,
        ) -> Result<Option<Agent>, StoreError> {
            self.inner.apply_step_two(id, owner_id, patch).await
        }

        async fn apply_step_three(
            &self,
            id: Uuid,
            owner_id: Uuid,
            patch: StepThreePatch,
        ) -> Result<Option<Agent>, StoreError> {
            self.inner.apply_step_three(id, owner_id, patch).await
        }
    }

    #[tokio::test]
    async fn slug_conflicts_are_retried() {
        let store = CollidingStore::new(3);
        let outcome = AgentBuilder::new(&store)
            .create_step_one(&identity(), step_one_input(), with_logo())
            .await
            .unwrap();
        assert!(outcome.created);
    }

    #[tokio::test]
    async fn slug_generation_gives_up_after_the_cap() {
        let store = CollidingStore::new(MAX_SLUG_ATTEMPTS);
        let err = AgentBuilder::new(&store)
            .create_step_one(&identity(), step_one_input(), with_logo())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SlugExhausted { .. }));
    }

    #[tokio::test]
    async fn losing_the_create_race_returns_the_winner() {
        // DuplicateOwner from insert even though the pre-read saw nothing.
        struct RacingStore {
            inner: MemoryAgentStore,
            winner: Agent,
            reads: AtomicU32,
        }

        #[async_trait]
        impl AgentStore for RacingStore {
            async fn insert(&self, _agent: Agent) -> Result<Agent, StoreError> {
                Err(StoreError::DuplicateOwner)
            }

            async fn find_by_owner(&self, owner_id: Uuid) -> Result<Option<Agent>, StoreError> {
                // first read: nothing yet; later reads see the winner
                if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(None)
                } else if self.winner.owner_id == owner_id {
                    Ok(Some(self.winner.clone()))
                } else {
                    Ok(None)
                }
            }

            async fn find_by_slug(&self, slug: &str) -> Result<Option<Agent>, StoreError> {
                self.inner.find_by_slug(slug).await
            }

            async fn find_owned(
                &self,
                id: Uuid,
                owner_id: Uuid,
            ) -> Result<Option<Agent>, StoreError> {
                self.inner.find_owned(id, owner_id).await
            }

            async fn apply_step_two(
                &self,
                id: Uuid,
                owner_id: Uuid,
                patch: StepTwoPatch,
            ) -> Result<Option<Agent>, StoreError> {
                self.inner.apply_step_two(id, owner_id, patch).await
            }

            async fn apply_step_three(
                &self,
                id: Uuid,
                owner_id: Uuid,
                patch: StepThreePatch,
            ) -> Result<Option<Agent>, StoreError> {
                self.inner.apply_step_three(id, owner_id, patch).await
            }
        }

        let identity = identity();
        let mut winner = crate::agent::tests::fixture_agent();
        winner.owner_id = identity.subject_id;

        let store = RacingStore {
            inner: MemoryAgentStore::new(),
            winner: winner.clone(),
            reads: AtomicU32::new(0),
        };

        let outcome = AgentBuilder::new(&store)
            .create_step_one(&identity, step_one_input(), with_logo())
            .await
            .unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.agent.id, winner.id);
    }
}
