//! Postgres implementation of the `AgentStore` contract.
//!
//! The schema carries unique indexes on `owner_id` and `slug`; insert
//! conflicts are translated back into the distinct store errors the
//! builder keys its idempotent-create and slug-retry behavior on. The
//! `apply_*` updates are single-statement compare-and-set on the
//! predecessor step, so a merge and its step advance commit together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use agentry_core::agent::{
    Agent, BuildStep, ManualEntry, StepThreePatch, StepTwoPatch, Tone,
};
use agentry_core::store::{AgentStore, StoreError};

const AGENT_COLUMNS: &str = "id, owner_id, name, slug, description, domain_expertise, \
     color_theme, logo_file, banner_file, current_step, greeting, tone, custom_rules, \
     conversation_starters, languages, enable_free_text, enable_branching_logic, \
     conversation_flow, config_file, manual_entries, csv_file, doc_files, created_at";

const OWNER_CONSTRAINT: &str = "agents_owner_id_key";
const SLUG_CONSTRAINT: &str = "agents_slug_key";

#[derive(Clone)]
pub struct PgAgentStore {
    pool: PgPool,
}

impl PgAgentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    slug: String,
    description: String,
    domain_expertise: String,
    color_theme: String,
    logo_file: String,
    banner_file: Option<String>,
    current_step: i16,
    greeting: Option<String>,
    tone: Option<String>,
    custom_rules: Option<String>,
    conversation_starters: Option<sqlx::types::Json<Vec<String>>>,
    languages: Option<String>,
    enable_free_text: Option<bool>,
    enable_branching_logic: Option<bool>,
    conversation_flow: Option<String>,
    config_file: Option<String>,
    manual_entries: Option<sqlx::types::Json<Vec<ManualEntry>>>,
    csv_file: Option<String>,
    doc_files: sqlx::types::Json<Vec<String>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = StoreError;

    fn try_from(row: AgentRow) -> Result<Self, StoreError> {
        let current_step = u8::try_from(row.current_step)
            .ok()
            .and_then(BuildStep::from_number)
            .ok_or_else(|| {
                StoreError::Backend(format!("invalid current_step {} in store", row.current_step))
            })?;
        let tone = row
            .tone
            .map(|t| {
                Tone::from_label(&t)
                    .ok_or_else(|| StoreError::Backend(format!("invalid tone '{t}' in store")))
            })
            .transpose()?;

        Ok(Agent {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            domain_expertise: row.domain_expertise,
            color_theme: row.color_theme,
            logo_file: row.logo_file,
            banner_file: row.banner_file,
            current_step,
            greeting: row.greeting,
            tone,
            custom_rules: row.custom_rules,
            conversation_starters: row.conversation_starters.map(|j| j.0),
            languages: row.languages,
            enable_free_text: row.enable_free_text,
            enable_branching_logic: row.enable_branching_logic,
            conversation_flow: row.conversation_flow,
            config_file: row.config_file,
            manual_entries: row.manual_entries.map(|j| j.0),
            csv_file: row.csv_file,
            doc_files: row.doc_files.0,
            created_at: row.created_at,
        })
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return match db_err.constraint() {
                Some(OWNER_CONSTRAINT) => StoreError::DuplicateOwner,
                Some(SLUG_CONSTRAINT) => StoreError::DuplicateSlug,
                _ => backend(err),
            };
        }
    }
    backend(err)
}

#[async_trait]
impl AgentStore for PgAgentStore {
    async fn insert(&self, agent: Agent) -> Result<Agent, StoreError> {
        let sql = format!(
            "INSERT INTO agents \
             (id, owner_id, name, slug, description, domain_expertise, color_theme, \
              logo_file, banner_file, current_step, doc_files, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {AGENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AgentRow>(&sql)
            .bind(agent.id)
            .bind(agent.owner_id)
            .bind(&agent.name)
            .bind(&agent.slug)
            .bind(&agent.description)
            .bind(&agent.domain_expertise)
            .bind(&agent.color_theme)
            .bind(&agent.logo_file)
            .bind(&agent.banner_file)
            .bind(i16::from(agent.current_step.number()))
            .bind(sqlx::types::Json(&agent.doc_files))
            .bind(agent.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_insert_error)?;
        row.try_into()
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Option<Agent>, StoreError> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE owner_id = $1");
        sqlx::query_as::<_, AgentRow>(&sql)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Agent::try_from)
            .transpose()
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Agent>, StoreError> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE slug = $1");
        sqlx::query_as::<_, AgentRow>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Agent::try_from)
            .transpose()
    }

    async fn find_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Agent>, StoreError> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1 AND owner_id = $2");
        sqlx::query_as::<_, AgentRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Agent::try_from)
            .transpose()
    }

    async fn apply_step_two(
        &self,
        id: Uuid,
        owner_id: Uuid,
        patch: StepTwoPatch,
    ) -> Result<Option<Agent>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE agents SET current_step = ");
        qb.push_bind(i16::from(BuildStep::StepTwoComplete.number()));
        if let Some(v) = patch.greeting {
            qb.push(", greeting = ").push_bind(v);
        }
        if let Some(v) = patch.tone {
            qb.push(", tone = ").push_bind(v.as_str());
        }
        if let Some(v) = patch.custom_rules {
            qb.push(", custom_rules = ").push_bind(v);
        }
        if let Some(v) = patch.conversation_starters {
            qb.push(", conversation_starters = ")
                .push_bind(sqlx::types::Json(v));
        }
        if let Some(v) = patch.languages {
            qb.push(", languages = ").push_bind(v);
        }
        if let Some(v) = patch.enable_free_text {
            qb.push(", enable_free_text = ").push_bind(v);
        }
        if let Some(v) = patch.enable_branching_logic {
            qb.push(", enable_branching_logic = ").push_bind(v);
        }
        if let Some(v) = patch.conversation_flow {
            qb.push(", conversation_flow = ").push_bind(v);
        }
        if let Some(v) = patch.config_file {
            qb.push(", config_file = ").push_bind(v);
        }
        self.finish_gated_update(qb, id, owner_id, BuildStep::StepOneComplete)
            .await
    }

    async fn apply_step_three(
        &self,
        id: Uuid,
        owner_id: Uuid,
        patch: StepThreePatch,
    ) -> Result<Option<Agent>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE agents SET current_step = ");
        qb.push_bind(i16::from(BuildStep::StepThreeComplete.number()));
        if let Some(v) = patch.manual_entries {
            qb.push(", manual_entries = ").push_bind(sqlx::types::Json(v));
        }
        if let Some(v) = patch.csv_file {
            qb.push(", csv_file = ").push_bind(v);
        }
        if let Some(v) = patch.doc_files {
            qb.push(", doc_files = ").push_bind(sqlx::types::Json(v));
        }
        self.finish_gated_update(qb, id, owner_id, BuildStep::StepTwoComplete)
            .await
    }
}

impl PgAgentStore {
    /// Append the gate predicate and run the update. Matching on
    /// `current_step` in the WHERE clause is what makes merge and
    /// advance a single atomic document operation.
    async fn finish_gated_update(
        &self,
        mut qb: QueryBuilder<'_, Postgres>,
        id: Uuid,
        owner_id: Uuid,
        required: BuildStep,
    ) -> Result<Option<Agent>, StoreError> {
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" AND owner_id = ").push_bind(owner_id);
        qb.push(" AND current_step = ")
            .push_bind(i16::from(required.number()));
        qb.push(" RETURNING ").push(AGENT_COLUMNS);

        qb.build_query_as::<AgentRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Agent::try_from)
            .transpose()
    }
}
