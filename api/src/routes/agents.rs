use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use uuid::Uuid;

use agentry_core::agent::{
    Agent, StepOneInput, StepThreeInput, StepTwoInput, parse_manual_entries,
};
use agentry_core::builder::{AgentBuilder, StepOneAttachments, StepThreeAttachments};
use agentry_core::error::Envelope;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::PgAgentStore;
use crate::uploads::{MultipartForm, read_multipart};

/// Upper bound on documents attached in one step-3 submission.
const MAX_DOC_FILES: usize = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/agents/step1", post(create_step_one))
        .route("/v1/agents/step2/{id}", put(update_step_two))
        .route("/v1/agents/step3/{id}", put(update_step_three))
        .route("/v1/agents", get(get_my_agent))
}

/// Unauthenticated surface: published agents looked up by slug.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/v1/agents/{slug}", get(get_by_slug))
}

// ──────────────────────────────────────────────
// POST /v1/agents/step1
// ──────────────────────────────────────────────

/// Step 1: create the caller's agent from a multipart submission carrying
/// the required profile fields, a logo, and an optional banner. Repeated
/// submissions return the existing agent unchanged.
#[utoipa::path(
    post,
    path = "/v1/agents/step1",
    request_body(content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Agent created", body = Envelope<Agent>),
        (status = 200, description = "Agent already exists for this account", body = Envelope<Agent>),
        (status = 400, description = "Validation or attachment error"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "agents"
)]
pub async fn create_step_one(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_multipart(multipart, &state.uploads, &["logoFile", "bannerFile"]).await?;

    let input = StepOneInput {
        name: form.text("name").unwrap_or_default().to_string(),
        description: form.text("description").unwrap_or_default().to_string(),
        domain_expertise: form.text("domainExpertise").unwrap_or_default().to_string(),
        color_theme: form.text("colorTheme").unwrap_or_default().to_string(),
    };
    let attachments = StepOneAttachments {
        logo: form.upload("logoFile").cloned(),
        banner: form.upload("bannerFile").cloned(),
    };

    let store = PgAgentStore::new(state.db.clone());
    let outcome = AgentBuilder::new(&store)
        .create_step_one(&identity, input, attachments)
        .await?;

    let (status, message) = if outcome.created {
        tracing::info!(agent_id = %outcome.agent.id, slug = %outcome.agent.slug, "agent created");
        (StatusCode::CREATED, "Agent created successfully")
    } else {
        (StatusCode::OK, "Agent already exists for this account")
    };

    Ok((status, Json(Envelope::ok(message, outcome.agent))))
}

// ──────────────────────────────────────────────
// PUT /v1/agents/step2/{id}
// ──────────────────────────────────────────────

/// Step 2: merge conversation settings onto an agent at step 1. Accepts
/// either a JSON body or a multipart form with an optional `configFile`.
#[utoipa::path(
    put,
    path = "/v1/agents/step2/{id}",
    request_body = StepTwoInput,
    params(("id" = Uuid, Path, description = "Agent id")),
    responses(
        (status = 200, description = "Conversation settings saved", body = Envelope<Agent>),
        (status = 400, description = "Validation error or wrong step"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such agent for this account")
    ),
    security(("bearer_auth" = [])),
    tag = "agents"
)]
pub async fn update_step_two(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    req: Request,
) -> Result<impl IntoResponse, AppError> {
    let (input, config) = if is_multipart(&req) {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::Validation {
                message: format!("Malformed multipart body: {e}"),
                field: None,
            })?;
        let form = read_multipart(multipart, &state.uploads, &["configFile"]).await?;
        let input = step_two_input_from_form(&form)?;
        (input, form.upload("configFile").cloned())
    } else {
        let AppJson(input) = AppJson::<StepTwoInput>::from_request(req, &state).await?;
        (input, None)
    };

    let store = PgAgentStore::new(state.db.clone());
    let agent = AgentBuilder::new(&store)
        .update_step_two(&identity, id, input, config)
        .await?;

    Ok(Json(Envelope::ok("Conversation settings saved", agent)))
}

// ──────────────────────────────────────────────
// PUT /v1/agents/step3/{id}
// ──────────────────────────────────────────────

/// Step 3: attach knowledge sources to an agent at step 2. Accepts a JSON
/// body with `manualEntry` pairs, or a multipart form that may also carry
/// a CSV and up to ten documents.
#[utoipa::path(
    put,
    path = "/v1/agents/step3/{id}",
    request_body = StepThreeInput,
    params(("id" = Uuid, Path, description = "Agent id")),
    responses(
        (status = 200, description = "Knowledge sources saved", body = Envelope<Agent>),
        (status = 400, description = "Validation error or wrong step"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such agent for this account")
    ),
    security(("bearer_auth" = [])),
    tag = "agents"
)]
pub async fn update_step_three(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    req: Request,
) -> Result<impl IntoResponse, AppError> {
    let (input, attachments) = if is_multipart(&req) {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::Validation {
                message: format!("Malformed multipart body: {e}"),
                field: None,
            })?;
        let form = read_multipart(multipart, &state.uploads, &["csvFile", "docFiles"]).await?;

        let docs = form.uploads_for("docFiles");
        if docs.len() > MAX_DOC_FILES {
            return Err(AppError::Attachment {
                field: "docFiles".to_string(),
                message: format!("at most {MAX_DOC_FILES} documents may be attached"),
            });
        }

        let input = step_three_input_from_form(&form)?;
        let attachments = StepThreeAttachments {
            csv: form.upload("csvFile").cloned(),
            docs: docs.to_vec(),
        };
        (input, attachments)
    } else {
        let AppJson(input) = AppJson::<StepThreeInput>::from_request(req, &state).await?;
        (input, StepThreeAttachments::default())
    };

    let store = PgAgentStore::new(state.db.clone());
    let agent = AgentBuilder::new(&store)
        .update_step_three(&identity, id, input, attachments)
        .await?;

    tracing::info!(agent_id = %agent.id, slug = %agent.slug, "agent published");
    Ok(Json(Envelope::ok("Knowledge sources saved", agent)))
}

// ──────────────────────────────────────────────
// GET /v1/agents
// ──────────────────────────────────────────────

/// The caller's own agent, at whatever step it has reached.
#[utoipa::path(
    get,
    path = "/v1/agents",
    responses(
        (status = 200, description = "Agent retrieved", body = Envelope<Agent>),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No agent for this account")
    ),
    security(("bearer_auth" = [])),
    tag = "agents"
)]
pub async fn get_my_agent(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let store = PgAgentStore::new(state.db.clone());
    let agent = AgentBuilder::new(&store)
        .get_by_owner(&identity)
        .await?
        .ok_or_else(|| AppError::NotFound {
            message: "No agent found for this account".to_string(),
        })?;

    Ok(Json(Envelope::ok("Agent retrieved", agent)))
}

// ──────────────────────────────────────────────
// GET /v1/agents/{slug}
// ──────────────────────────────────────────────

/// Public lookup by slug. A miss is still a 200 so callers cannot probe
/// slug existence via status codes.
#[utoipa::path(
    get,
    path = "/v1/agents/{slug}",
    params(("slug" = String, Path, description = "Public agent slug")),
    responses((status = 200, description = "Lookup result", body = Envelope<Agent>)),
    tag = "agents"
)]
pub async fn get_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let store = PgAgentStore::new(state.db.clone());
    let envelope = match AgentBuilder::new(&store).get_by_slug(&slug).await? {
        Some(agent) => Envelope::ok("Agent retrieved", agent),
        None => Envelope::<Agent>::ok_empty("No agent found for the provided slug"),
    };

    Ok(Json(envelope))
}

// ──────────────────────────────────────────────
// Multipart field parsing
// ──────────────────────────────────────────────

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

fn step_two_input_from_form(form: &MultipartForm) -> Result<StepTwoInput, AppError> {
    Ok(StepTwoInput {
        greeting: form.text("greeting").map(str::to_string),
        tone: form.text("tone").map(str::to_string),
        custom_rules: form.text("customRules").map(str::to_string),
        conversation_starters: parse_starters(form.texts("conversationStarters"))?,
        languages: form.text("languages").map(str::to_string),
        enable_free_text: form
            .text("enableFreeText")
            .map(|raw| parse_bool("enableFreeText", raw))
            .transpose()?,
        enable_branching_logic: form
            .text("enableBranchingLogic")
            .map(|raw| parse_bool("enableBranchingLogic", raw))
            .transpose()?,
        conversation_flow: form.text("conversationFlow").map(str::to_string),
    })
}

fn step_three_input_from_form(form: &MultipartForm) -> Result<StepThreeInput, AppError> {
    let manual_entry = form
        .text("manualEntry")
        .map(parse_manual_entries)
        .transpose()?;
    Ok(StepThreeInput { manual_entry })
}

/// Textual boolean as submitted by HTML forms.
fn parse_bool(field: &str, raw: &str) -> Result<bool, AppError> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(AppError::Validation {
            message: format!("{field} must be a boolean"),
            field: Some(field.to_string()),
        }),
    }
}

/// Conversation starters arrive either as a repeated text field or as a
/// single JSON-encoded array.
fn parse_starters(values: &[String]) -> Result<Option<Vec<String>>, AppError> {
    match values {
        [] => Ok(None),
        [single] if single.trim_start().starts_with('[') => serde_json::from_str(single)
            .map(Some)
            .map_err(|_| AppError::Validation {
                message: "conversationStarters must be an array of strings".to_string(),
                field: Some("conversationStarters".to_string()),
            }),
        _ => Ok(Some(values.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_booleans_accept_both_spellings() {
        assert!(parse_bool("enableFreeText", "true").unwrap());
        assert!(parse_bool("enableFreeText", "1").unwrap());
        assert!(!parse_bool("enableFreeText", "false").unwrap());
        assert!(!parse_bool("enableFreeText", "0").unwrap());
        assert!(parse_bool("enableFreeText", "yes").is_err());
    }

    #[test]
    fn starters_parse_repeated_fields_and_json_arrays() {
        assert_eq!(parse_starters(&[]).unwrap(), None);

        let repeated = vec!["How do I start?".to_string(), "What can you do?".to_string()];
        assert_eq!(parse_starters(&repeated).unwrap().unwrap(), repeated);

        let json = vec![r#"["a","b"]"#.to_string()];
        assert_eq!(
            parse_starters(&json).unwrap().unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );

        assert!(parse_starters(&["[broken".to_string()]).is_err());
    }
}
