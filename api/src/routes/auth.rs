use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentry_core::auth::{hash_password, verify_password};
use agentry_core::error::Envelope;
use agentry_core::identity::Role;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn signup_router() -> Router<AppState> {
    Router::new().route("/v1/auth/signup", post(signup))
}

pub fn login_router() -> Router<AppState> {
    Router::new().route("/v1/auth/login", post(login))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/me", get(me))
}

// ──────────────────────────────────────────────
// Shapes
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AuthData {
    pub token: String,
    pub user: UserProfile,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn role(&self) -> Result<Role, AppError> {
        Role::parse(&self.role)
            .ok_or_else(|| AppError::Internal(format!("invalid role '{}' in store", self.role)))
    }

    fn into_profile(self, role: Role) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.name,
            email: self.email,
            role,
            created_at: self.created_at,
        }
    }
}

// ──────────────────────────────────────────────
// POST /v1/auth/signup
// ──────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = AuthData),
        (status = 400, description = "Validation error")
    ),
    tag = "auth"
)]
pub async fn signup(
    State(state): State<AppState>,
    AppJson(req): AppJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_name(&req.name)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let password_hash = hash_password(&req.password).map_err(AppError::Internal)?;

    let user_id = Uuid::now_v7();
    let created_at = Utc::now();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(user_id)
    .bind(req.name.trim())
    .bind(&req.email)
    .bind(&password_hash)
    .bind(Role::User.as_str())
    .bind(created_at)
    .execute(&state.db)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some("23505") {
                return AppError::Validation {
                    message: format!("Email '{}' is already registered", req.email),
                    field: Some("email".to_string()),
                };
            }
        }
        AppError::Database(e)
    })?;

    let token = state.jwt.issue(user_id, Role::User)?;
    tracing::info!(user_id = %user_id, "account created");

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(
            "Account created",
            AuthData {
                token,
                user: UserProfile {
                    id: user_id,
                    name: req.name.trim().to_string(),
                    email: req.email,
                    role: Role::User,
                    created_at,
                },
            },
        )),
    ))
}

// ──────────────────────────────────────────────
// POST /v1/auth/login
// ──────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthData),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invalid = || AppError::Unauthorized {
        message: "Invalid email or password".to_string(),
    };

    let user = sqlx::query_as::<_, UserRow>(
        "SELECT id, name, email, password_hash, role, created_at FROM users WHERE email = $1",
    )
    .bind(&req.email)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(invalid)?;

    let valid = verify_password(&req.password, &user.password_hash).map_err(AppError::Internal)?;
    if !valid {
        return Err(invalid());
    }

    let role = user.role()?;
    let token = state.jwt.issue(user.id, role)?;

    Ok(Json(Envelope::ok(
        "Logged in",
        AuthData {
            token,
            user: user.into_profile(role),
        },
    )))
}

// ──────────────────────────────────────────────
// GET /v1/me
// ──────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Current account", body = UserProfile),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let user = sqlx::query_as::<_, UserRow>(
        "SELECT id, name, email, password_hash, role, created_at FROM users WHERE id = $1",
    )
    .bind(identity.subject_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound {
        message: "Account no longer exists".to_string(),
    })?;

    let role = user.role()?;
    Ok(Json(Envelope::ok(
        "Account retrieved",
        user.into_profile(role),
    )))
}

// ──────────────────────────────────────────────
// Validation
// ──────────────────────────────────────────────

fn validate_name(name: &str) -> Result<(), AppError> {
    let len = name.trim().chars().count();
    if !(2..=50).contains(&len) {
        return Err(AppError::Validation {
            message: "name must be between 2 and 50 characters".to_string(),
            field: Some("name".to_string()),
        });
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !well_formed {
        return Err(AppError::Validation {
            message: "email must be a valid email address".to_string(),
            field: Some("email".to_string()),
        });
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < 8 {
        return Err(AppError::Validation {
            message: "password must be at least 8 characters".to_string(),
            field: Some("password".to_string()),
        });
    }
    Ok(())
}
