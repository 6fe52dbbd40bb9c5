use std::net::SocketAddr;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;
mod store;
mod uploads;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Agentry API",
        version = "0.1.0",
        description = "Step-gated builder for publishable support agents: one agent per \
                       account, assembled in three validated steps and served by slug."
    ),
    paths(
        routes::health::root,
        routes::health::health_check,
        routes::auth::signup,
        routes::auth::login,
        routes::auth::me,
        routes::agents::create_step_one,
        routes::agents::update_step_two,
        routes::agents::update_step_three,
        routes::agents::get_my_agent,
        routes::agents::get_by_slug,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::auth::SignupRequest,
        routes::auth::LoginRequest,
        routes::auth::UserProfile,
        routes::auth::AuthData,
        agentry_core::agent::Agent,
        agentry_core::agent::BuildStep,
        agentry_core::agent::Tone,
        agentry_core::agent::ManualEntry,
        agentry_core::agent::ManualEntryInput,
        agentry_core::agent::StepOneInput,
        agentry_core::agent::StepTwoInput,
        agentry_core::agent::StepThreeInput,
        agentry_core::error::Envelope<agentry_core::agent::Agent>,
        agentry_core::identity::Role,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentry_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // Upload buckets, provisioned once at startup
    let upload_root =
        std::env::var("AGENTRY_UPLOAD_ROOT").unwrap_or_else(|_| "uploads".to_string());
    let upload_store = agentry_core::files::UploadStore::provision(&upload_root)
        .expect("Failed to provision upload directories");

    let jwt_secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");

    let app_state = state::AppState {
        db: pool,
        uploads: upload_store.clone(),
        jwt: auth::JwtKeys::from_secret(&jwt_secret),
    };

    // HTTPS enforcement (only when AGENTRY_REQUIRE_HTTPS=true)
    let require_https = std::env::var("AGENTRY_REQUIRE_HTTPS")
        .map(|v| v == "true")
        .unwrap_or(false);

    // CORS
    let cors_layer = middleware::cors::build_cors_layer();

    // Router with per-endpoint rate limiting on auth and build routes
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::auth::signup_router().layer(middleware::rate_limit::signup_layer()))
        .merge(routes::auth::login_router().layer(middleware::rate_limit::login_layer()))
        .merge(routes::auth::router())
        .merge(
            routes::agents::router()
                .layer(middleware::rate_limit::agents_layer())
                .layer(DefaultBodyLimit::max(uploads::UPLOAD_BODY_LIMIT)),
        )
        .merge(routes::agents::public_router().layer(middleware::rate_limit::public_layer()))
        .nest_service("/uploads", ServeDir::new(upload_store.root()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .option_layer(
                    require_https
                        .then(|| axum::middleware::from_fn(middleware::https::require_https)),
                )
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Agentry API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
