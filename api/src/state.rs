use agentry_core::files::UploadStore;
use sqlx::PgPool;

use crate::auth::JwtKeys;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub uploads: UploadStore,
    pub jwt: JwtKeys,
}
