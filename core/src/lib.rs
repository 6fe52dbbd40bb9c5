pub mod agent;
pub mod auth;
pub mod builder;
pub mod error;
pub mod files;
pub mod identity;
pub mod slug;
pub mod store;
