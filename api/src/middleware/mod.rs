pub mod cors;
pub mod https;
pub mod rate_limit;
