pub mod admin;
pub mod exchange;
pub mod jwks;
