pub mod auth;
pub mod validity;
