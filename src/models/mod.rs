pub mod response;
pub mod token;
pub mod validity;
