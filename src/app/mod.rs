pub mod auth;
pub mod error;
pub mod intake;
pub mod session;
pub mod stories;
pub mod views;
