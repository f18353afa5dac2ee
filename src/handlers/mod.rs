pub mod album;
pub mod auth;
pub mod blob;
pub mod health;
pub mod photo;
pub mod upload;
