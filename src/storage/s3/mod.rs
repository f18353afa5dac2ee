//! S3-compatible object storage, signed in-tree with SigV4

pub mod client;
pub mod provider;
pub mod request;
pub mod signer;

pub use client::Client;
pub use provider::S3Storage;
