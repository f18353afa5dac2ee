pub mod album;
pub mod blob;
pub mod photo;
pub mod upload;
pub mod user;

pub use album::*;
pub use blob::*;
pub use photo::*;
pub use upload::*;
pub use user::*;
