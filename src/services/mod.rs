pub mod album;
pub mod auth;
pub mod photo;
pub mod upload;
pub mod variant;

pub use album::AlbumService;
pub use auth::AuthService;
pub use photo::PhotoService;
pub use upload::UploadService;
pub use variant::{VariantReport, VariantService};
