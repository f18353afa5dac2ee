use serde::Deserialize;

/// Query string of a signed blob URL
#[derive(Debug, Deserialize)]
pub struct BlobQuery {
    pub expires: i64,
    pub signature: String,
}
