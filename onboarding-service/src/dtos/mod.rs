pub mod signup;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error payload shared by every endpoint: a human-readable message plus a
/// stable machine-readable code.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
