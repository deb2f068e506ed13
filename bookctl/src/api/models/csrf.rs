use serde::{Deserialize, Serialize};

/// Body of `GET /api/csrf`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}
