//! API request/response models for impersonation.

use serde::{Deserialize, Serialize};

use crate::api::models::users::{CurrentUser, Role};
use crate::types::UserId;

/// Body of `POST /api/impersonate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonateRequest {
    pub user_id: UserId,
}

/// The user now being impersonated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpersonatedUser {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl From<CurrentUser> for ImpersonatedUser {
    fn from(user: CurrentUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonateResponse {
    pub success: bool,
    pub impersonating_user_id: UserId,
    pub target_user: ImpersonatedUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopImpersonatingResponse {
    pub success: bool,
}
