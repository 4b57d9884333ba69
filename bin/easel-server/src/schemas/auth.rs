use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::accounts::Account;

/// Body of `POST /api/auth/register` and `POST /api/auth/login`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct Credentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccountResponse {
    pub id: String,
    pub username: String,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
        }
    }
}

/// A signed-in account plus the bearer token to send as
/// `Authorization: Bearer <token>`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub success: bool,
    pub user: AccountResponse,
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CallerIdentity {
    pub username: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub success: bool,
    pub user: CallerIdentity,
}
