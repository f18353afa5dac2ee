use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User role within a family group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Member,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => UserRole::Admin,
            _ => UserRole::Member,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

/// Family group, the visibility boundary for photos and albums
#[derive(Debug, Clone, FromRow)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub invite_code: String,
    pub created_at: String,
}

/// User model
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub group_id: String,
    pub username: String,
    pub name: String,
    pub password_hash: String,
    pub role: String,
    pub token_version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn get_role(&self) -> UserRole {
        UserRole::from_str(&self.role)
    }
}

/// User response (without sensitive data)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub group_id: String,
    pub username: String,
    pub name: String,
    pub role: String,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            group_id: user.group_id,
            username: user.username,
            name: user.name,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// Profile of the calling user, with the group they belong to
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub group_name: String,
    /// Only shown to group admins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub invite_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: UserResponse,
}

/// Session context attached to every authenticated request
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub group_id: String,
    pub username: String,
    pub role: UserRole,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub gid: String, // group id
    pub role: String,
    pub ver: i64,
    pub exp: usize,
    pub iat: usize,
}
