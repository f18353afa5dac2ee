use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::models::{
    Claims, CurrentUser, Group, LoginRequest, LoginResponse, ProfileResponse, RegisterRequest,
    User, UserResponse, UserRole,
};

const INVITE_CODE_LEN: usize = 10;

/// Authentication service
pub struct AuthService;

impl AuthService {
    /// Register a user. Without an invite code this only succeeds while no
    /// users exist, and founds a new family group with the caller as admin.
    pub async fn register(db: &Database, req: RegisterRequest) -> Result<UserResponse> {
        let username = req.username.trim();
        validate_username(username)?;
        if req.password.chars().count() < 8 {
            return Err(AppError::BadRequest(
                "Password must be at least 8 characters".to_string(),
            ));
        }
        let name = match req.name.trim() {
            "" => username.to_string(),
            name => name.to_string(),
        };

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(db.pool())
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }

        let password_hash = Self::hash_password(&req.password)?;
        let now = db::now_timestamp();
        let mut tx = db.pool().begin().await?;

        let invite_code = req
            .invite_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let (group_id, role) = match invite_code {
            Some(code) => {
                let group: Group = sqlx::query_as("SELECT * FROM family_groups WHERE invite_code = ?")
                    .bind(code)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| AppError::BadRequest("Invalid invite code".to_string()))?;
                (group.id, UserRole::Member)
            }
            None => {
                let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
                    .fetch_one(&mut *tx)
                    .await?;
                if count.0 > 0 {
                    return Err(AppError::Forbidden(
                        "An invite code is required to join".to_string(),
                    ));
                }

                let group_id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO family_groups (id, name, invite_code, created_at) VALUES (?, ?, ?, ?)",
                )
                .bind(&group_id)
                .bind(format!("{}'s family", name))
                .bind(generate_invite_code())
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                (group_id, UserRole::Admin)
            }
        };

        let user_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO users (id, group_id, username, name, password_hash, role, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user_id)
        .bind(&group_id)
        .bind(username)
        .bind(&name)
        .bind(&password_hash)
        .bind(role.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                AppError::Conflict("Username already taken".to_string())
            } else {
                e.into()
            }
        })?;

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&user_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Registered {} as {} of group {}", user.username, user.role, user.group_id);
        Ok(UserResponse::from(user))
    }

    /// Login user
    pub async fn login(db: &Database, config: &Config, req: LoginRequest) -> Result<LoginResponse> {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE username = ?")
            .bind(req.username.trim())
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid username or password".to_string()))?;

        if !Self::verify_password(&req.password, &user.password_hash)? {
            return Err(AppError::Unauthorized("Invalid username or password".to_string()));
        }

        let access_token = Self::generate_access_token(&user, config)?;

        Ok(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: config.jwt.access_token_expire_minutes * 60,
            user: UserResponse::from(user),
        })
    }

    /// Invalidate every token issued to the user
    pub async fn logout(db: &Database, user_id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET token_version = token_version + 1, updated_at = ? WHERE id = ?")
            .bind(db::now_timestamp())
            .bind(user_id)
            .execute(db.pool())
            .await?;
        Ok(())
    }

    pub async fn profile(db: &Database, session: &CurrentUser) -> Result<ProfileResponse> {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&session.id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        let group: Group = sqlx::query_as("SELECT * FROM family_groups WHERE id = ?")
            .bind(&user.group_id)
            .fetch_one(db.pool())
            .await?;

        let invite_code = user.get_role().is_admin().then_some(group.invite_code);
        Ok(ProfileResponse {
            user: UserResponse::from(user),
            group_name: group.name,
            invite_code,
        })
    }

    /// Resolve a bearer token to the session it stands for
    pub async fn authenticate(db: &Database, config: &Config, token: &str) -> Result<CurrentUser> {
        let claims = Self::validate_token(token, config)?;

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&claims.sub)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))?;

        if user.token_version != claims.ver {
            return Err(AppError::Unauthorized("Session expired".to_string()));
        }

        Ok(CurrentUser {
            role: user.get_role(),
            id: user.id,
            group_id: user.group_id,
            username: user.username,
        })
    }

    /// Generate access token (JWT)
    pub fn generate_access_token(user: &User, config: &Config) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::minutes(config.jwt.access_token_expire_minutes as i64);

        let claims = Claims {
            sub: user.id.clone(),
            gid: user.group_id.clone(),
            role: user.role.clone(),
            ver: user.token_version,
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Validate access token against the current and previous secrets
    pub fn validate_token(token: &str, config: &Config) -> Result<Claims> {
        let validation = Validation::default();

        let keys = std::iter::once(config.jwt.secret.as_str())
            .chain(config.jwt.previous_secrets.iter().map(|s| s.as_str()));

        for secret in keys {
            if let Ok(token_data) = decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            ) {
                return Ok(token_data.claims);
            }
        }

        Err(AppError::Unauthorized("Invalid token".to_string()))
    }

    /// Hash password using Argon2
    fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        Ok(password_hash)
    }

    /// Verify password against hash
    fn verify_password(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    let charset_ok = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if (3..=32).contains(&len) && charset_ok {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "Username must be 3-32 characters of letters, digits, '_', '.' or '-'".to_string(),
        ))
    }
}

fn generate_invite_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INVITE_CODE_LEN)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}
