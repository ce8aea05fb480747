use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::extract::rejection::JsonRejection;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::Rng;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use murmur_db::Database;
use murmur_types::api::{
    ApiMessage, Claims, SessionUser, SignInRequest, SignInResponse, SignUpRequest,
    VerifyCodeRequest,
};

use crate::error::ApiError;
use crate::mailer::Mailer;
use crate::suggest::Suggester;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub mailer: Box<dyn Mailer>,
    pub suggester: Suggester,
}

// -- Username availability --

#[derive(Debug, Deserialize)]
pub struct CheckUsernameQuery {
    pub username: Option<String>,
}

pub async fn check_username(
    State(state): State<AppState>,
    Query(query): Query<CheckUsernameQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let username = query
        .username
        .ok_or_else(|| ApiError::Validation("username query parameter is required".into()))?;
    validate_username(&username)?;

    if state.db.find_verified_by_username(&username)?.is_some() {
        return Err(ApiError::Conflict("username is already taken"));
    }

    Ok(Json(ApiMessage::ok("username is available")))
}

// -- Registration --

pub async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    validate_username(&req.username)?;
    validate_email(&req.email)?;
    if req.password.chars().count() < 6 {
        return Err(ApiError::Validation(
            "password must be at least 6 characters".into(),
        ));
    }

    if state.db.find_verified_by_username(&req.username)?.is_some() {
        return Err(ApiError::Conflict("username is already taken"));
    }

    let verify_code = generate_code();
    let code_expiry = (Utc::now() + Duration::hours(1)).to_rfc3339();
    let password_hash = hash_password(&req.password)?;

    // A fresh insert is remembered so a failed delivery can take it back out.
    let mut fresh_user_id = None;
    match state.db.find_by_email(&req.email)? {
        Some(existing) if existing.is_verified => {
            return Err(ApiError::Conflict("email is already registered"));
        }
        Some(_) => {
            state
                .db
                .refresh_unverified(&req.email, &password_hash, &verify_code, &code_expiry)?;
        }
        None => {
            let id = Uuid::new_v4().to_string();
            state.db.create_user(
                &id,
                &req.username,
                &req.email,
                &password_hash,
                &verify_code,
                &code_expiry,
            )?;
            fresh_user_id = Some(id);
        }
    }

    if let Err(err) = state
        .mailer
        .send_verification(&req.email, &req.username, &verify_code)
        .await
    {
        warn!("verification email to {} failed: {:#}", req.email, err);
        if let Some(id) = fresh_user_id {
            state.db.delete_unverified_user(&id)?;
        }
        return Err(ApiError::Delivery);
    }

    Ok((
        StatusCode::CREATED,
        Json(ApiMessage::ok(
            "user registered; check your email for the verification code",
        )),
    ))
}

// -- Verification --

pub async fn verify_code(
    State(state): State<AppState>,
    payload: Result<Json<VerifyCodeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let user = state
        .db
        .find_by_username(&req.username)?
        .ok_or(ApiError::NotFound("user not found"))?;

    let expiry = user
        .verify_code_expiry
        .parse::<chrono::DateTime<Utc>>()
        .map_err(|e| {
            anyhow::anyhow!("corrupt verify_code_expiry on user '{}': {}", user.id, e)
        })?;

    // Expiry wins the tie-break: an expired wrong code reports expiry.
    if Utc::now() > expiry {
        return Err(ApiError::CodeExpired);
    }
    if user.verify_code != req.code {
        return Err(ApiError::InvalidCode);
    }

    if let Err(err) = state.db.mark_verified(&user.id) {
        // Someone else verified the same username first.
        if murmur_db::queries::is_unique_violation(&err) {
            return Err(ApiError::Conflict("username is already taken"));
        }
        return Err(err.into());
    }

    Ok(Json(ApiMessage::ok("account verified")))
}

// -- Sign-in --

pub async fn sign_in(
    State(state): State<AppState>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let user = state
        .db
        .find_by_identifier(&req.identifier)?
        .ok_or(ApiError::NotFound("no user found with this username or email"))?;

    if !user.is_verified {
        return Err(ApiError::NotVerified);
    }

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("corrupt password hash on user '{}': {}", user.id, e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::InvalidCredentials("incorrect password"))?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt id on user '{}': {}", user.id, e))?;

    let principal = SessionUser {
        id: user_id,
        username: user.username,
        email: user.email,
        is_verified: true,
        is_accepting_messages: user.is_accepting_messages,
    };

    let token = create_token(&state.jwt_secret, &principal)?;

    Ok(Json(SignInResponse {
        success: true,
        token,
        user: principal,
    }))
}

fn create_token(secret: &str, user: &SessionUser) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        is_verified: user.is_verified,
        is_accepting_messages: user.is_accepting_messages,
        exp: (Utc::now() + Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| anyhow::anyhow!("token encoding: {e}"))?;

    Ok(token)
}

// -- Helpers --

pub(crate) fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(2..=20).contains(&len) {
        return Err(ApiError::Validation(
            "username must be between 2 and 20 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ApiError::Validation(
            "username may only contain letters, digits, underscores and hyphens".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ApiError::Validation("email address is not valid".into()))
    }
}

/// Six decimal digits, never with a leading zero dropped.
fn generate_code() -> String {
    rand::rng().random_range(100_000..1_000_000).to_string()
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing: {e}"))?
        .to_string();
    Ok(hash)
}
