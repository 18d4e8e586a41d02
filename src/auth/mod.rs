/*!
 * # Authentication and Authorization Module
 *
 * Sessions are HS256 JWTs issued at login. A token is accepted from the
 * `Authorization: Bearer` header or from the http-only session cookie set by the login
 * route. Every authenticated request reloads the user and role, so permission changes and
 * deletions take effect immediately. Logout revokes the token id until it expires.
 */

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entities::{role, user};

mod password;
mod permissions;
mod rbac;

pub use password::{hash_password, verify_password};
pub use permissions::Permission;
pub use rbac::{role_presets, RolePreset, ROLE_ADMINISTRATOR, ROLE_MANAGER, ROLE_OPERATOR};

/// Name of the session cookie carrying the access token
pub const SESSION_COOKIE: &str = "parts_tracker_session";

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,      // Subject (user ID)
    pub username: String, // Login name at issue time
    pub jti: String,      // JWT ID, used for revocation
    pub iat: i64,         // Issued at time
    pub exp: i64,         // Expiration time
}

/// Authenticated user resolved from a valid token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: i32,
    pub username: String,
    pub role: Option<String>,
    pub permissions: Permission,
    #[serde(skip)]
    pub token_id: String,
}

impl AuthUser {
    /// Permission check; administrators pass every check
    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.allows(permission)
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.contains(Permission::ADMIN)
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_expiration: Duration,
    pub cookie_secure: bool,
}

impl AuthConfig {
    pub fn new(jwt_secret: String, access_token_expiration: Duration, cookie_secure: bool) -> Self {
        Self {
            jwt_secret,
            access_token_expiration,
            cookie_secure,
        }
    }
}

/// Issued session token
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

/// Token blacklist entry
#[derive(Clone, Debug)]
struct BlacklistedToken {
    jti: String,
    expiry: DateTime<Utc>,
}

/// Authentication service that handles token issuance and validation
#[derive(Debug, Clone)]
pub struct AuthService {
    pub config: AuthConfig,
    db: Arc<DatabaseConnection>,
    blacklisted_tokens: Arc<RwLock<Vec<BlacklistedToken>>>,
}

impl AuthService {
    pub fn new(config: AuthConfig, db: Arc<DatabaseConnection>) -> Self {
        Self {
            config,
            db,
            blacklisted_tokens: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Checks the credentials and issues a session token.
    pub async fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<(SessionToken, AuthUser), AuthError> {
        let found = user::Entity::find()
            .filter(user::Column::Username.eq(credentials.username.trim()))
            .one(&*self.db)
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

        let user = match found {
            Some(user) if verify_password(&credentials.password, &user.password_hash) => user,
            _ => {
                warn!(username = %credentials.username, "failed login attempt");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let token = self.generate_token(&user)?;
        let auth_user = self.resolve_user(user.id, String::new()).await?;
        info!(user_id = user.id, username = %user.username, "user logged in");
        Ok((token, auth_user))
    }

    /// Generate a JWT token for a user
    pub fn generate_token(&self, user: &user::Model) -> Result<SessionToken, AuthError> {
        let now = Utc::now();
        let expires = now
            + ChronoDuration::from_std(self.config.access_token_expiration)
                .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };

        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))?;

        Ok(SessionToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiration.as_secs() as i64,
        })
    }

    /// Validate a JWT token and extract the claims
    pub async fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        if self.is_token_blacklisted(&claims.jti).await {
            return Err(AuthError::RevokedToken);
        }

        Ok(claims)
    }

    /// Revoke a token (add it to the blacklist)
    pub async fn revoke_token(&self, token: &str) -> Result<(), AuthError> {
        let claims = self.validate_token(token).await?;

        let expiry = DateTime::<Utc>::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);
        let mut blacklist = self.blacklisted_tokens.write().await;
        blacklist.push(BlacklistedToken {
            jti: claims.jti,
            expiry,
        });
        let now = Utc::now();
        blacklist.retain(|t| t.expiry > now);

        Ok(())
    }

    async fn is_token_blacklisted(&self, token_id: &str) -> bool {
        let blacklist = self.blacklisted_tokens.read().await;
        blacklist.iter().any(|t| t.jti == token_id)
    }

    /// Validates the token and loads the current user with the role's permissions.
    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.validate_token(token).await?;
        let user_id: i32 = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;
        self.resolve_user(user_id, claims.jti).await
    }

    async fn resolve_user(&self, user_id: i32, token_id: String) -> Result<AuthUser, AuthError> {
        let (user, role) = user::Entity::find_by_id(user_id)
            .find_also_related(role::Entity)
            .one(&*self.db)
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?
            .ok_or(AuthError::UserNotFound)?;

        Ok(AuthUser {
            user_id: user.id,
            username: user.username,
            role: role.as_ref().map(|r| r.name.clone()),
            permissions: role
                .map(|r| Permission::from_bits(r.permissions))
                .unwrap_or_default(),
            token_id,
        })
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    RevokedToken,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message): (StatusCode, &str, String) = match &self {
            Self::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MISSING",
                "Пожалуйста, войдите в систему, чтобы получить доступ к этой странице.".to_string(),
            ),
            Self::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_CREDENTIALS",
                "Неверное имя пользователя или пароль.".to_string(),
            ),
            Self::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_TOKEN",
                "Invalid authentication token".to_string(),
            ),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "AUTH_TOKEN_EXPIRED",
                "Token has expired".to_string(),
            ),
            Self::RevokedToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REVOKED_TOKEN",
                "Authentication token has been revoked".to_string(),
            ),
            Self::UserNotFound => (
                StatusCode::UNAUTHORIZED,
                "AUTH_USER_NOT_FOUND",
                "User not found".to_string(),
            ),
            Self::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                "AUTH_INSUFFICIENT_PERMISSIONS",
                "У вас нет прав для доступа к этой странице.".to_string(),
            ),
            Self::TokenCreation(msg) | Self::DatabaseError(msg) | Self::InternalError(msg) => {
                error!(error = %msg, "authentication failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "AUTH_INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": error_code,
                "message": error_message,
            }
        }));

        (status, body).into_response()
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

/// The signed-in user when there is one; never rejects.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(parts.extensions.get::<AuthUser>().cloned()))
    }
}

/// Pulls the raw token from the bearer header, falling back to the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

fn auth_service_from(request: &Request) -> Result<Arc<AuthService>, AuthError> {
    request
        .extensions()
        .get::<Arc<AuthService>>()
        .cloned()
        .ok_or_else(|| AuthError::InternalError("Authentication service not available".into()))
}

/// Authentication middleware: rejects requests without a valid session
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    if request.extensions().get::<AuthUser>().is_some() {
        return next.run(request).await;
    }

    let auth_service = match auth_service_from(&request) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };

    let token = match extract_token(request.headers()) {
        Some(token) => token,
        None => return AuthError::MissingAuth.into_response(),
    };

    match auth_service.authenticate(&token).await {
        Ok(user) => {
            debug!(user_id = user.user_id, "request authenticated");
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Attaches the user when a valid session is present and lets every request through
pub async fn optional_auth_middleware(mut request: Request, next: Next) -> Response {
    if let (Ok(auth_service), Some(token)) =
        (auth_service_from(&request), extract_token(request.headers()))
    {
        match auth_service.authenticate(&token).await {
            Ok(user) => {
                request.extensions_mut().insert(user);
            }
            Err(e) => debug!(error = %e, "ignoring invalid session on public route"),
        }
    }
    next.run(request).await
}

/// Permission middleware to check if a user has the required permission
pub async fn permission_middleware(
    State(required_permission): State<Permission>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuth)?;

    if !user.can(required_permission) {
        warn!(
            user_id = user.user_id,
            required = %required_permission,
            "permission denied"
        );
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_optional_auth(self) -> Self;
    fn with_permission(self, permission: Permission) -> Self;
}

impl<S> AuthRouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_optional_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(optional_auth_middleware))
    }

    fn with_permission(self, permission: Permission) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            permission,
            permission_middleware,
        ))
        .with_auth()
    }
}

fn session_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Session routes: login, logout and the current user
pub fn auth_routes() -> Router<Arc<AuthService>> {
    Router::new()
        .route("/login", post(login_handler))
        .route(
            "/logout",
            post(logout_handler).layer(axum::middleware::from_fn(auth_middleware)),
        )
        .route(
            "/me",
            get(me_handler).layer(axum::middleware::from_fn(auth_middleware)),
        )
}

/// Login handler: returns the token and sets the session cookie
pub async fn login_handler(
    State(auth_service): State<Arc<AuthService>>,
    jar: CookieJar,
    Json(credentials): Json<LoginCredentials>,
) -> Result<impl IntoResponse, AuthError> {
    let (token, user) = auth_service.login(&credentials).await?;
    let jar = jar.add(session_cookie(
        token.access_token.clone(),
        auth_service.config.cookie_secure,
    ));

    Ok((
        jar,
        Json(serde_json::json!({
            "message": "Вы успешно вошли в систему.",
            "token": token,
            "user": user,
        })),
    ))
}

async fn logout_handler(
    State(auth_service): State<Arc<AuthService>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let token = extract_token(&headers).ok_or(AuthError::MissingAuth)?;
    auth_service.revoke_token(&token).await?;

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((
        jar,
        Json(serde_json::json!({ "message": "Вы вышли из системы." })),
    ))
}

async fn me_handler(user: AuthUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "id": user.user_id,
        "username": user.username,
        "role": user.role,
        "permissions": user.permissions.names(),
        "is_admin": user.is_admin(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> AuthService {
        let db = crate::db::establish_connection("sqlite::memory:")
            .await
            .expect("connect");
        AuthService::new(
            AuthConfig::new(
                "unit_test_secret_with_enough_length_for_hs256".into(),
                Duration::from_secs(600),
                false,
            ),
            Arc::new(db),
        )
    }

    fn sample_user() -> user::Model {
        user::Model {
            id: 7,
            username: "operator".into(),
            password_hash: String::new(),
            role_id: Some(1),
        }
    }

    #[tokio::test]
    async fn issued_token_validates_until_revoked() {
        let auth = service().await;
        let token = auth.generate_token(&sample_user()).unwrap();

        let claims = auth.validate_token(&token.access_token).await.unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.username, "operator");

        auth.revoke_token(&token.access_token).await.unwrap();
        assert!(matches!(
            auth.validate_token(&token.access_token).await,
            Err(AuthError::RevokedToken)
        ));
    }

    #[tokio::test]
    async fn token_signed_with_other_secret_is_rejected() {
        let auth = service().await;
        let mut other = service().await;
        other.config.jwt_secret = "another_secret_that_is_long_enough_to_sign_with".into();
        let token = other.generate_token(&sample_user()).unwrap();

        assert!(matches!(
            auth.validate_token(&token.access_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("{}=from-cookie", SESSION_COOKIE).parse().unwrap(),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("from-cookie"));

        headers.insert(header::AUTHORIZATION, "Bearer from-header".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn auth_user_permission_checks() {
        let operator = AuthUser {
            user_id: 1,
            username: "op".into(),
            role: Some(ROLE_OPERATOR.into()),
            permissions: Permission::GENERATE_QR,
            token_id: String::new(),
        };
        assert!(operator.can(Permission::GENERATE_QR));
        assert!(!operator.can(Permission::ADD_PARTS));
        assert!(!operator.is_admin());

        let admin = AuthUser {
            permissions: Permission::ADMIN,
            ..operator
        };
        assert!(admin.can(Permission::MANAGE_USERS));
        assert!(admin.is_admin());
    }
}
