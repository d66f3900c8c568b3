use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::StateStore;

#[cfg(feature = "web")]
use crate::app::{AppContext, AppState};
#[cfg(feature = "web")]
use axum::{
    Extension, Form,
    extract::{Path as AxumPath, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};

/// Username of the administrator created at first boot.
pub const SEEDED_ADMIN: &str = "admin";

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "session";

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// Access level of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May lend, return and manage users.
    Admin,
    /// May only browse.
    Visitor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Visitor => "visitor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "visitor" => Some(Role::Visitor),
            _ => None,
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    /// Argon2 hash of the user's password
    pub password_hash: String,
    pub role: Role,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// What templates get to see of an account.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub username: String,
    pub role: Role,
    pub is_admin: bool,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        UserView {
            username: user.username.clone(),
            role: user.role,
            is_admin: user.is_admin(),
        }
    }
}

/// Hash a password using Argon2
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `AppResult<String>` - The PHC-formatted hash
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AppError::Auth("Password hashing failed".to_string()))
}

/// Verify a password against a stored hash
///
/// # Returns
/// * `AppResult<bool>` - True if the password matches; an error only for malformed hashes
pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Auth("Invalid password hash format".to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Check a username/password pair, returning the account when it matches.
pub fn verify_user(store: &StateStore, username: &str, password: &str) -> AppResult<Option<User>> {
    match store.get_user(username.trim())? {
        Some(user) if verify_password(password, &user.password_hash)? => Ok(Some(user)),
        _ => Ok(None),
    }
}

/// Register a new account
///
/// # Errors
/// * `AppError::Auth` if a field is empty or the username is taken
pub fn register_user(
    store: &StateStore,
    username: &str,
    password: &str,
    role: Role,
) -> AppResult<User> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AppError::Auth(
            "Username and password cannot be empty".to_string(),
        ));
    }

    let user = User {
        username: username.to_string(),
        password_hash: hash_password(password)?,
        role,
    };
    if !store.insert_user(&user)? {
        return Err(AppError::Auth("Username already exists".to_string()));
    }

    log::info!("user {} created with role {}", user.username, role.as_str());
    Ok(user)
}

/// Delete `username` on behalf of `acting`.
///
/// The seeded administrator and the acting account itself are protected.
pub fn remove_user(store: &StateStore, acting: &str, username: &str) -> AppResult<()> {
    if username == SEEDED_ADMIN {
        return Err(AppError::Auth(
            "The initial administrator cannot be deleted".to_string(),
        ));
    }
    if username == acting {
        return Err(AppError::Auth("You cannot delete your own account".to_string()));
    }
    if !store.delete_user(username)? {
        return Err(AppError::NotFound(format!("User {} does not exist", username)));
    }

    log::info!("user {} deleted by {}", username, acting);
    Ok(())
}

/// Create the initial administrator unless it already exists.
///
/// Returns whether an account was created.
pub fn seed_admin(store: &StateStore, password: &str) -> AppResult<bool> {
    if store.get_user(SEEDED_ADMIN)?.is_some() {
        return Ok(false);
    }
    register_user(store, SEEDED_ADMIN, password, Role::Admin)?;
    Ok(true)
}

/// User session data
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub expires_at: SystemTime,
}

/// In-process registry of live sessions, keyed by random session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a session for an authenticated user and return its id.
    pub fn create_session(&self, username: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let session = Session {
            username: username.to_string(),
            expires_at: now + Duration::from_secs(SESSION_DURATION),
        };

        let mut sessions = self.write();
        sessions.retain(|_, existing| existing.expires_at > now);
        sessions.insert(session_id.clone(), session);

        session_id
    }

    /// Username behind a session id, if the session exists and has not expired.
    pub fn validate_session(&self, session_id: &str) -> Option<String> {
        self.read()
            .get(session_id)
            .filter(|session| session.expires_at > SystemTime::now())
            .map(|session| session.username.clone())
    }

    pub fn end_session(&self, session_id: &str) {
        self.write().remove(session_id);
    }

    /// Drop every session of a user, e.g. after the account is deleted.
    pub fn end_sessions_of(&self, username: &str) {
        self.write().retain(|_, session| session.username != username);
    }
}

// Web handler functions below (only compiled with "web" feature)

/// Resolve the signed-in account behind the session cookie.
#[cfg(feature = "web")]
pub fn current_user(ctx: &AppContext, jar: &SignedCookieJar) -> Option<User> {
    let cookie = jar.get(SESSION_COOKIE)?;
    let username = ctx.sessions.validate_session(cookie.value())?;
    match ctx.store.get_user(&username) {
        Ok(user) => user,
        Err(e) => {
            log::warn!("session lookup for {} failed: {}", username, e);
            None
        }
    }
}

/// Only same-site absolute paths are followed after login. Browsers read
/// `/\host` like `//host`, so backslashes are refused too.
#[cfg(feature = "web")]
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains(['\\', '\r', '\n', '\t']) =>
        {
            path
        }
        _ => "/",
    }
}

#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

/// Login form data
#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

#[cfg(feature = "web")]
fn render_login(
    ctx: &AppContext,
    next: Option<&str>,
    error: Option<&str>,
) -> AppResult<Html<String>> {
    ctx.render(
        "login",
        &serde_json::json!({
            "next": safe_next(next),
            "error": error,
        }),
    )
}

/// Serve the login page
#[cfg(feature = "web")]
pub async fn serve_login_page(
    State(ctx): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> AppResult<Html<String>> {
    render_login(&ctx, query.next.as_deref(), None)
}

/// Handle user login requests
///
/// Valid credentials open a session and redirect to `next`; anything else
/// re-renders the form with an inline error.
#[cfg(feature = "web")]
pub async fn handle_login(
    State(ctx): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match verify_user(&ctx.store, &form.username, &form.password) {
        Ok(Some(user)) => {
            let session_id = ctx.sessions.create_session(&user.username);
            let cookie = Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax);
            log::info!("login: {}", user.username);
            (jar.add(cookie), Redirect::to(safe_next(form.next.as_deref()))).into_response()
        }
        Ok(None) => {
            log::warn!("failed login for {:?}", form.username);
            match render_login(
                &ctx,
                form.next.as_deref(),
                Some("Usuario o contraseña incorrectos"),
            ) {
                Ok(page) => (StatusCode::UNAUTHORIZED, page).into_response(),
                Err(e) => e.into_response(),
            }
        }
        Err(e) => e.into_response(),
    }
}

/// Handle user logout
///
/// Ends the session, clears the cookie and returns to the index.
#[cfg(feature = "web")]
pub async fn handle_logout(
    State(ctx): State<AppState>,
    jar: SignedCookieJar,
) -> (SignedCookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        ctx.sessions.end_session(cookie.value());
    }
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Redirect::to("/"),
    )
}

/// Admin gate for mutating routes
///
/// Passes the request through with the [`User`] in its extensions when the
/// session belongs to an admin; otherwise redirects to the login page.
#[cfg(feature = "web")]
pub async fn require_admin(
    State(ctx): State<AppState>,
    jar: SignedCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(user) = current_user(&ctx, &jar) {
        if user.is_admin() {
            request.extensions_mut().insert(user);
            return next.run(request).await;
        }
    }

    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    Redirect::to(&format!("/login?next={}", urlencoding::encode(&target))).into_response()
}

/// User creation form data
#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct NewUserForm {
    pub username: String,
    pub password: String,
    pub role: String,
}

#[cfg(feature = "web")]
fn render_users(
    ctx: &AppContext,
    acting: &User,
    message: Option<&str>,
    error: Option<&str>,
) -> AppResult<Html<String>> {
    let users: Vec<serde_json::Value> = ctx
        .store
        .list_users()?
        .iter()
        .map(|user| {
            serde_json::json!({
                "username": user.username,
                "role": user.role,
                "deletable": user.username != SEEDED_ADMIN && user.username != acting.username,
            })
        })
        .collect();

    ctx.render(
        "users",
        &serde_json::json!({
            "user": UserView::from(acting),
            "users": users,
            "message": message,
            "error": error,
        }),
    )
}

/// List accounts and show the creation form
#[cfg(feature = "web")]
pub async fn list_users(
    State(ctx): State<AppState>,
    Extension(acting): Extension<User>,
) -> AppResult<Html<String>> {
    render_users(&ctx, &acting, None, None)
}

/// Handle account creation
#[cfg(feature = "web")]
pub async fn handle_create_user(
    State(ctx): State<AppState>,
    Extension(acting): Extension<User>,
    Form(form): Form<NewUserForm>,
) -> AppResult<Response> {
    let Some(role) = Role::parse(&form.role) else {
        let page = render_users(&ctx, &acting, None, Some("Rol desconocido"))?;
        return Ok((StatusCode::BAD_REQUEST, page).into_response());
    };

    match register_user(&ctx.store, &form.username, &form.password, role) {
        Ok(user) => {
            let message = format!("Usuario {} creado", user.username);
            Ok(render_users(&ctx, &acting, Some(&message), None)?.into_response())
        }
        Err(AppError::Auth(reason)) => {
            let page = render_users(&ctx, &acting, None, Some(&reason))?;
            Ok((StatusCode::BAD_REQUEST, page).into_response())
        }
        Err(e) => Err(e),
    }
}

/// Handle account deletion
#[cfg(feature = "web")]
pub async fn handle_delete_user(
    State(ctx): State<AppState>,
    Extension(acting): Extension<User>,
    AxumPath(username): AxumPath<String>,
) -> AppResult<Response> {
    match remove_user(&ctx.store, &acting.username, &username) {
        Ok(()) => {
            ctx.sessions.end_sessions_of(&username);
            Ok(Redirect::to("/users").into_response())
        }
        Err(AppError::Auth(reason)) | Err(AppError::NotFound(reason)) => {
            let page = render_users(&ctx, &acting, None, Some(&reason))?;
            Ok((StatusCode::BAD_REQUEST, page).into_response())
        }
        Err(e) => Err(e),
    }
}
