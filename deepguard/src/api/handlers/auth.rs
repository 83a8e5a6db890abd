//! Account management: signup, login, profile, and the password reset flow.

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest, MeResponse,
            MessageResponse, ResetPasswordRequest, SessionResponse, SignupRequest, UpdateProfileRequest,
        },
        users::{CurrentUser, UserResponse},
    },
    auth::{password, session},
    db::{
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    errors::Error,
};

/// Register a new account
#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    tag = "auth",
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input or email already registered"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn signup(State(state): State<AppState>, Json(request): Json<SignupRequest>) -> Result<SessionResponse, Error> {
    let name = request.name.trim().to_string();
    let email = normalize_email(&request.email);

    if name.is_empty() || email.is_empty() || request.password.is_empty() {
        return Err(Error::BadRequest {
            message: "Name, email and password are required".to_string(),
        });
    }

    if request.password != request.confirm_password {
        return Err(Error::BadRequest {
            message: "Passwords do not match".to_string(),
        });
    }

    validate_password_length(&request.password, &state.config)?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    // Check if user with this email already exists. A concurrent signup still trips
    // the unique constraint below.
    if user_repo.get_user_by_email(&email).await?.is_some() {
        return Err(Error::BadRequest {
            message: "An account with this email already exists".to_string(),
        });
    }

    // Hash the password on a blocking thread to avoid blocking async runtime
    let password = request.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_string(&password))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })??;

    let create_request = UserCreateDBRequest {
        name,
        email,
        password_hash,
    };

    let created_user = user_repo.create(&create_request).await?;

    // Welcome email is best-effort; signup never fails on delivery problems
    let mailer = state.mailer.clone();
    let to_email = created_user.email.clone();
    let to_name = created_user.name.clone();
    tokio::spawn(async move {
        if let Err(e) = mailer.send_welcome_email(&to_email, &to_name).await {
            tracing::warn!("Failed to send welcome email to {to_email}: {e}");
        }
    });

    let current_user = CurrentUser::from(&created_user);
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    Ok(SessionResponse {
        status: StatusCode::CREATED,
        auth: AuthResponse {
            success: true,
            token,
            user: UserResponse::from(created_user),
        },
        cookie,
    })
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<SessionResponse, Error> {
    let email = normalize_email(&request.email);

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    // Same error for unknown email and wrong password
    let user = user_repo.get_user_by_email(&email).await?.ok_or_else(|| Error::Unauthenticated {
        message: Some("Invalid credentials".to_string()),
    })?;

    // Verify password on a blocking thread to avoid blocking async runtime
    let password = request.password.clone();
    let hash = user.password_hash.clone();
    let is_valid = tokio::task::spawn_blocking(move || password::verify_string(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;

    if !is_valid {
        return Err(Error::Unauthenticated {
            message: Some("Invalid credentials".to_string()),
        });
    }

    user_repo.touch_last_login(user.id).await?;

    let current_user = CurrentUser::from(&user);
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    Ok(SessionResponse {
        status: StatusCode::OK,
        auth: AuthResponse {
            success: true,
            token,
            user: UserResponse::from(user),
        },
        cookie,
    })
}

/// Logout (clear session cookie)
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn logout(State(state): State<AppState>, current_user: CurrentUser) -> Result<impl IntoResponse, Error> {
    // Expired cookie clears the session
    let cookie = format!(
        "{}=; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age=0",
        state.config.auth.session.cookie_name
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(MessageResponse {
            success: true,
            message: "Logged out successfully".to_string(),
        }),
    ))
}

/// Get the authenticated user's profile
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn me(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<MeResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    let user = user_repo.get_by_id(current_user.id).await?.ok_or_else(|| Error::Unauthenticated {
        message: Some("User not found".to_string()),
    })?;

    Ok(Json(MeResponse {
        success: true,
        user: UserResponse::from(user),
    }))
}

/// Update the authenticated user's name and/or email
#[utoipa::path(
    put,
    path = "/api/auth/profile",
    request_body = UpdateProfileRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Profile updated", body = MeResponse),
        (status = 400, description = "Invalid input or email already registered"),
        (status = 401, description = "Not authenticated"),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<MeResponse>, Error> {
    let name = request.name.map(|n| n.trim().to_string());
    let email = request.email.map(|e| normalize_email(&e));

    if let Some(name) = &name {
        if name.is_empty() {
            return Err(Error::BadRequest {
                message: "Name cannot be empty".to_string(),
            });
        }
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    if let Some(email) = &email {
        if email.is_empty() {
            return Err(Error::BadRequest {
                message: "Email cannot be empty".to_string(),
            });
        }
        // Changing to an email held by a different account is a conflict
        if let Some(existing) = user_repo.get_user_by_email(email).await? {
            if existing.id != current_user.id {
                return Err(Error::BadRequest {
                    message: "An account with this email already exists".to_string(),
                });
            }
        }
    }

    let update_request = UserUpdateDBRequest {
        name,
        email,
        password_hash: None,
    };

    let user = user_repo
        .update(current_user.id, &update_request)
        .await?
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("User not found".to_string()),
        })?;

    Ok(Json(MeResponse {
        success: true,
        user: UserResponse::from(user),
    }))
}

/// Change password for the authenticated user
#[utoipa::path(
    put,
    path = "/api/auth/password",
    request_body = ChangePasswordRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Password changed, fresh session issued", body = AuthResponse),
        (status = 400, description = "Invalid new password"),
        (status = 401, description = "Current password is incorrect"),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<SessionResponse, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    let user = user_repo.get_by_id(current_user.id).await?.ok_or_else(|| Error::Unauthenticated {
        message: Some("User not found".to_string()),
    })?;

    // Verify current password
    let current_password = request.current_password.clone();
    let hash = user.password_hash.clone();
    let is_valid = tokio::task::spawn_blocking(move || password::verify_string(&current_password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;

    if !is_valid {
        return Err(Error::Unauthenticated {
            message: Some("Current password is incorrect".to_string()),
        });
    }

    validate_password_length(&request.new_password, &state.config)?;

    // Hash new password
    let new_password_hash = tokio::task::spawn_blocking({
        let password = request.new_password.clone();
        move || password::hash_string(&password)
    })
    .await
    .map_err(|e| Error::Internal {
        operation: format!("spawn password hashing task: {e}"),
    })??;

    let update_request = UserUpdateDBRequest {
        name: None,
        email: None,
        password_hash: Some(new_password_hash),
    };

    let user = user_repo
        .update(current_user.id, &update_request)
        .await?
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("User not found".to_string()),
        })?;

    // Fresh session after a password change
    let token = session::create_session_token(&CurrentUser::from(&user), &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    Ok(SessionResponse {
        status: StatusCode::OK,
        auth: AuthResponse {
            success: true,
            token,
            user: UserResponse::from(user),
        },
        cookie,
    })
}

/// Request a password reset email
#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Reset link sent if the account exists", body = ForgotPasswordResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<ForgotPasswordResponse>, Error> {
    let email = normalize_email(&request.email);

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    // Identical response whether or not the account exists, to avoid email enumeration
    let message = "If an account with that email exists, a password reset link has been sent".to_string();

    let user = match user_repo.get_user_by_email(&email).await? {
        Some(user) => user,
        None => {
            return Ok(Json(ForgotPasswordResponse {
                success: true,
                message,
                reset_token: None,
                reset_url: None,
            }));
        }
    };

    // Only the digest is stored; the plaintext token lives solely in the email.
    // Setting a new token invalidates any outstanding one.
    let token = password::generate_reset_token();
    let digest = password::reset_token_digest(&token);
    let expires_at = Utc::now() + state.config.auth.reset_token_duration;

    user_repo.set_reset_token(user.id, &digest, expires_at).await?;

    let reset_url = format!("{}/reset-password/{}", state.config.frontend_url.trim_end_matches('/'), token);

    let email_sent = match state
        .mailer
        .send_password_reset_email(&user.email, Some(&user.name), &reset_url)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to send password reset email to {}: {e}", user.email);
            false
        }
    };

    // Development fallback: when delivery failed, surface the token so local setups
    // without a mail server can still complete the flow
    let expose_token = !email_sent && state.config.environment.is_development();

    Ok(Json(ForgotPasswordResponse {
        success: true,
        message,
        reset_token: expose_token.then(|| token.clone()),
        reset_url: expose_token.then_some(reset_url),
    }))
}

/// Check whether a reset token is valid
#[utoipa::path(
    get,
    path = "/api/auth/reset-password/{token}",
    tag = "auth",
    params(("token" = String, Path, description = "Password reset token")),
    responses(
        (status = 200, description = "Token is valid", body = MessageResponse),
        (status = 400, description = "Invalid or expired reset token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_reset_token(State(state): State<AppState>, Path(token): Path<String>) -> Result<Json<MessageResponse>, Error> {
    let digest = password::reset_token_digest(&token);

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    user_repo
        .find_by_valid_reset_digest(&digest)
        .await?
        .ok_or(Error::InvalidResetToken)?;

    Ok(Json(MessageResponse {
        success: true,
        message: "Token is valid".to_string(),
    }))
}

/// Complete a password reset
#[utoipa::path(
    put,
    path = "/api/auth/reset-password/{token}",
    request_body = ResetPasswordRequest,
    tag = "auth",
    params(("token" = String, Path, description = "Password reset token")),
    responses(
        (status = 200, description = "Password reset, fresh session issued", body = AuthResponse),
        (status = 400, description = "Invalid input or invalid/expired token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<SessionResponse, Error> {
    if request.password != request.confirm_password {
        return Err(Error::BadRequest {
            message: "Passwords do not match".to_string(),
        });
    }

    validate_password_length(&request.password, &state.config)?;

    let digest = password::reset_token_digest(&token);

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    let user = user_repo
        .find_by_valid_reset_digest(&digest)
        .await?
        .ok_or(Error::InvalidResetToken)?;

    // Hash new password
    let new_password_hash = tokio::task::spawn_blocking({
        let password = request.password.clone();
        move || password::hash_string(&password)
    })
    .await
    .map_err(|e| Error::Internal {
        operation: format!("spawn password hashing task: {e}"),
    })??;

    // One statement sets the password and clears the token, making it single-use
    user_repo.consume_reset_token(user.id, &new_password_hash).await?;

    // Auto-login after a successful reset
    let session_token = session::create_session_token(&CurrentUser::from(&user), &state.config)?;
    let cookie = create_session_cookie(&session_token, &state.config);

    Ok(SessionResponse {
        status: StatusCode::OK,
        auth: AuthResponse {
            success: true,
            token: session_token,
            user: UserResponse::from(user),
        },
        cookie,
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_password_length(password: &str, config: &crate::config::Config) -> Result<(), Error> {
    let password_config = &config.auth.password;
    if password.len() < password_config.min_length {
        return Err(Error::BadRequest {
            message: format!("Password must be at least {} characters", password_config.min_length),
        });
    }
    if password.len() > password_config.max_length {
        return Err(Error::BadRequest {
            message: format!("Password must be no more than {} characters", password_config.max_length),
        });
    }
    Ok(())
}

/// Helper function to create a session cookie
fn create_session_cookie(token: &str, config: &crate::config::Config) -> String {
    let session_config = &config.auth.session;
    let max_age = session_config.timeout.as_secs();

    format!(
        "{}={}; Path=/; HttpOnly; Secure={}; SameSite={}; Max-Age={}",
        session_config.cookie_name, token, session_config.cookie_secure, session_config.cookie_same_site, max_age
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::spawn_test_server;
    use serde_json::{Value, json};
    use sqlx::PgPool;

    async fn signup_alice(server: &axum_test::TestServer) -> Value {
        let response = server
            .post("/api/auth/signup")
            .json(&json!({
                "name": "Alice",
                "email": "alice@example.com",
                "password": "hunter22",
                "confirmPassword": "hunter22",
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    #[sqlx::test]
    async fn test_signup_success(pool: PgPool) {
        let server = spawn_test_server(pool);

        let response = server
            .post("/api/auth/signup")
            .json(&json!({
                "name": "Alice",
                "email": "Alice@Example.com",
                "password": "hunter22",
                "confirmPassword": "hunter22",
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        assert!(response.headers().get("set-cookie").is_some());

        let body: Value = response.json();
        assert_eq!(body["success"], true);
        assert!(body["token"].as_str().unwrap().contains('.'));
        // Email stored lowercased, hash never exposed
        assert_eq!(body["user"]["email"], "alice@example.com");
        assert!(body["user"].get("passwordHash").is_none());
        assert!(body["user"].get("password_hash").is_none());
    }

    #[sqlx::test]
    async fn test_signup_password_mismatch(pool: PgPool) {
        let server = spawn_test_server(pool);

        let response = server
            .post("/api/auth/signup")
            .json(&json!({
                "name": "Alice",
                "email": "alice@example.com",
                "password": "hunter22",
                "confirmPassword": "different",
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Passwords do not match");
    }

    #[sqlx::test]
    async fn test_signup_short_password(pool: PgPool) {
        let server = spawn_test_server(pool);

        let response = server
            .post("/api/auth/signup")
            .json(&json!({
                "name": "Alice",
                "email": "alice@example.com",
                "password": "abc",
                "confirmPassword": "abc",
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Password must be at least 6 characters");
    }

    #[sqlx::test]
    async fn test_signup_duplicate_email(pool: PgPool) {
        let server = spawn_test_server(pool);

        signup_alice(&server).await;

        let response = server
            .post("/api/auth/signup")
            .json(&json!({
                "name": "Alice Again",
                "email": "ALICE@example.com",
                "password": "hunter22",
                "confirmPassword": "hunter22",
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "An account with this email already exists");
    }

    #[sqlx::test]
    async fn test_login_and_me(pool: PgPool) {
        let server = spawn_test_server(pool);
        signup_alice(&server).await;

        let response = server
            .post("/api/auth/login")
            .json(&json!({"email": "alice@example.com", "password": "hunter22"}))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        let token = body["token"].as_str().unwrap().to_string();

        let me = server
            .get("/api/auth/me")
            .add_header("authorization", format!("Bearer {token}"))
            .await;

        me.assert_status_ok();
        let me_body: Value = me.json();
        assert_eq!(me_body["user"]["email"], "alice@example.com");
        // Login was recorded
        assert!(me_body["user"]["lastLoginAt"].is_string());
    }

    #[sqlx::test]
    async fn test_login_wrong_password(pool: PgPool) {
        let server = spawn_test_server(pool);
        signup_alice(&server).await;

        let response = server
            .post("/api/auth/login")
            .json(&json!({"email": "alice@example.com", "password": "wrong"}))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["error"], "Invalid credentials");
    }

    #[sqlx::test]
    async fn test_login_unknown_email_same_error(pool: PgPool) {
        let server = spawn_test_server(pool);

        let response = server
            .post("/api/auth/login")
            .json(&json!({"email": "ghost@example.com", "password": "whatever"}))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["error"], "Invalid credentials");
    }

    #[sqlx::test]
    async fn test_logout_clears_cookie(pool: PgPool) {
        let server = spawn_test_server(pool);
        let body = signup_alice(&server).await;
        let token = body["token"].as_str().unwrap().to_string();

        let response = server
            .post("/api/auth/logout")
            .add_header("authorization", format!("Bearer {token}"))
            .await;

        response.assert_status_ok();
        let logout_body: Value = response.json();
        assert_eq!(logout_body["message"], "Logged out successfully");

        let cookie = response.headers().get("set-cookie").unwrap().to_str().unwrap().to_string();
        assert!(cookie.contains("Max-Age=0"));

        // Unauthenticated logout is rejected
        server.post("/api/auth/logout").await.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_me_requires_auth(pool: PgPool) {
        let server = spawn_test_server(pool);

        let response = server.get("/api/auth/me").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_update_profile(pool: PgPool) {
        let server = spawn_test_server(pool);
        let body = signup_alice(&server).await;
        let token = body["token"].as_str().unwrap().to_string();

        let response = server
            .put("/api/auth/profile")
            .add_header("authorization", format!("Bearer {token}"))
            .json(&json!({"name": "Alice B."}))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["user"]["name"], "Alice B.");
        assert_eq!(body["user"]["email"], "alice@example.com");
    }

    #[sqlx::test]
    async fn test_change_password_flow(pool: PgPool) {
        let server = spawn_test_server(pool);
        let body = signup_alice(&server).await;
        let token = body["token"].as_str().unwrap().to_string();

        // Wrong current password is rejected
        let response = server
            .put("/api/auth/password")
            .add_header("authorization", format!("Bearer {token}"))
            .json(&json!({"currentPassword": "wrong", "newPassword": "newpassword1"}))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let response = server
            .put("/api/auth/password")
            .add_header("authorization", format!("Bearer {token}"))
            .json(&json!({"currentPassword": "hunter22", "newPassword": "newpassword1"}))
            .await;
        response.assert_status_ok();

        // Old password no longer works, new one does
        let old_login = server
            .post("/api/auth/login")
            .json(&json!({"email": "alice@example.com", "password": "hunter22"}))
            .await;
        old_login.assert_status(StatusCode::UNAUTHORIZED);

        let new_login = server
            .post("/api/auth/login")
            .json(&json!({"email": "alice@example.com", "password": "newpassword1"}))
            .await;
        new_login.assert_status_ok();
    }

    #[sqlx::test]
    async fn test_full_password_reset_flow(pool: PgPool) {
        let server = spawn_test_server(pool.clone());
        signup_alice(&server).await;

        let response = server
            .post("/api/auth/forgot-password")
            .json(&json!({"email": "alice@example.com"}))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(
            body["message"],
            "If an account with that email exists, a password reset link has been sent"
        );

        // Plant a known token directly, as the email transport swallows the real one
        let token = crate::auth::password::generate_reset_token();
        let digest = crate::auth::password::reset_token_digest(&token);
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);
        let user = users.get_user_by_email("alice@example.com").await.unwrap().unwrap();
        users
            .set_reset_token(user.id, &digest, Utc::now() + chrono::Duration::minutes(10))
            .await
            .unwrap();
        drop(conn);

        // Verify endpoint accepts it
        let verify = server.get(&format!("/api/auth/reset-password/{token}")).await;
        verify.assert_status_ok();
        let verify_body: Value = verify.json();
        assert_eq!(verify_body["message"], "Token is valid");

        // Complete the reset
        let reset = server
            .put(&format!("/api/auth/reset-password/{token}"))
            .json(&json!({"password": "brand-new-pass", "confirmPassword": "brand-new-pass"}))
            .await;
        reset.assert_status_ok();
        let reset_body: Value = reset.json();
        // Auto-login: the reset response carries a fresh session
        assert!(reset_body["token"].as_str().unwrap().contains('.'));

        // Token is single-use
        let reuse = server
            .put(&format!("/api/auth/reset-password/{token}"))
            .json(&json!({"password": "another-pass1", "confirmPassword": "another-pass1"}))
            .await;
        reuse.assert_status(StatusCode::BAD_REQUEST);
        let reuse_body: Value = reuse.json();
        assert_eq!(reuse_body["error"], "Invalid or expired reset token");

        // New password works, old one does not
        let old_login = server
            .post("/api/auth/login")
            .json(&json!({"email": "alice@example.com", "password": "hunter22"}))
            .await;
        old_login.assert_status(StatusCode::UNAUTHORIZED);

        let new_login = server
            .post("/api/auth/login")
            .json(&json!({"email": "alice@example.com", "password": "brand-new-pass"}))
            .await;
        new_login.assert_status_ok();
    }

    #[sqlx::test]
    async fn test_forgot_password_unknown_email_same_response(pool: PgPool) {
        let server = spawn_test_server(pool);

        let response = server
            .post("/api/auth/forgot-password")
            .json(&json!({"email": "ghost@example.com"}))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["success"], true);
        assert!(body.get("resetToken").is_none());
    }

    #[sqlx::test]
    async fn test_verify_unknown_token(pool: PgPool) {
        let server = spawn_test_server(pool);

        let response = server.get("/api/auth/reset-password/not-a-real-token").await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Invalid or expired reset token");
    }

    #[sqlx::test]
    async fn test_expired_token_rejected(pool: PgPool) {
        let server = spawn_test_server(pool.clone());
        signup_alice(&server).await;

        let token = crate::auth::password::generate_reset_token();
        let digest = crate::auth::password::reset_token_digest(&token);
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);
        let user = users.get_user_by_email("alice@example.com").await.unwrap().unwrap();
        users
            .set_reset_token(user.id, &digest, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        drop(conn);

        let response = server.get(&format!("/api/auth/reset-password/{token}")).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
}
