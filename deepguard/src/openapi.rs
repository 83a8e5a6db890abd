//! OpenAPI documentation for the HTTP API.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api::{handlers, models};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DeepGuard API",
        description = "Deepfake detection service: submit images for classification, browse the detection history, and manage accounts."
    ),
    paths(
        handlers::auth::signup,
        handlers::auth::login,
        handlers::auth::logout,
        handlers::auth::me,
        handlers::auth::update_profile,
        handlers::auth::change_password,
        handlers::auth::forgot_password,
        handlers::auth::verify_reset_token,
        handlers::auth::reset_password,
        handlers::detect::detect,
        handlers::history::list_history,
        handlers::history::get_stats,
        handlers::history::get_detection,
        handlers::history::delete_detection,
        handlers::health::health,
    ),
    components(schemas(
        models::auth::SignupRequest,
        models::auth::LoginRequest,
        models::auth::UpdateProfileRequest,
        models::auth::ChangePasswordRequest,
        models::auth::ForgotPasswordRequest,
        models::auth::ResetPasswordRequest,
        models::auth::AuthResponse,
        models::auth::MeResponse,
        models::auth::MessageResponse,
        models::auth::ForgotPasswordResponse,
        models::users::UserResponse,
        models::detections::Prediction,
        models::detections::DetectionResponse,
        models::detections::DetectData,
        models::detections::DetectResponse,
        models::detections::HistoryResponse,
        models::detections::DetectionItemResponse,
        models::detections::StatsData,
        models::detections::StatsResponse,
        models::pagination::PaginationMeta,
        handlers::health::HealthResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Account management and sessions"),
        (name = "detect", description = "Image submission and classification"),
        (name = "history", description = "Detection history and statistics"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "session_token",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
        );
    }
}
