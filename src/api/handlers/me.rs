//! Current-user status endpoint.
//!
//! The SPA probes this once at boot to rebuild its auth store, then after
//! every auth action to reconcile local state with the server.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;

use super::auth::envelope::{self, UserPayload};
use super::auth::principal;
use super::auth::types::CurrentUserResponse;

/// Status envelope for the signed-in account; 401 for anonymous callers.
#[utoipa::path(
    get,
    path = "/api/v1/user",
    responses(
        (status = 200, description = "Authenticated user status", body = CurrentUserResponse),
        (status = 401, description = "Unauthenticated")
    ),
    tag = "me"
)]
pub async fn current_user(headers: HeaderMap, pool: Extension<PgPool>) -> Response {
    match principal::current_user(&headers, &pool).await {
        Ok(Some(principal)) => {
            let email_verified = principal.user.email_verified();
            let two_factor_enabled = principal.user.two_factor_enabled();
            (
                StatusCode::OK,
                Json(CurrentUserResponse {
                    authenticated: true,
                    user: UserPayload::from(&principal.user),
                    email_verified,
                    two_factor_enabled,
                }),
            )
                .into_response()
        }
        Ok(None) => envelope::unauthenticated(),
        Err(status) => status.into_response(),
    }
}
