use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

// axum handler for the bare root path, outside the OpenAPI surface
pub async fn root() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::root;
    use anyhow::Result;
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};

    #[tokio::test]
    async fn root_reports_name_and_version() -> Result<()> {
        let response = root().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let body: serde_json::Value = serde_json::from_slice(&body)?;

        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        Ok(())
    }
}
