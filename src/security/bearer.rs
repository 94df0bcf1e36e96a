use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

/// Shared secret checked by [`bearer_auth_middleware`].
#[derive(Clone)]
pub struct BearerSecret(pub Arc<str>);

/// Require `Authorization: Bearer <secret>` on admin and blob endpoints.
pub async fn bearer_auth_middleware(
    State(secret): State<BearerSecret>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if bool::from(token.as_bytes().ct_eq(secret.0.as_bytes())) => {
            Ok(next.run(request).await)
        }
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/admin", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                BearerSecret(Arc::from("s3cret")),
                bearer_auth_middleware,
            ))
    }

    async fn status(auth: Option<&str>) -> StatusCode {
        let mut request = Request::builder().uri("/admin");
        if let Some(auth) = auth {
            request = request.header("Authorization", auth);
        }
        app()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn bearer_token_gate() {
        assert_eq!(status(Some("Bearer s3cret")).await, StatusCode::OK);
        assert_eq!(status(Some("Bearer s3cre")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(Some("Basic s3cret")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(None).await, StatusCode::UNAUTHORIZED);
    }
}
