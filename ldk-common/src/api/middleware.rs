//! axum middleware enforcing request signing
//!
//! GET/DELETE: `timestamp` and `hash` query parameters, hash computed over
//! `{"hash": ..., "timestamp": ...}`. POST/PUT: fields inside the JSON body,
//! hash computed over the whole body.

use axum::{
    body::{to_bytes, Body},
    extract::{Query, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, error, warn};

use super::auth::{load_timestamp_tolerance, validate_hash, validate_timestamp, ApiAuthError};
use super::types::{AuthQuery, AuthRequest, ErrorBody};

/// Largest request body buffered for hash validation
pub const MAX_SIGNED_BODY_BYTES: usize = 10 * 1024 * 1024;

/// State for [`require_signed_request`]
#[derive(Clone)]
pub struct AuthConfig {
    pub db: SqlitePool,
    /// 0 disables checking
    pub shared_secret: i64,
}

impl AuthConfig {
    pub fn new(db: SqlitePool, shared_secret: i64) -> Self {
        Self { db, shared_secret }
    }
}

/// Reject unsigned or badly signed requests with 400/401
pub async fn require_signed_request(
    State(config): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Response {
    if config.shared_secret == 0 {
        debug!("API authentication disabled (shared_secret = 0)");
        return next.run(request).await;
    }

    let tolerance_ms = match load_timestamp_tolerance(&config.db).await {
        Ok(ms) => ms,
        Err(e) => return auth_error_to_response(e),
    };

    let secret = config.shared_secret;
    let validated = match *request.method() {
        Method::GET | Method::DELETE => validate_query_auth(request, secret, tolerance_ms),
        Method::POST | Method::PUT => validate_body_auth(request, secret, tolerance_ms).await,
        _ => Err(error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "HTTP method not supported",
        )),
    };

    match validated {
        Ok(request) => next.run(request).await,
        Err(response) => response,
    }
}

fn validate_query_auth(
    request: Request,
    shared_secret: i64,
    tolerance_ms: i64,
) -> Result<Request, Response> {
    let Query(auth) = Query::<AuthQuery>::try_from_uri(request.uri()).map_err(|rejection| {
        let present = Query::<HashMap<String, String>>::try_from_uri(request.uri())
            .map(|Query(params)| params)
            .unwrap_or_default();
        auth_error_to_response(missing_field_error(
            present.contains_key("timestamp"),
            present.contains_key("hash"),
            rejection.body_text(),
        ))
    })?;

    validate_timestamp(auth.timestamp, tolerance_ms).map_err(auth_error_to_response)?;

    let signed = json!({ "timestamp": auth.timestamp, "hash": &auth.hash });
    validate_hash(&auth.hash, &signed, shared_secret).map_err(auth_error_to_response)?;

    Ok(request)
}

async fn validate_body_auth(
    request: Request,
    shared_secret: i64,
    tolerance_ms: i64,
) -> Result<Request, Response> {
    let (parts, body) = request.into_parts();

    let bytes = to_bytes(body, MAX_SIGNED_BODY_BYTES).await.map_err(|e| {
        auth_error_to_response(ApiAuthError::ParseError(format!("Failed to read body: {}", e)))
    })?;

    let json_value: Value = serde_json::from_slice(&bytes).map_err(|e| {
        auth_error_to_response(ApiAuthError::ParseError(format!("Body must be JSON: {}", e)))
    })?;

    let auth: AuthRequest = serde_json::from_value(json_value.clone()).map_err(|e| {
        auth_error_to_response(missing_field_error(
            json_value.get("timestamp").is_some(),
            json_value.get("hash").is_some(),
            e.to_string(),
        ))
    })?;

    validate_timestamp(auth.timestamp, tolerance_ms).map_err(auth_error_to_response)?;
    validate_hash(&auth.hash, &json_value, shared_secret).map_err(auth_error_to_response)?;

    Ok(Request::from_parts(parts, Body::from(bytes)))
}

/// Missing fields get their own codes; anything else is a parse error
fn missing_field_error(has_timestamp: bool, has_hash: bool, detail: String) -> ApiAuthError {
    if !has_timestamp {
        ApiAuthError::MissingTimestamp
    } else if !has_hash {
        ApiAuthError::MissingHash
    } else {
        ApiAuthError::ParseError(detail)
    }
}

fn auth_error_to_response(error: ApiAuthError) -> Response {
    let status = match &error {
        ApiAuthError::InvalidTimestamp { .. } | ApiAuthError::InvalidHash { .. } => {
            StatusCode::UNAUTHORIZED
        }
        ApiAuthError::MissingTimestamp
        | ApiAuthError::MissingHash
        | ApiAuthError::ParseError(_) => StatusCode::BAD_REQUEST,
        ApiAuthError::DatabaseError(msg) => {
            error!("Database error during auth: {}", msg);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let body = match &error {
        ApiAuthError::InvalidTimestamp { timestamp, now, reason } => ErrorBody::with_details(
            error.code(),
            "Request timestamp outside acceptable window",
            json!({ "timestamp": timestamp, "server_time": now, "reason": reason }),
        ),
        ApiAuthError::InvalidHash { provided, .. } => {
            warn!("Hash validation failed: provided={}", provided);
            ErrorBody::new(error.code(), "Request hash does not match calculated value")
        }
        _ => ErrorBody::from(&error),
    };

    (status, Json(body)).into_response()
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(ErrorBody::new(code, message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::{calculate_hash, now_millis, sign_value};
    use crate::db::init_memory_database;
    use axum::{middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn app(secret: i64) -> Router {
        let db = init_memory_database().await.unwrap();
        Router::new()
            .route(
                "/things",
                get(|| async { "listed" }).post(|body: String| async move { body }),
            )
            .layer(middleware::from_fn_with_state(
                AuthConfig::new(db, secret),
                require_signed_request,
            ))
    }

    fn signed_query(secret: i64) -> String {
        let ts = now_millis();
        let hash = calculate_hash(&json!({"timestamp": ts, "hash": ""}), secret);
        format!("timestamp={}&hash={}", ts, hash)
    }

    #[tokio::test]
    async fn test_signed_get_passes() {
        let response = app(77)
            .await
            .oneshot(
                Request::builder()
                    .uri(format!("/things?page=2&{}", signed_query(77)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_unauthorized() {
        let response = app(77)
            .await
            .oneshot(
                Request::builder()
                    .uri(format!("/things?{}", signed_query(78)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "hash_invalid");
    }

    #[tokio::test]
    async fn test_missing_fields_is_bad_request() {
        let response = app(77)
            .await
            .oneshot(Request::builder().uri("/things").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_signed_body_is_forwarded_intact() {
        let mut body = json!({"note": "hello"});
        sign_value(&mut body, 77, now_millis());
        let raw = serde_json::to_string(&body).unwrap();

        let response = app(77)
            .await
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/things")
                    .header("content-type", "application/json")
                    .body(Body::from(raw.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), raw);
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let mut body = json!({"note": "hello"});
        sign_value(&mut body, 77, now_millis() - 60_000);

        let response = app(77)
            .await
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/things")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_zero_secret_disables_checks() {
        let response = app(0)
            .await
            .oneshot(Request::builder().uri("/things").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn error_code(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        body["error"]["code"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_query_fields_are_percent_decoded() {
        let ts = now_millis();
        let hash = calculate_hash(&json!({"timestamp": ts, "hash": ""}), 77);
        // Clients may escape any character; "%61" is "a"
        let escaped = hash.replace('a', "%61");
        let uri = format!("/things?timestamp={}&hash={}", ts, escaped);

        let response = app(77)
            .await
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_fields_have_distinct_codes() {
        let ts = now_millis();
        let cases = [
            ("/things?hash=abc".to_string(), "timestamp_missing"),
            (format!("/things?timestamp={}", ts), "hash_missing"),
            ("/things?timestamp=soon&hash=abc".to_string(), "bad_request"),
        ];
        for (uri, code) in cases {
            let response = app(77)
                .await
                .oneshot(Request::builder().uri(uri.as_str()).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(error_code(response).await, code, "{}", uri);
        }

        let unsigned = json!({"note": "hello", "timestamp": ts});
        let response = app(77)
            .await
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/things")
                    .body(Body::from(unsigned.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "hash_missing");
    }
}
