//! Request signing for the LotDesk HTTP APIs
//!
//! Every protected request carries `timestamp` (Unix epoch ms) and `hash`
//! (SHA-256 hex). The hash covers the canonical JSON of the request with the
//! `hash` field replaced by 64 zeros, followed by the shared secret as a
//! decimal string.
//!
//! - Timestamp may be at most `tolerance_ms` in the past and 1000ms in the future
//! - Shared secret lives in the `api_shared_secret` setting
//! - A shared secret of 0 disables checking
//!
//! No HTTP framework types here; see `middleware` for the axum layer.

use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::db::settings::{self, API_SHARED_SECRET, API_TIMESTAMP_TOLERANCE_MS};

/// Maximum clock skew accepted for timestamps ahead of the server
pub const MAX_FUTURE_SKEW_MS: i64 = 1000;

/// Placeholder substituted for the hash field before hashing
pub const DUMMY_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Authentication error types
#[derive(Debug, Clone)]
pub enum ApiAuthError {
    /// Timestamp outside acceptable window
    InvalidTimestamp {
        timestamp: i64,
        now: i64,
        reason: String,
    },

    /// Hash does not match calculated value
    InvalidHash { provided: String, calculated: String },

    MissingTimestamp,

    MissingHash,

    /// Database error loading shared secret or tolerance
    DatabaseError(String),

    /// Failed to parse request body
    ParseError(String),
}

impl ApiAuthError {
    /// Stable machine-readable code for error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ApiAuthError::InvalidTimestamp { .. } => "timestamp_invalid",
            ApiAuthError::InvalidHash { .. } => "hash_invalid",
            ApiAuthError::MissingTimestamp => "timestamp_missing",
            ApiAuthError::MissingHash => "hash_missing",
            ApiAuthError::DatabaseError(_) => "internal_error",
            ApiAuthError::ParseError(_) => "bad_request",
        }
    }
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::InvalidTimestamp { reason, .. } => {
                write!(f, "Invalid timestamp: {}", reason)
            }
            ApiAuthError::InvalidHash { .. } => write!(f, "Invalid hash"),
            ApiAuthError::MissingTimestamp => write!(f, "Missing timestamp field"),
            ApiAuthError::MissingHash => write!(f, "Missing hash field"),
            ApiAuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
            ApiAuthError::ParseError(err) => write!(f, "Parse error: {}", err),
        }
    }
}

impl std::error::Error for ApiAuthError {}

/// Load the shared secret, generating one on first use
pub async fn load_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    let stored: Option<i64> = settings::get_setting(db, API_SHARED_SECRET)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    match stored {
        Some(secret) => Ok(secret),
        None => initialize_shared_secret(db).await,
    }
}

/// Generate and store a random non-zero shared secret
pub async fn initialize_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    use rand::Rng;

    let secret: i64 = {
        let mut rng = rand::thread_rng();
        loop {
            let val = rng.gen::<i64>();
            if val != 0 {
                break val;
            }
        }
    };

    settings::set_setting(db, API_SHARED_SECRET, secret)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    tracing::info!("Generated new API shared secret");
    Ok(secret)
}

/// Read the configured timestamp tolerance (ms)
pub async fn load_timestamp_tolerance(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    settings::get_setting_or_default(db, API_TIMESTAMP_TOLERANCE_MS)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))
}

/// Current Unix time in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Validate a request timestamp against the server clock
///
/// # Examples
///
/// ```
/// use ldk_common::api::auth::{now_millis, validate_timestamp};
///
/// let now = now_millis();
/// assert!(validate_timestamp(now - 500, 5000).is_ok());
/// assert!(validate_timestamp(now - 10_000, 5000).is_err());
/// assert!(validate_timestamp(now + 5_000, 5000).is_err());
/// ```
pub fn validate_timestamp(timestamp: i64, tolerance_ms: i64) -> Result<(), ApiAuthError> {
    validate_timestamp_at(timestamp, now_millis(), tolerance_ms)
}

/// Timestamp check against an explicit `now`
pub fn validate_timestamp_at(
    timestamp: i64,
    now: i64,
    tolerance_ms: i64,
) -> Result<(), ApiAuthError> {
    let diff = now - timestamp;

    if diff > tolerance_ms {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms too old (max {}ms past)", diff, tolerance_ms),
        });
    }

    if diff < -MAX_FUTURE_SKEW_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!(
                "Timestamp {}ms in future (max {}ms future)",
                diff.abs(),
                MAX_FUTURE_SKEW_MS
            ),
        });
    }

    Ok(())
}

/// Calculate the request hash
///
/// # Examples
///
/// ```
/// use ldk_common::api::auth::calculate_hash;
/// use serde_json::json;
///
/// let body = json!({"price": 18500, "timestamp": 1730000000000i64, "hash": "x"});
/// let hash = calculate_hash(&body, 123456789);
/// assert_eq!(hash.len(), 64);
/// ```
pub fn calculate_hash(json_value: &Value, shared_secret: i64) -> String {
    let mut value = json_value.clone();
    if let Some(obj) = value.as_object_mut() {
        obj.insert("hash".to_string(), Value::String(DUMMY_HASH.to_string()));
    }

    let canonical = to_canonical_json(&value);
    let to_hash = format!("{}{}", canonical, shared_secret);

    let mut hasher = Sha256::new();
    hasher.update(to_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical JSON: keys sorted, no whitespace
///
/// ```
/// use ldk_common::api::auth::to_canonical_json;
/// use serde_json::json;
///
/// assert_eq!(to_canonical_json(&json!({"z": 3, "a": [1, "b"]})), r#"{"a":[1,"b"],"z":3}"#);
/// ```
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let items: Vec<String> = pairs
                .into_iter()
                .map(|(k, v)| format!("\"{}\":{}", k, to_canonical_json(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}

/// Validate a provided hash against the calculated one
pub fn validate_hash(
    provided_hash: &str,
    json_value: &Value,
    shared_secret: i64,
) -> Result<(), ApiAuthError> {
    let calculated = calculate_hash(json_value, shared_secret);

    if !provided_hash.eq_ignore_ascii_case(&calculated) {
        return Err(ApiAuthError::InvalidHash {
            provided: provided_hash.to_string(),
            calculated,
        });
    }

    Ok(())
}

/// Sign a JSON value in place (test clients and tooling)
///
/// Sets `timestamp` to `timestamp_ms` and `hash` to the computed hash.
pub fn sign_value(value: &mut Value, shared_secret: i64, timestamp_ms: i64) {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("timestamp".to_string(), Value::from(timestamp_ms));
    }
    let hash = calculate_hash(value, shared_secret);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("hash".to_string(), Value::String(hash));
    }
}
