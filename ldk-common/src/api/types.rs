//! Shared API request/response types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pagination::{calculate_pagination, sanitize_page_size, Pagination};

/// Authentication parameters for GET/DELETE requests (query string)
///
/// ```
/// // GET /api/vehicles?timestamp=1730000000000&hash=abc123...
/// use ldk_common::api::types::AuthQuery;
///
/// let query = AuthQuery { timestamp: 1730000000000, hash: "abc123".to_string() };
/// assert_eq!(query.timestamp, 1730000000000);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthQuery {
    /// Unix epoch time in milliseconds
    pub timestamp: i64,
    /// SHA-256 hash (64 hex chars)
    pub hash: String,
}

/// Authentication-only body for POST/PUT requests without other fields
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthRequest {
    pub timestamp: i64,
    pub hash: String,
}

/// Inner part of every JSON error body: `{"error": {"code", "message"}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        let mut body = Self::new(code, message);
        body.error.details = Some(details);
        body
    }
}

/// Body returned with 401 responses
pub type AuthErrorResponse = ErrorBody;

impl From<&super::auth::ApiAuthError> for ErrorBody {
    fn from(err: &super::auth::ApiAuthError) -> Self {
        ErrorBody::new(err.code(), err.to_string())
    }
}

/// `page` / `page_size` query parameters
///
/// Query structs with extra filters repeat these two fields rather than
/// flattening, because flattened query strings lose numeric types.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self { page, page_size }
    }

    pub fn page_size(&self) -> i64 {
        sanitize_page_size(self.page_size)
    }

    /// Resolve against a row count
    pub fn paginate(&self, total: i64) -> Pagination {
        calculate_pagination(total, self.page.unwrap_or(1), self.page_size())
    }
}

/// Paged list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages: pagination.total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::new("not_found", "Vehicle not found");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["code"], "not_found");
        assert_eq!(json["error"]["message"], "Vehicle not found");
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn test_page_query_defaults_and_clamps() {
        let q = PageQuery::default();
        assert_eq!(q.page_size(), 50);
        let p = PageQuery::new(Some(9), Some(1000)).paginate(450);
        assert_eq!(p.page_size, 200);
        assert_eq!(p.page, 3);
        assert_eq!(p.offset, 400);
    }

    #[test]
    fn test_page_carries_pagination() {
        let p = calculate_pagination(120, 2, 50);
        let page = Page::new(vec![1, 2, 3], 120, &p).map(|n| n * 10);
        assert_eq!(page.items, vec![10, 20, 30]);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 2);
    }
}
