//! Runtime settings: catalog with current values, and validated writes

use axum::{
    extract::{Path, State},
    Json,
};
use ldk_common::db::settings::{self, SettingDef, SettingKind, AUTODEV_API_KEY, SETTINGS_CATALOG};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub total_settings: usize,
    pub settings: Vec<SettingRow>,
}

#[derive(Debug, Serialize)]
pub struct SettingRow {
    pub key: String,
    pub value: Option<String>,
    pub kind: &'static str,
    pub units: String,
    pub default_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub description: String,
}

fn kind_name(kind: SettingKind) -> &'static str {
    match kind {
        SettingKind::Integer => "integer",
        SettingKind::Float => "float",
        SettingKind::Text => "text",
    }
}

/// Secrets are shown only as their last four characters
fn display_value(key: &str, value: Option<String>) -> Option<String> {
    if key != AUTODEV_API_KEY {
        return value;
    }
    value.map(|v| {
        if v.is_empty() {
            v
        } else {
            let skip = v.chars().count().saturating_sub(4);
            let tail: String = v.chars().skip(skip).collect();
            format!("****{}", tail)
        }
    })
}

fn setting_row(def: &SettingDef, value: Option<String>) -> SettingRow {
    SettingRow {
        key: def.key.to_string(),
        value: display_value(def.key, value),
        kind: kind_name(def.kind),
        units: def.units.to_string(),
        default_value: def.default_value.to_string(),
        max: def.max,
        description: def.description.to_string(),
    }
}

/// GET /api/settings
pub async fn list_settings(State(state): State<AppState>) -> ApiResult<Json<SettingsResponse>> {
    let stored: HashMap<String, Option<String>> =
        settings::list_settings(&state.db).await?.into_iter().collect();

    let rows: Vec<SettingRow> = SETTINGS_CATALOG
        .iter()
        .map(|def| setting_row(def, stored.get(def.key).cloned().flatten()))
        .collect();

    Ok(Json(SettingsResponse {
        total_settings: rows.len(),
        settings: rows,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    /// String or number
    pub value: Value,
}

/// PUT /api/settings/:key
pub async fn update_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<UpdateSettingRequest>,
) -> ApiResult<Json<SettingRow>> {
    let def = settings::setting_def(&key)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown setting '{}'", key)))?;

    let value = match req.value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(ApiError::BadRequest(format!(
                "Setting '{}' expects a string or number, got {}",
                key, other
            )))
        }
    };
    def.validate(&value)?;

    settings::set_setting(&state.db, def.key, &value).await?;
    info!(key = def.key, "Setting updated");

    Ok(Json(setting_row(def, Some(value))))
}
