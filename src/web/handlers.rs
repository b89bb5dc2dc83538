use std::collections::HashMap;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::extract::{FormFields, MultipartForm, QueryParams};
use super::forms::{FlashOptions, parse_bool};
use super::response::ApiError;
use crate::context::AppContext;
use crate::core::version::DEFAULT_VERSION;
use crate::core::{FirmwareSource, FlashOutcome, PackageStatus, ReleaseVersion, SerialPortInfo};
use crate::error::FlashError;

const FIRMWARE_FIELD: &str = "firmware";

#[derive(Serialize)]
pub struct PortsResponse {
    pub ports: Vec<SerialPortInfo>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: PackageStatus,
}

#[derive(Serialize)]
pub struct ReleaseFlashResponse {
    #[serde(flatten)]
    pub outcome: FlashOutcome,
    pub krux_board: String,
    pub version: ReleaseVersion,
}

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    pub version: Option<String>,
}

pub async fn list_ports(State(ctx): State<AppContext>) -> Result<Json<PortsResponse>, ApiError> {
    let lister = ctx.ports.clone();
    let ports = tokio::task::spawn_blocking(move || lister.list_ports())
        .await
        .map_err(|e| ApiError::internal(format!("Port enumeration task failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("Failed to list serial ports: {e:#}")))?;
    Ok(Json(PortsResponse { ports }))
}

/// `POST /api/flash`: flash an uploaded firmware file.
///
/// The flash slot is claimed before the body is read, so a concurrent
/// request is turned away without buffering its upload.
pub async fn flash_upload(
    State(ctx): State<AppContext>,
    MultipartForm(mut multipart): MultipartForm,
) -> Result<Json<FlashOutcome>, ApiError> {
    let permit = ctx.coordinator.try_begin()?;

    let mut upload = None;
    let mut fields = HashMap::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if name == FIRMWARE_FIELD {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            upload = Some((file_name, bytes.to_vec()));
        } else {
            fields.insert(name, field.text().await?);
        }
    }

    let (file_name, bytes) = upload.ok_or(FlashError::NoFirmware)?;
    let options = FlashOptions::from_fields(&fields)?;
    debug!(file = %file_name, bytes = bytes.len(), port = ?options.port, "Upload flash requested");

    let firmware = ctx
        .resolver
        .resolve(FirmwareSource::Upload { file_name, bytes })
        .await?;
    Ok(Json(permit.execute(options.into_request(firmware)).await))
}

/// An invalid version is reported in a 200 body rather than as an HTTP error.
pub async fn release_status(
    State(ctx): State<AppContext>,
    QueryParams(query): QueryParams<VersionQuery>,
) -> Result<Response, ApiError> {
    let raw = query.version.as_deref().unwrap_or(DEFAULT_VERSION);
    let version = match ReleaseVersion::normalize(raw) {
        Ok(version) => version,
        Err(e) => {
            return Ok(Json(json!({ "success": false, "error": e.to_string() })).into_response());
        }
    };

    let status = ctx.releases.status(&version).await?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    })
    .into_response())
}

pub async fn release_versions(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    let versions = ctx.releases.list_available_versions().await;
    Json(json!({ "success": true, "versions": versions }))
}

pub async fn release_download(
    State(ctx): State<AppContext>,
    FormFields(fields): FormFields,
) -> Result<Json<serde_json::Value>, ApiError> {
    let version = ReleaseVersion::normalize(
        fields
            .get("version")
            .map(String::as_str)
            .unwrap_or(DEFAULT_VERSION),
    )?;
    let force = parse_bool(fields.get("force").map(String::as_str), false);
    let permit = ctx.releases.try_begin_download()?;
    // A forced download wipes the extracted tree, so no flash may read it
    // meanwhile.
    let flash_permit = if force {
        Some(ctx.coordinator.try_begin()?)
    } else {
        None
    };

    info!(%version, force, "Release download requested");

    // Runs detached so a dropped connection cannot abort a half-done download.
    let releases = ctx.releases.clone();
    let job_version = version.clone();
    let boards = tokio::spawn(async move {
        let _permits = (permit, flash_permit);
        releases.ensure_extracted(&job_version, force).await?;
        releases.list_boards(&job_version).await
    })
    .await
    .map_err(|e| ApiError::internal(format!("Download task ended abnormally: {e}")))??;

    Ok(Json(json!({
        "success": true,
        "version": version,
        "boards": boards,
    })))
}

/// `POST /api/flash-krux`: flash one board's firmware from a release package,
/// downloading the package first when needed.
pub async fn flash_release(
    State(ctx): State<AppContext>,
    FormFields(fields): FormFields,
) -> Result<Json<ReleaseFlashResponse>, ApiError> {
    let permit = ctx.coordinator.try_begin()?;

    let board_id = fields
        .get("krux_board")
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| FlashError::InvalidInput("No release board selected".into()))?
        .to_string();
    let version = ReleaseVersion::normalize(
        fields
            .get("version")
            .map(String::as_str)
            .unwrap_or(DEFAULT_VERSION),
    )?;
    let options = FlashOptions::from_fields(&fields)?;

    let firmware = ctx
        .resolver
        .resolve(FirmwareSource::Release {
            version: version.clone(),
            board_id: board_id.clone(),
        })
        .await?;
    let outcome = permit.execute(options.into_request(firmware)).await;

    Ok(Json(ReleaseFlashResponse {
        outcome,
        krux_board: board_id,
        version,
    }))
}
