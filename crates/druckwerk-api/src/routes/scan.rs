// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan endpoints: manual acquisition cycles over the growing artifact,
// plus the raw-XML diagnostics.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use druckwerk_core::error::DruckwerkError;
use druckwerk_core::{FileHandle, ScanOptions, Scanner};

use crate::app::AppContext;
use crate::error::ApiResult;
use crate::extract::Authed;

#[derive(Debug, Deserialize)]
pub struct ScannerQuery {
    pub scanner_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelScanQuery {
    pub scanner_name: String,
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WaitAndMergeQuery {
    pub scanner_name: String,
    pub job_id: String,
    #[serde(default)]
    pub prev_filename: Option<String>,
    #[serde(default)]
    pub crop: bool,
}

#[derive(Debug, Deserialize)]
pub struct FilenameQuery {
    pub filename: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StartScanBody {
    pub scanning_options: ScanOptions,
}

#[derive(Debug, Serialize)]
pub struct MergeResponse {
    pub filename: String,
    pub page_count: u32,
}

pub async fn get_scanners(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
) -> Json<Vec<Scanner>> {
    Json(context.settings.scanners.clone())
}

/// POST the scan intent; 503 when the device is busy.
pub async fn start_scan(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
    Query(query): Query<ScannerQuery>,
    body: Option<Json<StartScanBody>>,
) -> ApiResult<Json<String>> {
    let options = body.map(|Json(b)| b.scanning_options).unwrap_or_default();
    let job_id = context.scan.start(&query.scanner_name, &options).await?;
    Ok(Json(job_id))
}

pub async fn cancel_scan(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
    Query(query): Query<CancelScanQuery>,
) -> ApiResult<()> {
    context
        .scan
        .delete_job(&query.scanner_name, &query.job_id)
        .await?;
    Ok(())
}

/// Block until the device delivers, then merge into the previous artifact
/// (if one is named) and return the grown handle.
pub async fn wait_and_merge(
    State(context): State<Arc<AppContext>>,
    Authed(owner): Authed,
    Query(query): Query<WaitAndMergeQuery>,
) -> ApiResult<Json<MergeResponse>> {
    let prev = query.prev_filename.map(FileHandle);
    let outcome = context
        .scan
        .wait_and_merge(
            &owner,
            &query.scanner_name,
            &query.job_id,
            prev.as_ref(),
            query.crop,
        )
        .await?;
    Ok(Json(MergeResponse {
        filename: outcome.file_handle.to_string(),
        page_count: outcome.page_count,
    }))
}

pub async fn remove_last_page(
    State(context): State<Arc<AppContext>>,
    Authed(owner): Authed,
    Query(query): Query<FilenameQuery>,
) -> ApiResult<Json<MergeResponse>> {
    let outcome = context
        .scan
        .remove_last_page(&owner, &FileHandle(query.filename))
        .await?;
    Ok(Json(MergeResponse {
        filename: outcome.file_handle.to_string(),
        page_count: outcome.page_count,
    }))
}

pub async fn delete_file(
    State(context): State<Arc<AppContext>>,
    Authed(owner): Authed,
    Query(query): Query<FilenameQuery>,
) -> ApiResult<()> {
    context
        .scan
        .delete_file(&owner, &FileHandle(query.filename))
        .await?;
    Ok(())
}

pub async fn get_file(
    State(context): State<Arc<AppContext>>,
    Authed(owner): Authed,
    Query(query): Query<FilenameQuery>,
) -> ApiResult<Response> {
    let handle = FileHandle(query.filename);
    let path = context.store.path(&owner, &handle)?;
    Ok(super::artifact_response(path, &format!("{handle}.pdf")).await?)
}

pub async fn get_scanner_capabilities(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
    Query(query): Query<ScannerQuery>,
) -> ApiResult<Response> {
    let xml = context.scan.capabilities(&query.scanner_name).await?;
    xml_response(xml)
}

pub async fn get_scanner_status(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
    Query(query): Query<ScannerQuery>,
) -> ApiResult<Response> {
    let xml = context.scan.scanner_status(&query.scanner_name).await?;
    xml_response(xml)
}

fn xml_response(xml: String) -> ApiResult<Response> {
    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/xml")
        .body(xml.into())
        .map_err(|e| DruckwerkError::Backend(format!("response build: {e}")))?)
}
