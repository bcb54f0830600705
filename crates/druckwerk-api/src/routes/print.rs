// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use druckwerk_core::error::DruckwerkError;
use druckwerk_core::{FileHandle, JobAttributes, PrintOptions, Printer, PrinterStatus};

use crate::app::AppContext;
use crate::error::ApiResult;
use crate::extract::Authed;

#[derive(Debug, Serialize)]
pub struct PrepareResponse {
    pub filename: String,
    pub pages: u32,
}

#[derive(Debug, Deserialize)]
pub struct FilenameQuery {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct PrinterQuery {
    pub printer_cups_name: String,
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub job_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct PrintQuery {
    pub filename: String,
    pub printer_cups_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct PrintBody {
    pub printing_options: PrintOptions,
}

pub async fn get_printers(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
) -> Json<Vec<Printer>> {
    Json(context.settings.printers.clone())
}

pub async fn get_printers_status(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
) -> Json<Vec<PrinterStatus>> {
    Json(context.status.statuses(&context.settings.printers).await)
}

pub async fn get_printer_status(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
    Query(query): Query<PrinterQuery>,
) -> ApiResult<Json<PrinterStatus>> {
    let printer = context
        .settings
        .find_printer(&query.printer_cups_name)
        .ok_or_else(|| {
            DruckwerkError::InvalidArgument(format!(
                "no such printer '{}'",
                query.printer_cups_name
            ))
        })?;
    Ok(Json(context.status.status(printer).await))
}

/// Accept an upload, normalize it to PDF, and hand back the handle plus
/// page count.
pub async fn prepare(
    State(context): State<Arc<AppContext>>,
    Authed(owner): Authed,
    mut multipart: Multipart,
) -> ApiResult<Json<PrepareResponse>> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DruckwerkError::InvalidArgument(format!("multipart: {e}")))?
    {
        if field.name() == Some("file") {
            let file_name = field
                .file_name()
                .unwrap_or("upload")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| DruckwerkError::InvalidArgument(format!("multipart body: {e}")))?;
            upload = Some((file_name, bytes.to_vec()));
            break;
        }
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| DruckwerkError::InvalidArgument("missing 'file' field".into()))?;
    let prepared = context.print.prepare(&owner, &file_name, bytes).await?;
    Ok(Json(PrepareResponse {
        filename: prepared.file_handle.to_string(),
        pages: prepared.pages,
    }))
}

/// Dispatch a prepared artifact. The artifact is consumed either way.
pub async fn print(
    State(context): State<Arc<AppContext>>,
    Authed(owner): Authed,
    Query(query): Query<PrintQuery>,
    body: Option<Json<PrintBody>>,
) -> ApiResult<Json<i32>> {
    let options = body.map(|Json(b)| b.printing_options).unwrap_or_default();
    let handle = FileHandle(query.filename);
    let job_id = context
        .print
        .dispatch(&owner, &handle, &query.printer_cups_name, &options)
        .await?;
    Ok(Json(job_id))
}

pub async fn job_status(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
    Query(query): Query<JobQuery>,
) -> ApiResult<Json<JobAttributes>> {
    Ok(Json(context.print.job_status(query.job_id).await?))
}

pub async fn cancel(
    State(context): State<Arc<AppContext>>,
    Authed(_owner): Authed,
    Query(query): Query<JobQuery>,
) -> ApiResult<()> {
    context.print.cancel_job(query.job_id).await?;
    Ok(())
}

pub async fn cancel_preparation(
    State(context): State<Arc<AppContext>>,
    Authed(owner): Authed,
    Query(query): Query<FilenameQuery>,
) -> ApiResult<()> {
    context
        .print
        .cancel_preparation(&owner, &FileHandle(query.filename))
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
