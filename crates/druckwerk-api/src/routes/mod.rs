// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

pub mod print;
pub mod scan;
pub mod users;

use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use tokio_util::io::ReaderStream;

use druckwerk_core::error::Result;

/// Stream an artifact back as an attachment.
pub(crate) async fn artifact_response(
    path: std::path::PathBuf,
    download_name: &str,
) -> Result<Response> {
    let file = tokio::fs::File::open(&path).await?;
    let stream = ReaderStream::new(file);

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={download_name}"),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| druckwerk_core::DruckwerkError::Backend(format!("response build: {e}")))?;
    Ok(response)
}
