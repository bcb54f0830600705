// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Druckwerk.

use thiserror::Error;

/// Top-level error type for all Druckwerk operations.
#[derive(Debug, Error)]
pub enum DruckwerkError {
    // -- Auth errors --
    #[error("unable to verify credentials")]
    Unauthorized {
        /// Set when no bearer credential was supplied at all, so clients can
        /// distinguish "log in first" from "token rejected".
        no_credentials: bool,
    },

    // -- Request errors --
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    // -- Backend errors --
    #[error("device busy: {0}")]
    Busy(String),

    #[error("backend request failed: {0}")]
    Backend(String),

    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    // -- Document errors --
    #[error("PDF operation failed: {0}")]
    Pdf(String),

    #[error("image processing failed: {0}")]
    Image(String),

    // -- Storage / persistence --
    #[error("state store error: {0}")]
    StateStore(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DruckwerkError {
    /// Error from a rejected or malformed bearer credential.
    pub fn unauthorized() -> Self {
        Self::Unauthorized {
            no_credentials: false,
        }
    }

    /// Error raised when no bearer credential was supplied.
    pub fn no_credentials() -> Self {
        Self::Unauthorized {
            no_credentials: true,
        }
    }

    /// Whether the error is the idempotent-path "already gone" case.
    ///
    /// Cleanup code swallows these: deleting an artifact or backend job that
    /// is no longer there is a success, not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DruckwerkError>;
