// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk Document — PDF page operations, scan auto-crop, and the
// document-to-PDF converter seam.
//
// Everything here is CPU-bound and synchronous except the converter client;
// orchestrators run the heavy calls on the blocking pool.

pub mod autocrop;
pub mod convert;
pub mod pdf;

pub use autocrop::autocrop_pdf;
pub use convert::{Convert, HttpConverter};
pub use pdf::{PdfBuilder, PdfFile};
