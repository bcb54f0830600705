// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service entrypoint: load settings, wire the stack, serve.

use tracing_subscriber::EnvFilter;

use druckwerk_api::app::{self, AppContext};
use druckwerk_core::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("druckwerk=info,tower_http=info")),
        )
        .init();

    let settings_path =
        std::env::var("DRUCKWERK_SETTINGS").unwrap_or_else(|_| "settings.yaml".to_string());
    tracing::info!(settings_path, "loading settings");
    let settings = Settings::load(&settings_path)?;

    let context = AppContext::build(settings)?;
    app::serve(context).await?;
    Ok(())
}
