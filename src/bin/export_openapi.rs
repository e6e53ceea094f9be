//! Export OpenAPI specification to static JSON file
//!
//! Usage: cargo run --bin export_openapi
//!
//! Generates docs/openapi.json for the admin API.

use std::fs;

use anyhow::{Context, Result};
use fleetgate::docs::AdminApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let spec = AdminApiDoc::openapi();
    let json = spec
        .to_pretty_json()
        .context("Failed to serialize OpenAPI spec")?;

    fs::create_dir_all("docs").context("Failed to create docs directory")?;
    fs::write("docs/openapi.json", json).context("Failed to write openapi.json")?;
    println!("Exported OpenAPI spec to docs/openapi.json");
    Ok(())
}
