// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::path::Path;

use log::debug;
use serde::Serialize;

use dbb::firmware::Progress;

/// Print firmware transfer progress
pub fn print_progress(p: Progress) {
    debug!("chunk {}/{}", p.written, p.total);

    if p.written == p.total || p.written % 8 == 0 {
        println!("Writing firmware: {:3}%", p.written * 100 / p.total);
    }
}

/// Helper to write output files if `--output` argument is provided
pub async fn write_output(file_name: &str, value: &impl Serialize) -> anyhow::Result<()> {
    debug!("Writing output to '{}'", file_name);

    // Determine format from file name
    let p = Path::new(file_name);
    match p.extension().and_then(|e| e.to_str()) {
        // Encode to JSON for `.json` files
        Some("json") => {
            let s = serde_json::to_string(value)?;
            tokio::fs::write(p, s).await?;
        }
        _ => return Err(anyhow::anyhow!("unsupported output file format")),
    }

    Ok(())
}
