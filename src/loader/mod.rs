//! CSV loader for the site registry (`prm,adresse,kwc`).

use crate::models::Site;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

/// Parse a capacity cell. Blank, `-` or `N/A` mean "unknown".
pub fn parse_kwc(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "-" || s.eq_ignore_ascii_case("n/a") {
        return None;
    }
    s.replace(',', ".").parse().ok()
}

/// Load sites from a CSV file with a header row. Rows without a PRM are skipped.
pub fn load_sites_csv(path: &Path) -> Result<Vec<Site>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open site registry {:?}", path))?;

    let mut sites = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let Some(prm) = record.get(0).filter(|s| !s.is_empty()) else {
            warn!("Row {} in {:?}: missing prm", i + 1, path);
            continue;
        };

        sites.push(Site {
            id: prm.to_string(),
            address: record.get(1).unwrap_or_default().to_string(),
            capacity_kwc: record.get(2).and_then(parse_kwc),
        });
    }

    info!("{} sites loaded from {:?}", sites.len(), path);
    Ok(sites)
}
