use super::{
    asset_address, extract_legacy_archive, safe_join, write_atomic, ManifestEntry, LEGACY_PREFIXES,
    MANIFEST_PATH,
};
use crate::error::ContentError;
use crate::net::get_body;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What one [`download_assets`] run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Manifest names fetched from the origin.
    pub downloaded: Vec<String>,
    /// Manifest entries already present locally.
    pub skipped: usize,
    /// Pak files unpacked from legacy installer payloads.
    pub extracted: Vec<String>,
}

/// Fetches and parses `<origin>/assets/manifest.json`.
pub async fn download_manifest(
    client: &reqwest::Client,
    origin: &str,
) -> Result<Vec<ManifestEntry>, ContentError> {
    let url = format!("{}{}", origin.trim_end_matches('/'), MANIFEST_PATH);
    let body = get_body(client, &url).await?;
    serde_json::from_slice(&body).map_err(|source| ContentError::Manifest { url, source })
}

/// Mirrors every manifest entry of `origin` that is missing under `root`.
///
/// Files that already exist are never fetched, whatever their contents.
/// Legacy installer payloads are unpacked after download. The first failure
/// aborts the run; files written before it are kept.
pub async fn download_assets(
    client: &reqwest::Client,
    origin: &str,
    root: &Path,
) -> Result<SyncReport, ContentError> {
    let origin = origin.trim_end_matches('/');
    let manifest = download_manifest(client, origin).await?;
    info!("📋 Origin {} lists {} asset(s)", origin, manifest.len());

    let mut report = SyncReport::default();
    for entry in &manifest {
        let path = safe_join(root, &entry.name)?;
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ContentError::io(&path, e))?;
        if exists {
            debug!("Asset {} already present", entry.name);
            report.skipped += 1;
            continue;
        }

        let url = format!("{}/assets/{}", origin, asset_address(entry));
        let data = get_body(client, &url).await?;
        write_blocking(path.clone(), data).await?;
        info!("⬇️ Downloaded {} ({} bytes)", entry.name, entry.size);
        report.downloaded.push(entry.name.clone());

        if LEGACY_PREFIXES.iter().any(|p| entry.name.starts_with(p)) {
            let root = root.to_path_buf();
            let extracted = tokio::task::spawn_blocking(move || extract_legacy_archive(&path, &root))
                .await
                .map_err(|e| ContentError::Archive {
                    path: PathBuf::from(&entry.name),
                    reason: e.to_string(),
                })??;
            report.extracted.extend(extracted);
        }
    }
    Ok(report)
}

async fn write_blocking(path: PathBuf, data: bytes::Bytes) -> Result<(), ContentError> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, &data))
        .await
        .map_err(|e| ContentError::io(&path, std::io::Error::other(e)))?
}
