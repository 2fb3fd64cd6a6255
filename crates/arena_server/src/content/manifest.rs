use super::{walk_files, ASSET_EXTENSIONS};
use crate::error::ContentError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One file in a content manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the content root, always `/`-separated.
    pub name: String,
    /// File size in bytes.
    #[serde(rename = "compressed")]
    pub size: i64,
    /// CRC-32 (IEEE) of the file contents.
    pub checksum: u32,
}

/// Address under `/assets/` at which a manifest entry is served.
pub fn asset_address(entry: &ManifestEntry) -> String {
    format!("{}-{}", entry.checksum, entry.name)
}

/// Scans `root` and returns one entry per asset file, in walk order.
///
/// Nothing is cached: every call rereads and rechecksums every file.
pub fn read_manifest(root: &Path) -> Result<Vec<ManifestEntry>, ContentError> {
    let mut entries = Vec::new();
    walk_files(root, ASSET_EXTENSIONS, &mut |path: &Path| {
        let (size, checksum) = checksum_file(path)?;
        entries.push(ManifestEntry {
            name: relative_name(root, path),
            size: size as i64,
            checksum,
        });
        Ok(())
    })?;
    Ok(entries)
}

fn checksum_file(path: &Path) -> Result<(u64, u32), ContentError> {
    let mut file = File::open(path).map_err(|e| ContentError::io(path, e))?;
    let mut crc = flate2::Crc::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| ContentError::io(path, e))?;
        if n == 0 {
            break;
        }
        crc.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, crc.sum()))
}

fn relative_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Maps an asset address back to a relative file name by removing the
/// numeric checksum prefix.
///
/// Both `baseq3/123-pak0.pk3` (prefix on the file name) and
/// `123-baseq3/pak0.pk3` (prefix on the whole name, as produced by
/// [`asset_address`]) resolve to `baseq3/pak0.pk3`. Names without a numeric
/// prefix are returned unchanged.
pub fn trim_asset_name(address: &str) -> String {
    let (dir, file) = match address.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, address),
    };

    if let Some(rest) = strip_checksum(file) {
        return match dir {
            Some(dir) => format!("{dir}/{rest}"),
            None => rest.to_string(),
        };
    }
    match strip_checksum(address) {
        Some(rest) => rest.to_string(),
        None => address.to_string(),
    }
}

fn strip_checksum(s: &str) -> Option<&str> {
    let (digits, rest) = s.split_once('-')?;
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) && !rest.is_empty() {
        Some(rest)
    } else {
        None
    }
}
