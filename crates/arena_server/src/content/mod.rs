//! Game content: manifests, mirroring, uploads and map listings.
//!
//! A content root holds the game's asset files (`baseq3/pak0.pk3`, map packs,
//! installer payloads). A node that owns content serves its manifest and the
//! files it lists; a node that needs content fetches the manifest from that
//! origin and downloads only what it is missing.

mod archive;
pub mod http;
mod manifest;
mod maps;
pub mod rpc;
mod sync;
mod upload;

pub use archive::extract_legacy_archive;
pub use manifest::{asset_address, read_manifest, trim_asset_name, ManifestEntry};
pub use maps::{read_map_pack, read_maps, MapInfo};
pub use sync::{download_assets, download_manifest, SyncReport};
pub use upload::{store_upload, UploadResponse};

pub use crate::net::wait_until_reachable;

use crate::error::ContentError;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Extensions included in manifests.
pub const ASSET_EXTENSIONS: &[&str] = &[".pk3", ".sh", ".run"];

/// Map pack extension.
pub const MAP_PACK_EXTENSION: &str = ".pk3";

/// Manifest names starting with one of these are installer payloads wrapping
/// a gzip'd tarball of pak files.
pub const LEGACY_PREFIXES: &[&str] = &["linuxq3ademo", "linuxq3apoint"];

/// Directory holding the base game's content.
pub const BASE_GAME_DIR: &str = "baseq3";

/// Path of the manifest on a content origin.
pub const MANIFEST_PATH: &str = "/assets/manifest.json";

pub(crate) fn has_extension(name: &str, exts: &[&str]) -> bool {
    exts.iter().any(|ext| name.ends_with(ext))
}

/// Walks `root` depth first in lexical order, calling `visit` for every
/// non-directory entry whose name ends with one of `exts`.
///
/// Entries that cannot be read for lack of permission are skipped.
pub(crate) fn walk_files<F>(root: &Path, exts: &[&str], visit: &mut F) -> Result<(), ContentError>
where
    F: FnMut(&Path) -> Result<(), ContentError>,
{
    let mut entries = match fs::read_dir(root) {
        Ok(rd) => rd
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ContentError::io(root, e))?,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => return Ok(()),
        Err(e) => return Err(ContentError::io(root, e)),
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => continue,
            Err(e) => return Err(ContentError::io(&path, e)),
        };
        if file_type.is_dir() {
            walk_files(&path, exts, visit)?;
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| has_extension(n, exts))
            .unwrap_or(false);
        if matches {
            visit(&path)?;
        }
    }
    Ok(())
}

/// Joins a slash-separated relative name onto `root`, refusing absolute
/// names and any `..` component.
pub(crate) fn safe_join(root: &Path, name: &str) -> Result<PathBuf, ContentError> {
    let rel = Path::new(name);
    let mut out = root.to_path_buf();
    let mut pushed = false;
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            _ => return Err(ContentError::InvalidName(name.to_string())),
        }
    }
    if !pushed {
        return Err(ContentError::InvalidName(name.to_string()));
    }
    Ok(out)
}

/// Writes `data` to `path` through a sibling temporary file so a failed
/// write never leaves a truncated asset behind.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ContentError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ContentError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).map_err(|e| ContentError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| ContentError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_rejects_escapes() {
        let root = Path::new("/srv/assets");
        assert_eq!(
            safe_join(root, "baseq3/pak0.pk3").unwrap(),
            PathBuf::from("/srv/assets/baseq3/pak0.pk3")
        );
        assert!(safe_join(root, "../etc/passwd").is_err());
        assert!(safe_join(root, "/etc/passwd").is_err());
        assert!(safe_join(root, "baseq3/../../x").is_err());
        assert!(safe_join(root, "").is_err());
    }

    #[test]
    fn test_walk_files_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("baseq3")).unwrap();
        fs::create_dir_all(dir.path().join("odd.pk3")).unwrap();
        fs::write(dir.path().join("baseq3/pak1.pk3"), b"1").unwrap();
        fs::write(dir.path().join("baseq3/pak0.pk3"), b"0").unwrap();
        fs::write(dir.path().join("baseq3/server.cfg"), b"cfg").unwrap();
        fs::write(dir.path().join("linuxq3apoint-1.32b-3.x86.run"), b"run").unwrap();

        let mut seen = Vec::new();
        walk_files(dir.path(), ASSET_EXTENSIONS, &mut |p: &Path| {
            seen.push(p.strip_prefix(dir.path()).unwrap().to_path_buf());
            Ok(())
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![
                PathBuf::from("baseq3/pak0.pk3"),
                PathBuf::from("baseq3/pak1.pk3"),
                PathBuf::from("linuxq3apoint-1.32b-3.x86.run"),
            ]
        );
    }
}
