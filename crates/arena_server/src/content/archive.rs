use super::{has_extension, safe_join, write_atomic, MAP_PACK_EXTENSION};
use crate::error::ContentError;
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The demo ships its base pak under a directory the engine does not read.
const RENAMES: &[(&str, &str)] = &[("demoq3/pak0.pk3", "baseq3/pak0.pk3")];

/// Unpacks the pak files embedded in a legacy installer payload.
///
/// The payload is a self-extracting script: an arbitrary header followed by
/// a gzip'd tarball. Every `.pk3` member is written under `root`, with
/// `demoq3/pak0.pk3` moved to `baseq3/pak0.pk3`. Returns the relative names
/// written.
pub fn extract_legacy_archive(path: &Path, root: &Path) -> Result<Vec<String>, ContentError> {
    let archive_err = |reason: String| ContentError::Archive {
        path: path.to_path_buf(),
        reason,
    };

    let data = fs::read(path).map_err(|e| ContentError::io(path, e))?;
    let start = data
        .windows(GZIP_MAGIC.len())
        .position(|w| w == &GZIP_MAGIC[..])
        .ok_or_else(|| archive_err("gzip header not found".to_string()))?;

    let mut tarball = tar::Archive::new(GzDecoder::new(&data[start..]));
    let entries = tarball
        .entries()
        .map_err(|e| archive_err(e.to_string()))?;

    let mut extracted = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_err(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| archive_err(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        if !has_extension(&name, &[MAP_PACK_EXTENSION]) {
            continue;
        }

        let name = rename(&name);
        let dest: PathBuf = safe_join(root, &name)?;
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(|e| archive_err(e.to_string()))?;
        write_atomic(&dest, &contents)?;

        info!("📦 Extracted {} from {}", name, path.display());
        extracted.push(name);
    }
    Ok(extracted)
}

fn rename(name: &str) -> String {
    let trimmed = name.trim_start_matches("./");
    RENAMES
        .iter()
        .find(|(from, _)| trimmed.starts_with(from))
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Builds a payload shaped like the legacy installers: a shell header
    /// followed by a gzip'd tarball of `files`.
    pub(crate) fn legacy_payload(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();

        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&tar_bytes).unwrap();
        let gz_bytes = gz.finish().unwrap();

        let mut payload = b"#!/bin/sh\n# installer header\nexit 0\n".to_vec();
        payload.extend_from_slice(&gz_bytes);
        payload
    }

    #[test]
    fn test_extracts_only_paks_and_remaps_demo() {
        let dir = tempfile::tempdir().unwrap();
        let payload = legacy_payload(&[
            ("demoq3/pak0.pk3", &b"demo pak"[..]),
            ("baseq3/pak1.pk3", &b"point pak"[..]),
            ("README", &b"docs"[..]),
        ]);
        let installer = dir.path().join("linuxq3ademo-1.11-6.x86.gz.sh");
        fs::write(&installer, payload).unwrap();

        let extracted = extract_legacy_archive(&installer, dir.path()).unwrap();
        assert_eq!(extracted, vec!["baseq3/pak0.pk3", "baseq3/pak1.pk3"]);
        assert_eq!(fs::read(dir.path().join("baseq3/pak0.pk3")).unwrap(), b"demo pak");
        assert_eq!(fs::read(dir.path().join("baseq3/pak1.pk3")).unwrap(), b"point pak");
        assert!(!dir.path().join("README").exists());
        assert!(!dir.path().join("demoq3").exists());
    }

    #[test]
    fn test_missing_gzip_header_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let installer = dir.path().join("linuxq3apoint-1.32b-3.x86.run");
        fs::write(&installer, b"#!/bin/sh\nno archive here\n").unwrap();

        let err = extract_legacy_archive(&installer, dir.path()).unwrap_err();
        assert!(matches!(err, ContentError::Archive { .. }));
    }
}
