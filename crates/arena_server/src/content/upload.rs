use super::{has_extension, write_atomic, BASE_GAME_DIR, MAP_PACK_EXTENSION};
use crate::error::ContentError;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::info;

/// Result of a stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub name: String,
    pub size: u64,
    pub message: String,
}

/// Stores an uploaded file under `<root>/baseq3`.
///
/// A `.zip` upload is treated as a bundle of map packs: only its `.pk3`
/// members are written, flattened to their base names. A bundle without any
/// map pack is rejected. Anything else is written as-is under its base name.
pub fn store_upload(root: &Path, name: &str, data: &[u8]) -> Result<UploadResponse, ContentError> {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ContentError::InvalidName(name.to_string()))?;
    let game_dir = root.join(BASE_GAME_DIR);

    if has_extension(&base.to_ascii_lowercase(), &[".zip"]) {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
        let mut stored = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() || !has_extension(entry.name(), &[MAP_PACK_EXTENSION]) {
                continue;
            }
            let Some(pak) = entry
                .enclosed_name()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            else {
                continue;
            };

            let mut contents = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut contents)
                .map_err(|e| ContentError::io(game_dir.join(&pak), e))?;
            write_atomic(&game_dir.join(&pak), &contents)?;
            info!("🗺️ Stored map pack {} from {}", pak, name);
            stored.push(pak);
        }

        if stored.is_empty() {
            return Err(ContentError::NoMapPacks(name.to_string()));
        }
        return Ok(UploadResponse {
            name: name.to_string(),
            size: data.len() as u64,
            message: format!(
                "Loaded the following map packs from file {}:\n{}",
                name,
                stored.join("\n")
            ),
        });
    }

    write_atomic(&game_dir.join(base), data)?;
    info!("📥 Stored upload {}", base);
    Ok(UploadResponse {
        name: name.to_string(),
        size: data.len() as u64,
        message: format!("File {BASE_GAME_DIR}/{base} uploaded successfully."),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::maps::tests::zip_bytes;

    #[test]
    fn test_raw_upload_uses_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let resp = store_upload(dir.path(), "/home/me/maps/ztn3tourney1.pk3", b"pak").unwrap();
        assert_eq!(resp.size, 3);
        assert_eq!(resp.message, "File baseq3/ztn3tourney1.pk3 uploaded successfully.");
        assert_eq!(
            std::fs::read(dir.path().join("baseq3/ztn3tourney1.pk3")).unwrap(),
            b"pak"
        );
    }

    #[test]
    fn test_zip_members_are_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = zip_bytes(&[("bundle/deep/mymap.pk3", &b"map"[..]), ("bundle/readme.txt", &b"hi"[..])]);

        let resp = store_upload(dir.path(), "bundle.zip", &bundle).unwrap();
        assert_eq!(
            resp.message,
            "Loaded the following map packs from file bundle.zip:\nmymap.pk3"
        );
        assert!(dir.path().join("baseq3/mymap.pk3").exists());
        assert!(!dir.path().join("baseq3/readme.txt").exists());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            store_upload(dir.path(), "..", b"x"),
            Err(ContentError::InvalidName(_))
        ));
    }
}
