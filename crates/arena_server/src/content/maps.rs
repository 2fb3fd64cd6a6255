use super::{walk_files, MAP_PACK_EXTENSION};
use crate::error::ContentError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// A playable map found inside a map pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapInfo {
    /// `<game dir>/<pak name>`, e.g. `baseq3/pak0.pk3`.
    pub file: String,
    /// Map name without extension, e.g. `q3dm17`.
    pub name: String,
}

/// Lists the maps in every map pack under `root`.
pub fn read_maps(root: &Path) -> Result<Vec<MapInfo>, ContentError> {
    let mut maps = Vec::new();
    walk_files(root, &[MAP_PACK_EXTENSION], &mut |path: &Path| {
        maps.extend(read_map_pack(path)?);
        Ok(())
    })?;
    Ok(maps)
}

/// Lists the `.bsp` entries of one map pack.
pub fn read_map_pack(path: &Path) -> Result<Vec<MapInfo>, ContentError> {
    let file = File::open(path).map_err(|e| ContentError::io(path, e))?;
    let mut archive = zip::ZipArchive::new(file)?;

    let pak = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = match path.parent().and_then(|p| p.file_name()) {
        Some(dir) => format!("{}/{}", dir.to_string_lossy(), pak),
        None => pak,
    };

    let mut maps = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let Some(stem) = entry
            .name()
            .rsplit('/')
            .next()
            .and_then(|base| base.strip_suffix(".bsp"))
        else {
            continue;
        };
        maps.push(MapInfo {
            file: file.clone(),
            name: stem.to_string(),
        });
    }
    Ok(maps)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    pub(crate) fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_read_maps_lists_bsp_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("baseq3")).unwrap();
        std::fs::write(
            dir.path().join("baseq3/pak0.pk3"),
            zip_bytes(&[
                ("maps/q3dm1.bsp", &b"bsp"[..]),
                ("maps/q3dm17.bsp", &b"bsp"[..]),
                ("scripts/shaders.txt", &b"txt"[..]),
            ]),
        )
        .unwrap();

        let maps = read_maps(dir.path()).unwrap();
        assert_eq!(
            maps,
            vec![
                MapInfo { file: "baseq3/pak0.pk3".into(), name: "q3dm1".into() },
                MapInfo { file: "baseq3/pak0.pk3".into(), name: "q3dm17".into() },
            ]
        );
    }

    #[test]
    fn test_corrupt_pack_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.pk3"), b"not a zip").unwrap();
        assert!(matches!(read_maps(dir.path()), Err(ContentError::Zip(_))));
    }
}
