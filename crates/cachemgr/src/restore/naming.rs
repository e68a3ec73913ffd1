//! Identifiers and storage names for restored dataset files.

use bagcache_core::roles::CacheRoles;

/// Compression suffixes kept together with the extension before them.
const COMPRESSION_EXTS: [&str; 3] = ["gz", "bz", "xz"];

/// Inventory id of a dataset file: `prefix/filepath[#version]`, where the
/// prefix is `target` when given, otherwise the dataset id.
pub fn id_for_object(dsid: &str, filepath: &str, version: Option<&str>, target: Option<&str>) -> String {
    let prefix = target.unwrap_or(dsid);
    match version {
        Some(v) => format!("{prefix}/{filepath}#{v}"),
        None => format!("{prefix}/{filepath}"),
    }
}

/// Storage name of a dataset file in a cache volume.
///
/// Files cached for a superseded version get the version spliced in before
/// their extension (`data/file-v1.2.0.csv`) so they never collide with the
/// current version's copy.
pub fn name_for_object(
    dsid: &str,
    filepath: &str,
    version: Option<&str>,
    prefs: CacheRoles,
    target: Option<&str>,
) -> String {
    let prefix = target.unwrap_or(dsid);
    match version {
        Some(v) if prefs.is_versioned() => format!("{prefix}/{}", decorate(filepath, v)),
        _ => format!("{prefix}/{filepath}"),
    }
}

fn decorate(filepath: &str, version: &str) -> String {
    let Some((base, ext)) = split_ext(filepath) else {
        return format!("{filepath}-v{version}");
    };
    let (base, ext) = if COMPRESSION_EXTS.contains(&ext.to_ascii_lowercase().as_str()) {
        match split_ext(base) {
            Some((inner, ext2)) if ext2.len() <= 4 => (inner, format!("{ext2}.{ext}")),
            _ => (base, ext.to_string()),
        }
    } else {
        (base, ext.to_string())
    };
    format!("{base}-v{version}.{ext}")
}

/// Split off the extension of the last path component.
fn split_ext(path: &str) -> Option<(&str, &str)> {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let dot = path[file_start..].rfind('.')? + file_start;
    let ext = &path[dot + 1..];
    if ext.is_empty() || dot == file_start {
        return None;
    }
    Some((&path[..dot], ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_for_object() {
        assert_eq!(id_for_object("mds2-2106", "a/b.csv", None, None), "mds2-2106/a/b.csv");
        assert_eq!(
            id_for_object("mds2-2106", "b.csv", Some("1.1.0"), None),
            "mds2-2106/b.csv#1.1.0"
        );
        assert_eq!(id_for_object("mds2-2106", "b.csv", None, Some("seq7")), "seq7/b.csv");
    }

    #[test]
    fn test_current_version_names_are_undecorated() {
        let name = name_for_object("mds2-2106", "file.csv", None, CacheRoles::GENERAL, None);
        assert_eq!(name, "mds2-2106/file.csv");
        let name = name_for_object("mds2-2106", "file.csv", Some("1.2.0"), CacheRoles::SMALL, None);
        assert_eq!(name, "mds2-2106/file.csv");
    }

    #[test]
    fn test_old_version_names_are_decorated() {
        let old = CacheRoles::OLD_VERSIONS;
        assert_eq!(
            name_for_object("mds2-2106", "sub/file.csv", Some("1.0.0"), old, None),
            "mds2-2106/sub/file-v1.0.0.csv"
        );
        assert_eq!(
            name_for_object("mds2-2106", "data.tar.gz", Some("2"), old, None),
            "mds2-2106/data-v2.tar.gz"
        );
        assert_eq!(
            name_for_object("mds2-2106", "archive.verylong.xz", Some("2"), old, None),
            "mds2-2106/archive.verylong-v2.xz"
        );
        assert_eq!(
            name_for_object("mds2-2106", "dir.d/README", Some("3"), CacheRoles::OLD_RESTRICTED, None),
            "mds2-2106/dir.d/README-v3"
        );
        assert_eq!(
            name_for_object("mds2-2106", ".hidden", Some("3"), old, None),
            "mds2-2106/.hidden-v3"
        );
    }
}
