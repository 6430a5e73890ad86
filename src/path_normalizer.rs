//! Source-library location decoding into comparable file paths.

const FILE_SCHEME: &str = "file://";
const LOCALHOST_AUTHORITY: &str = "localhost";
const EXTERNAL_VOLUME_PREFIX: &str = "/Volumes/";

/// Path convention the decoded location is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathConvention {
    /// Forward-slash rooted paths, identical to the source library's own form.
    Posix,
    /// Drive-rooted paths; rooted source paths are rewritten relative to a drive.
    Windows,
}

impl PathConvention {
    /// Convention of the platform this binary was built for.
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }
}

/// Decodes a source-library `file://` location into a normalized path.
///
/// Returns `None` for anything that cannot be decoded: locations without the
/// `file://` scheme (streaming or DRM-only entries) and percent-encoded byte
/// sequences that are not valid UTF-8.
///
/// Under [`PathConvention::Windows`], `/Volumes/<name>/<rest>` becomes
/// `<name>:/<rest>`. The volume name is substituted verbatim and is not
/// resolved to a mounted drive letter. A `/Volumes/` prefix without a volume
/// name is kept unchanged. Other rooted paths lose exactly one leading separator.
pub fn normalize_source_location(location: &str, convention: PathConvention) -> Option<String> {
    let remainder = location.strip_prefix(FILE_SCHEME)?;
    // Music/iTunes exports write `file://localhost/...`; the authority is not part of the path.
    let remainder = match remainder.strip_prefix(LOCALHOST_AUTHORITY) {
        Some(rest) if rest.starts_with('/') => rest,
        _ => remainder,
    };
    let decoded = urlencoding::decode(remainder).ok()?.into_owned();

    match convention {
        PathConvention::Posix => Some(decoded),
        PathConvention::Windows => Some(rebase_for_drive_root(decoded)),
    }
}

fn rebase_for_drive_root(path: String) -> String {
    if let Some(volume_path) = path.strip_prefix(EXTERNAL_VOLUME_PREFIX) {
        let (volume_name, rest) = volume_path.split_once('/').unwrap_or((volume_path, ""));
        if volume_name.is_empty() {
            // `/Volumes/` alone names no volume; leave it as is.
            return path;
        }
        return format!("{volume_name}:/{rest}");
    }
    match path.strip_prefix('/') {
        Some(relative) => relative.to_string(),
        None => path,
    }
}

/// Returns the final path segment, splitting on both `/` and `\`.
///
/// Managed-library paths may come from a Windows server while source paths are
/// POSIX, so either separator ends a segment.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Returns the basename with its final extension removed.
pub fn file_stem(path: &str) -> &str {
    let name = basename(path);
    match name.rfind('.') {
        Some(index) if index > 0 => &name[..index],
        _ => name,
    }
}
