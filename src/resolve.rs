//! Locates requested proto files on the import search path.
//!
//! Every downstream stage needs to know which import root a proto belongs
//! to, because protoc resolves the proto's own `import` statements lexically
//! relative to its search roots. Resolution therefore returns the matched
//! root and the proto's subpath within it rather than a flat path.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("empty input proto path")]
    EmptyInput,
    #[error("proto path \"{0}\" is a directory, not a proto file")]
    IsDirectory(PathBuf),
    #[error("could not find proto \"{0}\" on import path")]
    NotFound(String),
}

/// A proto file located under a specific import root.
///
/// Invariant: `import_root/rel_dir/file_name` names an existing regular
/// file. `rel_dir` is `.` for protos sitting directly in their root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProto {
    pub import_root: PathBuf,
    pub rel_dir: PathBuf,
    pub file_name: OsString,
}

impl ResolvedProto {
    pub fn full_path(&self) -> PathBuf {
        self.import_root.join(&self.rel_dir).join(&self.file_name)
    }
}

/// Finds `proto` under one of the `imports` directories.
///
/// Relative references are tested against each import entry in order; the
/// first entry containing the file wins. Absolute references are matched by
/// lexical prefix against each entry (entries made absolute against the
/// working directory first), verified by an existence check on the re-joined
/// path. If no entry matches but the reference itself names an existing
/// file, its own directory becomes an implicit single-use import root with
/// `rel_dir = "."` -- a degraded mode that cannot satisfy the proto's own
/// relative imports, so it warns.
pub fn resolve(imports: &[PathBuf], proto: &str) -> Result<ResolvedProto, ResolveError> {
    if proto.is_empty() {
        return Err(ResolveError::EmptyInput);
    }
    let proto_path = Path::new(proto);
    let file_name = proto_path
        .file_name()
        .ok_or_else(|| ResolveError::NotFound(proto.to_string()))?
        .to_os_string();

    let matched = if proto_path.is_absolute() {
        match_absolute(imports, proto_path, &file_name)
    } else {
        match_relative(imports, proto_path, &file_name)
    };

    let resolved = match matched {
        Some(resolved) => resolved,
        None => implicit_root(proto_path, &file_name)
            .ok_or_else(|| ResolveError::NotFound(proto.to_string()))?,
    };

    // The lexical matching above only establishes containment of a path
    // string; confirm the actual file is there and is not a directory.
    let full = resolved.full_path();
    match full.metadata() {
        Ok(meta) if meta.is_dir() => Err(ResolveError::IsDirectory(full)),
        Ok(_) => Ok(resolved),
        Err(_) => Err(ResolveError::NotFound(proto.to_string())),
    }
}

/// Resolves every requested proto, preserving input order.
pub fn resolve_all(imports: &[PathBuf], protos: &[String]) -> Result<Vec<ResolvedProto>, ResolveError> {
    protos.iter().map(|p| resolve(imports, p)).collect()
}

fn match_relative(imports: &[PathBuf], proto: &Path, file_name: &OsString) -> Option<ResolvedProto> {
    // A reference that lexically ascends out of whatever root it is joined
    // to must never count as a match for that root.
    if escapes_root(proto) {
        return None;
    }
    for entry in imports {
        let candidate = entry.join(proto);
        if candidate.is_file() {
            debug!(root = %entry.display(), proto = %proto.display(), "matched relative proto");
            return Some(ResolvedProto {
                import_root: entry.clone(),
                rel_dir: dir_part(proto),
                file_name: file_name.clone(),
            });
        }
    }
    None
}

fn match_absolute(imports: &[PathBuf], proto: &Path, file_name: &OsString) -> Option<ResolvedProto> {
    let proto_dir = proto.parent()?;
    let cwd = std::env::current_dir().ok()?;
    for entry in imports {
        let abs_entry = if entry.is_absolute() {
            entry.clone()
        } else {
            cwd.join(entry)
        };
        // Component-wise, case-sensitive prefix test. No symlink
        // resolution: containment is judged on the paths as spelled.
        let Ok(rel) = proto_dir.strip_prefix(&abs_entry) else {
            continue;
        };
        if escapes_root(rel) {
            continue;
        }
        let rel_dir = if rel.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            rel.to_path_buf()
        };
        // The prefix test only confirms containment of a directory string;
        // verify the file itself exists under the re-joined subpath.
        if !abs_entry.join(&rel_dir).join(file_name).is_file() {
            debug!(root = %entry.display(), "prefix matched but file missing, skipping entry");
            continue;
        }
        return Some(ResolvedProto {
            import_root: entry.clone(),
            rel_dir,
            file_name: file_name.clone(),
        });
    }
    None
}

fn implicit_root(proto: &Path, file_name: &OsString) -> Option<ResolvedProto> {
    if !proto.exists() {
        return None;
    }
    let dir = match proto.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    warn!(
        proto = %proto.display(),
        root = %dir.display(),
        "proto not found on import path; using its own directory as an \
         implicit import root (its relative imports will not resolve)"
    );
    Some(ResolvedProto {
        import_root: dir,
        rel_dir: PathBuf::from("."),
        file_name: file_name.clone(),
    })
}

fn dir_part(proto: &Path) -> PathBuf {
    match proto.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// True if the relative path's `..` components would ever climb above its
/// starting directory.
fn escapes_root(path: &Path) -> bool {
    let mut depth: i32 = 0;
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    false
}
