//! Rewrites each proto's output-namespace directive before codegen.
//!
//! The namespace rides in the `option go_package` slot of FileOptions:
//! protoc carries that string through to any plugin without interpreting
//! it, which makes it the one per-file place the pipeline can stash the
//! module path the generator should emit code into. The replacement value
//! is derived from the proto's resolved subpath, never from whatever the
//! author declared, so generated modules cannot collide.
//!
//! This is a streaming line transform, not a proto parse. It assumes the
//! `syntax` and `option go_package` statements each sit alone on their own
//! line, which holds for the fixed templates and typical proto style. A
//! directive split across lines would simply not be found, and the rewrite
//! would fail with the missing-declaration error.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};

use crate::resolve::ResolvedProto;
use crate::GENERATED_MODULE_ROOT;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("empty package name")]
    EmptyPackage,
    #[error("no \"syntax\" line found when scanning proto {}", .0.display())]
    MissingSyntax(PathBuf),
    #[error("found more than one \"syntax\" statement in {}", .0.display())]
    DuplicateSyntax(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RewriteError {
    /// Stamps the offending file path into the variants that carry one.
    /// [`rewrite_stream`] works on anonymous readers and leaves the path
    /// empty; the file-level entry points fill it in.
    fn with_file(self, file: &Path) -> Self {
        match self {
            RewriteError::MissingSyntax(_) => RewriteError::MissingSyntax(file.to_path_buf()),
            RewriteError::DuplicateSyntax(_) => RewriteError::DuplicateSyntax(file.to_path_buf()),
            other => other,
        }
    }
}

/// Copies a proto line by line, dropping any existing namespace directive
/// and injecting `option go_package = "<new_package>";` immediately after
/// the single required `syntax` line. A blank line directly following a
/// dropped directive is dropped with it, matching the blank line injected
/// after the replacement, so rewriting a rewritten file reproduces it byte
/// for byte. Every other line passes through unchanged apart from
/// line-ending normalization.
pub fn rewrite_stream<R: BufRead, W: Write>(
    reader: R,
    new_package: &str,
    mut writer: W,
) -> Result<(), RewriteError> {
    if new_package.is_empty() {
        return Err(RewriteError::EmptyPackage);
    }

    let mut found_syntax = false;
    let mut skip_blank = false;
    for line in reader.lines() {
        let line = line?;

        if skip_blank {
            skip_blank = false;
            if line.trim().is_empty() {
                continue;
            }
        }

        if is_package_directive(&line) {
            // Dropped; the replacement is written after the syntax line.
            skip_blank = true;
            continue;
        }

        if is_syntax_line(&line) {
            if found_syntax {
                return Err(RewriteError::DuplicateSyntax(PathBuf::new()));
            }
            found_syntax = true;
            writeln!(writer, "{line}")?;
            writeln!(writer, "option go_package = \"{new_package}\";")?;
            writeln!(writer)?;
            continue;
        }

        writeln!(writer, "{line}")?;
    }

    if !found_syntax {
        return Err(RewriteError::MissingSyntax(PathBuf::new()));
    }
    Ok(())
}

/// Matches `option go_package =` with any spacing, anchored at the start of
/// the line. Deliberately does not parse the value.
fn is_package_directive(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("option") else {
        return false;
    };
    let trimmed = rest.trim_start_matches([' ', '\t']);
    if trimmed.len() == rest.len() {
        // "option" must be followed by whitespace
        return false;
    }
    let Some(rest) = trimmed.strip_prefix("go_package") else {
        return false;
    };
    rest.trim_start_matches([' ', '\t']).starts_with('=')
}

/// Matches any line starting with `syntax` followed by whitespace. No
/// attempt is made to validate the statement itself.
fn is_syntax_line(line: &str) -> bool {
    line.strip_prefix("syntax")
        .is_some_and(|rest| rest.starts_with([' ', '\t']))
}

/// A proto rewritten into the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenProto {
    /// Path of the rewritten copy, relative to the output directory. Also
    /// the positional argument handed to protoc.
    pub rel_path: PathBuf,
    /// The namespace injected into the copy.
    pub package: String,
}

/// Rewrites every resolved proto into `output`, mirroring each proto's
/// resolved subpath so protoc finds cross-file imports lexically under the
/// output tree before any same-named original.
pub fn rewrite_protos(resolved: &[ResolvedProto], output: &Path) -> Result<Vec<RewrittenProto>> {
    resolved
        .iter()
        .map(|proto| rewrite_proto(proto, output))
        .collect()
}

fn rewrite_proto(proto: &ResolvedProto, output: &Path) -> Result<RewrittenProto> {
    let package = output_namespace(&proto.rel_dir);
    let out_dir = output.join(&proto.rel_dir);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output dir {}", out_dir.display()))?;

    let src = proto.full_path();
    let dst = out_dir.join(&proto.file_name);
    debug!(src = %src.display(), dst = %dst.display(), package, "rewriting proto");

    let reader = BufReader::new(
        File::open(&src).with_context(|| format!("opening proto {}", src.display()))?,
    );
    let mut writer = BufWriter::new(
        File::create(&dst).with_context(|| format!("creating {}", dst.display()))?,
    );
    rewrite_stream(reader, &package, &mut writer)
        .map_err(|e| e.with_file(&src))
        .with_context(|| format!("rewriting proto {}", src.display()))?;
    writer
        .flush()
        .with_context(|| format!("flushing {}", dst.display()))?;

    let rel_path = normalize_rel(&proto.rel_dir).join(&proto.file_name);
    info!(proto = %rel_path.display(), package, "rewrote proto");
    Ok(RewrittenProto { rel_path, package })
}

/// Derives the output namespace for a proto from the fixed module root plus
/// its resolved relative subpath. Two protos in the same subpath share a
/// namespace, which is fine; the alias table hands them the same alias.
pub fn output_namespace(rel_dir: &Path) -> String {
    let rel = normalize_rel(rel_dir);
    if rel.as_os_str().is_empty() {
        return GENERATED_MODULE_ROOT.to_string();
    }
    let mut package = String::from(GENERATED_MODULE_ROOT);
    for comp in rel.components() {
        package.push('/');
        package.push_str(&comp.as_os_str().to_string_lossy());
    }
    package
}

/// Strips a leading `.` so `./bar` and `bar` produce the same layout.
fn normalize_rel(rel: &Path) -> PathBuf {
    rel.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve;
    use std::fs;
    use tempfile::TempDir;

    fn rewrite_str(input: &str, package: &str) -> Result<String, RewriteError> {
        let mut out = Vec::new();
        rewrite_stream(input.as_bytes(), package, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn empty_package_rejected() {
        assert!(matches!(
            rewrite_str("syntax = \"proto3\";\n", ""),
            Err(RewriteError::EmptyPackage)
        ));
    }

    #[test]
    fn empty_input_has_no_syntax() {
        assert!(matches!(
            rewrite_str("", "grpcmock/generated/sub"),
            Err(RewriteError::MissingSyntax(_))
        ));
    }

    #[test]
    fn syntax_line_without_directive() {
        let out = rewrite_str("syntax = \"proto3\";\n", "grpcmock/generated/sub").unwrap();
        assert_eq!(
            out,
            "syntax = \"proto3\";\noption go_package = \"grpcmock/generated/sub\";\n\n"
        );
    }

    #[test]
    fn existing_directive_is_replaced() {
        let input = "syntax = \"proto3\";\noption go_package = \"some/prev/package\";\n";
        let out = rewrite_str(input, "grpcmock/generated/sub").unwrap();
        assert_eq!(
            out,
            "syntax = \"proto3\";\noption go_package = \"grpcmock/generated/sub\";\n\n"
        );
    }

    #[test]
    fn missing_trailing_newline_is_normalized() {
        let input = "syntax = \"proto3\";\noption go_package = \"some/prev/package\";";
        let out = rewrite_str(input, "grpcmock/generated/sub").unwrap();
        assert_eq!(
            out,
            "syntax = \"proto3\";\noption go_package = \"grpcmock/generated/sub\";\n\n"
        );
    }

    #[test]
    fn full_proto_passes_through_untouched() {
        let input = "\
// simple example service
syntax = \"proto3\";

package simple;

option go_package = \"original/pkg\";

service Greeter {
  rpc SayHello (Request) returns (Reply);
}

message Request {
  string name = 1;
}
";
        let out = rewrite_str(input, "grpcmock/generated").unwrap();
        // Directive appears exactly once, right after the syntax line.
        assert_eq!(out.matches("option go_package").count(), 1);
        let syntax_pos = out.find("syntax = ").unwrap();
        let option_pos = out.find("option go_package").unwrap();
        assert!(option_pos > syntax_pos);
        assert!(out.contains("package simple;\n"));
        assert!(out.contains("rpc SayHello (Request) returns (Reply);\n"));
        assert!(!out.contains("original/pkg"));
    }

    #[test]
    fn directive_before_syntax_line_still_moves_after_it() {
        let input = "option go_package = \"some/prev/package\";\nsyntax = \"proto3\";\n";
        let out = rewrite_str(input, "grpcmock/generated/sub").unwrap();
        assert_eq!(
            out,
            "syntax = \"proto3\";\noption go_package = \"grpcmock/generated/sub\";\n\n"
        );
    }

    #[test]
    fn garbage_syntax_line_is_accepted_verbatim() {
        let out = rewrite_str("syntax this is garbage", "grpcmock/generated/sub").unwrap();
        assert_eq!(
            out,
            "syntax this is garbage\noption go_package = \"grpcmock/generated/sub\";\n\n"
        );
    }

    #[test]
    fn duplicate_syntax_lines_rejected() {
        let input = "syntax = \"proto3\";\nsyntax = \"proto3\";\n";
        assert!(matches!(
            rewrite_str(input, "grpcmock/generated/sub"),
            Err(RewriteError::DuplicateSyntax(_))
        ));
    }

    #[test]
    fn rewrite_is_deterministic() {
        let input = "syntax = \"proto3\";\npackage simple;\n";
        let a = rewrite_str(input, "grpcmock/generated").unwrap();
        let b = rewrite_str(input, "grpcmock/generated").unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a,
            "syntax = \"proto3\";\noption go_package = \"grpcmock/generated\";\n\npackage simple;\n"
        );
    }

    #[test]
    fn rewrite_is_stable_on_its_own_output() {
        let input = "\
syntax = \"proto3\";

package simple;

option go_package = \"original/pkg\";

message Request {
  string name = 1;
}
";
        let once = rewrite_str(input, "grpcmock/generated").unwrap();
        // The injected directive and its trailing blank line must not
        // accumulate across passes.
        let twice = rewrite_str(&once, "grpcmock/generated").unwrap();
        assert_eq!(once, twice);
        let thrice = rewrite_str(&twice, "grpcmock/generated").unwrap();
        assert_eq!(once, thrice);
    }

    #[test]
    fn namespace_derivation() {
        assert_eq!(output_namespace(Path::new(".")), "grpcmock/generated");
        assert_eq!(output_namespace(Path::new("bar")), "grpcmock/generated/bar");
        assert_eq!(
            output_namespace(Path::new("./foo/bar")),
            "grpcmock/generated/foo/bar"
        );
    }

    #[test]
    fn rewrite_protos_mirrors_subpaths_and_keeps_imports() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("bar")).unwrap();
        fs::write(
            src.path().join("hello.proto"),
            "syntax = \"proto3\";\npackage hello;\nimport \"bar/bar.proto\";\n",
        )
        .unwrap();
        fs::write(
            src.path().join("bar/bar.proto"),
            "syntax = \"proto3\";\npackage bar;\n",
        )
        .unwrap();

        let imports = vec![src.path().to_path_buf()];
        let resolved = resolve::resolve_all(
            &imports,
            &["hello.proto".to_string(), "bar/bar.proto".to_string()],
        )
        .unwrap();
        let rewritten = rewrite_protos(&resolved, out.path()).unwrap();

        assert_eq!(rewritten[0].rel_path, PathBuf::from("hello.proto"));
        assert_eq!(rewritten[1].rel_path, PathBuf::from("bar/bar.proto"));
        assert_eq!(rewritten[0].package, "grpcmock/generated");
        assert_eq!(rewritten[1].package, "grpcmock/generated/bar");
        assert_ne!(rewritten[0].package, rewritten[1].package);

        // The import statement must survive untouched so protoc can resolve
        // it lexically against the output tree.
        let hello = fs::read_to_string(out.path().join("hello.proto")).unwrap();
        assert!(hello.contains("import \"bar/bar.proto\";"));
        assert!(hello.contains("option go_package = \"grpcmock/generated\";"));
        let bar = fs::read_to_string(out.path().join("bar/bar.proto")).unwrap();
        assert!(bar.contains("option go_package = \"grpcmock/generated/bar\";"));
    }

    #[test]
    fn missing_syntax_error_names_the_file() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(src.path().join("broken.proto"), "package broken;\n").unwrap();

        let imports = vec![src.path().to_path_buf()];
        let resolved = resolve::resolve_all(&imports, &["broken.proto".to_string()]).unwrap();
        let err = rewrite_protos(&resolved, out.path()).unwrap_err();
        match err.downcast_ref::<RewriteError>() {
            Some(RewriteError::MissingSyntax(file)) => {
                assert!(file.ends_with("broken.proto"), "got {}", file.display());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
