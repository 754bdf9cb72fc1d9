//! Template loading and rendering for the generated artifacts.
//!
//! Templates come from a compiled-in default set, or from an override
//! directory when one is configured. Rendering is plain `{{key}}`
//! substitution; a placeholder left unresolved after substitution is a
//! rendering error rather than silent passthrough.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

pub const SERVER_TEMPLATE_NAME: &str = "server.rs.tmpl";
pub const MANIFEST_TEMPLATE_NAME: &str = "Cargo.toml.tmpl";
pub const BUILD_SCRIPT_TEMPLATE_NAME: &str = "build.rs.tmpl";

const DEFAULT_SERVER_TEMPLATE: &str = include_str!("../../templates/server.rs.tmpl");
const DEFAULT_MANIFEST_TEMPLATE: &str = include_str!("../../templates/Cargo.toml.tmpl");
const DEFAULT_BUILD_SCRIPT_TEMPLATE: &str = include_str!("../../templates/build.rs.tmpl");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no template file named \"{0}\" in compiled-in template")]
    Unknown(String),
    #[error("reading template {0}")]
    Read(String, #[source] std::io::Error),
    #[error("unresolved placeholder \"{placeholder}\" in template {template}")]
    UnresolvedPlaceholder { template: String, placeholder: String },
    #[error("formatting generated server: {source}\n---- unformatted source ----\n{unformatted}")]
    Format {
        #[source]
        source: syn::Error,
        /// The raw rendered buffer, surfaced so a broken template can be
        /// diagnosed without re-running.
        unformatted: String,
    },
}

/// Loads a template by name, preferring the override directory when set.
pub fn load(template_dir: Option<&Path>, name: &str) -> Result<String, TemplateError> {
    match template_dir {
        Some(dir) => {
            let path = dir.join(name);
            debug!(path = %path.display(), "loading template override");
            fs::read_to_string(&path)
                .map_err(|e| TemplateError::Read(path.display().to_string(), e))
        }
        None => match name {
            SERVER_TEMPLATE_NAME => Ok(DEFAULT_SERVER_TEMPLATE.to_string()),
            MANIFEST_TEMPLATE_NAME => Ok(DEFAULT_MANIFEST_TEMPLATE.to_string()),
            BUILD_SCRIPT_TEMPLATE_NAME => Ok(DEFAULT_BUILD_SCRIPT_TEMPLATE.to_string()),
            _ => Err(TemplateError::Unknown(name.to_string())),
        },
    }
}

/// Substitutes `{{key}}` placeholders and rejects anything left over.
pub fn render(
    name: &str,
    template: &str,
    vars: &[(&str, &str)],
) -> Result<String, TemplateError> {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    if let Some(start) = out.find("{{") {
        let rest = &out[start + 2..];
        let placeholder = rest
            .find("}}")
            .map(|end| &rest[..end])
            .unwrap_or(rest)
            .to_string();
        return Err(TemplateError::UnresolvedPlaceholder {
            template: name.to_string(),
            placeholder,
        });
    }
    Ok(out)
}

/// Formats the rendered server source. The failure path keeps the raw
/// buffer: a template bug usually shows up here first, and the syn error
/// alone does not say what was rendered.
pub fn format_server(source: String) -> Result<String, TemplateError> {
    match syn::parse_file(&source) {
        Ok(tree) => Ok(prettyplease::unparse(&tree)),
        Err(source_err) => Err(TemplateError::Format {
            source: source_err,
            unformatted: source,
        }),
    }
}
