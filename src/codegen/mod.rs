//! Server code generation from parsed file descriptors.
//!
//! The generator consumes the descriptor set protoc hands the plugin and
//! renders the generated server package: `src/main.rs` from the server
//! template (formatted), plus `Cargo.toml` and `build.rs` from the manifest
//! templates (emitted verbatim). Artifacts go through the [`FileSink`]
//! abstraction so the generator can be exercised without a live protoc
//! process on the other end.

pub mod names;
mod render;
pub mod services;
pub mod templates;

use std::path::PathBuf;

use anyhow::{Context, Result};
use prost_types::FileDescriptorProto;
use tracing::debug;

pub use names::AliasTable;
pub use services::{Method, MethodKind, Service};
pub use templates::TemplateError;

use crate::GENERATED_CRATE_NAME;

/// Destination for generated artifacts. The plugin binary routes these into
/// the CodeGeneratorResponse; tests capture them in memory.
pub trait FileSink {
    fn add_generated_file(&mut self, name: &str, content: &[u8]) -> Result<()>;
}

/// In-memory sink for exercising the generator in isolation.
#[derive(Debug, Default)]
pub struct CaptureSink {
    pub files: Vec<(String, Vec<u8>)>,
}

impl CaptureSink {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, content)| content.as_slice())
    }
}

impl FileSink for CaptureSink {
    fn add_generated_file(&mut self, name: &str, content: &[u8]) -> Result<()> {
        self.files.push((name.to_string(), content.to_vec()));
        Ok(())
    }
}

/// Generation parameters, immutable once constructed. Carried over from the
/// protoc plugin parameter string.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// `host:port` the generated server binds.
    pub grpc_addr: String,
    /// Port of the admin/matching service the server queries for stubs.
    pub admin_port: String,
    /// Template override directory; compiled-in templates when unset.
    pub template_dir: Option<PathBuf>,
    /// The protos being generated, relative to the output tree. Dependency
    /// descriptors in the request are not in this list.
    pub proto_files: Vec<String>,
}

/// Renders the generated server package into `sink`.
pub fn generate_server(
    sink: &mut dyn FileSink,
    protos: &[FileDescriptorProto],
    opts: &Options,
) -> Result<()> {
    let mut aliases = AliasTable::default();
    let services = services::extract_services(protos, &mut aliases)?;
    let modules = services::collect_modules(protos, &opts.proto_files, &mut aliases)?;
    debug!(
        services = services.len(),
        modules = modules.len(),
        "rendering server"
    );

    let dir = opts.template_dir.as_deref();

    let template = templates::load(dir, templates::SERVER_TEMPLATE_NAME)?;
    let rendered = templates::render(
        templates::SERVER_TEMPLATE_NAME,
        &template,
        &[
            ("grpc_addr", opts.grpc_addr.as_str()),
            ("admin_port", opts.admin_port.as_str()),
            ("pb_modules", &render::modules(&modules)),
            ("services", &render::services(&services)),
            ("registrations", &render::registrations(&services)),
        ],
    )?;
    let formatted = templates::format_server(rendered)?;
    sink.add_generated_file("src/main.rs", formatted.as_bytes())
        .context("emitting src/main.rs")?;

    let template = templates::load(dir, templates::MANIFEST_TEMPLATE_NAME)?;
    let manifest = templates::render(
        templates::MANIFEST_TEMPLATE_NAME,
        &template,
        &[("package_name", GENERATED_CRATE_NAME)],
    )?;
    sink.add_generated_file("Cargo.toml", manifest.as_bytes())
        .context("emitting Cargo.toml")?;

    let template = templates::load(dir, templates::BUILD_SCRIPT_TEMPLATE_NAME)?;
    let proto_list = opts
        .proto_files
        .iter()
        .map(|p| format!("\"{p}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let build_script = templates::render(
        templates::BUILD_SCRIPT_TEMPLATE_NAME,
        &template,
        &[("proto_files", proto_list.as_str())],
    )?;
    sink.add_generated_file("build.rs", build_script.as_bytes())
        .context("emitting build.rs")?;

    Ok(())
}
