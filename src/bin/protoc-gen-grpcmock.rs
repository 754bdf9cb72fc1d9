//! protoc plugin entry point.
//!
//! protoc passes a serialized CodeGeneratorRequest on stdin and expects a
//! serialized CodeGeneratorResponse on stdout. Generation failures are
//! reported through the response's error field so protoc can print them;
//! only I/O and decode failures abort the process itself.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use prost::Message;
use prost_types::compiler::code_generator_response::{Feature, File};
use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};

use grpcmock::codegen::{self, FileSink};

fn main() -> Result<()> {
    // stdout carries the response, so diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_max_level(tracing::level_filters::LevelFilter::WARN)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut buf = Vec::new();
    io::stdin()
        .read_to_end(&mut buf)
        .context("reading CodeGeneratorRequest from stdin")?;
    let request = CodeGeneratorRequest::decode(buf.as_slice())
        .context("decoding CodeGeneratorRequest (run this as a protoc plugin)")?;

    let response = respond(&request);

    let mut out = Vec::new();
    response
        .encode(&mut out)
        .context("encoding CodeGeneratorResponse")?;
    io::stdout()
        .write_all(&out)
        .context("writing CodeGeneratorResponse to stdout")?;
    Ok(())
}

fn respond(request: &CodeGeneratorRequest) -> CodeGeneratorResponse {
    let opts = options_from_parameter(request.parameter(), &request.file_to_generate);
    let mut sink = PluginSink::default();
    match codegen::generate_server(&mut sink, &request.proto_file, &opts) {
        Ok(()) => CodeGeneratorResponse {
            file: sink.files,
            // Declaring optional-field support is required for protoc to
            // invoke the plugin on protos using proto3 optional at all; the
            // generator itself does nothing special for it.
            supported_features: Some(Feature::Proto3Optional as u64),
            ..Default::default()
        },
        Err(e) => CodeGeneratorResponse {
            error: Some(format!("{e:#}")),
            supported_features: Some(Feature::Proto3Optional as u64),
            ..Default::default()
        },
    }
}

/// The plugin parameter is a single comma-separated `key=value` string,
/// split naively on the first `=` of each element.
fn parse_parameter(parameter: &str) -> HashMap<String, String> {
    parameter
        .split(',')
        .filter(|kv| !kv.is_empty())
        .map(|kv| match kv.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (kv.to_string(), String::new()),
        })
        .collect()
}

fn options_from_parameter(parameter: &str, to_generate: &[String]) -> codegen::Options {
    let params = parse_parameter(parameter);
    let get = |key: &str| params.get(key).cloned().unwrap_or_default();

    let address = match get("grpc-address") {
        addr if addr.is_empty() => "127.0.0.1".to_string(),
        addr => addr,
    };
    let port = match get("grpc-port") {
        port if port.is_empty() => "4770".to_string(),
        port => port,
    };
    let template_dir = match get("template-dir") {
        dir if dir.is_empty() => None,
        dir => Some(PathBuf::from(dir)),
    };

    codegen::Options {
        grpc_addr: format!("{address}:{port}"),
        admin_port: get("admin-port"),
        template_dir,
        proto_files: to_generate.to_vec(),
    }
}

/// Routes generated artifacts into the CodeGeneratorResponse.
#[derive(Debug, Default)]
struct PluginSink {
    files: Vec<File>,
}

impl FileSink for PluginSink {
    fn add_generated_file(&mut self, name: &str, content: &[u8]) -> Result<()> {
        let content = std::str::from_utf8(content)
            .with_context(|| format!("generated file {name} is not UTF-8"))?
            .to_string();
        self.files.push(File {
            name: Some(name.to_string()),
            content: Some(content),
            ..Default::default()
        });
        Ok(())
    }
}
