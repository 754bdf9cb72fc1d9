//! Extraction of service and method metadata from parsed descriptors.

use anyhow::{bail, Result};
use prost_types::FileDescriptorProto;

use super::names::AliasTable;

/// Streaming shape of a method, classified from the two independent
/// streaming flags on its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Unary,
    ServerStream,
    ClientStream,
    Bidirectional,
}

impl MethodKind {
    pub fn classify(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => MethodKind::Unary,
            (false, true) => MethodKind::ServerStream,
            (true, false) => MethodKind::ClientStream,
            (true, true) => MethodKind::Bidirectional,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub kind: MethodKind,
    /// Alias-qualified input type, e.g. `simple::Request`.
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    /// The proto package declaring the service, as clients address it on
    /// the wire (`package.Service/Method`).
    pub proto_package: String,
    /// Module alias the service's generated types live under.
    pub alias: String,
    pub methods: Vec<Method>,
}

/// One generated module per distinct output namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbModule {
    pub alias: String,
    pub proto_package: String,
}

/// Walks every file descriptor and pulls out the services to mock,
/// assigning namespace aliases as files are first seen.
pub fn extract_services(
    protos: &[FileDescriptorProto],
    aliases: &mut AliasTable,
) -> Result<Vec<Service>> {
    let mut services = Vec::new();
    for proto in protos {
        for svc in &proto.service {
            let alias = file_alias(proto, aliases)?;
            let mut methods = Vec::with_capacity(svc.method.len());
            for method in &svc.method {
                methods.push(Method {
                    name: method.name().to_string(),
                    kind: MethodKind::classify(method.client_streaming(), method.server_streaming()),
                    input: resolve_message_type(protos, aliases, method.input_type())?,
                    output: resolve_message_type(protos, aliases, method.output_type())?,
                });
            }
            services.push(Service {
                name: svc.name().to_string(),
                proto_package: proto.package().to_string(),
                alias,
                methods,
            });
        }
    }
    Ok(services)
}

/// Collects the distinct generated modules the server must declare, one per
/// namespace, in first-seen file order. Covers every file on the generate
/// list plus every dependency file whose alias a type reference pulled into
/// the table, so each alias-qualified type has its module. Call after
/// [`extract_services`] so those aliases are already assigned.
pub fn collect_modules(
    protos: &[FileDescriptorProto],
    to_generate: &[String],
    aliases: &mut AliasTable,
) -> Result<Vec<PbModule>> {
    let mut modules: Vec<PbModule> = Vec::new();
    for proto in protos {
        let listed = to_generate.iter().any(|name| name == proto.name());
        let referenced = proto
            .options
            .as_ref()
            .is_some_and(|opts| aliases.get(opts.go_package()).is_some());
        if !listed && !referenced {
            continue;
        }
        let alias = file_alias(proto, aliases)?;
        let module = PbModule {
            alias,
            proto_package: proto.package().to_string(),
        };
        if !modules.contains(&module) {
            modules.push(module);
        }
    }
    Ok(modules)
}

fn file_alias(proto: &FileDescriptorProto, aliases: &mut AliasTable) -> Result<String> {
    let namespace = proto
        .options
        .as_ref()
        .map(|opts| opts.go_package())
        .unwrap_or_default();
    if namespace.is_empty() {
        // Every proto on the generate list went through the rewriter, so a
        // missing namespace means the pipeline is broken upstream.
        bail!("proto {:?} has no output namespace option", proto.name());
    }
    Ok(aliases.alias_for(namespace))
}

/// Resolves a fully qualified type reference like `.simple.Request` to its
/// alias-qualified generated name by searching every known descriptor for a
/// message of that name in the declaring package. A type not declared in
/// any known file is assumed to be externally defined and is referenced by
/// its bare name.
fn resolve_message_type(
    protos: &[FileDescriptorProto],
    aliases: &mut AliasTable,
    type_ref: &str,
) -> Result<String> {
    let full = type_ref.trim_start_matches('.');
    let (target_package, target_type) = match full.rsplit_once('.') {
        Some((pkg, ty)) => (pkg, ty),
        None => ("", full),
    };

    for proto in protos {
        if proto.package() != target_package {
            continue;
        }
        for message in &proto.message_type {
            if message.name() == target_type {
                let alias = file_alias(proto, aliases)?;
                return Ok(format!("{alias}::{target_type}"));
            }
        }
    }
    Ok(target_type.to_string())
}
