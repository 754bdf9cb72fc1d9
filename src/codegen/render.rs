//! Renders the Rust source blocks spliced into the server template.
//!
//! The template owns the file skeleton (imports, main, the stub-lookup
//! helper); this module renders the parts that vary per descriptor set:
//! module declarations, service impls, and server registrations. The
//! assembled file goes through the formatting pass afterwards, so the
//! blocks only have to be syntactically valid, not pretty.

use std::fmt::Write;

use super::names::to_snake_case;
use super::services::{Method, MethodKind, PbModule, Service};

/// One `include_proto` module per distinct output namespace.
pub fn modules(modules: &[PbModule]) -> String {
    let mut out = String::new();
    for module in modules {
        let _ = writeln!(out, "pub mod {} {{", module.alias);
        let _ = writeln!(out, "    tonic::include_proto!(\"{}\");", module.proto_package);
        let _ = writeln!(out, "}}");
    }
    out
}

/// Mock struct plus trait impl for every service.
pub fn services(services: &[Service]) -> String {
    let mut out = String::new();
    for svc in services {
        let _ = writeln!(out, "#[derive(Default)]");
        let _ = writeln!(out, "pub struct {}Mock;", svc.name);
        let _ = writeln!(out);
        let _ = writeln!(out, "#[tonic::async_trait]");
        let _ = writeln!(
            out,
            "impl {}::{}_server::{} for {}Mock {{",
            svc.alias,
            to_snake_case(&svc.name),
            svc.name,
            svc.name
        );
        for method in &svc.methods {
            out.push_str(&render_method(svc, method));
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }
    out
}

/// `.add_service(...)` chain for the server builder.
pub fn registrations(services: &[Service]) -> String {
    let mut out = String::new();
    for svc in services {
        let _ = writeln!(
            out,
            ".add_service({}::{}_server::{}Server::new({}Mock::default()))",
            svc.alias,
            to_snake_case(&svc.name),
            svc.name,
            svc.name
        );
    }
    out
}

/// The name clients address the service by on the wire.
fn grpc_service_name(svc: &Service) -> String {
    if svc.proto_package.is_empty() {
        svc.name.clone()
    } else {
        format!("{}.{}", svc.proto_package, svc.name)
    }
}

fn render_method(svc: &Service, method: &Method) -> String {
    let fn_name = to_snake_case(&method.name);
    let service = grpc_service_name(svc);
    let input = &method.input;
    let output = &method.output;
    let name = &method.name;

    match method.kind {
        MethodKind::Unary => format!(
            r#"
    async fn {fn_name}(
        &self,
        request: tonic::Request<{input}>,
    ) -> Result<tonic::Response<{output}>, tonic::Status> {{
        let input = stub::encode_input(request.into_inner())?;
        let payload = stub::find("{service}", "{name}", input).await?;
        Ok(tonic::Response::new(stub::decode_output(payload)?))
    }}
"#
        ),
        MethodKind::ServerStream => format!(
            r#"
    type {name}Stream = std::pin::Pin<
        Box<dyn tokio_stream::Stream<Item = Result<{output}, tonic::Status>> + Send>,
    >;

    async fn {fn_name}(
        &self,
        request: tonic::Request<{input}>,
    ) -> Result<tonic::Response<Self::{name}Stream>, tonic::Status> {{
        let input = stub::encode_input(request.into_inner())?;
        let payload = stub::find("{service}", "{name}", input).await?;
        let reply: {output} = stub::decode_output(payload)?;
        Ok(tonic::Response::new(Box::pin(tokio_stream::once(Ok(reply)))))
    }}
"#
        ),
        MethodKind::ClientStream => format!(
            r#"
    async fn {fn_name}(
        &self,
        request: tonic::Request<tonic::Streaming<{input}>>,
    ) -> Result<tonic::Response<{output}>, tonic::Status> {{
        let mut messages = request.into_inner();
        let mut last = None;
        while let Some(message) = messages.message().await? {{
            last = Some(message);
        }}
        let last = last.ok_or_else(|| tonic::Status::invalid_argument("empty request stream"))?;
        let input = stub::encode_input(last)?;
        let payload = stub::find("{service}", "{name}", input).await?;
        Ok(tonic::Response::new(stub::decode_output(payload)?))
    }}
"#
        ),
        MethodKind::Bidirectional => format!(
            r#"
    type {name}Stream = std::pin::Pin<
        Box<dyn tokio_stream::Stream<Item = Result<{output}, tonic::Status>> + Send>,
    >;

    async fn {fn_name}(
        &self,
        request: tonic::Request<tonic::Streaming<{input}>>,
    ) -> Result<tonic::Response<Self::{name}Stream>, tonic::Status> {{
        let mut messages = request.into_inner();
        let message = messages
            .message()
            .await?
            .ok_or_else(|| tonic::Status::invalid_argument("empty request stream"))?;
        let input = stub::encode_input(message)?;
        let payload = stub::find("{service}", "{name}", input).await?;
        let reply: {output} = stub::decode_output(payload)?;
        Ok(tonic::Response::new(Box::pin(tokio_stream::once(Ok(reply)))))
    }}
"#
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(kind: MethodKind) -> Service {
        Service {
            name: "Greeter".to_string(),
            proto_package: "simple".to_string(),
            alias: "generated".to_string(),
            methods: vec![Method {
                name: "SayHello".to_string(),
                kind,
                input: "generated::Request".to_string(),
                output: "generated::Reply".to_string(),
            }],
        }
    }

    #[test]
    fn module_block() {
        let out = modules(&[PbModule {
            alias: "generated".into(),
            proto_package: "simple".into(),
        }]);
        assert!(out.contains("pub mod generated {"));
        assert!(out.contains("tonic::include_proto!(\"simple\");"));
    }

    #[test]
    fn unary_method_forwards_to_stub() {
        let out = services(&[service(MethodKind::Unary)]);
        assert!(out.contains("impl generated::greeter_server::Greeter for GreeterMock"));
        assert!(out.contains("async fn say_hello("));
        assert!(out.contains("stub::find(\"simple.Greeter\", \"SayHello\", input)"));
        assert!(!out.contains("Stream"));
    }

    #[test]
    fn server_stream_declares_stream_type() {
        let out = services(&[service(MethodKind::ServerStream)]);
        assert!(out.contains("type SayHelloStream"));
        assert!(out.contains("tonic::Request<generated::Request>"));
    }

    #[test]
    fn client_stream_takes_streaming_input() {
        let out = services(&[service(MethodKind::ClientStream)]);
        assert!(out.contains("tonic::Streaming<generated::Request>"));
        assert!(!out.contains("type SayHelloStream"));
    }

    #[test]
    fn bidirectional_has_both() {
        let out = services(&[service(MethodKind::Bidirectional)]);
        assert!(out.contains("type SayHelloStream"));
        assert!(out.contains("tonic::Streaming<generated::Request>"));
    }

    #[test]
    fn registration_chain() {
        let out = registrations(&[service(MethodKind::Unary)]);
        assert!(out.contains(
            ".add_service(generated::greeter_server::GreeterServer::new(GreeterMock::default()))"
        ));
    }

    #[test]
    fn packageless_service_uses_bare_name() {
        let mut svc = service(MethodKind::Unary);
        svc.proto_package = String::new();
        let out = services(&[svc]);
        assert!(out.contains("stub::find(\"Greeter\", \"SayHello\", input)"));
    }
}
