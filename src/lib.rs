//! grpcmock turns a set of `.proto` files into a running mock gRPC server.
//!
//! The pipeline resolves each requested proto against the import search
//! path, rewrites its output-namespace directive so generated code lands in
//! an isolated module tree, invokes `protoc` with the bundled
//! `protoc-gen-grpcmock` plugin to emit a tonic server implementation, then
//! compiles and supervises that server as a child process. Response stubs
//! are served by the separate admin/matching service that the generated
//! server queries at call time.

use std::fmt;

pub mod codegen;
pub mod resolve;
pub mod rewrite;
pub mod runner;

/// Namespace root for rewritten protos. The generated module path for each
/// proto is this root joined with the proto's resolved relative subpath, so
/// it can never collide with a namespace the proto's author declared.
pub const GENERATED_MODULE_ROOT: &str = "grpcmock/generated";

/// Package name stamped into the generated server's manifest. Reserved so it
/// cannot collide with anything cargo might fetch from a registry.
pub const GENERATED_CRATE_NAME: &str = "grpcmock-generated-server";

/// Process exit codes for the orchestrator binary.
pub mod exit {
    /// Clean run, including a clean child shutdown.
    pub const SUCCESS: i32 = 0;
    /// Generic failure not tied to a pipeline stage.
    pub const FAILURE: i32 = 1;
    /// Malformed command-line input. Matches clap's own usage-error code.
    pub const USAGE: i32 = 2;
    /// Resolution, rewriting, protoc invocation, or compilation failed.
    pub const BUILD: i32 = 3;
    /// The generated server exited non-zero.
    pub const RUNTIME: i32 = 4;
}

/// Pipeline stage, used to classify failures into exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Rewrite,
    CompileProtocol,
    BuildBinary,
    Run,
}

impl Stage {
    pub fn exit_code(self) -> i32 {
        match self {
            Stage::Run => exit::RUNTIME,
            _ => exit::BUILD,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolving protos",
            Stage::Rewrite => "rewriting protos",
            Stage::CompileProtocol => "compiling protocol",
            Stage::BuildBinary => "building server binary",
            Stage::Run => "running server",
        };
        f.write_str(name)
    }
}

/// A failure tagged with the pipeline stage it happened in.
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub source: anyhow::Error,
}

impl StageError {
    pub fn new(stage: Stage, source: anyhow::Error) -> Self {
        Self { stage, source }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "while {}: {:#}", self.stage, self.source)
    }
}

impl std::error::Error for StageError {}
