//! Protocol compilation, server build, and child-process supervision.
//!
//! Stage order: invoke protoc over the rewritten protos with the grpcmock
//! plugin registered, build the generated package with cargo, then run the
//! resulting binary under supervision until it exits or the orchestrator is
//! told to stop. The supervision protocol is deliberately rigid: a single
//! waiter task owns the child and reports its exit status through a oneshot
//! written exactly once; the control loop selects between that notification
//! and the shutdown future. Kill requests travel through a second oneshot
//! into the waiter, which forwards the kill and still reports the exit
//! through the same channel, so double-exit races cannot happen.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::GENERATED_CRATE_NAME;

/// Everything the protoc invocation needs.
#[derive(Debug, Clone)]
pub struct ProtocParams {
    /// Output tree holding the rewritten protos; also protoc's first
    /// search path so rewritten files shadow any same-named original.
    pub output: PathBuf,
    /// User-configured import directories, appended after the output tree.
    pub imports: Vec<PathBuf>,
    /// Rewritten proto files, relative to the output tree.
    pub proto_files: Vec<PathBuf>,
    pub grpc_addr: String,
    pub grpc_port: String,
    pub admin_port: String,
    pub template_dir: Option<PathBuf>,
}

/// Assembles the full protoc argv: the output tree as the first search
/// path, user imports after it, the rewritten protos as positionals, then
/// the plugin registration and the output options.
fn protoc_args(params: &ProtocParams, plugin: Option<&Path>) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.push("-I".to_string());
    args.push(params.output.display().to_string());
    for import in &params.imports {
        args.push("-I".to_string());
        args.push(import.display().to_string());
    }
    for proto in &params.proto_files {
        args.push(proto.display().to_string());
    }
    if let Some(plugin) = plugin {
        args.push(format!("--plugin=protoc-gen-grpcmock={}", plugin.display()));
    }
    args.push(format!("--grpcmock_out={}", params.output.display()));
    let template_dir = params
        .template_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    args.push(format!(
        "--grpcmock_opt=admin-port={},grpc-address={},grpc-port={},template-dir={}",
        params.admin_port, params.grpc_addr, params.grpc_port, template_dir
    ));
    args
}

/// Runs protoc with the grpcmock plugin to emit the server package into the
/// output tree.
pub async fn compile_protocol(params: &ProtocParams) -> Result<()> {
    let args = protoc_args(params, sibling_plugin().as_deref());

    info!(?args, "invoking protoc");
    let status = Command::new("protoc")
        .args(&args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .context("spawning protoc (is it installed and on PATH?)")?;
    if !status.success() {
        bail!("protoc exited with {status}");
    }
    info!("generated protocol");
    Ok(())
}

/// Prefer the plugin binary installed next to the orchestrator; fall back
/// to whatever `protoc-gen-grpcmock` protoc finds on PATH.
fn sibling_plugin() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join("protoc-gen-grpcmock");
    if candidate.is_file() {
        Some(candidate)
    } else {
        debug!("no sibling protoc-gen-grpcmock, relying on PATH");
        None
    }
}

/// Compiles the generated package to a single executable and returns its
/// path.
pub async fn build_server(output: &Path) -> Result<PathBuf> {
    // The generator stamps the reserved package name into the manifest;
    // refuse to build anything else out of the output tree.
    let manifest_path = output.join("Cargo.toml");
    let manifest = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("reading {}", manifest_path.display()))?;
    if !manifest.contains(&format!("name = \"{GENERATED_CRATE_NAME}\"")) {
        bail!(
            "{} does not declare the generated package name {GENERATED_CRATE_NAME}",
            manifest_path.display()
        );
    }

    info!("resolving server dependencies");
    run_cargo(output, &["fetch"]).await?;
    info!("building server");
    run_cargo(output, &["build", "--release"]).await?;

    let binary = output
        .join("target")
        .join("release")
        .join(GENERATED_CRATE_NAME);
    if !binary.is_file() {
        bail!("expected server binary at {}", binary.display());
    }
    info!(binary = %binary.display(), "built server");
    Ok(binary)
}

async fn run_cargo(dir: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("cargo")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("spawning cargo {}", args.join(" ")))?;
    if !status.success() {
        bail!("cargo {} exited with {status}", args.join(" "));
    }
    Ok(())
}

/// Terminal state of a supervised server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The child exited on its own with this code.
    Exited(i32),
    /// The child was terminated by a signal it received directly.
    Signaled,
    /// The orchestrator killed the child after a shutdown request and the
    /// child's wait completed.
    Stopped,
}

/// A running generated server plus the channels used to observe it.
pub struct ServerProcess {
    exit_rx: oneshot::Receiver<std::io::Result<std::process::ExitStatus>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Starts the server binary with inherited stdio and spawns its waiter
/// task.
pub fn spawn_server(binary: &Path) -> Result<ServerProcess> {
    let mut child = Command::new(binary)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("starting server {}", binary.display()))?;
    info!(pid = child.id(), "grpc server started");

    let (exit_tx, exit_rx) = oneshot::channel();
    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                let _ = exit_tx.send(status);
            }
            _ = kill_rx => {
                if let Err(e) = child.start_kill() {
                    warn!("failed to kill server: {e}");
                }
                let _ = exit_tx.send(child.wait().await);
            }
        }
    });

    Ok(ServerProcess {
        exit_rx,
        kill_tx: Some(kill_tx),
    })
}

impl ServerProcess {
    /// Blocks until the child exits or `shutdown` resolves, whichever is
    /// first. On shutdown, the child is killed and its wait is still
    /// awaited before returning.
    pub async fn supervise(mut self, shutdown: impl Future<Output = ()>) -> Result<RunOutcome> {
        tokio::pin!(shutdown);
        tokio::select! {
            status = &mut self.exit_rx => {
                let status = status
                    .context("server waiter task dropped")?
                    .context("waiting for server")?;
                Ok(match status.code() {
                    Some(code) => RunOutcome::Exited(code),
                    None => RunOutcome::Signaled,
                })
            }
            _ = &mut shutdown => {
                info!("stopping grpc server");
                if let Some(kill_tx) = self.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
                let status = self
                    .exit_rx
                    .await
                    .context("server waiter task dropped")?
                    .context("waiting for killed server")?;
                debug!(?status, "server stopped");
                Ok(RunOutcome::Stopped)
            }
        }
    }
}
