//! grpcmock orchestrator binary.
//!
//! Resolves the requested protos, rewrites them into the output tree, runs
//! protoc with the grpcmock plugin, builds the generated server, and
//! supervises it until it exits or we are told to stop.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};

use grpcmock::runner::{self, ProtocParams, RunOutcome};
use grpcmock::{exit, resolve, rewrite, Stage, StageError};

#[derive(Parser, Debug)]
#[command(name = "grpcmock")]
#[command(about = "Generate, build, and run a mock gRPC server from .proto files", long_about = None)]
struct Cli {
    /// Proto files declaring the services to mock
    #[arg(required = true, value_name = "PROTO")]
    protos: Vec<String>,

    /// Directory for rewritten protos, generated sources, and the server binary
    #[arg(short = 'o', long, default_value = "generated")]
    output: PathBuf,

    /// Directory with server.rs.tmpl and friends, overriding the compiled-in templates
    #[arg(long)]
    template_dir: Option<PathBuf>,

    /// Port of the gRPC tcp server
    #[arg(long, default_value = "4770")]
    grpc_port: String,

    /// Address the gRPC server binds. Defaults to localhost; set 0.0.0.0 to
    /// reach it from another machine
    #[arg(long, default_value = "")]
    grpc_listen: String,

    /// Port of the stub admin server
    #[arg(long, default_value = "4771")]
    admin_port: String,

    /// Address the admin server binds
    #[arg(long, default_value = "")]
    admin_listen: String,

    /// Directory holding stub files for the admin service
    #[arg(long)]
    stub: Option<PathBuf>,

    /// Comma-separated import paths to search for dependency protos
    #[arg(long, value_delimiter = ',')]
    imports: Vec<PathBuf>,

    /// Verbosity: 0=error, 1=warn, 2=info, 3=debug, 4=trace
    #[arg(short = 'v', long, default_value_t = 2)]
    verbose: u8,
}

fn main() {
    let mut args: Vec<String> = std::env::args().collect();
    // Legacy invocation form: the program's own name repeated as the first
    // argument. Discard the duplicate.
    if args.get(1).map(String::as_str) == Some("grpcmock") {
        args.remove(1);
    }
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    if cli.output.as_os_str().is_empty() {
        error!("output directory must not be empty");
        std::process::exit(exit::USAGE);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("starting runtime: {e}");
            std::process::exit(exit::FAILURE);
        }
    };
    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            e.stage.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, StageError> {
    info!("starting grpcmock");

    std::fs::create_dir_all(&cli.output)
        .map_err(|e| StageError::new(Stage::Rewrite, anyhow::Error::new(e).context("creating output directory")))?;

    let resolved = resolve::resolve_all(&cli.imports, &cli.protos)
        .map_err(|e| StageError::new(Stage::Resolve, e.into()))?;
    let rewritten = rewrite::rewrite_protos(&resolved, &cli.output)
        .map_err(|e| StageError::new(Stage::Rewrite, e))?;

    let params = ProtocParams {
        output: cli.output.clone(),
        imports: cli.imports.clone(),
        proto_files: rewritten.iter().map(|r| r.rel_path.clone()).collect(),
        grpc_addr: cli.grpc_listen.clone(),
        grpc_port: cli.grpc_port.clone(),
        admin_port: cli.admin_port.clone(),
        template_dir: cli.template_dir.clone(),
    };
    runner::compile_protocol(&params)
        .await
        .map_err(|e| StageError::new(Stage::CompileProtocol, e))?;

    let binary = runner::build_server(&cli.output)
        .await
        .map_err(|e| StageError::new(Stage::BuildBinary, e))?;

    if let Some(stub) = &cli.stub {
        info!(
            stub = %stub.display(),
            admin_port = %cli.admin_port,
            admin_listen = %cli.admin_listen,
            "stubs are served by the admin service; make sure it is running"
        );
    }

    let server = runner::spawn_server(&binary).map_err(|e| StageError::new(Stage::Run, e))?;
    let outcome = server
        .supervise(termination_signal())
        .await
        .map_err(|e| StageError::new(Stage::Run, e))?;

    Ok(match outcome {
        RunOutcome::Exited(0) => {
            info!("server exited cleanly");
            exit::SUCCESS
        }
        RunOutcome::Exited(code) => {
            error!("server exited with code {code}");
            exit::RUNTIME
        }
        RunOutcome::Signaled => {
            error!("server terminated by a signal");
            exit::RUNTIME
        }
        RunOutcome::Stopped => exit::SUCCESS,
    })
}

fn init_logging(verbosity: u8) {
    use tracing::level_filters::LevelFilter;
    let level = match verbosity {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let term = signal(SignalKind::terminate());
    let int = signal(SignalKind::interrupt());
    match (term, int) {
        (Ok(mut term), Ok(mut int)) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
        }
        _ => {
            warn!("could not install signal handlers; falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
