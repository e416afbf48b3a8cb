use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::{Channel, Endpoint};
use tracing_subscriber::EnvFilter;

use job_worker::auth::UserTable;
use job_worker::config::{ServerConfig, TlsConfig};
use job_worker::grpc::GrpcServer;
use job_worker::proto::job_service_client::JobServiceClient;
use job_worker::proto::{
    CreateJobRequest, GetJobStatusRequest, JobInfo, JobStatus, StopJobRequest,
};
use job_worker::shutdown::install_shutdown_handler;
use job_worker::tls::TlsIdentity;
use job_worker::worker::JobWorker;

#[derive(Parser, Debug)]
#[command(name = "job-worker")]
#[command(version)]
#[command(about = "Run and manage remote jobs over an mTLS gRPC API")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the job-worker API server
    Server(ServerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on for gRPC
    #[arg(long, short = 'p', default_value = "8443")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// JSON file mapping user names to permissions
    /// Example: {"alice": ["READ_ONLY", "READ_WRITE"]}
    #[arg(long)]
    users: Option<PathBuf>,

    // === TLS Options ===
    /// Enable mTLS for the API
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate (PEM format)
    #[arg(long, requires = "tls")]
    ca_cert: Option<PathBuf>,

    /// Path to server certificate (PEM format)
    #[arg(long, requires = "tls")]
    cert: Option<PathBuf>,

    /// Path to server private key (PEM format)
    #[arg(long, requires = "tls")]
    key: Option<PathBuf>,

    /// Allow running without TLS even when --tls is specified but certs are missing.
    /// Useful for development. NOT recommended for production.
    #[arg(long)]
    allow_insecure: bool,

    /// Treat every plaintext caller as this user (development only)
    #[arg(long, requires = "allow_insecure")]
    insecure_user: Option<String>,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address (use https:// for TLS)
    #[arg(long, short = 'a', default_value = "https://localhost:8443")]
    addr: String,

    /// Path to CA certificate (PEM format) for TLS
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (PEM format) for mTLS
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to client private key (PEM format) for mTLS
    #[arg(long)]
    key: Option<PathBuf>,

    /// Name expected in the server certificate
    #[arg(long, default_value = "localhost")]
    tls_domain: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Start a new job
    Create {
        /// Executable to run (resolved through PATH)
        command: String,

        /// Arguments passed to the executable
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Force-stop a running job
    Stop {
        /// The job ID
        job_id: String,
    },
    /// Get status and output of a job
    Status {
        /// The job ID
        job_id: String,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RequestOutput {
    command: String,
    args: Vec<String>,
}

#[derive(Serialize)]
struct JobOutput {
    id: String,
    status: String,
    output: String,
    request: RequestOutput,
    error: Option<String>,
    exit_code: Option<i32>,
    created_at_ms: i64,
    finished_at_ms: Option<i64>,
}

#[derive(Serialize)]
struct StopOutput {
    message: String,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn job_status_to_string(status: i32) -> String {
    match JobStatus::try_from(status) {
        Ok(JobStatus::Running) => "RUNNING".to_string(),
        Ok(JobStatus::Exited) => "EXITED".to_string(),
        _ => "UNKNOWN".to_string(),
    }
}

impl From<JobInfo> for JobOutput {
    fn from(job: JobInfo) -> Self {
        let request = job.request.unwrap_or_default();
        Self {
            id: job.job_id,
            status: job_status_to_string(job.status),
            output: job.output,
            request: RequestOutput {
                command: request.command,
                args: request.args,
            },
            error: job.error,
            exit_code: job.exit_code,
            created_at_ms: job.created_at_ms,
            finished_at_ms: job.finished_at_ms,
        }
    }
}

async fn create_client_channel(args: &ClientArgs) -> Result<Channel, Box<dyn std::error::Error>> {
    let endpoint = Endpoint::from_shared(args.addr.clone())?;

    let tls_config = TlsConfig {
        enabled: true,
        ca_cert_path: args.ca_cert.clone(),
        cert_path: args.cert.clone(),
        key_path: args.key.clone(),
        allow_insecure: false,
    };

    if tls_config.is_complete() {
        let identity = TlsIdentity::load(&tls_config).await?;
        let tls = identity.client_tls_config(args.tls_domain.clone());
        Ok(endpoint.tls_config(tls)?.connect().await?)
    } else if args.addr.starts_with("https://")
        || args.ca_cert.is_some()
        || args.cert.is_some()
        || args.key.is_some()
    {
        Err("mTLS requires --ca-cert, --cert and --key".into())
    } else {
        Ok(endpoint.connect().await?)
    }
}

fn exit_with_status(status: tonic::Status) -> ! {
    eprintln!("Error: {}", status.message());
    std::process::exit(1);
}

fn print_job(job: JobInfo, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let job = JobOutput::from(job);
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        OutputFormat::Table => {
            println!("Job ID:    {}", job.id);
            println!("Status:    {}", job.status);
            println!(
                "Command:   {} {}",
                job.request.command,
                job.request.args.join(" ")
            );
            if let Some(exit_code) = job.exit_code {
                println!("Exit Code: {}", exit_code);
            }
            if let Some(ref error) = job.error {
                println!("Error:     {}", error);
            }
            if !job.output.is_empty() {
                println!("Output:");
                for line in job.output.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let tls_config = TlsConfig {
        enabled: args.tls,
        ca_cert_path: args.ca_cert,
        cert_path: args.cert,
        key_path: args.key,
        allow_insecure: args.allow_insecure,
    };

    let tls_identity = if tls_config.is_complete() {
        match TlsIdentity::load(&tls_config).await {
            Ok(identity) => {
                tracing::info!("TLS enabled with mTLS authentication");
                Some(identity)
            }
            Err(e) => {
                if tls_config.allow_insecure {
                    tracing::warn!(
                        error = %e,
                        "TLS certificate loading failed, running in insecure mode"
                    );
                    None
                } else {
                    return Err(format!("TLS certificate loading failed: {}", e).into());
                }
            }
        }
    } else if tls_config.enabled {
        if tls_config.allow_insecure {
            tracing::warn!(
                "TLS enabled but certificate paths incomplete, running in insecure mode"
            );
            None
        } else {
            return Err("TLS enabled but missing required paths (--ca-cert, --cert, --key)".into());
        }
    } else if tls_config.allow_insecure {
        None
    } else {
        return Err("refusing to serve without TLS; pass --tls or --allow-insecure".into());
    };

    let users = match args.users {
        Some(ref path) => {
            let users = UserTable::load(path).await?;
            tracing::info!(path = %path.display(), users = users.len(), "Loaded user table");
            users
        }
        None => UserTable::default(),
    };

    let listen_addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let mut config = ServerConfig::new(listen_addr);
    if let Some(user) = args.insecure_user {
        config = config.with_insecure_user(user);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        tls_enabled = tls_identity.is_some(),
        "Starting job-worker server"
    );

    let shutdown = install_shutdown_handler()?;
    let worker = Arc::new(JobWorker::new());
    let server = GrpcServer::new(config, worker, users, tls_identity);
    server.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_create(
    client: &mut JobServiceClient<Channel>,
    command: String,
    args: Vec<String>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = match client
        .create_job(CreateJobRequest { command, args })
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) => exit_with_status(status),
    };
    print_job(job, output_format)
}

async fn handle_job_stop(
    client: &mut JobServiceClient<Channel>,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = match client.stop_job(StopJobRequest { job_id }).await {
        Ok(response) => response.into_inner(),
        Err(status) => exit_with_status(status),
    };

    match output_format {
        OutputFormat::Json => {
            let output = StopOutput {
                message: response.message,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => println!("{}", response.message),
    }
    Ok(())
}

async fn handle_job_status(
    client: &mut JobServiceClient<Channel>,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = match client
        .get_job_status(GetJobStatusRequest { job_id })
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) => exit_with_status(status),
    };
    print_job(job, output_format)
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            let channel = create_client_channel(&client).await?;
            let mut grpc_client = JobServiceClient::new(channel);

            match command {
                JobCommands::Create { command, args } => {
                    handle_job_create(&mut grpc_client, command, args, &client.output).await?;
                }
                JobCommands::Stop { job_id } => {
                    handle_job_stop(&mut grpc_client, job_id, &client.output).await?;
                }
                JobCommands::Status { job_id } => {
                    handle_job_status(&mut grpc_client, job_id, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
