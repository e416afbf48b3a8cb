use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::Server;

use crate::auth::UserTable;
use crate::config::ServerConfig;
use crate::grpc::client_service::{CallerIdentity, ClientService};
use crate::proto::job_service_server::JobServiceServer;
use crate::tls::TlsIdentity;
use crate::worker::JobWorker;

pub struct GrpcServer {
    config: ServerConfig,
    worker: Arc<JobWorker>,
    users: Arc<UserTable>,
    tls_identity: Option<TlsIdentity>,
}

impl GrpcServer {
    pub fn new(
        config: ServerConfig,
        worker: Arc<JobWorker>,
        users: UserTable,
        tls_identity: Option<TlsIdentity>,
    ) -> Self {
        Self {
            config,
            worker,
            users: Arc::new(users),
            tls_identity,
        }
    }

    /// Serve on the configured listen address until `shutdown` is cancelled,
    /// then stop every running job.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let router = self.router()?;

        tracing::info!(
            addr = %self.config.listen_addr,
            tls_enabled = self.tls_identity.is_some(),
            "Starting gRPC server"
        );

        router
            .serve_with_shutdown(self.config.listen_addr, shutdown.cancelled())
            .await?;

        self.stop_running_jobs().await;
        Ok(())
    }

    /// Like [`run`](Self::run), on an already bound listener.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        let router = self.router()?;

        tracing::info!(
            addr = ?listener.local_addr().ok(),
            tls_enabled = self.tls_identity.is_some(),
            "Starting gRPC server"
        );

        router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.cancelled())
            .await?;

        self.stop_running_jobs().await;
        Ok(())
    }

    fn router(&self) -> Result<Router, tonic::transport::Error> {
        let mut builder = Server::builder();
        if let Some(ref tls_identity) = self.tls_identity {
            builder = builder.tls_config(tls_identity.server_tls_config())?;
        }

        let service = ClientService::new(
            self.worker.clone(),
            self.users.clone(),
            self.caller_identity(),
        );
        Ok(builder.add_service(JobServiceServer::new(service)))
    }

    fn caller_identity(&self) -> CallerIdentity {
        if self.tls_identity.is_some() {
            return CallerIdentity::ClientCertificate;
        }

        match self.config.insecure_user {
            Some(ref user) => {
                tracing::warn!(
                    user = %user,
                    "Serving without TLS, every caller is treated as this user"
                );
                CallerIdentity::Insecure(user.clone())
            }
            None => {
                tracing::warn!(
                    "Serving without TLS and without an insecure user, all requests will be rejected"
                );
                CallerIdentity::ClientCertificate
            }
        }
    }

    async fn stop_running_jobs(&self) {
        let stopped = self.worker.stop_all().await;
        if stopped > 0 {
            tracing::info!(stopped, "Stopped running jobs on shutdown");
        }
    }
}
