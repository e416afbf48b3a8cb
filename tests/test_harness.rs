//! Test harness for API integration tests.
//!
//! Spawns a [`GrpcServer`] on an ephemeral port and hands out connected
//! clients.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

use job_worker::auth::UserTable;
use job_worker::config::ServerConfig;
use job_worker::grpc::GrpcServer;
use job_worker::proto::job_service_client::JobServiceClient;
use job_worker::proto::{GetJobStatusRequest, JobInfo, JobStatus};
use job_worker::tls::TlsIdentity;
use job_worker::worker::JobWorker;

/// Handle to a running test server
pub struct TestServer {
    pub addr: SocketAddr,
    pub worker: Arc<JobWorker>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Plaintext server. Every caller is `insecure_user`, or rejected when
    /// that is `None`.
    pub async fn plaintext(insecure_user: Option<&str>) -> Self {
        let mut config = ServerConfig::default();
        if let Some(user) = insecure_user {
            config = config.with_insecure_user(user);
        }
        Self::start(config, UserTable::default(), None).await
    }

    /// mTLS server using the default user table
    pub async fn tls(identity: TlsIdentity) -> Self {
        Self::start(ServerConfig::default(), UserTable::default(), Some(identity)).await
    }

    pub async fn start(
        config: ServerConfig,
        users: UserTable,
        tls_identity: Option<TlsIdentity>,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Listener has no address");

        let worker = Arc::new(JobWorker::new());
        let shutdown = CancellationToken::new();
        let server = GrpcServer::new(config, worker.clone(), users, tls_identity);

        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = server.run_with_listener(listener, token).await {
                eprintln!("test server failed: {}", e);
            }
        });

        Self {
            addr,
            worker,
            shutdown,
            handle,
        }
    }

    pub async fn plaintext_client(&self) -> JobServiceClient<Channel> {
        let channel = Endpoint::from_shared(format!("http://{}", self.addr))
            .expect("Invalid endpoint")
            .connect()
            .await
            .expect("Failed to connect to test server");
        JobServiceClient::new(channel)
    }

    pub async fn tls_client(&self, identity: &TlsIdentity) -> JobServiceClient<Channel> {
        let channel = self
            .tls_channel(identity)
            .await
            .expect("Failed to connect to test server over mTLS");
        JobServiceClient::new(channel)
    }

    pub async fn tls_channel(
        &self,
        identity: &TlsIdentity,
    ) -> Result<Channel, tonic::transport::Error> {
        Endpoint::from_shared(format!("https://{}", self.addr))?
            .tls_config(identity.client_tls_config("localhost"))?
            .connect()
            .await
    }

    /// Cancel the server and wait for it to stop its jobs and exit
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(10), self.handle).await;
    }
}

/// Poll `GetJobStatus` until the job reports EXITED
pub async fn wait_for_exit(client: &mut JobServiceClient<Channel>, job_id: &str) -> JobInfo {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let info = client
            .get_job_status(GetJobStatusRequest {
                job_id: job_id.to_string(),
            })
            .await
            .expect("status request failed")
            .into_inner();
        if info.status == JobStatus::Exited as i32 {
            return info;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not exit in time",
            job_id
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
