use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::auth::{AuthError, Permission, UserTable};
use crate::error::JobError;
use crate::job::{JobRequest, JobSnapshot, JobStatus};
use crate::proto::job_service_server::JobService;
use crate::proto::{
    CreateJobRequest, GetJobStatusRequest, JobInfo, JobStatus as ProtoJobStatus, StopJobRequest,
    StopJobResponse,
};
use crate::tls;
use crate::worker::JobWorker;

/// How the service decides who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    /// Subject common name of the verified client certificate.
    ClientCertificate,
    /// Every caller is treated as this user. Plaintext development mode.
    Insecure(String),
}

/// gRPC service for the client-facing job API
pub struct ClientService {
    worker: Arc<JobWorker>,
    users: Arc<UserTable>,
    identity: CallerIdentity,
}

impl ClientService {
    pub fn new(worker: Arc<JobWorker>, users: Arc<UserTable>, identity: CallerIdentity) -> Self {
        Self {
            worker,
            users,
            identity,
        }
    }

    /// Resolve the caller and check it holds `permission`. Returns the user name.
    fn authorize<T>(&self, request: &Request<T>, permission: Permission) -> Result<String, Status> {
        let user = match &self.identity {
            CallerIdentity::Insecure(user) => user.clone(),
            CallerIdentity::ClientCertificate => peer_common_name(request).map_err(|e| {
                tracing::info!(error = %e, "unauthenticated request rejected");
                auth_status(e)
            })?,
        };

        self.users.authorize(&user, permission).map_err(|e| {
            tracing::info!(user = %user, permission = %permission, error = %e, "request rejected");
            auth_status(e)
        })?;

        tracing::debug!(user = %user, permission = %permission, "caller authorized");
        Ok(user)
    }
}

fn peer_common_name<T>(request: &Request<T>) -> Result<String, AuthError> {
    let certs = request.peer_certs().ok_or(AuthError::MissingIdentity)?;
    let leaf = certs.first().ok_or(AuthError::MissingIdentity)?;
    tls::common_name(leaf.as_ref()).map_err(|e| {
        tracing::debug!(error = %e, "client certificate carries no usable identity");
        AuthError::MissingIdentity
    })
}

fn job_error_status(err: JobError) -> Status {
    let message = err.to_string();
    match err {
        JobError::InvalidRequest(_) | JobError::Start(_) => Status::invalid_argument(message),
        JobError::NotFound(_) => Status::not_found(message),
        JobError::Termination { .. } | JobError::DuplicateId(_) => Status::internal(message),
    }
}

fn auth_status(err: AuthError) -> Status {
    let message = err.to_string();
    match err {
        AuthError::PermissionDenied { .. } => Status::permission_denied(message),
        _ => Status::unauthenticated(message),
    }
}

impl From<JobStatus> for ProtoJobStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Running => ProtoJobStatus::Running,
            JobStatus::Exited => ProtoJobStatus::Exited,
        }
    }
}

impl From<JobSnapshot> for JobInfo {
    fn from(job: JobSnapshot) -> Self {
        let error = job.error();
        let exit_code = job.exit_code();
        JobInfo {
            job_id: job.id,
            status: ProtoJobStatus::from(job.status) as i32,
            output: job.output,
            request: Some(CreateJobRequest {
                command: job.request.command,
                args: job.request.args,
            }),
            error,
            exit_code,
            created_at_ms: job.created_at.timestamp_millis(),
            finished_at_ms: job.finished_at.map(|t| t.timestamp_millis()),
        }
    }
}

#[tonic::async_trait]
impl JobService for ClientService {
    async fn create_job(
        &self,
        request: Request<CreateJobRequest>,
    ) -> Result<Response<JobInfo>, Status> {
        let user = self.authorize(&request, Permission::ReadWrite)?;
        let req = request.into_inner();
        tracing::info!(user = %user, command = %req.command, "create job requested");

        let job = self
            .worker
            .create(JobRequest {
                command: req.command,
                args: req.args,
            })
            .await
            .map_err(job_error_status)?;

        Ok(Response::new(job.into()))
    }

    async fn stop_job(
        &self,
        request: Request<StopJobRequest>,
    ) -> Result<Response<StopJobResponse>, Status> {
        let user = self.authorize(&request, Permission::ReadWrite)?;
        let job_id = request.into_inner().job_id;
        tracing::info!(user = %user, job_id = %job_id, "stop job requested");

        self.worker.stop(&job_id).await.map_err(job_error_status)?;

        Ok(Response::new(StopJobResponse {
            message: format!("job {} stopped", job_id),
        }))
    }

    async fn get_job_status(
        &self,
        request: Request<GetJobStatusRequest>,
    ) -> Result<Response<JobInfo>, Status> {
        self.authorize(&request, Permission::ReadOnly)?;
        let job_id = request.into_inner().job_id;

        let job = self
            .worker
            .status(&job_id)
            .await
            .map_err(job_error_status)?;

        Ok(Response::new(job.into()))
    }
}
