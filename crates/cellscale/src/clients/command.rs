//! Collaborators implemented by external programs.
//!
//! Each operation runs a configured command. The request is written to its stdin as JSON and the
//! response is read from its stdout as JSON. A failing command may describe the failure on stderr
//! as `{"code": "...", "message": "..."}`, which is mapped onto the typed client errors.
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::rc::Rc;

use anyhow::Context;
use bstr::ByteSlice;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::clients::{
    AdminStore, ClientError, ClientFuture, ComputeError, ComputeProvider, CoordinationStore,
    DirectoryService, InstanceSpec, OneTimeSecret, SchedulerSnapshot, SchedulerState,
    ServerFilter,
};
use crate::cluster::ServerRecord;
use crate::common::config::BackendConfig;
use crate::{Hostname, InstanceId, Set};

/// Structured failure printed by a backend command on stderr.
#[derive(Debug, Deserialize)]
struct BackendFailure {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
enum CommandError {
    /// The command exited with a recognized error code.
    Failure(BackendFailure),
    Other(anyhow::Error),
}

impl CommandError {
    fn into_client_error(self, subject: &str) -> ClientError {
        match self {
            CommandError::Failure(failure) => match failure.code.as_str() {
                "NotFound" => ClientError::NotFound(subject.to_string()),
                "AlreadyExists" => ClientError::AlreadyExists(subject.to_string()),
                code => ClientError::Other(anyhow::anyhow!("{code}: {}", failure.message)),
            },
            CommandError::Other(error) => ClientError::Other(error),
        }
    }

    fn into_compute_error(self) -> ComputeError {
        match self {
            CommandError::Failure(failure) => {
                ComputeError::from_code(&failure.code, failure.message)
            }
            CommandError::Other(error) => ComputeError::Terminal {
                code: "CommandFailed".to_string(),
                message: format!("{error:?}"),
            },
        }
    }

    fn into_anyhow(self) -> anyhow::Error {
        match self {
            CommandError::Failure(failure) => {
                anyhow::anyhow!("{}: {}", failure.code, failure.message)
            }
            CommandError::Other(error) => error,
        }
    }
}

#[derive(Serialize)]
struct PartitionRequest<'a> {
    partition: &'a str,
}

#[derive(Serialize)]
struct HostRequest<'a> {
    hostname: &'a str,
}

#[derive(Deserialize)]
struct EnrollResponse {
    secret: OneTimeSecret,
}

#[derive(Deserialize)]
struct CreateResponse {
    instance_id: InstanceId,
}

struct Backend {
    config: BackendConfig,
    workdir: PathBuf,
}

/// Drives every collaborator through the commands of a [`BackendConfig`].
#[derive(Clone)]
pub struct CommandClient {
    backend: Rc<Backend>,
}

impl CommandClient {
    pub fn new(config: BackendConfig) -> anyhow::Result<Self> {
        let workdir = match &config.workdir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Cannot get current directory")?,
        };
        Ok(Self {
            backend: Rc::new(Backend { config, workdir }),
        })
    }

    fn call<Req: Serialize, Resp: DeserializeOwned + 'static>(
        &self,
        select: fn(&BackendConfig) -> &Vec<String>,
        request: &Req,
    ) -> ClientFuture<Result<Resp, CommandError>> {
        let arguments = select(&self.backend.config).clone();
        let workdir = self.backend.workdir.clone();
        let payload = serde_json::to_vec(request);
        Box::pin(async move {
            let payload = payload
                .context("Cannot serialize request")
                .map_err(CommandError::Other)?;
            run_backend_command(arguments, &workdir, payload).await
        })
    }
}

async fn run_backend_command<Resp: DeserializeOwned>(
    arguments: Vec<String>,
    workdir: &Path,
    payload: Vec<u8>,
) -> Result<Resp, CommandError> {
    if arguments.is_empty() {
        return Err(CommandError::Other(anyhow::anyhow!(
            "No backend command is configured for this operation"
        )));
    }
    let program = arguments[0].clone();
    log::debug!("Running command `{}`", arguments.join(" "));

    let output = execute(create_command(&arguments, workdir), payload)
        .await
        .with_context(|| format!("{program} start failed"))
        .map_err(CommandError::Other)?;
    let output = check_command_output(output)?;

    let stdout = output.stdout.trim();
    let stdout: &[u8] = if stdout.is_empty() { b"null" } else { stdout };
    serde_json::from_slice(stdout)
        .with_context(|| {
            format!(
                "Invalid {program} output: {}",
                output.stdout.to_str_lossy().trim()
            )
        })
        .map_err(CommandError::Other)
}

async fn execute(mut command: Command, payload: Vec<u8>) -> anyhow::Result<Output> {
    let mut child = command.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        // The command may exit without consuming its input
        match stdin.write_all(&payload).await {
            Err(error) if error.kind() != std::io::ErrorKind::BrokenPipe => return Err(error.into()),
            _ => {}
        }
        drop(stdin);
    }
    Ok(child.wait_with_output().await?)
}

fn create_command(arguments: &[String], workdir: &Path) -> Command {
    let mut command = Command::new(&arguments[0]);
    command.args(&arguments[1..]);
    command.current_dir(workdir);
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);
    command
}

fn check_command_output(output: Output) -> Result<Output, CommandError> {
    let status = output.status;
    if status.success() {
        return Ok(output);
    }
    if let Ok(failure) = serde_json::from_slice::<BackendFailure>(output.stderr.trim()) {
        return Err(CommandError::Failure(failure));
    }
    Err(CommandError::Other(anyhow::anyhow!(
        "Exit code: {}\nStderr: {}\nStdout: {}",
        status.code().unwrap_or(-1),
        output.stderr.to_str_lossy().trim(),
        output.stdout.to_str_lossy().trim()
    )))
}

impl SchedulerState for CommandClient {
    fn read(&self, partition: &str) -> ClientFuture<anyhow::Result<SchedulerSnapshot>> {
        let fut = self.call::<_, SchedulerSnapshot>(|c| &c.scheduler_read, &PartitionRequest { partition });
        Box::pin(async move { fut.await.map_err(CommandError::into_anyhow) })
    }

    fn remove_server(&self, hostname: &str) -> ClientFuture<anyhow::Result<()>> {
        let fut = self.call::<_, ()>(|c| &c.scheduler_remove_server, &HostRequest { hostname });
        Box::pin(async move { fut.await.map_err(CommandError::into_anyhow) })
    }
}

impl CoordinationStore for CommandClient {
    fn list_pinned(&self, partition: &str) -> ClientFuture<anyhow::Result<Set<Hostname>>> {
        let fut = self.call::<_, Vec<Hostname>>(|c| &c.list_pinned, &PartitionRequest { partition });
        Box::pin(async move {
            let names = fut.await.map_err(CommandError::into_anyhow)?;
            Ok(names.into_iter().collect())
        })
    }
}

impl DirectoryService for CommandClient {
    fn enroll(&self, hostname: &str) -> ClientFuture<Result<OneTimeSecret, ClientError>> {
        let fut = self.call::<_, EnrollResponse>(|c| &c.enroll, &HostRequest { hostname });
        let hostname = hostname.to_string();
        Box::pin(async move {
            fut.await
                .map(|response| response.secret)
                .map_err(|e| e.into_client_error(&hostname))
        })
    }

    fn unenroll(&self, hostname: &str) -> ClientFuture<Result<(), ClientError>> {
        let fut = self.call::<_, ()>(|c| &c.unenroll, &HostRequest { hostname });
        let hostname = hostname.to_string();
        Box::pin(async move { fut.await.map_err(|e| e.into_client_error(&hostname)) })
    }
}

impl ComputeProvider for CommandClient {
    fn create(&self, spec: InstanceSpec) -> ClientFuture<Result<InstanceId, ComputeError>> {
        let fut = self.call::<_, CreateResponse>(|c| &c.compute_create, &spec);
        Box::pin(async move {
            fut.await
                .map(|response| response.instance_id)
                .map_err(CommandError::into_compute_error)
        })
    }

    fn terminate(&self, hostname: &str) -> ClientFuture<Result<(), ClientError>> {
        let fut = self.call::<_, ()>(|c| &c.compute_terminate, &HostRequest { hostname });
        let hostname = hostname.to_string();
        Box::pin(async move { fut.await.map_err(|e| e.into_client_error(&hostname)) })
    }
}

impl AdminStore for CommandClient {
    fn create(&self, record: ServerRecord) -> ClientFuture<Result<(), ClientError>> {
        let fut = self.call::<_, ()>(|c| &c.record_create, &record);
        Box::pin(async move { fut.await.map_err(|e| e.into_client_error(&record.name)) })
    }

    fn delete(&self, name: &str) -> ClientFuture<Result<(), ClientError>> {
        let fut = self.call::<_, ()>(|c| &c.record_delete, &HostRequest { hostname: name });
        let name = name.to_string();
        Box::pin(async move { fut.await.map_err(|e| e.into_client_error(&name)) })
    }

    fn list(&self, filter: ServerFilter) -> ClientFuture<Result<Vec<ServerRecord>, ClientError>> {
        let fut = self.call::<_, Vec<ServerRecord>>(|c| &c.record_list, &filter);
        Box::pin(async move { fut.await.map_err(|e| e.into_client_error("server list")) })
    }
}
