//! Local-direct runs through the Docker Engine API.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures_util::{StreamExt, TryStreamExt};
use netassert_core::{NetworkMode, TestPayload};
use netassert_types::{ContainerName, Target, TargetError};

use super::{ExecutionStrategy, RunSettings};
use crate::guard::Reaper;
use crate::sink::SinkWriter;

/// Runs the test container on this machine, in the host network namespace.
#[derive(Debug, Clone)]
pub struct LocalStrategy {
    settings: RunSettings,
    docker: Result<Docker, String>,
    reaper: Reaper,
}

impl LocalStrategy {
    /// Create a local strategy using the default Docker socket.
    ///
    /// Connection problems surface per target when a run is attempted.
    pub fn new(settings: RunSettings) -> Self {
        let docker = Docker::connect_with_local_defaults().map_err(|e| e.to_string());
        Self {
            settings,
            docker,
            reaper: Reaper::new(),
        }
    }

    /// Containers queued for removal by cancelled runs.
    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    fn docker(&self) -> Result<&Docker, TargetError> {
        self.docker.as_ref().map_err(|reason| TargetError::Connectivity {
            target: "docker".into(),
            reason: reason.clone(),
        })
    }

    async fn pull(&self, docker: &Docker) {
        let options = CreateImageOptions {
            from_image: self.settings.image.clone(),
            ..Default::default()
        };
        let progress: Result<Vec<_>, _> = docker
            .create_image(Some(options), None, None)
            .try_collect()
            .await;
        if let Err(e) = progress {
            tracing::debug!("Pull of {} failed, using cached image: {}", self.settings.image, e);
        }
    }

    async fn remove(docker: &Docker, name: &ContainerName) -> Result<(), bollard::errors::Error> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        docker.remove_container(name.as_str(), Some(options)).await
    }

    async fn run_container(
        &self,
        docker: &Docker,
        name: &ContainerName,
        env: Vec<String>,
        sink: &mut SinkWriter,
    ) -> Result<i64, TargetError> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let config = Config {
            image: Some(self.settings.image.clone()),
            env: Some(env),
            host_config: Some(HostConfig {
                network_mode: Some(NetworkMode::Host.as_arg()),
                ..Default::default()
            }),
            ..Default::default()
        };
        docker
            .create_container(Some(options), config)
            .await
            .map_err(docker_error)?;
        docker
            .start_container(name.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(docker_error)?;

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut logs = docker.logs(name.as_str(), Some(options));
        let mut pending = String::new();
        while let Some(chunk) = logs.next().await {
            let chunk = chunk.map_err(docker_error)?;
            pending.push_str(&chunk.to_string());
            while let Some(pos) = pending.find('\n') {
                let line: String = pending.drain(..=pos).collect();
                sink.write_line(line.trim_end_matches(['\n', '\r'])).await?;
            }
        }
        if !pending.is_empty() {
            sink.write_line(&pending).await?;
        }

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let waited: Result<Vec<_>, _> = docker
            .wait_container(name.as_str(), Some(options))
            .try_collect()
            .await;
        match waited {
            Ok(responses) => responses
                .first()
                .map(|r| r.status_code)
                .ok_or_else(|| {
                    TargetError::Runtime(format!("no exit status for container {}", name))
                }),
            // Non-zero exits arrive as an error carrying the code.
            Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => Ok(code),
            Err(e) => Err(docker_error(e)),
        }
    }
}

/// Engine-side rejections are runtime errors; anything else means the
/// engine could not be reached.
fn docker_error(e: bollard::errors::Error) -> TargetError {
    match e {
        bollard::errors::Error::DockerResponseServerError { message, .. } => {
            TargetError::Runtime(message)
        }
        other => TargetError::Connectivity {
            target: "docker".into(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl ExecutionStrategy for LocalStrategy {
    async fn run_ephemeral(
        &self,
        target: &Target,
        payload: &TestPayload,
        sink: &mut SinkWriter,
    ) -> Result<(), TargetError> {
        let docker = self.docker()?;
        if self.settings.pull {
            self.pull(docker).await;
        }

        let name = ContainerName::generate(&self.settings.container_prefix);
        let env = self
            .settings
            .container_env(payload)
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        tracing::info!("Running {} locally for {}", name, target);
        let guard = self.reaper.guard(name.clone());
        let result = self.run_container(docker, &name, env, sink).await;

        match Self::remove(docker, &name).await {
            Ok(()) => guard.disarm(),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => guard.disarm(),
            Err(e) => {
                tracing::warn!("Failed to remove container {}: {}", name, e);
                drop(guard);
            }
        }

        match result? {
            0 => Ok(()),
            code => Err(TargetError::TestFailure { exit_code: code }),
        }
    }

    async fn reap(&self) {
        let pending = self.reaper.take_pending();
        if pending.is_empty() {
            return;
        }
        let Ok(docker) = self.docker() else {
            return;
        };
        for name in pending {
            match Self::remove(docker, &name).await {
                Ok(()) => tracing::info!("Removed abandoned container {}", name),
                Err(e) => tracing::warn!("Failed to remove abandoned container {}: {}", name, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkDir;

    #[test]
    fn server_rejection_is_runtime_error() {
        let err = docker_error(bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such image: controlplane/netassert:0.1".into(),
        });
        assert!(matches!(err, TargetError::Runtime(ref m) if m.starts_with("No such image")));
    }

    #[test]
    fn other_docker_errors_are_connectivity() {
        let err = docker_error(bollard::errors::Error::DockerContainerWaitError {
            error: "broken".into(),
            code: 1,
        });
        assert_eq!(err.kind(), "connectivity");
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn runs_image_and_removes_container() {
        let strategy = LocalStrategy::new(RunSettings {
            image: "alpine:3".into(),
            ..RunSettings::default()
        });
        let dir = SinkDir::temporary().unwrap();
        let target = Target::host("localhost");
        let mut sink = dir.create(&target).await.unwrap();
        let payload = TestPayload::wrap("localhost", serde_json::json!([]));

        // alpine's default command exits 0 without output
        strategy
            .run_ephemeral(&target, &payload, &mut sink)
            .await
            .unwrap();
        assert!(strategy.reaper().take_pending().is_empty());
    }
}
