use std::io::Write;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestAction {
    Apply,
    Delete,
}

impl ManifestAction {
    fn verb(&self) -> &'static str {
        match self {
            ManifestAction::Apply => "apply",
            ManifestAction::Delete => "delete",
        }
    }
}

/// Runs `kubectl <apply|delete> -f <manifest> -n <namespace>`.
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    namespace: String,
}

impl Kubectl {
    pub fn new(program: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            namespace: namespace.into(),
        }
    }

    pub async fn run(&self, action: ManifestAction, manifest: &str) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("otel-collector-")
            .suffix(".yaml")
            .tempfile()
            .context("failed to create manifest file")?;
        file.write_all(manifest.as_bytes())
            .context("failed to write manifest file")?;
        file.flush().context("failed to flush manifest file")?;

        let mut command = Command::new(&self.program);
        command
            .arg(action.verb())
            .arg("-f")
            .arg(file.path())
            .arg("-n")
            .arg(&self.namespace);
        if action == ManifestAction::Delete {
            command.arg("--ignore-not-found");
        }

        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        let stdout = child.stdout.take().map(|out| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(target: "kubectl", "{}", line);
                }
            })
        });
        let stderr = child.stderr.take().map(|err| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "kubectl", "{}", line);
                }
            })
        });

        let status = child
            .wait()
            .await
            .with_context(|| format!("failed to wait for {}", self.program))?;
        for reader in [stdout, stderr].into_iter().flatten() {
            let _ = reader.await;
        }

        if !status.success() {
            bail!(
                "{} {} exited with {}",
                self.program,
                action.verb(),
                status
            );
        }
        Ok(())
    }
}
