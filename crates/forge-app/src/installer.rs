//! Dependency installation inside the sandbox
//!
//! The install command is run with flags that keep it from ever asking a
//! question, since nothing can answer it. Output is streamed to the caller
//! chunk by chunk and also kept for the failure report.

use std::time::Duration;

use tokio::time::Instant;

use forge_core::prelude::*;
use forge_sandbox::{ProcessKiller, Sandbox, SpawnedProcess};

use crate::config::InstallSettings;
use crate::output_buffer::OutputBuffer;

/// Summary of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub elapsed: Duration,
    /// Output chunks received
    pub chunks: usize,
}

/// A running install process
pub struct InstallProcess {
    process: SpawnedProcess,
    output: OutputBuffer,
    started: Instant,
}

impl InstallProcess {
    pub fn killer(&self) -> ProcessKiller {
        self.process.killer()
    }

    /// Stream output until the process exits.
    ///
    /// Exit code zero is success. Anything else, including a kill, is an
    /// `InstallFailure` carrying the captured output.
    pub async fn wait<F>(self, mut on_chunk: F) -> Result<InstallReport>
    where
        F: FnMut(&str),
    {
        let InstallProcess {
            process,
            mut output,
            started,
        } = self;

        let code = process
            .wait_with(|chunk| {
                output.push(chunk);
                on_chunk(chunk);
            })
            .await;

        match code {
            Some(0) => Ok(InstallReport {
                elapsed: started.elapsed(),
                chunks: output.chunk_count(),
            }),
            code => Err(Error::InstallFailure {
                code,
                output: output.tail(),
            }),
        }
    }
}

/// Spawn the install command in `sandbox`.
pub async fn spawn_install<S>(
    sandbox: &S,
    settings: &InstallSettings,
    diagnostic_lines: usize,
) -> Result<InstallProcess>
where
    S: Sandbox + ?Sized,
{
    info!(
        "Installing dependencies: {} {}",
        settings.command,
        settings.args.join(" ")
    );

    let process = sandbox.spawn(&settings.command, &settings.args).await?;

    Ok(InstallProcess {
        process,
        output: OutputBuffer::new(diagnostic_lines),
        started: Instant::now(),
    })
}

/// Install dependencies and wait for the result. Never retried.
pub async fn run_install<S, F>(
    sandbox: &S,
    settings: &InstallSettings,
    diagnostic_lines: usize,
    on_chunk: F,
) -> Result<InstallReport>
where
    S: Sandbox + ?Sized,
    F: FnMut(&str),
{
    let install = spawn_install(sandbox, settings, diagnostic_lines).await?;
    install.wait(on_chunk).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_sandbox::test_utils::{FakeSandbox, ProcessScript};

    #[tokio::test]
    async fn test_install_success() {
        let sandbox = FakeSandbox::new(1);
        sandbox.script(
            "npm",
            ProcessScript::new()
                .output("added 12 packages\n")
                .output("found 0 vulnerabilities\n")
                .exit(0),
        );

        let mut seen = Vec::new();
        let report = run_install(&sandbox, &InstallSettings::default(), 50, |chunk| {
            seen.push(chunk.to_string())
        })
        .await
        .unwrap();

        assert_eq!(report.chunks, 2);
        assert_eq!(seen, vec!["added 12 packages\n", "found 0 vulnerabilities\n"]);
        assert_eq!(
            sandbox.spawned_command_lines(),
            vec!["npm install --yes --legacy-peer-deps --no-audit --no-fund"]
        );
    }

    #[tokio::test]
    async fn test_install_failure_carries_output() {
        let sandbox = FakeSandbox::new(1);
        sandbox.script(
            "npm",
            ProcessScript::new()
                .output("\x1b[31mnpm ERR!\x1b[39m code ERESOLVE\n")
                .output("npm ERR! unable to resolve dependency tree\n")
                .exit(1),
        );

        let err = run_install(&sandbox, &InstallSettings::default(), 50, |_| {})
            .await
            .unwrap_err();

        match err {
            Error::InstallFailure { code, output } => {
                assert_eq!(code, Some(1));
                assert_eq!(
                    output,
                    "npm ERR! code ERESOLVE\nnpm ERR! unable to resolve dependency tree"
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // One attempt only
        assert_eq!(sandbox.spawns().len(), 1);
    }

    #[tokio::test]
    async fn test_killed_install_is_a_failure() {
        let sandbox = FakeSandbox::new(1);
        // Never exits on its own
        sandbox.script("npm", ProcessScript::new().output("resolving...\n"));

        let install = spawn_install(&sandbox, &InstallSettings::default(), 50)
            .await
            .unwrap();
        let killer = install.killer();

        let handle = tokio::spawn(install.wait(|_| {}));
        tokio::task::yield_now().await;
        assert!(killer.kill());

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::InstallFailure { code: None, ref output }) if output == "resolving..."
        ));
        assert_eq!(sandbox.kills(), 1);
    }

    #[tokio::test]
    async fn test_custom_install_command() {
        let sandbox = FakeSandbox::new(1);
        let settings = InstallSettings {
            command: "pnpm".to_string(),
            args: vec!["install".to_string(), "--frozen-lockfile".to_string()],
        };

        run_install(&sandbox, &settings, 50, |_| {}).await.unwrap();
        assert_eq!(
            sandbox.spawned_command_lines(),
            vec!["pnpm install --frozen-lockfile"]
        );
    }
}
