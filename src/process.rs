use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time;

use crate::config::CommandSpec;
use crate::error::ProcessError;

/// Captured result of one external function invocation.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run a command, collecting stdout/stderr and killing it when the timeout expires.
pub async fn run_command(
    spec: &CommandSpec,
    env: &HashMap<String, String>,
    cwd: &Path,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(env)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ProcessError::SpawnFailed(format!("{}: {e}", spec.program)))?;

    let stdout_handle = {
        let stdout = child.stdout.take();
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_end(&mut buf).await;
            }
            buf
        })
    };

    let stderr_handle = {
        let stderr = child.stderr.take();
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut err) = stderr {
                let _ = err.read_to_end(&mut buf).await;
            }
            buf
        })
    };

    let status = match timeout {
        Some(dur) => match time::timeout(dur, child.wait()).await {
            Ok(res) => res.map_err(|e| ProcessError::WaitFailed(e.to_string()))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ProcessError::Timeout(dur));
            }
        },
        None => child
            .wait()
            .await
            .map_err(|e| ProcessError::WaitFailed(e.to_string()))?,
    };

    let stdout = stdout_handle.await.unwrap_or_default();
    let stderr = stderr_handle.await.unwrap_or_default();

    Ok(ProcessOutput {
        code: status.code(),
        stdout,
        stderr,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let out = run_command(
            &sh("echo hello; echo oops >&2; exit 3"),
            &HashMap::new(),
            Path::new("."),
            None,
        )
        .await
        .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "oops\n");
    }

    #[tokio::test]
    async fn passes_environment() {
        let env = HashMap::from([("BATCHRUN_TEST".to_string(), "yes".to_string())]);
        let out = run_command(&sh("printf %s \"$BATCHRUN_TEST\""), &env, Path::new("."), None)
            .await
            .unwrap();
        assert_eq!(out.stdout, b"yes");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let err = run_command(
            &sh("sleep 5"),
            &HashMap::new(),
            Path::new("."),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let spec = CommandSpec {
            program: "batchrun-no-such-program".to_string(),
            args: Vec::new(),
        };
        let err = run_command(&spec, &HashMap::new(), Path::new("."), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed(_)));
    }
}
