use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Captured result of one provider invocation.
#[derive(Debug, Clone)]
pub(crate) struct CommandOutput {
    pub(crate) exit_code: i32,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) timed_out: bool,
}

impl CommandOutput {
    pub(crate) fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Run a command, capturing stdout and stderr. With a timeout, the child is
/// polled and killed once the deadline passes; the timeout is noted in the
/// captured stderr so it survives into surfaced errors.
pub(crate) fn run_command(
    program: &str,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let mut command = Command::new(program);
    command.args(args);

    let Some(timeout) = timeout else {
        let output = command
            .output()
            .with_context(|| format!("failed to execute {program}"))?;
        return Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        });
    };

    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().context("failed to poll command")? {
            let (stdout, stderr) = drain_pipes(&mut child);
            return Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
                timed_out: false,
            });
        }

        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            let (stdout, mut stderr) = drain_pipes(&mut child);
            stderr.push_str(&format!(
                "\ncommand timed out after {}",
                humantime::format_duration(timeout)
            ));
            return Ok(CommandOutput {
                exit_code: -1,
                stdout,
                stderr,
                timed_out: true,
            });
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

fn drain_pipes(child: &mut std::process::Child) -> (String, String) {
    let mut stdout_bytes = Vec::new();
    let mut stderr_bytes = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_end(&mut stdout_bytes);
    }
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_end(&mut stderr_bytes);
    }
    (
        String::from_utf8_lossy(&stdout_bytes).to_string(),
        String::from_utf8_lossy(&stderr_bytes).to_string(),
    )
}
