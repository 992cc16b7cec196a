//! Subprocess execution for provider adapters
//!
//! Every external tool call goes through [`run`], which honours the
//! operation's cancellation token and deadline by polling the child and
//! killing it when either fires.

use declarative::{OperationContext, ProviderError};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct Captured {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    /// Stdout on success, the trimmed stderr as a provider error otherwise
    pub fn into_stdout(self, program: &str) -> Result<String, ProviderError> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(ProviderError::failed(format!(
                "{program} failed: {}",
                self.stderr.trim()
            )))
        }
    }
}

/// Run a command to completion, feeding `stdin` if given
pub fn run(
    ctx: &OperationContext,
    program: &str,
    args: &[String],
    stdin: Option<&str>,
) -> Result<Captured, ProviderError> {
    log::debug!("{}: {} {}", ctx.node, program, args.join(" "));
    ctx.check()?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ProviderError::failed(format!("Failed to execute {program}: {e}")))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take())
        && let Err(e) = pipe.write_all(input.as_bytes())
    {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ProviderError::failed(format!(
            "Failed to write to {program}: {e}"
        )));
    }

    let success = wait(ctx, &mut child, program)?;
    Ok(Captured {
        success,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

/// Run a command and return its stdout, failing on a non-zero exit
pub fn run_capture(
    ctx: &OperationContext,
    program: &str,
    args: &[String],
    stdin: Option<&str>,
) -> Result<String, ProviderError> {
    run(ctx, program, args, stdin)?.into_stdout(program)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}

fn wait(ctx: &OperationContext, child: &mut Child, program: &str) -> Result<bool, ProviderError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status.success()),
            Ok(None) => {}
            Err(e) => {
                return Err(ProviderError::failed(format!(
                    "Failed to wait for {program}: {e}"
                )));
            }
        }

        if let Err(e) = ctx.check() {
            log::warn!("Killing {} for {}: {}", program, ctx.node, e);
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
