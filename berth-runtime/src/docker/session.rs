//! One-shot exec and log sessions against the Docker Engine.
//!
//! Both open an engine stream, hand it to [`capture_stream`] and drop it when
//! the capture returns, whatever the outcome.

use bollard::container::{LogOutput, LogsOptions};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::engine_error;
use crate::capture::{capture_stream, capture_stream_until, CaptureEnd, CaptureLimits, Captured};
use crate::error::{Result, RuntimeError};
use crate::ExecOutput;

fn log_chunk(item: std::result::Result<LogOutput, BollardError>, target: &str) -> Result<Bytes> {
    match item {
        Ok(LogOutput::StdOut { message })
        | Ok(LogOutput::StdErr { message })
        | Ok(LogOutput::Console { message })
        | Ok(LogOutput::StdIn { message }) => Ok(message),
        Err(e) => Err(engine_error("stream", target, e)),
    }
}

/// A single command execution with output capture.
pub struct ExecSession<'a> {
    docker: &'a Docker,
    container: &'a str,
    argv: &'a [String],
}

impl<'a> ExecSession<'a> {
    pub fn new(docker: &'a Docker, container: &'a str, argv: &'a [String]) -> Self {
        Self {
            docker,
            container,
            argv,
        }
    }

    /// Run the command. The timeout in `limits` covers every engine call,
    /// from creating the exec to reading its exit code.
    pub async fn run(self, limits: &CaptureLimits) -> Result<ExecOutput> {
        if self.argv.is_empty() {
            return Err(RuntimeError::Invalid("exec command is empty".to_string()));
        }

        let deadline = limits.deadline_from(Instant::now());
        let options = CreateExecOptions {
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            cmd: Some(self.argv.to_vec()),
            ..Default::default()
        };
        let exec = match timeout_at(deadline, self.docker.create_exec(self.container, options)).await {
            Ok(result) => result.map_err(|e| engine_error("exec", self.container, e))?,
            Err(_) => return Ok(self.timed_out("create")),
        };

        let start = self.docker.start_exec(
            &exec.id,
            Some(StartExecOptions {
                detach: false,
                ..Default::default()
            }),
        );
        let started = match timeout_at(deadline, start).await {
            Ok(result) => result.map_err(|e| engine_error("exec", self.container, e))?,
            Err(_) => return Ok(self.timed_out("start")),
        };

        let StartExecResults::Attached { output, input } = started else {
            return Err(RuntimeError::Engine {
                status: 500,
                message: "exec started detached".to_string(),
            });
        };
        // No interactive input.
        drop(input);

        let target = self.container.to_string();
        let captured = capture_stream_until(
            output.map(move |item| log_chunk(item, &target)),
            deadline,
            limits,
        )
        .await?;

        if !captured.end.is_complete() {
            // The process may still be running inside the container; the
            // engine offers no way to kill an exec.
            warn!(
                container = self.container,
                exec = %exec.id,
                end = ?captured.end,
                "Exec capture ended before the command finished"
            );
            return Ok(ExecOutput::from_capture(captured, None));
        }

        let exit_code = match timeout_at(deadline, self.exit_code(&exec.id)).await {
            Ok(code) => code,
            Err(_) => {
                warn!(container = self.container, exec = %exec.id, "Exit code lookup outlived the exec deadline");
                let captured = Captured {
                    end: CaptureEnd::TimedOut,
                    ..captured
                };
                return Ok(ExecOutput::from_capture(captured, None));
            }
        };

        debug!(container = self.container, ?exit_code, bytes = captured.output.len(), "Exec finished");
        Ok(ExecOutput::from_capture(captured, exit_code))
    }

    fn timed_out(&self, step: &str) -> ExecOutput {
        warn!(container = self.container, step, "Exec deadline elapsed before output was attached");
        ExecOutput::from_capture(
            Captured {
                output: String::new(),
                end: CaptureEnd::TimedOut,
            },
            None,
        )
    }

    async fn exit_code(&self, exec_id: &str) -> Option<i64> {
        match self.docker.inspect_exec(exec_id).await {
            Ok(inspect) => inspect.exit_code,
            Err(e) => {
                warn!(exec = exec_id, error = %e, "Could not read exec exit code");
                None
            }
        }
    }
}

/// Reads the most recent log lines of a container.
pub struct LogReader<'a> {
    docker: &'a Docker,
    container: &'a str,
    tail: usize,
}

impl<'a> LogReader<'a> {
    pub fn new(docker: &'a Docker, container: &'a str, tail: usize) -> Self {
        Self {
            docker,
            container,
            tail,
        }
    }

    /// Read without following. A capture that outlives `limits.timeout` is an
    /// error; hitting the byte budget returns the truncated text.
    pub async fn read(self, limits: &CaptureLimits) -> Result<String> {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            tail: self.tail.to_string(),
            ..Default::default()
        };
        let target = self.container.to_string();
        let stream = self
            .docker
            .logs(self.container, Some(options))
            .map(move |item| log_chunk(item, &target));

        let captured = capture_stream(stream, limits).await?;
        match captured.end {
            CaptureEnd::Eof => Ok(captured.output),
            CaptureEnd::LimitReached => {
                warn!(container = self.container, max_bytes = limits.max_bytes, "Log output truncated");
                Ok(captured.output)
            }
            CaptureEnd::TimedOut => Err(RuntimeError::Timeout(format!("logs {}", self.container))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_chunk_unwraps_every_channel() {
        let stdout = log_chunk(
            Ok(LogOutput::StdOut {
                message: Bytes::from_static(b"out"),
            }),
            "c1",
        );
        let stderr = log_chunk(
            Ok(LogOutput::StdErr {
                message: Bytes::from_static(b"err"),
            }),
            "c1",
        );
        assert_eq!(stdout.unwrap(), Bytes::from_static(b"out"));
        assert_eq!(stderr.unwrap(), Bytes::from_static(b"err"));
    }

    #[test]
    fn test_log_chunk_normalizes_errors() {
        let err = log_chunk(
            Err(BollardError::DockerResponseServerError {
                status_code: 404,
                message: "gone".to_string(),
            }),
            "c1",
        );
        assert_eq!(err, Err(RuntimeError::NotFound("c1".to_string())));
    }
}
