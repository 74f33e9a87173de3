//! External process invocation.
//!
//! Every component that shells out (key generation, interface detection,
//! service control) goes through [`ProcessRunner`] so tests can swap in
//! [`testing::FakeRunner`] and never spawn anything.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::Error;

/// Result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    pub fn describe_exit(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

impl From<std::process::Output> for Output {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("running {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

impl RunError {
    /// Maps a runner failure onto the crate taxonomy. Timeouts always keep
    /// their own kind; spawn failures are classified by the caller.
    pub fn into_error(self, on_spawn: impl FnOnce(String) -> Error) -> Error {
        match self {
            RunError::Timeout { command, timeout } => Error::Timeout { command, timeout },
            spawn @ RunError::Spawn { .. } => on_spawn(spawn.to_string()),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `program` with `args`, optionally feeding `stdin`, and waits for it.
    /// A non-zero exit is not an error at this level.
    async fn run(&self, program: &str, args: &[&str], stdin: Option<&str>)
    -> Result<Output, RunError>;
}

pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs real processes on the tokio runtime, killing any that outlive `timeout`.
#[derive(Debug, Clone)]
pub struct TokioRunner {
    timeout: Duration,
}

impl TokioRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<Output, RunError> {
        let command = command_line(program, args);
        tracing::debug!(%command, "running");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                command: command.clone(),
                source,
            })?;

        let input = stdin.map(str::to_owned);
        let finished = async move {
            if let (Some(input), Some(mut pipe)) = (input, child.stdin.take()) {
                pipe.write_all(input.as_bytes()).await?;
            }
            child.wait_with_output().await
        };

        match tokio::time::timeout(self.timeout, finished).await {
            Ok(Ok(output)) => Ok(output.into()),
            Ok(Err(source)) => Err(RunError::Spawn { command, source }),
            Err(_) => Err(RunError::Timeout {
                command,
                timeout: self.timeout,
            }),
        }
    }
}

pub mod testing {
    //! Scripted runner for tests.

    use super::{Output, ProcessRunner, RunError, command_line};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, PoisonError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub enum Reply {
        Output(Output),
        /// Succeeds with a fresh 44-character key on every call.
        FreshKey,
        /// Succeeds with stdout computed from the provided stdin.
        Derive(fn(&str) -> String),
        SpawnFailure,
        Timeout,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Invocation {
        pub program: String,
        pub args: Vec<String>,
        pub stdin: Option<String>,
    }

    impl Invocation {
        pub fn command_line(&self) -> String {
            let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
            command_line(&self.program, &args)
        }
    }

    /// Replies are keyed by full command line. Queued replies are consumed in
    /// order and the last one sticks. Unscripted commands fail to spawn.
    #[derive(Debug, Default)]
    pub struct FakeRunner {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<Invocation>>,
        keys_issued: AtomicUsize,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Scripts `<mode> genkey` / `<mode> pubkey` the way the real tool behaves.
        pub fn with_key_tool(mode: &str) -> Self {
            let runner = Self::new();
            runner.on(&format!("{mode} genkey"), Reply::FreshKey);
            runner.on(&format!("{mode} pubkey"), Reply::Derive(fake_public_key));
            runner
        }

        pub fn on(&self, command: &str, reply: Reply) -> &Self {
            self.replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(command.to_string())
                .or_default()
                .push_back(reply);
            self
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        pub fn command_lines(&self) -> Vec<String> {
            self.calls().iter().map(Invocation::command_line).collect()
        }

        fn next_reply(&self, command: &str) -> Option<Reply> {
            let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
            let queue = replies.get_mut(command)?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        }
    }

    /// Public half of a fake key: same length, distinct prefix.
    pub fn fake_public_key(private: &str) -> String {
        let private = private.trim();
        match private.strip_prefix("prv") {
            Some(rest) => format!("pub{rest}\n"),
            None => format!("pub{private}\n"),
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            stdin: Option<&str>,
        ) -> Result<Output, RunError> {
            let invocation = Invocation {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                stdin: stdin.map(str::to_owned),
            };
            let command = invocation.command_line();
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(invocation);

            match self.next_reply(&command) {
                Some(Reply::Output(output)) => Ok(output),
                Some(Reply::FreshKey) => {
                    let n = self.keys_issued.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(Output::ok(format!("prv{n:0>40}=\n")))
                }
                Some(Reply::Derive(derive)) => Ok(Output::ok(derive(stdin.unwrap_or_default()))),
                Some(Reply::Timeout) => Err(RunError::Timeout {
                    command,
                    timeout: Duration::from_secs(5),
                }),
                Some(Reply::SpawnFailure) | None => Err(RunError::Spawn {
                    command,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                }),
            }
        }
    }
}
