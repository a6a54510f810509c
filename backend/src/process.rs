//! Supervision of external pipeline stages.
//!
//! A [`SupervisedProcess`] owns one child process. Its stdout and stderr are
//! forwarded line by line to the [`EventBroadcaster`], its completion is a
//! single-fire [`ProcessOutcome`], and [`SupervisedProcess::kill`] resolves
//! only once the child has actually exited.

use crate::events::EventBroadcaster;
use rpitube_types::OutputStream;
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Time allowed for output forwarders to drain after the child exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// An external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl StageCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Short name used to tag output lines (`vlc` for `/usr/bin/vlc`).
    pub fn display_name(&self) -> String {
        Path::new(&self.program)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }

    /// Shell-like rendering for logs. Arguments containing spaces are quoted.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{}\"", part)
                } else {
                    part.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited with status 0
    Success,
    /// Could not start, or exited with a non-zero status or signal
    Failed(String),
    /// Terminated through [`SupervisedProcess::kill`]
    Killed,
}

/// Handle to a supervised child process. Clones share the same child.
#[derive(Clone)]
pub struct SupervisedProcess {
    name: String,
    pid: Option<u32>,
    kill_tx: mpsc::Sender<()>,
    outcome: watch::Receiver<Option<ProcessOutcome>>,
}

impl SupervisedProcess {
    /// Spawn `command` under supervision.
    ///
    /// A spawn failure does not return an error: the handle completes
    /// immediately with [`ProcessOutcome::Failed`].
    pub fn spawn(command: &StageCommand, events: &EventBroadcaster, grace: Duration) -> Self {
        let name = command.display_name();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::channel(1);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so helpers the stage forks are signalled too
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("failed to start {}: {}", command.program, e);
                warn!("{}", reason);
                outcome_tx.send_replace(Some(ProcessOutcome::Failed(reason)));
                return Self {
                    name,
                    pid: None,
                    kill_tx,
                    outcome: outcome_rx,
                };
            }
        };

        let pid = child.id();
        debug!("Spawned {} (pid {:?})", name, pid);

        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward_lines(stdout, &name, OutputStream::Stdout, events));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward_lines(stderr, &name, OutputStream::Stderr, events));
        }

        let task_name = name.clone();
        tokio::spawn(async move {
            let outcome = supervise(child, &task_name, kill_rx, grace).await;

            for mut forwarder in forwarders {
                if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut forwarder)
                    .await
                    .is_err()
                {
                    forwarder.abort();
                }
            }

            debug!("{} finished: {:?}", task_name, outcome);
            outcome_tx.send_replace(Some(outcome));
        });

        Self {
            name,
            pid,
            kill_tx,
            outcome: outcome_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Outcome if the process already finished.
    pub fn outcome(&self) -> Option<ProcessOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for completion. Resolves exactly once per process; later calls
    /// return the same outcome.
    pub async fn wait(&self) -> ProcessOutcome {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            // The supervisor task was dropped with the runtime
            Err(_) => None,
        };
        outcome.unwrap_or(ProcessOutcome::Killed)
    }

    /// Ask the process to terminate and wait until it has exited.
    ///
    /// No-op on a process that already finished; the original outcome is
    /// returned unchanged.
    pub async fn kill(&self) -> ProcessOutcome {
        if let Some(outcome) = self.outcome() {
            return outcome;
        }
        info!("Stopping {} (pid {:?})", self.name, self.pid);
        // A full channel means a kill is already pending
        let _ = self.kill_tx.try_send(());
        self.wait().await
    }
}

async fn supervise(
    mut child: Child,
    name: &str,
    mut kill_rx: mpsc::Receiver<()>,
    grace: Duration,
) -> ProcessOutcome {
    tokio::select! {
        status = child.wait() => outcome_from_status(status),
        Some(()) = kill_rx.recv() => terminate(&mut child, name, grace).await,
    }
}

fn outcome_from_status(status: std::io::Result<ExitStatus>) -> ProcessOutcome {
    match status {
        Ok(status) if status.success() => ProcessOutcome::Success,
        Ok(status) => ProcessOutcome::Failed(format!("exited with {}", status)),
        Err(e) => ProcessOutcome::Failed(format!("failed to wait for process: {}", e)),
    }
}

/// SIGTERM the process group, then force-kill once `grace` runs out.
#[cfg_attr(not(unix), allow(unused_variables))]
async fn terminate(child: &mut Child, name: &str, grace: Duration) -> ProcessOutcome {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGTERM);
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return ProcessOutcome::Killed;
            }
            warn!("{} still running after {:?}, killing", name, grace);
            signal_group(pid, libc::SIGKILL);
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill {}: {}", name, e);
    }
    ProcessOutcome::Killed
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // Negative pid addresses the whole process group
    let result = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if result != 0 {
        debug!(
            "kill(-{}, {}) failed: {}",
            pid,
            signal,
            std::io::Error::last_os_error()
        );
    }
}

fn forward_lines<R>(
    reader: R,
    name: &str,
    stream: OutputStream,
    events: &EventBroadcaster,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let name = name.to_string();
    let events = events.clone();
    tokio::spawn(async move {
        // Stages print titles in arbitrary encodings; read bytes, not UTF-8 lines
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
                    events.process_output(&name, stream, line.to_string());
                }
                Err(e) => {
                    debug!("Stopped reading {} output: {}", name, e);
                    break;
                }
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use rpitube_types::CastEvent;

    fn sh(script: &str) -> StageCommand {
        StageCommand::new("/bin/sh", ["-c", script])
    }

    #[test]
    fn test_command_rendering() {
        let command = StageCommand::new("/usr/bin/vlc", ["My Video.mkv", "--play-and-exit"]);
        assert_eq!(command.display_name(), "vlc");
        assert_eq!(
            command.command_line(),
            "/usr/bin/vlc \"My Video.mkv\" --play-and-exit"
        );
        assert_eq!(StageCommand::new("yt-dlp", Vec::<String>::new()).display_name(), "yt-dlp");
    }

    #[tokio::test]
    async fn test_success_and_output_forwarding() {
        let events = EventBroadcaster::default();
        let mut rx = events.receiver();

        let process = SupervisedProcess::spawn(
            &sh("echo hello; echo oops >&2"),
            &events,
            Duration::from_secs(5),
        );

        assert_eq!(process.wait().await, ProcessOutcome::Success);
        // Completion is idempotent
        assert_eq!(process.wait().await, ProcessOutcome::Success);

        let mut lines = Vec::new();
        while let Ok(CastEvent::ProcessOutput {
            command,
            stream,
            line,
        }) = rx.try_recv()
        {
            assert_eq!(command, "sh");
            lines.push((stream, line));
        }
        lines.sort_by_key(|(stream, _)| *stream == OutputStream::Stderr);
        assert_eq!(
            lines,
            vec![
                (OutputStream::Stdout, "hello".to_string()),
                (OutputStream::Stderr, "oops".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_utf8_output_does_not_break_the_pipe() {
        let events = EventBroadcaster::default();
        let mut rx = events.receiver();

        let process = SupervisedProcess::spawn(
            &sh("printf 'caf\\351\\n'; sleep 0.3; echo after; exit 0"),
            &events,
            Duration::from_secs(5),
        );

        assert_eq!(process.wait().await, ProcessOutcome::Success);

        let mut lines = Vec::new();
        while let Ok(CastEvent::ProcessOutput { line, .. }) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["caf\u{FFFD}".to_string(), "after".to_string()]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let events = EventBroadcaster::default();
        let process = SupervisedProcess::spawn(&sh("exit 3"), &events, Duration::from_secs(5));

        match process.wait().await {
            ProcessOutcome::Failed(reason) => assert!(reason.contains('3'), "{}", reason),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let events = EventBroadcaster::default();
        let command = StageCommand::new("/nonexistent/rpitube-stage", Vec::<String>::new());
        let process = SupervisedProcess::spawn(&command, &events, Duration::from_secs(5));

        assert!(process.pid.is_none());
        assert!(matches!(process.wait().await, ProcessOutcome::Failed(_)));
        // Killing a process that never started is a no-op
        assert!(matches!(process.kill().await, ProcessOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_kill_waits_for_exit() {
        let events = EventBroadcaster::default();
        let process = SupervisedProcess::spawn(&sh("sleep 30"), &events, Duration::from_secs(5));

        let outcome = tokio::time::timeout(Duration::from_secs(10), process.kill())
            .await
            .expect("kill must not hang");
        assert_eq!(outcome, ProcessOutcome::Killed);
        assert_eq!(process.outcome(), Some(ProcessOutcome::Killed));

        // Second kill is a no-op
        assert_eq!(process.kill().await, ProcessOutcome::Killed);
    }

    #[tokio::test]
    async fn test_kill_escalates_after_grace() {
        let events = EventBroadcaster::default();
        let mut rx = events.receiver();
        let process = SupervisedProcess::spawn(
            &sh("trap '' TERM; echo ready; sleep 30"),
            &events,
            Duration::from_millis(200),
        );

        // Let the shell install its trap first
        let _ = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;

        let outcome = tokio::time::timeout(Duration::from_secs(10), process.kill())
            .await
            .expect("forced kill must not hang");
        assert_eq!(outcome, ProcessOutcome::Killed);
    }

    #[tokio::test]
    async fn test_kill_after_exit_keeps_outcome() {
        let events = EventBroadcaster::default();
        let process = SupervisedProcess::spawn(&sh("true"), &events, Duration::from_secs(5));

        assert_eq!(process.wait().await, ProcessOutcome::Success);
        assert_eq!(process.kill().await, ProcessOutcome::Success);
    }
}
