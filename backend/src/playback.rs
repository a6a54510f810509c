//! Playback orchestration: fetch a video, then stream it to a receiver.
//!
//! One [`PlaybackOrchestrator`] exists per server. It owns the session state
//! machine (`Stopped -> Downloading -> Streaming -> Stopped`, with `Erroring`
//! and `Stopping` as cleanup states) and at most one live process per stage.
//! `play` and `stop` are serialized by an async mutex that is held only
//! across state transitions, never while a stage runs, so `stop` can always
//! preempt an in-flight `play`.

use crate::events::EventBroadcaster;
use crate::process::{ProcessOutcome, StageCommand, SupervisedProcess};
use parking_lot::Mutex;
use rpitube_types::{PlaybackState, SessionId};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default yt-dlp format selection: H.264 video up to 1080p with AAC audio,
/// which the receiver decodes without transcoding.
pub const DEFAULT_FORMAT: &str = "bestvideo[height<=1080][vcodec^=avc]+bestaudio[acodec^=mp4a]/best[height<=1080][vcodec^=avc][acodec^=mp4a]";

/// Errors that end a `play` call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlayError {
    #[error("Download failed: {0}")]
    DownloadFailed(String),
    #[error("Downloaded file unavailable ({}): {reason}", .path.display())]
    ArtifactUnavailable { path: PathBuf, reason: String },
    #[error("Casting failed: {0}")]
    StreamFailed(String),
}

impl PlayError {
    /// Stable identifier for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            PlayError::DownloadFailed(_) => "download_failed",
            PlayError::ArtifactUnavailable { .. } => "artifact_unavailable",
            PlayError::StreamFailed(_) => "stream_failed",
        }
    }
}

/// How a `play` call ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Both stages ran to completion
    Completed,
    /// Stopped or preempted by another `play`
    Cancelled,
}

/// Builds the command lines of the two pipeline stages.
pub trait StageCommands: Send + Sync {
    /// Download `url` into `cache_dir` and write the final file path to `marker`.
    fn fetch(&self, url: &str, cache_dir: &Path, marker: &Path) -> StageCommand;

    /// Stream `media` to the receiver at `receiver`, exiting when playback ends.
    fn stream(&self, media: &Path, receiver: IpAddr) -> StageCommand;
}

/// yt-dlp for fetching, VLC's chromecast output for streaming.
#[derive(Debug, Clone)]
pub struct YtDlpVlcStages {
    pub fetcher: String,
    pub player: String,
    pub format: String,
    pub cookies_file: Option<PathBuf>,
    /// Password of VLC's HTTP interface
    pub vlc_password: String,
}

impl YtDlpVlcStages {
    pub fn new(vlc_password: impl Into<String>) -> Self {
        Self {
            fetcher: "yt-dlp".to_string(),
            player: default_player(),
            format: DEFAULT_FORMAT.to_string(),
            cookies_file: None,
            vlc_password: vlc_password.into(),
        }
    }
}

impl StageCommands for YtDlpVlcStages {
    fn fetch(&self, url: &str, cache_dir: &Path, marker: &Path) -> StageCommand {
        let output = cache_dir.join("%(title)s.%(ext)s");
        let mut args = vec![
            url.to_string(),
            "-f".to_string(),
            self.format.clone(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            "--merge-output-format".to_string(),
            "mkv".to_string(),
            "--print-to-file".to_string(),
            "after_move:filepath".to_string(),
            marker.to_string_lossy().into_owned(),
        ];
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        StageCommand::new(&self.fetcher, args)
    }

    fn stream(&self, media: &Path, receiver: IpAddr) -> StageCommand {
        StageCommand::new(
            &self.player,
            [
                media.to_string_lossy().into_owned(),
                "-I".to_string(),
                "http".to_string(),
                "--http-password".to_string(),
                self.vlc_password.clone(),
                "--sout".to_string(),
                "#chromecast".to_string(),
                format!("--sout-chromecast-ip={}", receiver),
                "--demux-filter=demux_chromecast".to_string(),
                "--play-and-exit".to_string(),
            ],
        )
    }
}

/// Platform default location of the VLC binary.
pub fn default_player() -> String {
    if cfg!(windows) {
        let program_files =
            std::env::var("ProgramFiles").unwrap_or_else(|_| r"C:\Program Files".to_string());
        format!(r"{}\VideoLAN\VLC\vlc.exe", program_files)
    } else {
        "vlc".to_string()
    }
}

/// Filesystem and process settings of the orchestrator.
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub cache_dir: PathBuf,
    /// File the fetch stage writes the downloaded path to
    pub marker_path: PathBuf,
    /// Log every spawned command line
    pub verbose: bool,
    /// Time a stage gets to exit after SIGTERM before it is killed
    pub stop_grace: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("videos"),
            marker_path: PathBuf::from("video_filepath.txt"),
            verbose: false,
            stop_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct Session {
    id: Option<SessionId>,
    state: PlaybackState,
    receiver: Option<IpAddr>,
    fetch: Option<SupervisedProcess>,
    stream: Option<SupervisedProcess>,
}

impl Session {
    fn is_idle(&self) -> bool {
        self.state == PlaybackState::Stopped && self.fetch.is_none() && self.stream.is_none()
    }
}

/// Owner of the playback session.
#[derive(Clone)]
pub struct PlaybackOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    settings: PlaybackSettings,
    stages: Arc<dyn StageCommands>,
    events: EventBroadcaster,
    /// Serializes play/stop transitions
    control: tokio::sync::Mutex<()>,
    session: Mutex<Session>,
}

impl PlaybackOrchestrator {
    pub fn new(
        settings: PlaybackSettings,
        stages: Arc<dyn StageCommands>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                settings,
                stages,
                events,
                control: tokio::sync::Mutex::new(()),
                session: Mutex::new(Session::default()),
            }),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.session.lock().state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.session.lock().id
    }

    /// Receiver of the current session.
    pub fn receiver(&self) -> Option<IpAddr> {
        self.inner.session.lock().receiver
    }

    /// Download `url` and cast it to `receiver`.
    ///
    /// An active session is stopped first. Returns
    /// [`PlayOutcome::Cancelled`] when this session is stopped or preempted
    /// while a stage is running.
    ///
    /// The session runs on its own task. Dropping the returned future
    /// detaches from it without leaving the session half torn down.
    pub async fn play(&self, receiver: IpAddr, url: &str) -> Result<PlayOutcome, PlayError> {
        let orchestrator = self.clone();
        let url = url.to_string();
        let session =
            tokio::spawn(async move { orchestrator.run_session(receiver, &url).await });

        match session.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // Runtime shutdown
            Err(_) => Ok(PlayOutcome::Cancelled),
        }
    }

    async fn run_session(&self, receiver: IpAddr, url: &str) -> Result<PlayOutcome, PlayError> {
        let events = &self.inner.events;
        let settings = &self.inner.settings;

        // Start the fetch stage
        let (session_id, fetch) = {
            let _control = self.inner.control.lock().await;

            let (idle, active) = {
                let session = self.inner.session.lock();
                (session.is_idle(), session.state.is_active())
            };
            if !idle {
                if active {
                    events.info("New cast request, stopping the current session");
                }
                self.stop_locked().await;
            }

            let session_id = Uuid::new_v4();
            {
                let mut session = self.inner.session.lock();
                session.id = Some(session_id);
                session.receiver = Some(receiver);
            }
            self.set_state(session_id, PlaybackState::Downloading);

            if let Err(e) = tokio::fs::create_dir_all(&settings.cache_dir).await {
                let reason = format!(
                    "cannot create cache directory {}: {}",
                    settings.cache_dir.display(),
                    e
                );
                return Err(self.fail(session_id, PlayError::DownloadFailed(reason)).await);
            }
            remove_marker(&settings.marker_path).await;

            events.info(format!("Downloading {}", url));
            let command = self
                .inner
                .stages
                .fetch(url, &settings.cache_dir, &settings.marker_path);
            let fetch = self.spawn(&command);
            self.inner.session.lock().fetch = Some(fetch.clone());
            (session_id, fetch)
        };

        let started = Instant::now();
        let outcome = fetch.wait().await;

        // Start the stream stage
        let stream = {
            let _control = self.inner.control.lock().await;

            if !self.is_current(session_id, PlaybackState::Downloading) {
                debug!("Session {} cancelled during download", session_id);
                return Ok(PlayOutcome::Cancelled);
            }
            self.inner.session.lock().fetch = None;

            if let Some(reason) = failure_reason(outcome) {
                return Err(self.fail(session_id, PlayError::DownloadFailed(reason)).await);
            }
            events.info(format!(
                "Downloaded in {} ms",
                started.elapsed().as_millis()
            ));

            self.set_state(session_id, PlaybackState::Streaming);

            let media = match read_marker(&settings.marker_path).await {
                Ok(media) => media,
                Err(reason) => {
                    let error = PlayError::ArtifactUnavailable {
                        path: settings.marker_path.clone(),
                        reason,
                    };
                    return Err(self.fail(session_id, error).await);
                }
            };

            events.info(format!("Casting {} to {}", media.display(), receiver));
            let command = self.inner.stages.stream(&media, receiver);
            let stream = self.spawn(&command);
            self.inner.session.lock().stream = Some(stream.clone());
            stream
        };

        let outcome = stream.wait().await;

        let _control = self.inner.control.lock().await;

        if !self.is_current(session_id, PlaybackState::Streaming) {
            debug!("Session {} cancelled during streaming", session_id);
            return Ok(PlayOutcome::Cancelled);
        }
        self.inner.session.lock().stream = None;

        if let Some(reason) = failure_reason(outcome) {
            return Err(self.fail(session_id, PlayError::StreamFailed(reason)).await);
        }

        events.info("Casting finished");
        self.stop_locked().await;
        Ok(PlayOutcome::Completed)
    }

    /// Stop the current session. Idempotent.
    ///
    /// Returns once every live stage has exited and the marker is removed.
    pub async fn stop(&self) {
        let _control = self.inner.control.lock().await;
        self.stop_locked().await;
    }

    /// Caller holds `control`.
    async fn stop_locked(&self) {
        let (session_id, fetch, stream) = {
            let mut session = self.inner.session.lock();
            if session.is_idle() {
                (None, None, None)
            } else {
                session.state = PlaybackState::Stopping;
                (session.id, session.fetch.take(), session.stream.take())
            }
        };

        let was_active = session_id.is_some() || fetch.is_some() || stream.is_some();
        if was_active {
            self.inner
                .events
                .state_changed(session_id, PlaybackState::Stopping);
            for process in fetch.iter().chain(stream.iter()) {
                let outcome = process.kill().await;
                debug!("{} ended: {:?}", process.name(), outcome);
            }
        }

        remove_marker(&self.inner.settings.marker_path).await;

        if was_active {
            {
                let mut session = self.inner.session.lock();
                session.state = PlaybackState::Stopped;
                session.id = None;
                session.receiver = None;
            }
            self.inner
                .events
                .state_changed(None, PlaybackState::Stopped);
            self.inner.events.info("Stopped");
        }
    }

    /// Report `error`, clean up and hand the error back. Caller holds `control`.
    async fn fail(&self, session_id: SessionId, error: PlayError) -> PlayError {
        self.set_state(session_id, PlaybackState::Erroring);
        self.inner.events.error(error_message(&error), Some(error.to_string()));
        self.stop_locked().await;
        error
    }

    fn set_state(&self, session_id: SessionId, state: PlaybackState) {
        self.inner.session.lock().state = state;
        self.inner.events.state_changed(Some(session_id), state);
    }

    fn is_current(&self, session_id: SessionId, expected: PlaybackState) -> bool {
        let session = self.inner.session.lock();
        session.id == Some(session_id) && session.state == expected
    }

    fn spawn(&self, command: &StageCommand) -> SupervisedProcess {
        if self.inner.settings.verbose {
            self.inner.events.info(format!("Spawning: {}", command));
        }
        SupervisedProcess::spawn(command, &self.inner.events, self.inner.settings.stop_grace)
    }
}

fn error_message(error: &PlayError) -> &'static str {
    match error {
        PlayError::DownloadFailed(_) => "Error while downloading",
        PlayError::ArtifactUnavailable { .. } => "Error while reading the downloaded file path",
        PlayError::StreamFailed(_) => "Error while casting",
    }
}

fn failure_reason(outcome: ProcessOutcome) -> Option<String> {
    match outcome {
        ProcessOutcome::Success => None,
        ProcessOutcome::Failed(reason) => Some(reason),
        ProcessOutcome::Killed => Some("process was killed".to_string()),
    }
}

async fn read_marker(path: &Path) -> Result<PathBuf, String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| e.to_string())?;
    // yt-dlp appends a newline per printed value
    let media = contents.lines().last().unwrap_or("").trim();
    if media.is_empty() {
        return Err("marker file is empty".to_string());
    }
    Ok(PathBuf::from(media))
}

async fn remove_marker(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
