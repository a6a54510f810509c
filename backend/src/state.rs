//! Application state management.

use crate::config::Config;
use crate::discovery::DiscoveryService;
use crate::events::EventBroadcaster;
use crate::playback::{PlaybackOrchestrator, StageCommands};
use parking_lot::RwLock;
use rpitube_types::StatusResponse;
use std::net::IpAddr;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    /// Event broadcaster for the live log stream
    events: EventBroadcaster,
    orchestrator: PlaybackOrchestrator,
    discovery: DiscoveryService,
    /// Receiver used when a cast request names none
    default_receiver: RwLock<Option<IpAddr>>,
}

impl AppState {
    /// Create state with the yt-dlp/VLC pipeline described by `config`.
    pub fn new(config: Config) -> Self {
        let stages = Arc::new(config.stage_commands());
        Self::with_stages(config, stages)
    }

    /// Create state with custom stage commands.
    pub fn with_stages(config: Config, stages: Arc<dyn StageCommands>) -> Self {
        let discovery = DiscoveryService::new(config.query_interval);
        Self::with_parts(config, stages, discovery)
    }

    /// Create state with custom stage commands and discovery service.
    pub fn with_parts(
        config: Config,
        stages: Arc<dyn StageCommands>,
        discovery: DiscoveryService,
    ) -> Self {
        let events = EventBroadcaster::default();
        let orchestrator =
            PlaybackOrchestrator::new(config.playback_settings(), stages, events.clone());
        let default_receiver = RwLock::new(config.receiver_ip);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                events,
                orchestrator,
                discovery,
                default_receiver,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    pub fn orchestrator(&self) -> &PlaybackOrchestrator {
        &self.inner.orchestrator
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.inner.discovery
    }

    pub fn default_receiver(&self) -> Option<IpAddr> {
        *self.inner.default_receiver.read()
    }

    pub fn set_default_receiver(&self, receiver: Option<IpAddr>) {
        *self.inner.default_receiver.write() = receiver;
    }

    /// Snapshot of the playback session.
    pub fn status(&self) -> StatusResponse {
        let orchestrator = self.orchestrator();
        StatusResponse {
            state: orchestrator.state(),
            session_id: orchestrator.session_id(),
            receiver: orchestrator.receiver().or_else(|| self.default_receiver()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpitube_types::PlaybackState;

    #[test]
    fn test_status_falls_back_to_default_receiver() {
        let state = AppState::new(Config::default());
        let status = state.status();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert!(status.session_id.is_none());
        assert!(status.receiver.is_none());

        let receiver: IpAddr = "192.168.1.42".parse().unwrap();
        state.set_default_receiver(Some(receiver));
        assert_eq!(state.status().receiver, Some(receiver));
    }
}
