//! Media session collaborator. RTP itself is outside this crate; the manager
//! tracks which remote endpoint a call's audio would flow to and where the
//! local audio comes from.

use crate::{
    config::{Config, MediaMode},
    sdp::{parse_media, MediaDescription},
    Result,
};
use async_trait::async_trait;
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::{debug, info, warn};

#[async_trait]
pub trait MediaManager: Send + Sync {
    /// Start audio towards the endpoint described by the remote SDP.
    async fn start_session(&self, remote_sdp: &[u8]) -> Result<()>;
    async fn stop_session(&self) -> Result<()>;
    fn is_active(&self) -> bool;
}

pub type MediaManagerRef = Arc<dyn MediaManager>;

/// Where outgoing audio is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundSource {
    File(PathBuf),
}

impl SoundSource {
    /// Only file playback has a source; every other mode yields none and the
    /// call goes ahead without audio.
    pub fn from_config(config: &Config) -> Option<SoundSource> {
        match config.media_mode {
            MediaMode::File => config.media_file.clone().map(SoundSource::File),
            MediaMode::CaptureAndPlayback | MediaMode::Echo => {
                warn!("media mode {:?} has no sound source", config.media_mode);
                None
            }
            MediaMode::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSession {
    pub remote: SocketAddr,
    pub payload_type: u8,
    pub source: Option<SoundSource>,
}

pub struct SessionMediaManager {
    mode: MediaMode,
    source: Option<SoundSource>,
    debug: bool,
    session: Mutex<Option<MediaSession>>,
}

impl SessionMediaManager {
    pub fn new(config: &Config) -> Self {
        SessionMediaManager {
            mode: config.media_mode,
            source: SoundSource::from_config(config),
            debug: config.media_debug,
            session: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> MediaMode {
        self.mode
    }

    pub fn session(&self) -> Option<MediaSession> {
        self.session.lock().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl MediaManager for SessionMediaManager {
    async fn start_session(&self, remote_sdp: &[u8]) -> Result<()> {
        let MediaDescription {
            address,
            port,
            payload_types,
        } = parse_media(remote_sdp)?;
        let source = match &self.source {
            Some(SoundSource::File(path)) => {
                tokio::fs::metadata(path).await?;
                self.source.clone()
            }
            None => {
                info!("no sound source for {:?}, call continues without audio", self.mode);
                None
            }
        };
        let session = MediaSession {
            remote: SocketAddr::new(address, port),
            payload_type: payload_types.first().copied().unwrap_or_default(),
            source,
        };
        if self.debug {
            debug!(?session, "media session started");
        }
        if let Ok(mut s) = self.session.lock() {
            *s = Some(session);
        }
        Ok(())
    }

    async fn stop_session(&self) -> Result<()> {
        if let Ok(mut s) = self.session.lock() {
            if s.take().is_some() {
                debug!("media session stopped");
            }
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REMOTE: &str = "v=0\r\nc=IN IP4 192.0.2.1\r\nm=audio 4000 RTP/AVP 0 101\r\n";

    #[test]
    fn test_sound_source_only_for_file_mode() {
        let mut config = Config {
            media_mode: MediaMode::File,
            media_file: Some(PathBuf::from("/tmp/ring.wav")),
            ..Default::default()
        };
        assert_eq!(
            SoundSource::from_config(&config),
            Some(SoundSource::File(PathBuf::from("/tmp/ring.wav")))
        );
        for mode in [MediaMode::CaptureAndPlayback, MediaMode::Echo, MediaMode::None] {
            config.media_mode = mode;
            assert_eq!(SoundSource::from_config(&config), None);
        }
    }

    #[tokio::test]
    async fn test_session_without_audio() -> crate::Result<()> {
        let config = Config {
            media_mode: MediaMode::Echo,
            ..Default::default()
        };
        let media = SessionMediaManager::new(&config);
        media.start_session(REMOTE.as_bytes()).await?;
        assert!(media.is_active());
        let session = media.session().expect("session");
        assert_eq!(session.remote, "192.0.2.1:4000".parse::<SocketAddr>()?);
        assert_eq!(session.payload_type, 0);
        assert_eq!(session.source, None);

        media.stop_session().await?;
        assert!(!media.is_active());
        media.stop_session().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_media_file_fails() {
        let config = Config {
            media_mode: MediaMode::File,
            media_file: Some(PathBuf::from("/nonexistent/sipua/ring.raw")),
            ..Default::default()
        };
        let media = SessionMediaManager::new(&config);
        assert!(media.start_session(REMOTE.as_bytes()).await.is_err());
        assert!(!media.is_active());
        assert!(media.start_session(b"garbage").await.is_err());
    }
}
