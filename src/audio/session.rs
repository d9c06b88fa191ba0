//! Playback session state machine.
//!
//! `NotStarted -> Playing <-> Paused`, `Playing | Paused -> Ended`.
//! Only transport events move the state; `Ended` is terminal.

use crate::params::CaptureConstraints;

/// Where the session's audio comes from
#[derive(Debug, Clone, PartialEq)]
pub enum MediaDescriptor {
    /// Local path or `file://` URL
    Url(String),

    /// Live input device
    Capture(CaptureConstraints),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    NotStarted,
    Playing,
    Paused,
    Ended,
}

/// Transport notification emitted by a media source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Playing,
    Paused,
    Ended,
}

/// One playback/capture lifecycle
#[derive(Debug, Clone)]
pub struct AudioSession {
    descriptor: MediaDescriptor,
    state: PlaybackState,
    played: bool,
    initialized: bool,
    current_time: f64,
}

impl AudioSession {
    pub fn new(descriptor: MediaDescriptor) -> Self {
        Self {
            descriptor,
            state: PlaybackState::NotStarted,
            played: false,
            initialized: false,
            current_time: 0.0,
        }
    }

    pub fn descriptor(&self) -> &MediaDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_ended(&self) -> bool {
        self.state == PlaybackState::Ended
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Playback position (seconds) as last reported by the media source
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn set_current_time(&mut self, seconds: f64) {
        self.current_time = seconds;
    }

    /// Apply a `Playing` event.
    ///
    /// Returns `None` when the event is rejected, otherwise whether this is
    /// the first time the session has played.
    pub fn begin_playing(&mut self) -> Option<bool> {
        if self.is_ended() {
            return None;
        }
        let first = !self.played;
        self.played = true;
        self.state = PlaybackState::Playing;
        Some(first)
    }

    /// Apply a `Paused` event; only a playing session can pause
    pub fn pause(&mut self) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }
        self.state = PlaybackState::Paused;
        true
    }

    /// Apply an `Ended` event; a session that never started cannot end
    pub fn end(&mut self) -> bool {
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused => {
                self.state = PlaybackState::Ended;
                true
            }
            PlaybackState::NotStarted | PlaybackState::Ended => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> AudioSession {
        AudioSession::new(MediaDescriptor::Capture(CaptureConstraints::default()))
    }

    #[test]
    fn test_first_play_reported_once() {
        let mut session = session();
        assert_eq!(session.begin_playing(), Some(true));
        assert!(session.pause());
        assert_eq!(session.begin_playing(), Some(false));
        assert!(session.is_playing());
    }

    #[test]
    fn test_pause_requires_playing() {
        let mut session = session();
        assert!(!session.pause());
        assert_eq!(session.state(), PlaybackState::NotStarted);
    }

    #[test]
    fn test_ended_is_terminal() {
        let mut session = session();
        session.begin_playing();
        assert!(session.end());

        assert_eq!(session.begin_playing(), None);
        assert!(!session.pause());
        assert!(!session.end());
        assert_eq!(session.state(), PlaybackState::Ended);
    }

    #[test]
    fn test_cannot_end_before_start() {
        let mut session = session();
        assert!(!session.end());
        assert_eq!(session.state(), PlaybackState::NotStarted);
    }
}
