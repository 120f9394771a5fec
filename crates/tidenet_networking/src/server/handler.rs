//! Match start/end policy, separate from the tick loop.

use super::players::InitialMatchPlayerData;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tidenet_shared::PlayerId;

/// What the server should do after consulting its handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerDecision {
    /// Nothing changes.
    Continue,
    /// Start ticking the match.
    StartMatch,
    /// End the match because it never started in time.
    EndMatch,
}

/// Server lifecycle callbacks. Every method returns the decision that
/// follows from the event.
pub trait ServerHandler: Send {
    /// Roster is known; `now` starts any startup timer.
    fn on_server_init(&mut self, roster: &[InitialMatchPlayerData], now: Instant) -> HandlerDecision;

    /// A player (human or hosted bot) joined.
    fn on_player_connected(&mut self, player: PlayerId) -> HandlerDecision;

    /// A player left.
    fn on_player_disconnected(&mut self, player: PlayerId) -> HandlerDecision;

    /// Periodic check, called once per server tick attempt.
    fn poll(&mut self, now: Instant) -> HandlerDecision;
}

/// Starts once every seat is taken; gives up after a timeout.
#[derive(Debug, Clone)]
pub struct DefaultServerHandler {
    start_timeout: Duration,
    expected: usize,
    connected: BTreeSet<PlayerId>,
    deadline: Option<Instant>,
    started: bool,
}

impl DefaultServerHandler {
    /// Handler that waits at most `start_timeout` for the roster to fill.
    #[must_use]
    pub fn new(start_timeout: Duration) -> Self {
        Self {
            start_timeout,
            expected: 0,
            connected: BTreeSet::new(),
            deadline: None,
            started: false,
        }
    }

    /// Whether the start decision was already given.
    #[must_use]
    pub const fn started(&self) -> bool {
        self.started
    }
}

impl ServerHandler for DefaultServerHandler {
    fn on_server_init(&mut self, roster: &[InitialMatchPlayerData], now: Instant) -> HandlerDecision {
        self.expected = roster.len();
        self.deadline = Some(now + self.start_timeout);
        let humans = roster.iter().filter(|p| !p.is_bot).count();
        tracing::info!(humans, bots = roster.len() - humans, "match initialized");
        HandlerDecision::Continue
    }

    fn on_player_connected(&mut self, player: PlayerId) -> HandlerDecision {
        tracing::info!(%player, "player connected");
        self.connected.insert(player);
        if self.started || self.connected.len() != self.expected {
            return HandlerDecision::Continue;
        }
        self.started = true;
        HandlerDecision::StartMatch
    }

    fn on_player_disconnected(&mut self, player: PlayerId) -> HandlerDecision {
        tracing::info!(%player, "player disconnected");
        self.connected.remove(&player);
        HandlerDecision::Continue
    }

    fn poll(&mut self, now: Instant) -> HandlerDecision {
        match self.deadline {
            Some(deadline) if !self.started && now >= deadline => {
                tracing::warn!(
                    connected = self.connected.len(),
                    expected = self.expected,
                    "forcing match end, not every player joined in time"
                );
                self.deadline = None;
                HandlerDecision::EndMatch
            }
            _ => HandlerDecision::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<InitialMatchPlayerData> {
        vec![
            InitialMatchPlayerData::human(PlayerId(0), "alice"),
            InitialMatchPlayerData::bot(PlayerId(1), "bot", 1.0),
        ]
    }

    #[test]
    fn test_starts_when_full() {
        let mut handler = DefaultServerHandler::new(Duration::from_secs(30));
        let now = Instant::now();
        assert_eq!(handler.on_server_init(&roster(), now), HandlerDecision::Continue);
        assert_eq!(handler.on_player_connected(PlayerId(1)), HandlerDecision::Continue);
        assert_eq!(handler.on_player_connected(PlayerId(0)), HandlerDecision::StartMatch);
        // Reconnect after start does not start twice
        assert_eq!(handler.on_player_disconnected(PlayerId(0)), HandlerDecision::Continue);
        assert_eq!(handler.on_player_connected(PlayerId(0)), HandlerDecision::Continue);
        assert_eq!(handler.poll(now + Duration::from_secs(60)), HandlerDecision::Continue);
    }

    #[test]
    fn test_times_out_once() {
        let mut handler = DefaultServerHandler::new(Duration::from_secs(30));
        let now = Instant::now();
        handler.on_server_init(&roster(), now);
        handler.on_player_connected(PlayerId(0));
        assert_eq!(handler.poll(now + Duration::from_secs(29)), HandlerDecision::Continue);
        assert_eq!(handler.poll(now + Duration::from_secs(30)), HandlerDecision::EndMatch);
        assert_eq!(handler.poll(now + Duration::from_secs(31)), HandlerDecision::Continue);
        assert!(!handler.started());
    }
}
