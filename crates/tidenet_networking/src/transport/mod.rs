//! # Transport Seams
//!
//! The sockets themselves live outside this crate. The tick loops only
//! need somewhere to put outgoing payloads:
//!
//! - Server: one unreliable snapshot per recipient per snapshot tick
//! - Client: one unreliable input package per tick
//!
//! Both sinks are fire-and-forget. A closed or full peer is not an error
//! for the tick loop; the payload is counted as dropped and ticking goes on.

use crossbeam_channel::{Sender, TrySendError};
use tidenet_shared::PlayerId;

/// Where the server puts per-player snapshots.
pub trait SnapshotSink: Send {
    /// Sends an encoded snapshot to `player` unreliably.
    fn send_snapshot(&mut self, player: PlayerId, payload: Vec<u8>);
}

/// Where a client puts its input.
pub trait InputSink: Send {
    /// Sends an encoded input package unreliably.
    fn send_input_unreliable(&mut self, package: Vec<u8>);
}

/// Payload counters of a channel-backed sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Payloads handed to the channel.
    pub packets_sent: u64,
    /// Bytes handed to the channel.
    pub bytes_sent: u64,
    /// Payloads lost to a full or closed channel.
    pub packets_dropped: u64,
}

impl TransportStats {
    fn record<T>(&mut self, len: usize, result: Result<(), TrySendError<T>>) {
        match result {
            Ok(()) => {
                self.packets_sent += 1;
                self.bytes_sent += len as u64;
            }
            Err(err) => {
                self.packets_dropped += 1;
                tracing::trace!(full = err.is_full(), "outgoing payload dropped");
            }
        }
    }
}

/// Sink that forwards payloads into a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink<T> {
    sender: Sender<T>,
    stats: TransportStats,
}

impl<T> ChannelSink<T> {
    /// Wraps `sender`.
    #[must_use]
    pub const fn new(sender: Sender<T>) -> Self {
        Self {
            sender,
            stats: TransportStats {
                packets_sent: 0,
                bytes_sent: 0,
                packets_dropped: 0,
            },
        }
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

impl SnapshotSink for ChannelSink<(PlayerId, Vec<u8>)> {
    fn send_snapshot(&mut self, player: PlayerId, payload: Vec<u8>) {
        let len = payload.len();
        let result = self.sender.try_send((player, payload));
        self.stats.record(len, result);
    }
}

impl InputSink for ChannelSink<Vec<u8>> {
    fn send_input_unreliable(&mut self, package: Vec<u8>) {
        let len = package.len();
        let result = self.sender.try_send(package);
        self.stats.record(len, result);
    }
}

/// Sink that discards everything, for spectators and headless tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl SnapshotSink for NullSink {
    fn send_snapshot(&mut self, _player: PlayerId, _payload: Vec<u8>) {}
}

impl InputSink for NullSink {
    fn send_input_unreliable(&mut self, _package: Vec<u8>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_channel_sink_counts() {
        let (tx, rx) = bounded(1);
        let mut sink = ChannelSink::new(tx);
        sink.send_input_unreliable(vec![1, 2, 3]);
        sink.send_input_unreliable(vec![4]);

        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
        assert_eq!(sink.stats().packets_sent, 1);
        assert_eq!(sink.stats().bytes_sent, 3);
        assert_eq!(sink.stats().packets_dropped, 1);
    }

    #[test]
    fn test_closed_channel_is_not_fatal() {
        let (tx, rx) = bounded::<(PlayerId, Vec<u8>)>(4);
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        sink.send_snapshot(PlayerId(0), vec![0; 8]);
        assert_eq!(sink.stats().packets_dropped, 1);
    }
}
