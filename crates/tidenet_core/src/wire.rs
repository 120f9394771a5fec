//! # Wire Format
//!
//! Snapshots and inputs travel as little-endian byte blobs:
//!
//! ```text
//! Snapshot:  tick:i64 | count:i32 | { id:i32 | len:i32 | bytes }*
//! Input:     tick:i64 | player:i32 | count:i32 | { id:i32 | len:i32 | bytes }*
//! Package:   count:i32 | { len:i32 | encoded Input }*
//! ```
//!
//! An input package repeats the last few inputs so that a single lost
//! unreliable datagram does not lose a tick of input.

use crate::entity::NetworkId;
use crate::error::{SyncError, SyncResult};
use crate::stream::{StateReader, StateWriter};
use std::collections::VecDeque;
use tidenet_shared::{PlayerId, Tick};

/// One entity's bytes inside a snapshot or input.
pub type Entry = (NetworkId, Vec<u8>);

/// State of a set of entities at one tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Tick the state belongs to.
    pub tick: Tick,
    /// Entity states ordered by id.
    pub entries: Vec<Entry>,
}

/// Input one player produced for one tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Input {
    /// Tick the input is meant for.
    pub tick: Tick,
    /// Producing player.
    pub player: PlayerId,
    /// Per-entity input, ordered by id.
    pub entries: Vec<Entry>,
}

fn write_entries(writer: &mut StateWriter, entries: &[Entry]) {
    writer.write_len(entries.len());
    for (id, bytes) in entries {
        writer.write_i32(*id);
        writer.write_bytes(bytes);
    }
}

fn read_entries(reader: &mut StateReader<'_>) -> SyncResult<Vec<Entry>> {
    let count = reader.read_len()?;
    // Every entry needs at least 8 bytes, do not trust the count blindly
    let mut entries = Vec::with_capacity(count.min(reader.remaining() / 8));
    for _ in 0..count {
        let id = reader.read_i32()?;
        let bytes = reader.read_bytes()?.to_vec();
        entries.push((id, bytes));
    }
    Ok(entries)
}

fn finish(reader: &StateReader<'_>) -> SyncResult<()> {
    if reader.is_exhausted() {
        Ok(())
    } else {
        Err(SyncError::TrailingBytes(reader.remaining()))
    }
}

impl Snapshot {
    /// Empty snapshot for `tick`.
    #[must_use]
    pub const fn new(tick: Tick) -> Self {
        Self {
            tick,
            entries: Vec::new(),
        }
    }

    /// State bytes of entity `id`.
    #[must_use]
    pub fn get(&self, id: NetworkId) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Appends the wire form to `writer`.
    pub fn encode_into(&self, writer: &mut StateWriter) {
        writer.write_i64(self.tick);
        write_entries(writer, &self.entries);
    }

    /// Wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = StateWriter::with_capacity(self.encoded_len_hint());
        self.encode_into(&mut writer);
        writer.into_bytes()
    }

    /// Parses a wire blob.
    ///
    /// # Errors
    ///
    /// Fails on truncated, malformed or oversized input.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        let mut reader = StateReader::new(bytes);
        let tick = reader.read_i64()?;
        let entries = read_entries(&mut reader)?;
        finish(&reader)?;
        Ok(Self { tick, entries })
    }

    fn encoded_len_hint(&self) -> usize {
        12 + self.entries.iter().map(|(_, b)| 8 + b.len()).sum::<usize>()
    }
}

impl Input {
    /// Empty input of `player` for `tick`.
    #[must_use]
    pub const fn new(tick: Tick, player: PlayerId) -> Self {
        Self {
            tick,
            player,
            entries: Vec::new(),
        }
    }

    /// Appends the wire form to `writer`.
    pub fn encode_into(&self, writer: &mut StateWriter) {
        writer.write_i64(self.tick);
        writer.write_i32(self.player.0);
        write_entries(writer, &self.entries);
    }

    /// Wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = StateWriter::new();
        self.encode_into(&mut writer);
        writer.into_bytes()
    }

    /// Parses a wire blob.
    ///
    /// # Errors
    ///
    /// Fails on truncated, malformed or oversized input.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        let mut reader = StateReader::new(bytes);
        let input = Self::read_from(&mut reader)?;
        finish(&reader)?;
        Ok(input)
    }

    fn read_from(reader: &mut StateReader<'_>) -> SyncResult<Self> {
        let tick = reader.read_i64()?;
        let player = PlayerId(reader.read_i32()?);
        let entries = read_entries(reader)?;
        Ok(Self {
            tick,
            player,
            entries,
        })
    }
}

/// Joins already encoded inputs into one package, oldest first.
pub fn encode_input_package<'a>(inputs: impl ExactSizeIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut writer = StateWriter::new();
    writer.write_len(inputs.len());
    for input in inputs {
        writer.write_bytes(input);
    }
    writer.into_bytes()
}

/// Splits a package back into inputs, in the order they were packed.
///
/// # Errors
///
/// Fails if the package or any input inside it is malformed.
pub fn decode_input_package(bytes: &[u8]) -> SyncResult<Vec<Input>> {
    let mut reader = StateReader::new(bytes);
    let count = reader.read_len()?;
    let mut inputs = Vec::with_capacity(count.min(reader.remaining() / 4));
    for _ in 0..count {
        inputs.push(Input::decode(reader.read_bytes()?)?);
    }
    finish(&reader)?;
    Ok(inputs)
}

/// Remembers the last `capacity` encoded inputs and packs them together.
#[derive(Debug, Clone)]
pub struct InputPackager {
    recent: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl InputPackager {
    /// Packager resending up to `capacity` inputs.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Ring capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records `input` and returns a package with it and its predecessors.
    pub fn push(&mut self, input: &Input) -> Vec<u8> {
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(input.encode());
        encode_input_package(self.recent.iter().map(Vec::as_slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input(tick: Tick) -> Input {
        Input {
            tick,
            player: PlayerId(1),
            entries: vec![(3, vec![1, 2]), (9, vec![])],
        }
    }

    #[test]
    fn test_snapshot_layout() {
        let snapshot = Snapshot {
            tick: 7,
            entries: vec![(2, vec![0xAA])],
        };
        let bytes = snapshot.encode();
        assert_eq!(
            bytes,
            vec![7, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 0xAA]
        );
        assert_eq!(Snapshot::decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn test_input_carries_player() {
        let input = sample_input(55);
        let bytes = input.encode();
        assert_eq!(&bytes[8..12], &1i32.to_le_bytes());
        assert_eq!(Input::decode(&bytes).unwrap(), input);
    }

    #[test]
    fn test_truncated_snapshot_rejected() {
        let bytes = Snapshot {
            tick: 1,
            entries: vec![(1, vec![1, 2, 3])],
        }
        .encode();
        assert!(matches!(
            Snapshot::decode(&bytes[..bytes.len() - 1]),
            Err(SyncError::UnexpectedEnd { .. })
        ));

        let mut padded = bytes.clone();
        padded.push(0);
        assert_eq!(Snapshot::decode(&padded), Err(SyncError::TrailingBytes(1)));
    }

    #[test]
    fn test_packager_keeps_last_n() {
        let mut packager = InputPackager::new(3);
        let packages: Vec<Vec<u8>> = (100..105)
            .map(|tick| packager.push(&sample_input(tick)))
            .collect();
        let inputs = decode_input_package(packages.last().unwrap()).unwrap();
        let ticks: Vec<Tick> = inputs.iter().map(|i| i.tick).collect();
        assert_eq!(ticks, vec![102, 103, 104]);
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = Snapshot {
            tick: 0,
            entries: vec![(1, vec![5]), (4, vec![6])],
        };
        assert_eq!(snapshot.get(4), Some(&[6u8][..]));
        assert_eq!(snapshot.get(2), None);
    }
}
