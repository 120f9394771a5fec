//! # Networked Entities
//!
//! An entity is any piece of simulation that owns [`SyncVar`]s. Its state
//! blob is the concatenation of its enabled fields in the order returned by
//! [`NetworkedEntity::fields`]. That order is the wire contract and must be
//! the same on every peer.
//!
//! ## Hook order
//!
//! ```text
//!   encode:  on_pre_serialize  -> write fields
//!   decode:  read fields       -> on_post_deserialize
//! ```

use crate::error::{SyncError, SyncResult};
use crate::field::{SyncInt, SyncVar};
use crate::stream::{StateReader, StateWriter};
use tidenet_shared::PlayerId;

/// Stable identifier of an entity across all peers.
pub type NetworkId = i32;

/// Which kind of actor is producing input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlayerRole {
    /// The authoritative server.
    Server,
    /// A human player's client, possibly hosted inside the server.
    Client,
    /// A bot hosted by the server or standalone.
    Bot,
}

/// Explicit "who am I" passed to input gathering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlayerContext {
    /// Player the input is produced for.
    pub player: PlayerId,
    /// Kind of actor producing it.
    pub role: PlayerRole,
}

impl PlayerContext {
    /// The server acting as the world.
    #[must_use]
    pub const fn server() -> Self {
        Self {
            player: PlayerId::WORLD,
            role: PlayerRole::Server,
        }
    }

    /// A human player.
    #[must_use]
    pub const fn client(player: PlayerId) -> Self {
        Self {
            player,
            role: PlayerRole::Client,
        }
    }

    /// A bot.
    #[must_use]
    pub const fn bot(player: PlayerId) -> Self {
        Self {
            player,
            role: PlayerRole::Bot,
        }
    }
}

/// Simulation object whose state is synchronized.
///
/// Implement this trait to take part in snapshots. Only `fields` and
/// `fields_mut` are required; every hook defaults to a no-op.
pub trait NetworkedEntity: Send {
    /// Synchronized fields in declaration order.
    fn fields(&self) -> Vec<&dyn SyncVar>;

    /// Same fields, same order, mutable.
    fn fields_mut(&mut self) -> Vec<&mut dyn SyncVar>;

    /// Name used in protocol violation reports.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called once when the entity joins a registry.
    fn initialize(&mut self) {}

    /// Pulls live values into fields right before encoding.
    fn on_pre_serialize(&mut self) {}

    /// Pushes decoded fields back into live state right after decoding.
    fn on_post_deserialize(&mut self) {}

    /// Whether this entity produces and consumes input.
    fn has_input(&self) -> bool {
        false
    }

    /// Writes this tick's input on behalf of `ctx.player`. Writing nothing
    /// means "no input".
    fn gather_input(&mut self, _ctx: &PlayerContext, _writer: &mut StateWriter) {}

    /// Consumes input sent by `player`. Must read exactly what
    /// `gather_input` wrote.
    ///
    /// # Errors
    ///
    /// Reader errors propagate and are reported as a protocol violation.
    fn apply_input(&mut self, _player: PlayerId, _reader: &mut StateReader<'_>) -> SyncResult<()> {
        Ok(())
    }

    /// Advances the entity by one tick.
    fn update(&mut self) {}

    /// Called on every entity before a reconciliation starts.
    fn on_pre_reconcile(&mut self) {}

    /// Called on every entity after the resimulation finished.
    fn on_post_reconcile(&mut self) {}
}

/// True if the entity has at least one enabled field.
pub fn has_state(entity: &dyn NetworkedEntity) -> bool {
    entity.fields().iter().any(|f| f.is_enabled())
}

/// Runs the pre-serialize hook then appends every enabled field.
pub fn write_state(entity: &mut dyn NetworkedEntity, writer: &mut StateWriter) {
    entity.on_pre_serialize();
    for field in entity.fields() {
        if field.is_enabled() {
            field.write_state(writer);
        }
    }
}

/// Decodes every enabled field from `bytes`, then runs the post-deserialize
/// hook.
///
/// # Errors
///
/// `UnexpectedEnd` if the blob is too short, `TrailingBytes` if bytes remain.
pub fn read_state(entity: &mut dyn NetworkedEntity, bytes: &[u8]) -> SyncResult<()> {
    let mut reader = StateReader::new(bytes);
    for field in entity.fields_mut() {
        if field.is_enabled() {
            field.read_state(&mut reader)?;
        }
    }
    if !reader.is_exhausted() {
        return Err(SyncError::TrailingBytes(reader.remaining()));
    }
    entity.on_post_deserialize();
    Ok(())
}

/// Compares two state blobs of `entity`'s type field by field, each with its
/// own comparer.
///
/// # Errors
///
/// Fails if either blob cannot be decoded, or with `TrailingBytes` if either
/// blob is longer than the entity's fields.
pub fn states_equal(entity: &dyn NetworkedEntity, a: &[u8], b: &[u8]) -> SyncResult<bool> {
    let mut left = StateReader::new(a);
    let mut right = StateReader::new(b);
    for field in entity.fields() {
        if field.is_enabled() && !field.states_equal(&mut left, &mut right)? {
            return Ok(false);
        }
    }
    for reader in [&left, &right] {
        if !reader.is_exhausted() {
            return Err(SyncError::TrailingBytes(reader.remaining()));
        }
    }
    Ok(true)
}

/// Feeds one input entry to the entity's handler and checks it consumed
/// exactly the bytes it was given.
///
/// # Errors
///
/// `ReadTooMuch` if the handler ran out of bytes, `ReadNotEnough` if it left
/// some unread.
pub fn apply_input(
    entity: &mut dyn NetworkedEntity,
    id: NetworkId,
    player: PlayerId,
    bytes: &[u8],
) -> SyncResult<()> {
    let mut reader = StateReader::new(bytes);
    match entity.apply_input(player, &mut reader) {
        Ok(()) => {}
        Err(SyncError::UnexpectedEnd { .. }) => {
            return Err(SyncError::ReadTooMuch {
                entity_id: id,
                type_name: entity.type_name(),
            })
        }
        Err(other) => return Err(other),
    }
    if reader.is_exhausted() {
        Ok(())
    } else {
        Err(SyncError::ReadNotEnough {
            entity_id: id,
            type_name: entity.type_name(),
            remaining: reader.remaining(),
        })
    }
}

/// Hands out network ids for entities spawned at runtime.
///
/// The cursor is a [`SyncInt`] so a factory entity can list it among its
/// fields and keep id allocation identical on every peer.
#[derive(Debug)]
pub struct NetworkIdAllocator {
    cursor: SyncInt,
}

impl NetworkIdAllocator {
    /// Allocator whose first id is `base + 1`.
    #[must_use]
    pub fn new(base: NetworkId) -> Self {
        Self {
            cursor: SyncInt::new(base),
        }
    }

    /// Last id handed out.
    #[must_use]
    pub fn current(&self) -> NetworkId {
        *self.cursor.get()
    }

    /// Advances and returns the new id.
    pub fn allocate(&mut self) -> NetworkId {
        let next = self.current() + 1;
        self.cursor.set(next);
        next
    }

    /// Moves the cursor, e.g. after a snapshot rewound the factory.
    pub fn move_to(&mut self, value: NetworkId) {
        self.cursor.set(value);
    }

    /// The synchronized cursor.
    #[must_use]
    pub fn cursor(&self) -> &SyncInt {
        &self.cursor
    }

    /// The synchronized cursor, mutable.
    pub fn cursor_mut(&mut self) -> &mut SyncInt {
        &mut self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{SyncFloat, SyncString};

    struct Crate {
        label: SyncString,
        weight: SyncFloat,
        hidden: SyncFloat,
        decoded: u32,
    }

    impl Crate {
        fn new() -> Self {
            Self {
                label: SyncString::new("box".into()),
                weight: SyncFloat::new(2.0),
                hidden: SyncFloat::disabled(9.0),
                decoded: 0,
            }
        }
    }

    impl NetworkedEntity for Crate {
        fn fields(&self) -> Vec<&dyn SyncVar> {
            vec![&self.label, &self.weight, &self.hidden]
        }
        fn fields_mut(&mut self) -> Vec<&mut dyn SyncVar> {
            vec![&mut self.label, &mut self.weight, &mut self.hidden]
        }
        fn on_post_deserialize(&mut self) {
            self.decoded += 1;
        }
        fn has_input(&self) -> bool {
            true
        }
        fn apply_input(&mut self, _player: PlayerId, reader: &mut StateReader<'_>) -> SyncResult<()> {
            let delta = reader.read_f32()?;
            self.weight.set(self.weight.get() + delta);
            Ok(())
        }
    }

    #[test]
    fn test_state_skips_disabled_fields() {
        let mut source = Crate::new();
        let mut writer = StateWriter::new();
        write_state(&mut source, &mut writer);
        // 4 byte prefix + "box" + f32
        assert_eq!(writer.len(), 4 + 3 + 4);

        let mut target = Crate::new();
        target.weight.set(0.0);
        read_state(&mut target, writer.as_slice()).unwrap();
        assert_eq!(*target.weight.get(), 2.0);
        assert_eq!(*target.hidden.get(), 9.0);
        assert_eq!(target.decoded, 1);
    }

    #[test]
    fn test_trailing_state_bytes_rejected() {
        let mut source = Crate::new();
        let mut writer = StateWriter::new();
        write_state(&mut source, &mut writer);
        writer.write_u8(0);

        let mut target = Crate::new();
        assert_eq!(
            read_state(&mut target, writer.as_slice()),
            Err(SyncError::TrailingBytes(1))
        );
        assert_eq!(target.decoded, 0);
    }

    #[test]
    fn test_states_equal_uses_tolerance() {
        let mut entity = Crate::new();
        let mut a = StateWriter::new();
        write_state(&mut entity, &mut a);
        entity.weight.set(2.004);
        let mut b = StateWriter::new();
        write_state(&mut entity, &mut b);
        entity.weight.set(2.5);
        let mut c = StateWriter::new();
        write_state(&mut entity, &mut c);

        assert!(states_equal(&entity, a.as_slice(), b.as_slice()).unwrap());
        assert!(!states_equal(&entity, a.as_slice(), c.as_slice()).unwrap());
    }

    #[test]
    fn test_states_equal_rejects_trailing_bytes() {
        let mut entity = Crate::new();
        let mut exact = StateWriter::new();
        write_state(&mut entity, &mut exact);
        let mut padded = StateWriter::new();
        write_state(&mut entity, &mut padded);
        padded.write_u8(0);
        padded.write_u8(0);

        assert_eq!(
            states_equal(&entity, exact.as_slice(), padded.as_slice()),
            Err(SyncError::TrailingBytes(2))
        );
        assert_eq!(
            states_equal(&entity, padded.as_slice(), exact.as_slice()),
            Err(SyncError::TrailingBytes(2))
        );
    }

    #[test]
    fn test_input_read_mismatch_is_distinct() {
        let mut entity = Crate::new();

        let short = [0u8; 2];
        assert!(matches!(
            apply_input(&mut entity, 4, PlayerId(0), &short),
            Err(SyncError::ReadTooMuch { entity_id: 4, .. })
        ));

        let long = [0u8; 6];
        assert!(matches!(
            apply_input(&mut entity, 4, PlayerId(0), &long),
            Err(SyncError::ReadNotEnough { entity_id: 4, remaining: 2, .. })
        ));

        apply_input(&mut entity, 4, PlayerId(0), &1.5f32.to_le_bytes()).unwrap();
        assert_eq!(*entity.weight.get(), 3.5);
    }

    #[test]
    fn test_id_allocator() {
        let mut ids = NetworkIdAllocator::new(100);
        assert_eq!(ids.allocate(), 101);
        assert_eq!(ids.allocate(), 102);
        ids.move_to(100);
        assert_eq!(ids.allocate(), 101);
        assert_eq!(*ids.cursor().get(), 101);
    }
}
