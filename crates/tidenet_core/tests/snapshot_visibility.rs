//! Snapshot visibility and state codec across a server and a client registry.

use tidenet_core::{
    EntityOptions, EntityRegistry, NetworkedEntity, PlayerId, PlayersMask, Predictability,
    Snapshot, SyncError, SyncInt, SyncVar, SyncVec3,
};
use tidenet_shared::Vec3;

struct Beacon {
    position: SyncVec3,
    charge: SyncInt,
}

impl Beacon {
    fn new(charge: i32) -> Box<Self> {
        Box::new(Self {
            position: SyncVec3::new(Vec3::ZERO),
            charge: SyncInt::new(charge),
        })
    }
}

impl NetworkedEntity for Beacon {
    fn fields(&self) -> Vec<&dyn SyncVar> {
        vec![&self.position, &self.charge]
    }
    fn fields_mut(&mut self) -> Vec<&mut dyn SyncVar> {
        vec![&mut self.position, &mut self.charge]
    }
}

fn charge_of(snapshot: &Snapshot, id: i32) -> i32 {
    let bytes = snapshot.get(id).expect("entity present");
    i32::from_le_bytes(bytes[12..16].try_into().expect("four bytes"))
}

fn two_entity_server() -> EntityRegistry {
    let mut server = EntityRegistry::new(PlayerId::WORLD);
    let a = EntityOptions::default().predictable_to(PlayersMask::single(PlayerId(1)));
    let b = EntityOptions::default()
        .visible_to(PlayersMask::single(PlayerId(2)))
        .predictable_to(PlayersMask::NONE);
    assert_eq!(server.add(1, a, Beacon::new(10)), Ok(true));
    assert_eq!(server.add(2, b, Beacon::new(20)), Ok(true));
    server
}

#[test]
fn test_recipient_never_sees_hidden_entity() {
    let mut server = two_entity_server();

    let for_player1 = server.get_snapshot(Some(PlayerId(1)));
    assert_eq!(for_player1.entries.len(), 1);
    assert_eq!(charge_of(&for_player1, 1), 10);
    assert!(for_player1.get(2).is_none());

    let for_player2 = server.get_snapshot(Some(PlayerId(2)));
    assert_eq!(for_player2.entries.len(), 2);

    let everything = server.get_snapshot(None);
    assert_eq!(everything.entries.len(), 2);
}

#[test]
fn test_fanout_matches_single_recipient() {
    let mut server = two_entity_server();
    let fanout = server.get_snapshots(&[PlayerId(1), PlayerId(2)]);
    assert_eq!(fanout[&PlayerId(1)], server.get_snapshot(Some(PlayerId(1))));
    assert_eq!(fanout[&PlayerId(2)], server.get_snapshot(Some(PlayerId(2))));
}

#[test]
fn test_client_applies_wire_snapshot() {
    let mut server = two_entity_server();
    let mut snapshot = server.get_snapshot(Some(PlayerId(1)));
    snapshot.tick = 42;
    let bytes = snapshot.encode();

    let mut client = EntityRegistry::new(PlayerId(1));
    let a = EntityOptions::default().predictable_to(PlayersMask::single(PlayerId(1)));
    let b = EntityOptions::default().visible_to(PlayersMask::single(PlayerId(2)));
    assert_eq!(client.add(1, a, Beacon::new(0)), Ok(true));
    assert_eq!(client.add(2, b, Beacon::new(0)), Ok(false));

    let received = Snapshot::decode(&bytes).expect("valid snapshot");
    assert_eq!(received.tick, 42);
    client.apply_snapshot(&received, Predictability::Both).expect("applies");
    assert_eq!(charge_of(&client.get_snapshot(None), 1), 10);
}

#[test]
fn test_malformed_entry_reported_others_applied() {
    let mut client = EntityRegistry::new(PlayerId(1));
    client.add(1, EntityOptions::default(), Beacon::new(0)).expect("added");
    client.add(2, EntityOptions::default(), Beacon::new(0)).expect("added");

    let mut good = Vec::new();
    for v in [0.0f32, 0.0, 0.0] {
        good.extend_from_slice(&v.to_le_bytes());
    }
    good.extend_from_slice(&7i32.to_le_bytes());
    let snapshot = Snapshot {
        tick: 1,
        entries: vec![(1, vec![1, 2, 3]), (2, good)],
    };

    let result = client.apply_snapshot(&snapshot, Predictability::Both);
    assert!(matches!(result, Err(SyncError::UnexpectedEnd { .. })));
    assert_eq!(charge_of(&client.get_snapshot(None), 2), 7);
}
