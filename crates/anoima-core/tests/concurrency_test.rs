//! Integration test: concurrent writers against one person.
//!
//! Verifies that:
//! 1. An update racing a soft delete never brings the deleted person back.
//! 2. Concurrent votes by one owner on one information row leave a single live vote.

use anoima_core::{
    Actor, Anoima, AnoimaConfig, AnoimaError, NewInformation, NewPerson, PersonPatch, Privacy,
    VoteKind,
};
use std::sync::{Arc, Barrier};
use std::thread;

fn open(shard_count: usize) -> (tempfile::TempDir, Anoima) {
    let dir = tempfile::tempdir().unwrap();
    let core = Anoima::open(AnoimaConfig::with_storage(dir.path(), shard_count)).unwrap();
    (dir, core)
}

#[test]
fn update_racing_delete_never_revives_the_person() {
    let (_dir, core) = open(2);

    for round in 0..150 {
        let created = core
            .resolver
            .create(NewPerson::new("Hana", Privacy::Public), 7)
            .unwrap();
        let key = created.key().to_string();
        let barrier = Arc::new(Barrier::new(2));

        let deleter = {
            let (resolver, barrier, key) =
                (Arc::clone(&core.resolver), Arc::clone(&barrier), key.clone());
            thread::spawn(move || {
                barrier.wait();
                resolver.delete(&key, Actor::User(7))
            })
        };
        let updater = {
            let (resolver, barrier, key) =
                (Arc::clone(&core.resolver), Arc::clone(&barrier), key.clone());
            thread::spawn(move || {
                let patch = PersonPatch {
                    name: Some(format!("Hana {}", round)),
                    ..PersonPatch::default()
                };
                barrier.wait();
                resolver.update(&key, patch, Actor::User(7))
            })
        };

        deleter.join().unwrap().unwrap();
        match updater.join().unwrap() {
            Ok(_) | Err(AnoimaError::NotFound(_)) => {}
            Err(other) => panic!("round {}: unexpected update error {:?}", round, other),
        }
        assert!(
            matches!(core.resolver.resolve(&key), Err(AnoimaError::NotFound(_))),
            "round {}: deleted person resolved again",
            round
        );
        assert_eq!(core.key_map.find_by_key(&key).unwrap().unwrap().id, created.person.id);
    }
}

#[test]
fn concurrent_votes_by_one_owner_leave_one_vote() {
    let (_dir, core) = open(1);
    let person = core
        .resolver
        .create(NewPerson::new("Ren", Privacy::Public), 1)
        .unwrap();
    let key = person.key().to_string();

    for round in 0..20 {
        let row = core
            .resolver
            .add_information(
                &key,
                NewInformation {
                    relationship: Some("neighbour".to_string()),
                    text: Some(format!("note {}", round)),
                    data: None,
                },
                1,
            )
            .unwrap();
        let barrier = Arc::new(Barrier::new(8));
        let voters: Vec<_> = (0..8)
            .map(|i| {
                let (resolver, barrier, key) =
                    (Arc::clone(&core.resolver), Arc::clone(&barrier), key.clone());
                let kind = if i % 2 == 0 { VoteKind::Good } else { VoteKind::Bad };
                thread::spawn(move || {
                    barrier.wait();
                    resolver.cast_vote(&key, row.id, kind, 42).unwrap()
                })
            })
            .collect();

        let ids: Vec<u64> = voters.into_iter().map(|v| v.join().unwrap().id).collect();
        assert!(ids.iter().all(|id| *id == ids[0]), "round {}: votes {:?}", round, ids);

        let view = core.resolver.information(&key, row.id).unwrap();
        assert_eq!(view.votes.good + view.votes.bad, 1, "round {}", round);
    }
}
