//! RocksDB backend behavior, including reopen semantics.

use kestrel_state::{Backend, RocksBackend, RocksConfig, StateDatabase};
use kestrel_state::StateAccess;
use kestrel_types::{multicodec, Multihash, ObjectSpace};
use std::sync::Arc;
use tempfile::TempDir;

fn open_backend(dir: &TempDir) -> RocksBackend {
    RocksBackend::open(RocksConfig {
        path: dir.path().to_string_lossy().to_string(),
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn ordered_traversal_matches_memory_semantics() {
    let dir = TempDir::new().unwrap();
    let backend = open_backend(&dir);

    backend.put(b"b", b"2").unwrap();
    backend.put(b"a", b"1").unwrap();
    backend.put(b"d", b"4").unwrap();

    assert_eq!(backend.first().unwrap().unwrap().0, b"a");
    assert_eq!(backend.last().unwrap().unwrap().0, b"d");
    assert_eq!(backend.lower_bound(b"b").unwrap().unwrap().0, b"b");
    assert_eq!(backend.lower_bound(b"c").unwrap().unwrap().0, b"d");
    assert_eq!(backend.next_after(b"b").unwrap().unwrap().0, b"d");
    assert_eq!(backend.prev_before(b"b").unwrap().unwrap().0, b"a");
    assert_eq!(backend.prev_before(b"a").unwrap(), None);
    assert_eq!(backend.len().unwrap(), 3);

    backend.delete(b"b").unwrap();
    assert_eq!(backend.get(b"b").unwrap(), None);
    assert_eq!(backend.len().unwrap(), 2);
}

#[test]
fn root_info_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let id = Multihash::hash(multicodec::SHA2_256, b"committed").unwrap();
    {
        let backend = open_backend(&dir);
        backend.put(b"key", b"value").unwrap();
        backend.set_root_info(&id, 7).unwrap();
    }

    let backend = open_backend(&dir);
    assert_eq!(backend.get(b"key").unwrap(), Some(b"value".to_vec()));
    assert_eq!(backend.root_info().unwrap(), Some((id, 7)));
}

#[test]
fn database_commit_round_trips_through_disk() {
    let dir = TempDir::new().unwrap();
    let space = ObjectSpace::metadata();
    let block = Multihash::hash(multicodec::SHA2_256, b"disk block").unwrap();

    {
        let backend: Arc<RocksBackend> = Arc::new(open_backend(&dir));
        let db = StateDatabase::open(backend, |root| {
            root.put_object(&ObjectSpace::metadata(), b"seeded", b"at genesis")?;
            Ok(())
        })
        .unwrap();

        let node = db
            .create_writable_node(&db.get_root().id(), &block)
            .unwrap();
        node.put_object(&space, b"later", b"write").unwrap();
        db.finalize_node(&block).unwrap();
        db.commit_node(&block).unwrap();
        db.close();
    }

    let backend: Arc<RocksBackend> = Arc::new(open_backend(&dir));
    let db = StateDatabase::open(backend, |_| {
        panic!("genesis must not rerun on a seeded backend")
    })
    .unwrap();
    let root = db.get_root();
    assert_eq!(root.id(), block);
    assert_eq!(root.revision(), 1);
    assert_eq!(
        root.get_object(&space, b"seeded").unwrap(),
        Some(b"at genesis".to_vec())
    );
    assert_eq!(
        root.get_object(&space, b"later").unwrap(),
        Some(b"write".to_vec())
    );
}
