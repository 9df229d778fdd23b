//! End-to-end scenarios for the bulk storage engine, exercising the real
//! disk store and full create/add/delete/sync/reopen sessions.

mod common;

use std::sync::Arc;

use bulkvault_core::format::HEADER_SIZE;
use bulkvault_core::{
    BulkStorage, DiskStore, FileRecord, MemoryStore, StorageError, StorageObserver,
};
use common::{keys, payload, read_blob, PASSPHRASE};
use md5::Md5;
use sha2::Digest;

fn file_len(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).expect("metadata").len()
}

#[test]
fn create_yields_empty_storage_and_minimal_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e1.bulk");

    let storage = BulkStorage::create_at(&path, &keys().public).unwrap();
    assert!(storage.records().is_empty());
    // Header plus the one padding block of an empty TOC.
    assert_eq!(file_len(&path), (HEADER_SIZE + 16) as u64);
}

#[test]
fn add_stores_one_record_with_matching_digests() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage =
        BulkStorage::create_at(dir.path().join("e2.bulk"), &keys().public).unwrap();

    let body = payload(10_000, 7);
    let record = storage.add(&body[..]).unwrap();

    assert_eq!(storage.records().len(), 1);
    let md5: [u8; 16] = Md5::digest(&body).into();
    assert_eq!(record.checksums.md5, md5);
    assert_eq!(record.checksums.crc32, crc32fast::hash(&body));

    let reader = storage.get(record.uuid).unwrap().unwrap();
    assert_eq!(read_blob(reader), body);
}

#[test]
fn reopen_preserves_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e3.bulk");

    let bodies = [payload(100, 1), payload(70_000, 2), payload(16, 3)];
    let mut uuids = Vec::new();
    {
        let mut storage = BulkStorage::create_at(&path, &keys().public).unwrap();
        for body in &bodies {
            uuids.push(storage.add(&body[..]).unwrap().uuid);
        }
        storage.sync(&keys().public).unwrap();
        storage.close().unwrap();
    }

    let storage =
        BulkStorage::open_at(&path, &keys().pair.private_key_pem, PASSPHRASE).unwrap();
    assert_eq!(storage.records().len(), 3);
    for (uuid, body) in uuids.iter().zip(&bodies) {
        let reader = storage.get(*uuid).unwrap().unwrap();
        assert_eq!(&read_blob(reader), body);
    }
}

#[test]
fn tail_delete_restores_pre_add_file_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e4.bulk");

    let mut storage = BulkStorage::create_at(&path, &keys().public).unwrap();
    let record = storage.add(&payload(4096, 9)[..]).unwrap();

    assert!(storage.delete(record.uuid).unwrap());
    assert!(storage.records().is_empty());
    assert_eq!(file_len(&path), HEADER_SIZE as u64);

    // The next sync writes the 16-byte TOC of zero records.
    storage.sync(&keys().public).unwrap();
    assert_eq!(file_len(&path), (HEADER_SIZE + 16) as u64);
}

#[test]
fn mid_delete_hides_but_keeps_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage =
        BulkStorage::create_at(dir.path().join("e5.bulk"), &keys().public).unwrap();

    let body1 = payload(3000, 11);
    let body2 = payload(3000, 12);
    let first = storage.add(&body1[..]).unwrap();
    let second = storage.add(&body2[..]).unwrap();

    assert!(storage.delete(first.uuid).unwrap());
    assert_eq!(storage.records().len(), 2);
    assert!(storage.records()[0].flags.is_deleted());
    assert!(storage.get(first.uuid).unwrap().is_none());

    let reader = storage.get(second.uuid).unwrap().unwrap();
    assert_eq!(read_blob(reader), body2);
}

#[test]
fn closed_storage_rejects_every_operation() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage =
        BulkStorage::create_at(dir.path().join("e6.bulk"), &keys().public).unwrap();
    let record = storage.add(&b"short lived"[..]).unwrap();
    storage.close().unwrap();

    assert!(storage.is_closed());
    assert!(matches!(
        storage.add(&b"x"[..]),
        Err(StorageError::StorageClosed)
    ));
    assert!(matches!(
        storage.get(record.uuid),
        Err(StorageError::StorageClosed)
    ));
    assert!(matches!(
        storage.delete(record.uuid),
        Err(StorageError::StorageClosed)
    ));
    assert!(matches!(
        storage.sync(&keys().public),
        Err(StorageError::StorageClosed)
    ));
}

#[test]
fn open_rejects_foreign_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e7.bulk");
    std::fs::write(&path, vec![0x55u8; 2048]).unwrap();

    let result = BulkStorage::open_at(&path, &keys().pair.private_key_pem, PASSPHRASE);
    assert!(matches!(result, Err(StorageError::IncompatibleFile { .. })));
}

#[test]
fn record_bounds_are_validated() {
    let result = FileRecord::new(
        uuid::Uuid::new_v4(),
        10,
        5,
        bulkvault_core::BlobKey::generate(),
        [0u8; 16],
        bulkvault_core::Checksums {
            crc32: 0,
            md5: [0u8; 16],
            sha256: [0u8; 32],
        },
        0,
    );
    assert!(matches!(result, Err(StorageError::InvalidRecord { .. })));
}

#[test]
fn wrong_passphrase_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrongpass.bulk");
    {
        let mut storage = BulkStorage::create_at(&path, &keys().public).unwrap();
        storage.sync(&keys().public).unwrap();
        storage.close().unwrap();
    }

    let result = BulkStorage::open_at(&path, &keys().pair.private_key_pem, "not the passphrase");
    assert!(matches!(result, Err(StorageError::Crypto { .. })));
}

#[test]
fn delete_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("del-reopen.bulk");

    let body2 = payload(500, 21);
    let (gone, kept) = {
        let mut storage = BulkStorage::create_at(&path, &keys().public).unwrap();
        let a = storage.add(&payload(500, 20)[..]).unwrap();
        let b = storage.add(&body2[..]).unwrap();
        let _c = storage.add(&payload(500, 22)[..]).unwrap();
        storage.delete(a.uuid).unwrap();
        storage.sync(&keys().public).unwrap();
        storage.close().unwrap();
        (a.uuid, b.uuid)
    };

    let storage =
        BulkStorage::open_at(&path, &keys().pair.private_key_pem, PASSPHRASE).unwrap();
    assert_eq!(storage.records().len(), 3);
    assert!(storage.get(gone).unwrap().is_none());
    let reader = storage.get(kept).unwrap().unwrap();
    assert_eq!(read_blob(reader), body2);
}

#[test]
fn purge_then_reopen_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("purge.bulk");

    let body_b = payload(10_000, 31);
    let body_d = payload(123, 33);
    let (b_uuid, d_uuid) = {
        let mut storage = BulkStorage::create_at(&path, &keys().public).unwrap();
        let a = storage.add(&payload(5000, 30)[..]).unwrap();
        let b = storage.add(&body_b[..]).unwrap();
        let c = storage.add(&payload(5000, 32)[..]).unwrap();
        let d = storage.add(&body_d[..]).unwrap();
        let (b_uuid, d_uuid) = (b.uuid, d.uuid);
        let hole = a.region_len() + c.region_len();

        storage.delete(a.uuid).unwrap();
        storage.delete(c.uuid).unwrap();

        let before = storage.tail();
        assert_eq!(storage.purge().unwrap(), 2);
        assert_eq!(storage.tail(), before - hole);
        assert_eq!(storage.records().len(), 2);

        // Survivors are still readable straight after compaction.
        let reader = storage.get(b_uuid).unwrap().unwrap();
        assert_eq!(read_blob(reader), body_b);

        storage.sync(&keys().public).unwrap();
        storage.close().unwrap();
        (b_uuid, d_uuid)
    };

    let storage =
        BulkStorage::open_at(&path, &keys().pair.private_key_pem, PASSPHRASE).unwrap();
    assert_eq!(storage.records().len(), 2);
    let reader = storage.get(b_uuid).unwrap().unwrap();
    assert_eq!(read_blob(reader), body_b);
    let reader = storage.get(d_uuid).unwrap().unwrap();
    assert_eq!(read_blob(reader), body_d);
}

#[test]
fn large_blob_streams_through_chunking() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage =
        BulkStorage::create_at(dir.path().join("large.bulk"), &keys().public).unwrap();

    // Larger than both the pump and read chunk sizes, not block aligned.
    let body = payload(300_000 + 5, 41);
    let record = storage.add(&body[..]).unwrap();

    let reader = storage.get(record.uuid).unwrap().unwrap();
    assert_eq!(read_blob(reader), body);
}

#[test]
fn memory_and_disk_stores_agree_on_format() {
    // A container written through one backend opens through the other.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cross.bulk");

    let body = payload(2048, 51);
    let uuid = {
        let store = Arc::new(MemoryStore::new());
        let mut storage = BulkStorage::create(Arc::clone(&store), &keys().public).unwrap();
        let record = storage.add(&body[..]).unwrap();
        storage.sync(&keys().public).unwrap();
        storage.close().unwrap();
        std::fs::write(&path, store.contents()).unwrap();
        record.uuid
    };

    let storage =
        BulkStorage::open(Arc::new(DiskStore::open(&path).unwrap()),
            &keys().pair.private_key_pem,
            PASSPHRASE,
        )
        .unwrap();
    let reader = storage.get(uuid).unwrap().unwrap();
    assert_eq!(read_blob(reader), body);
}

#[test]
fn observer_sees_lifecycle() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Events {
        added: AtomicUsize,
        finished: AtomicUsize,
    }
    impl StorageObserver for Events {
        fn on_added(&self, _record: &FileRecord) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }
        fn on_finish(&self, _code: i32) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(Events::default());
    let mut storage = BulkStorage::create_at(dir.path().join("obs.bulk"), &keys().public)
        .unwrap()
        .with_observer(Arc::clone(&events) as Arc<dyn StorageObserver>);

    storage.add(&b"one"[..]).unwrap();
    storage.add(&b"two"[..]).unwrap();
    storage.close().unwrap();

    assert_eq!(events.added.load(Ordering::SeqCst), 2);
    assert_eq!(events.finished.load(Ordering::SeqCst), 1);
}
