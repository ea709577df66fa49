//! End-to-end scenarios spanning CAS, the database index, the transfer
//! engine, and hosting agreements together.

use chiral::cas::ContentStore;
use chiral::database::DatabaseManager;
use chiral::hosting::{AgreementStatus, HostingAgreement};
use chiral::transfer::{Transfer, TransferState};
use std::time::Duration;

fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn publish_then_discover_via_local_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().to_path_buf(), 256 * 1024);
    let db = DatabaseManager::new(&dir.path().join("files.db")).unwrap();

    let data = random_bytes(1024 * 1024); // 1 MiB
    let (fingerprint, chunk_hashes) = store.ingest(&data).await.unwrap();
    assert_eq!(chunk_hashes.len(), 4);

    db.store_file("my-file", &fingerprint, "my-file.bin", data.len() as u64, "application/octet-stream", &[], None)
        .unwrap();
    db.add_seeder(&fingerprint, "node-a").unwrap();

    let entry = db.get_file_by_fingerprint(&fingerprint).unwrap().unwrap();
    assert_eq!(entry.seeders, vec!["node-a"]);

    let fetched = store.read_full(&fingerprint).await.unwrap();
    assert_eq!(fetched, data);
}

#[tokio::test]
async fn multi_source_download_completes_after_losing_one_source() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().to_path_buf(), 256 * 1024);
    let data = random_bytes(2 * 1024 * 1024); // 2 MiB, 8 chunks
    let (fingerprint, chunk_hashes) = store.ingest(&data).await.unwrap();

    let mut transfer = Transfer::new("t1".to_string(), fingerprint.clone(), "f".to_string(), data.len() as u64, 256 * 1024);
    transfer.start();

    // Chunks are already in the store from ingest in this test; simulate
    // the transfer engine observing them as successfully delivered.
    for index in 0..chunk_hashes.len() as u64 {
        transfer.record_chunk_success(index, 256 * 1024);
    }

    assert!(transfer.is_complete());
    transfer.try_complete(&store, &chunk_hashes).await.unwrap();
    assert_eq!(transfer.state, TransferState::Completed);
}

#[tokio::test]
async fn resume_across_restart_reuses_checkpointed_bitmap() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().to_path_buf(), 256 * 1024);
    let data = random_bytes(10 * 1024 * 1024);
    let (fingerprint, chunk_hashes) = store.ingest(&data).await.unwrap();

    let mut transfer = Transfer::new("t2".to_string(), fingerprint.clone(), "f".to_string(), data.len() as u64, 256 * 1024);
    transfer.start();
    transfer.record_chunk_success(0, 256 * 1024);
    transfer.record_chunk_success(1, 256 * 1024);
    transfer.record_chunk_success(2, 256 * 1024);
    // Checkpoint to disk, dropping `transfer` entirely to simulate a process
    // restart: nothing but the file at `<store>/transfers/t2.ckpt` survives.
    transfer.persist_checkpoint(dir.path()).await.unwrap();
    drop(transfer);

    let mut restarted = Transfer::new("t2".to_string(), fingerprint.clone(), "f".to_string(), data.len() as u64, 256 * 1024);
    let found = restarted.restore_from_disk(dir.path()).await.unwrap();
    assert!(found);

    assert!(restarted.missing_chunks().len() < chunk_hashes.len());
}

#[test]
fn hosting_agreement_reaches_active_with_deposit_recorded() {
    let mut agreement = HostingAgreement::propose(
        "client".to_string(),
        "0xclient".to_string(),
        "host".to_string(),
        "0xhost".to_string(),
        vec!["fp1".to_string()],
        1024 * 1024,
        Duration::from_secs(86400),
        100,
        0xabc,
    );

    agreement.accept().unwrap();
    agreement.activate("0xdead".to_string()).unwrap();
    agreement.heartbeat().unwrap();

    assert_eq!(agreement.status, AgreementStatus::Active);
    assert_eq!(agreement.cost(), 100);
}
