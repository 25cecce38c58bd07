//! Integration tests for block files

use stakebft_storage::BlockDirectory;
use stakebft_types::{Address, Block, ValidatorSet, H256};
use tempfile::TempDir;

fn create_test_dir() -> (BlockDirectory, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let dir = BlockDirectory::open(temp_dir.path().join("blocks")).unwrap();
    (dir, temp_dir)
}

fn block(number: u64, last_hash: H256) -> Block {
    Block::new(
        last_hash,
        vec![],
        vec![],
        number,
        number * 1_000,
        Address::ZERO,
        ValidatorSet::new(),
    )
}

#[test]
fn test_open_creates_directory() {
    let (dir, _tmp) = create_test_dir();
    assert!(dir.path().is_dir());
    assert!(dir.is_empty());
    assert_eq!(dir.last_number(), None);
}

#[test]
fn test_write_and_read() {
    let (mut dir, _tmp) = create_test_dir();
    let b0 = block(0, H256::NIL);

    assert!(dir.write(&b0).unwrap());
    assert_eq!(dir.len(), 1);
    assert_eq!(dir.read(0).unwrap(), Some(b0.clone()));
    assert_eq!(dir.read(1).unwrap(), None);
    assert!(dir.path().join(b0.file_name()).exists());
}

#[test]
fn test_write_is_idempotent() {
    let (mut dir, _tmp) = create_test_dir();
    let b0 = block(0, H256::NIL);

    assert!(dir.write(&b0).unwrap());
    assert!(!dir.write(&b0).unwrap());
    assert_eq!(dir.len(), 1);
}

#[test]
fn test_reopen_indexes_numerically() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("blocks");
    {
        let mut dir = BlockDirectory::open(&path).unwrap();
        let mut last = H256::NIL;
        // Heights past 9 would sort before 2 as strings.
        for n in 0..12 {
            let b = block(n, last);
            last = b.hash;
            dir.write(&b).unwrap();
        }
    }
    std::fs::write(path.join("README.txt"), b"not a block").unwrap();

    let dir = BlockDirectory::open(&path).unwrap();
    assert_eq!(dir.len(), 12);
    assert_eq!(dir.last_number(), Some(11));
    let numbers: Vec<u64> = dir.load_all().unwrap().iter().map(Block::number).collect();
    assert_eq!(numbers, (0..12).collect::<Vec<_>>());
}

#[test]
fn test_corrupt_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("blocks");
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join("3-aaaa-bbbb.json"), b"{ not json").unwrap();

    let dir = BlockDirectory::open(&path).unwrap();
    assert!(dir.read(3).is_err());
}

#[test]
fn test_clear() {
    let (mut dir, _tmp) = create_test_dir();
    dir.write(&block(0, H256::NIL)).unwrap();
    dir.clear().unwrap();

    assert!(dir.is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
