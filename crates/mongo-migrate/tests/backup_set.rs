//! Tests for the staged backup set
//!

use std::fs;

use common::{clear_directory, test_directory};
use mongo_migrate::{BackupSet, StagingError};

mod common;

#[test]
fn discover_sorts_and_skips_admin_and_files() {
    let directory = test_directory("discover_sorts_and_skips_admin_and_files");
    let root = directory.join("dump");

    for database in ["zeta", "admin", "alpha", "Admin"] {
        fs::create_dir_all(root.join(database)).unwrap();
    }
    fs::write(root.join("oplog.bson"), b"bson").unwrap();

    let set = BackupSet::discover(&root).unwrap();

    assert_eq!(set.databases, vec!["Admin", "alpha", "zeta"]);
    assert_eq!(set.database_path("alpha"), root.join("alpha"));

    clear_directory(&directory);
}

#[test]
fn discover_missing_directory() {
    let directory = test_directory("discover_missing_directory");

    let result = BackupSet::discover(&directory.join("dump"));

    assert!(matches!(result, Err(StagingError::Missing(_))));

    clear_directory(&directory);
}

#[test]
fn clear_removes_directory_and_file() {
    let directory = test_directory("clear_removes_directory_and_file");

    let staged = directory.join("dump");
    fs::create_dir_all(staged.join("alpha")).unwrap();
    fs::write(staged.join("alpha").join("users.bson"), b"bson").unwrap();
    assert!(BackupSet::clear(&staged).unwrap());
    assert!(!staged.exists());

    let file = directory.join("dump-file");
    fs::write(&file, b"not a directory").unwrap();
    assert!(BackupSet::clear(&file).unwrap());
    assert!(!file.exists());

    assert!(!BackupSet::clear(&staged).unwrap());

    clear_directory(&directory);
}
