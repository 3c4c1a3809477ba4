//! Tests for the migration stages
//!

use std::{fs, panic::AssertUnwindSafe};

use common::{
    FakeRunner, FakeTunnel, TUNNEL_PID, TunnelEvent, clear_directory, test_config, test_directory,
};
use mongo_migrate::{Interrupt, Migration, MigrationError, Stage, runner::CommandStatus};

mod common;

#[test]
fn restores_every_database_but_admin() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("restores_every_database_but_admin");
    let config = test_config(&directory);

    let tunnel = FakeTunnel::default();
    let runner = FakeRunner::with_databases(&["gamma", "admin", "alpha", "beta"]);

    let mut migration =
        Migration::new(&config, tunnel.clone(), runner.clone(), Interrupt::default());
    let report = migration.run().unwrap();

    assert_eq!(report.restored, vec!["alpha", "beta", "gamma"]);
    assert_eq!(runner.restored(), vec!["alpha", "beta", "gamma"]);
    assert_eq!(
        tunnel.events(),
        vec![
            TunnelEvent::Sweep,
            TunnelEvent::Check,
            TunnelEvent::Establish,
            TunnelEvent::Teardown(TUNNEL_PID),
        ]
    );
    assert_eq!(
        migration.context().trail,
        vec![
            Stage::PreflightSweep,
            Stage::ConnectivityCheck,
            Stage::TunnelUp,
            Stage::StageClean,
            Stage::Dumping,
            Stage::Restoring,
            Stage::TunnelDown,
            Stage::Done,
        ]
    );

    let commands = runner.commands();
    assert_eq!(commands[0].program, "mongodump");
    assert!(commands[0].args.contains(&"mongodb://localhost:27018".to_string()));
    let restore = &commands[1];
    assert_eq!(restore.args[0], "--drop");
    assert!(restore.args.contains(&config.mongodb.local_restore_uri));

    clear_directory(&directory);
}

#[test]
fn connectivity_failure_stops_before_the_tunnel() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("connectivity_failure_stops_before_the_tunnel");
    let config = test_config(&directory);

    let tunnel = FakeTunnel {
        unreachable: true,
        ..Default::default()
    };
    let runner = FakeRunner::with_databases(&["alpha"]);

    let mut migration =
        Migration::new(&config, tunnel.clone(), runner.clone(), Interrupt::default());
    let result = migration.run();

    assert!(matches!(result, Err(MigrationError::Connectivity)));
    assert_eq!(tunnel.events(), vec![TunnelEvent::Sweep, TunnelEvent::Check]);
    assert!(runner.commands().is_empty());
    assert_eq!(migration.context().stage, Stage::Failed);

    clear_directory(&directory);
}

#[test]
fn establish_failure_runs_no_tools() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("establish_failure_runs_no_tools");
    let config = test_config(&directory);

    let tunnel = FakeTunnel {
        establish_fails: true,
        ..Default::default()
    };
    let runner = FakeRunner::with_databases(&["alpha"]);

    let mut migration =
        Migration::new(&config, tunnel.clone(), runner.clone(), Interrupt::default());
    let result = migration.run();

    assert!(matches!(result, Err(MigrationError::TunnelEstablishment(_))));
    assert!(runner.commands().is_empty());
    assert_eq!(tunnel.teardowns(), 0);

    clear_directory(&directory);
}

#[test]
fn dump_failure_skips_restore_and_tears_down() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("dump_failure_skips_restore_and_tears_down");
    let config = test_config(&directory);

    let tunnel = FakeTunnel::default();
    let runner = FakeRunner {
        fail_on: Some(("mongodump".into(), CommandStatus::Failed(Some(1)))),
        ..FakeRunner::with_databases(&["alpha"])
    };

    let mut migration =
        Migration::new(&config, tunnel.clone(), runner.clone(), Interrupt::default());
    let result = migration.run();

    assert!(matches!(result, Err(MigrationError::Dump(CommandStatus::Failed(Some(1))))));
    assert!(runner.restored().is_empty());
    assert_eq!(tunnel.count(&TunnelEvent::Teardown(TUNNEL_PID)), 1);

    clear_directory(&directory);
}

#[test]
fn restore_failure_stops_remaining_restores() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("restore_failure_stops_remaining_restores");
    let config = test_config(&directory);

    let tunnel = FakeTunnel::default();
    let runner = FakeRunner {
        fail_on: Some(("--db beta".into(), CommandStatus::Failed(Some(1)))),
        ..FakeRunner::with_databases(&["alpha", "beta", "gamma"])
    };

    let mut migration =
        Migration::new(&config, tunnel.clone(), runner.clone(), Interrupt::default());
    let result = migration.run();

    match result {
        Err(MigrationError::Restore { database, status }) => {
            assert_eq!(database, "beta");
            assert_eq!(status, CommandStatus::Failed(Some(1)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(runner.restored(), vec!["alpha", "beta"]);
    assert_eq!(tunnel.count(&TunnelEvent::Teardown(TUNNEL_PID)), 1);

    clear_directory(&directory);
}

#[test]
fn admin_only_dump_succeeds_without_restores() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("admin_only_dump_succeeds_without_restores");
    let config = test_config(&directory);

    let tunnel = FakeTunnel::default();
    let runner = FakeRunner::with_databases(&["admin"]);

    let mut migration =
        Migration::new(&config, tunnel.clone(), runner.clone(), Interrupt::default());
    let report = migration.run().unwrap();

    assert!(report.restored.is_empty());
    assert_eq!(runner.commands().len(), 1);
    assert_eq!(tunnel.teardowns(), 1);

    clear_directory(&directory);
}

#[test]
fn stale_staging_is_removed_before_the_dump() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("stale_staging_is_removed_before_the_dump");
    let config = test_config(&directory);

    let stale_database = config.backup.dump_path.join("old_db");
    fs::create_dir_all(&stale_database).unwrap();
    fs::write(stale_database.join("collection.bson"), b"old").unwrap();
    fs::write(config.backup.dump_path.join("stale.txt"), b"old").unwrap();

    let tunnel = FakeTunnel::default();
    let runner = FakeRunner::with_databases(&["alpha"]);

    let mut migration = Migration::new(&config, tunnel, runner.clone(), Interrupt::default());
    migration.run().unwrap();

    assert_eq!(*runner.staged_before_dump.lock().unwrap(), None);
    assert_eq!(runner.restored(), vec!["alpha"]);
    assert!(!stale_database.exists());

    clear_directory(&directory);
}

#[test]
fn interrupt_during_dump_tears_down() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("interrupt_during_dump_tears_down");
    let config = test_config(&directory);

    let interrupt = Interrupt::default();
    let tunnel = FakeTunnel::default();
    let runner = FakeRunner {
        interrupt_on: Some(("mongodump".into(), interrupt.clone())),
        ..FakeRunner::with_databases(&["alpha"])
    };

    let mut migration = Migration::new(&config, tunnel.clone(), runner.clone(), interrupt);
    let result = migration.run();

    assert!(matches!(result, Err(MigrationError::Interrupted(Stage::Dumping))));
    assert!(runner.restored().is_empty());
    assert_eq!(tunnel.teardowns(), 1);

    clear_directory(&directory);
}

#[test]
fn interrupt_before_tunnel_never_establishes() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("interrupt_before_tunnel_never_establishes");
    let config = test_config(&directory);

    let interrupt = Interrupt::default();
    interrupt.trigger();
    let tunnel = FakeTunnel::default();
    let runner = FakeRunner::with_databases(&["alpha"]);

    let mut migration = Migration::new(&config, tunnel.clone(), runner.clone(), interrupt);
    let result = migration.run();

    assert!(matches!(result, Err(MigrationError::Interrupted(_))));
    assert_eq!(tunnel.count(&TunnelEvent::Establish), 0);
    assert!(runner.commands().is_empty());

    clear_directory(&directory);
}

#[test]
fn panic_during_restore_still_tears_down() {
    let _logger = shared::test::init_test_logger();
    let directory = test_directory("panic_during_restore_still_tears_down");
    let config = test_config(&directory);

    let tunnel = FakeTunnel::default();
    let runner = FakeRunner {
        panic_on: Some("--db alpha".into()),
        ..FakeRunner::with_databases(&["alpha"])
    };

    let mut migration = Migration::new(&config, tunnel.clone(), runner, Interrupt::default());
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| migration.run()));

    assert!(result.is_err());
    assert_eq!(tunnel.count(&TunnelEvent::Teardown(TUNNEL_PID)), 1);

    clear_directory(&directory);
}
