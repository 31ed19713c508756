use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{TimeDelta, Utc};
use docmigrate::{
    CancellationToken, ChangeUnit, ConfigBuilder, ExecutionOutcome, Filter, Lock, MigrateConfig,
    MigrateError, MigrationState, Migrator, Registry, RollbackOutcome, Store,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;

const ITEMS: &str = "items";

/// Ordered log of the handlers invoked during a scenario.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

pub fn config(executor_id: &str) -> MigrateConfig {
    ConfigBuilder::new()
        .executor_id(executor_id)
        .acquire_timeout(Duration::from_secs(10))
        .retry_interval(Duration::from_millis(10), Duration::from_millis(50))
        .build()
        .expect("test config is valid")
}

/// Inserts one item named after the unit; rollback deletes it.
fn unit(id: &str, order: &str, journal: &Journal) -> ChangeUnit {
    let journal_rollback = journal.clone();
    let rollback_id = id.to_owned();

    irreversible(id, order, journal).rollback(move |store: Store| {
        let journal = journal_rollback.clone();
        let id = rollback_id.clone();
        async move {
            store.delete(ITEMS, &Filter::by_id(&id)).await?;
            journal.push(format!("-{id}"));
            anyhow::Ok(())
        }
    })
}

fn irreversible(id: &str, order: &str, journal: &Journal) -> ChangeUnit {
    let journal = journal.clone();
    let execute_id = id.to_owned();

    ChangeUnit::new(id, order, "tests").execute(move |store: Store| {
        let journal = journal.clone();
        let id = execute_id.clone();
        async move {
            store.insert_one(ITEMS, json!({ "_id": id })).await?;
            journal.push(format!("+{id}"));
            anyhow::Ok(())
        }
    })
}

/// Fails while `broken` is set.
fn flaky(id: &str, order: &str, journal: &Journal, broken: &Arc<AtomicBool>) -> ChangeUnit {
    let journal = journal.clone();
    let broken = broken.clone();
    let execute_id = id.to_owned();

    ChangeUnit::new(id, order, "tests").execute(move |store: Store| {
        let journal = journal.clone();
        let broken = broken.clone();
        let id = execute_id.clone();
        async move {
            if broken.load(Ordering::SeqCst) {
                journal.push(format!("!{id}"));
                anyhow::bail!("price field is missing");
            }

            store.insert_one(ITEMS, json!({ "_id": id })).await?;
            journal.push(format!("+{id}"));
            anyhow::Ok(())
        }
    })
}

/// Signals `started` then never completes on its own.
fn stuck(id: &str, order: &str, started: &Arc<Notify>) -> ChangeUnit {
    let started = started.clone();

    ChangeUnit::new(id, order, "tests").execute(move |_store: Store| {
        let started = started.clone();
        async move {
            started.notify_one();
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::Ok(())
        }
    })
}

/// Replaces the migration lock with one owned by `intruder`.
async fn intrude(store: Store, config: MigrateConfig) -> anyhow::Result<()> {
    let now = Utc::now();
    store
        .upsert(
            &config.lock_collection,
            Lock {
                key: config.lock_key.to_owned(),
                owner_id: "intruder".to_owned(),
                acquired_at: now,
                expires_at: now + TimeDelta::seconds(60),
            },
        )
        .await?;

    Ok(())
}

fn registry(units: Vec<ChangeUnit>) -> anyhow::Result<Registry> {
    let mut registry = Registry::new();
    for unit in units {
        registry.register(unit)?;
    }

    Ok(registry)
}

async fn state(migrator: &Migrator, id: &str) -> anyhow::Result<Option<MigrationState>> {
    Ok(migrator.history().find(id).await?.map(|record| record.state))
}

pub async fn run_executes_plan_in_order(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry = registry(vec![
        unit("c", "003", &journal),
        unit("a", "001", &journal),
        unit("b", "002", &journal),
    ])?;
    let migrator = Migrator::new(store, &registry).config(config("run"));

    let report = migrator.run().await?.into_result()?;

    assert_eq!(report.executed(), vec!["a", "b", "c"]);
    assert_eq!(journal.entries(), vec!["+a", "+b", "+c"]);

    let applied = migrator.history().list_applied().await?;
    let orders = applied.iter().map(|r| r.order.as_str()).collect::<Vec<_>>();
    assert_eq!(orders, vec!["001", "002", "003"]);
    assert!(applied.iter().all(|r| r.executor_id == "run" && r.finished_at.is_some()));

    assert_eq!(store.find(ITEMS, &Filter::all()).await?.len(), 3);
    assert!(!migrator.locks().is_held().await?);

    Ok(())
}

pub async fn run_is_idempotent(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry = registry(vec![unit("a", "001", &journal), unit("b", "002", &journal)])?;
    let migrator = Migrator::new(store, &registry).config(config("idempotent"));

    migrator.run().await?.into_result()?;
    let first = migrator.history().list().await?;

    let report = migrator.run().await?.into_result()?;
    let second = migrator.history().list().await?;

    assert!(report.executed().is_empty());
    assert_eq!(report.skipped(), vec!["a", "b"]);
    assert_eq!(journal.entries(), vec!["+a", "+b"]);
    assert_eq!(first, second);

    Ok(())
}

pub async fn failed_unit_halts_and_resumes(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let broken = Arc::new(AtomicBool::new(true));
    let registry = registry(vec![
        unit("001", "001", &journal),
        flaky("002", "002", &journal, &broken),
        unit("003", "003", &journal),
    ])?;
    let migrator = Migrator::new(store, &registry).config(config("resume"));

    let report = migrator.run().await?;

    assert_eq!(report.outcome("001"), Some(&ExecutionOutcome::Executed));
    assert_eq!(
        report.outcome("002"),
        Some(&ExecutionOutcome::Failed("price field is missing".to_owned()))
    );
    assert_eq!(report.outcome("003"), Some(&ExecutionOutcome::Blocked));
    assert!(matches!(
        report.error,
        Some(MigrateError::ExecutionFailure { ref id, .. }) if id == "002"
    ));

    assert_eq!(state(&migrator, "001").await?, Some(MigrationState::Executed));
    let failed = migrator.history().find("002").await?.expect("002 is recorded");
    assert_eq!(failed.state, MigrationState::Failed);
    assert_eq!(failed.error.as_deref(), Some("price field is missing"));
    assert_eq!(state(&migrator, "003").await?, None);
    assert!(!migrator.locks().is_held().await?);

    broken.store(false, Ordering::SeqCst);

    let report = migrator.run().await?.into_result()?;

    assert_eq!(report.skipped(), vec!["001"]);
    assert_eq!(report.executed(), vec!["002", "003"]);
    assert_eq!(journal.entries(), vec!["+001", "!002", "+002", "+003"]);

    let resolved = migrator.history().find("002").await?.expect("002 is recorded");
    assert_eq!(resolved.state, MigrationState::Executed);
    assert_eq!(resolved.error, None);

    Ok(())
}

pub async fn resumes_at_first_unapplied_unit(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let broken = Arc::new(AtomicBool::new(true));
    let registry = registry(vec![
        unit("u1", "1", &journal),
        unit("u2", "2", &journal),
        flaky("u3", "3", &journal, &broken),
        unit("u4", "4", &journal),
        unit("u5", "5", &journal),
    ])?;
    let migrator = Migrator::new(store, &registry).config(config("resume-five"));

    let report = migrator.run().await?;
    assert!(!report.is_success());
    assert_eq!(report.blocked(), vec!["u4", "u5"]);
    assert!(report.into_result().is_err());

    broken.store(false, Ordering::SeqCst);
    let report = migrator.run().await?.into_result()?;

    assert_eq!(report.skipped(), vec!["u1", "u2"]);
    assert_eq!(report.executed(), vec!["u3", "u4", "u5"]);
    assert_eq!(
        journal.entries(),
        vec!["+u1", "+u2", "!u3", "+u3", "+u4", "+u5"]
    );

    Ok(())
}

pub async fn pending_record_is_executed_again(store: &Store) -> anyhow::Result<()> {
    store.init().await?;

    let journal = Journal::default();
    let crashed = unit("a", "001", &journal);
    let registry = registry(vec![crashed.clone(), unit("b", "002", &journal)])?;
    let migrator = Migrator::new(store, &registry).config(config("after-crash"));

    migrator.history().record_start(&crashed).await?;
    assert_eq!(state(&migrator, "a").await?, Some(MigrationState::Pending));

    let report = migrator.run().await?.into_result()?;

    assert_eq!(report.executed(), vec!["a", "b"]);
    assert_eq!(state(&migrator, "a").await?, Some(MigrationState::Executed));

    Ok(())
}

pub async fn concurrent_runs_are_mutually_exclusive(store: &Store) -> anyhow::Result<()> {
    let executions = Arc::new(AtomicUsize::new(0));
    let overlapping = Arc::new(AtomicBool::new(false));
    let running = Arc::new(AtomicBool::new(false));

    let mut units = Vec::new();
    for n in 1..=3 {
        let executions = executions.clone();
        let overlapping = overlapping.clone();
        let running = running.clone();

        units.push(
            ChangeUnit::new(format!("slow-{n}"), format!("00{n}"), "tests").execute(
                move |_store: Store| {
                    let executions = executions.clone();
                    let overlapping = overlapping.clone();
                    let running = running.clone();
                    async move {
                        if running.swap(true, Ordering::SeqCst) {
                            overlapping.store(true, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        executions.fetch_add(1, Ordering::SeqCst);
                        running.store(false, Ordering::SeqCst);
                        anyhow::Ok(())
                    }
                },
            ),
        );
    }

    let registry = registry(units)?;
    let first = Migrator::new(store, &registry).config(config("instance-1"));
    let second = Migrator::new(store, &registry).config(config("instance-2"));

    let reports = join_all([first.run(), second.run()]).await;
    let mut executed = 0;
    let mut noop = 0;

    for report in reports {
        let report = report?.into_result()?;
        executed += report.executed().len();

        if report.skipped().len() == 3 {
            noop += 1;
        }
    }

    assert_eq!(executions.load(Ordering::SeqCst), 3);
    assert_eq!(executed, 3);
    assert_eq!(noop, 1);
    assert!(!overlapping.load(Ordering::SeqCst));

    let owners = first
        .history()
        .list()
        .await?
        .into_iter()
        .map(|record| record.executor_id)
        .collect::<std::collections::HashSet<_>>();
    assert_eq!(owners.len(), 1);

    Ok(())
}

pub async fn live_lock_times_out(store: &Store) -> anyhow::Result<()> {
    store.init().await?;

    let journal = Journal::default();
    let registry = registry(vec![unit("a", "001", &journal)])?;
    let holder = Migrator::new(store, &registry).config(config("holder"));
    let waiter = Migrator::new(store, &registry).config(
        ConfigBuilder::new()
            .executor_id("waiter")
            .acquire_timeout(Duration::from_millis(200))
            .retry_interval(Duration::from_millis(10), Duration::from_millis(40))
            .build()?,
    );

    let handle = holder
        .locks()
        .acquire(Duration::from_secs(1), Duration::from_secs(60))
        .await?;
    assert!(holder.locks().is_held().await?);

    let err = waiter.run().await.expect_err("lock is held");
    assert!(matches!(
        err,
        MigrateError::LockTimeout { owner: Some(ref owner), .. } if owner == "holder"
    ));
    assert!(journal.entries().is_empty());

    holder.locks().release(handle).await?;

    let report = waiter.run().await?.into_result()?;
    assert_eq!(report.executed(), vec!["a"]);

    Ok(())
}

pub async fn expired_lock_is_reclaimed(store: &Store) -> anyhow::Result<()> {
    store.init().await?;

    let journal = Journal::default();
    let registry = registry(vec![unit("a", "001", &journal)])?;
    let crashed = Migrator::new(store, &registry).config(config("crashed"));
    let survivor = Migrator::new(store, &registry).config(config("survivor"));

    let stale = crashed
        .locks()
        .acquire(Duration::from_secs(1), Duration::from_millis(1))
        .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!crashed.locks().is_held().await?);

    let report = survivor.run().await?.into_result()?;
    assert_eq!(report.executed(), vec!["a"]);

    let err = crashed
        .locks()
        .release(stale)
        .await
        .expect_err("lock was reclaimed");
    assert!(matches!(err, MigrateError::LockLost { ref owner_id } if owner_id == "crashed"));

    Ok(())
}

pub async fn stale_lock_is_swapped_once(store: &Store) -> anyhow::Result<()> {
    store.init().await?;

    let abandoned = Migrator::new(store, &Registry::new()).config(config("abandoned"));

    abandoned
        .locks()
        .acquire(Duration::from_secs(1), Duration::from_millis(1))
        .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let contenders = (0..4)
        .map(|n| {
            Migrator::new(store, &Registry::new()).config(
                ConfigBuilder::new()
                    .executor_id(format!("contender-{n}"))
                    .retry_interval(Duration::from_millis(5), Duration::from_millis(10))
                    .build()
                    .expect("test config is valid"),
            )
        })
        .collect::<Vec<_>>();

    let locks = contenders.iter().map(|m| m.locks()).collect::<Vec<_>>();
    let attempts = join_all(
        locks
            .iter()
            .map(|locks| locks.acquire(Duration::from_millis(1), Duration::from_secs(60))),
    )
    .await;

    let winners = attempts.iter().filter(|attempt| attempt.is_ok()).count();
    assert_eq!(winners, 1);

    let current = abandoned.locks().current().await?.expect("lock is held");
    assert!(current.owner_id.starts_with("contender-"));

    Ok(())
}

pub async fn checksum_drift_halts_run(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry_v1 = registry(vec![
        unit("a", "001", &journal),
        unit("b", "002", &journal),
        unit("c", "003", &journal),
    ])?;
    Migrator::new(store, &registry_v1)
        .config(config("drift"))
        .run_until("002")
        .await?
        .into_result()?;

    let registry_v2 = registry(vec![
        unit("a", "001", &journal),
        unit("b", "002", &journal).content("rewritten after it ran"),
        unit("c", "003", &journal),
    ])?;
    let migrator = Migrator::new(store, &registry_v2).config(config("drift"));

    let report = migrator.run().await?;

    assert_eq!(report.outcome("a"), Some(&ExecutionOutcome::Skipped));
    assert_eq!(report.outcome("b"), Some(&ExecutionOutcome::Blocked));
    assert_eq!(report.outcome("c"), Some(&ExecutionOutcome::Blocked));
    assert!(matches!(
        report.error,
        Some(MigrateError::ChecksumMismatch { ref id, .. }) if id == "b"
    ));
    assert_eq!(state(&migrator, "b").await?, Some(MigrationState::Executed));
    assert_eq!(state(&migrator, "c").await?, None);
    assert_eq!(journal.entries(), vec!["+a", "+b"]);

    let status = migrator.status().await?;
    let drifted = status.drifted().iter().map(|u| u.id.as_str()).collect::<Vec<_>>();
    assert_eq!(drifted, vec!["b"]);

    let rollback = migrator.rollback_all().await?;
    assert!(matches!(
        rollback.error,
        Some(MigrateError::ChecksumMismatch { ref id, .. }) if id == "b"
    ));
    assert_eq!(rollback.outcome("b"), Some(&RollbackOutcome::Untouched));
    assert_eq!(rollback.outcome("a"), Some(&RollbackOutcome::Untouched));

    Ok(())
}

pub async fn rollback_reverses_forward_order(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry = registry(vec![
        unit("a", "001", &journal),
        unit("b", "002", &journal),
        unit("c", "003", &journal),
    ])?;
    let migrator = Migrator::new(store, &registry).config(config("symmetry"));

    migrator.run().await?.into_result()?;
    let report = migrator.rollback_all().await?.into_result()?;

    assert_eq!(report.rolled_back(), vec!["c", "b", "a"]);
    assert_eq!(
        journal.entries(),
        vec!["+a", "+b", "+c", "-c", "-b", "-a"]
    );
    assert!(migrator.history().list_applied().await?.is_empty());
    assert!(migrator
        .history()
        .list()
        .await?
        .iter()
        .all(|record| record.state == MigrationState::RolledBack));
    assert!(store.find(ITEMS, &Filter::all()).await?.is_empty());
    assert!(!migrator.locks().is_held().await?);

    let report = migrator.run().await?.into_result()?;
    assert_eq!(report.executed(), vec!["a", "b", "c"]);

    Ok(())
}

pub async fn rollback_target_is_exclusive(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry = registry(vec![
        unit("a", "001", &journal),
        unit("b", "002", &journal),
        unit("c", "003", &journal),
    ])?;
    let migrator = Migrator::new(store, &registry).config(config("target"));

    migrator.run().await?.into_result()?;
    let report = migrator.rollback_to("001").await?.into_result()?;

    assert_eq!(report.target, "001");
    assert_eq!(report.rolled_back(), vec!["c", "b"]);
    assert_eq!(state(&migrator, "a").await?, Some(MigrationState::Executed));
    assert_eq!(state(&migrator, "b").await?, Some(MigrationState::RolledBack));

    let report = migrator.rollback_to("001").await?.into_result()?;
    assert!(report.units.is_empty());

    Ok(())
}

pub async fn irreversible_unit_stops_rollback(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry = registry(vec![
        unit("a", "001", &journal),
        irreversible("b", "002", &journal),
        unit("c", "003", &journal),
    ])?;
    let migrator = Migrator::new(store, &registry).config(config("irreversible"));

    migrator.run().await?.into_result()?;
    let report = migrator.rollback_all().await?;

    assert_eq!(report.outcome("c"), Some(&RollbackOutcome::RolledBack));
    assert_eq!(report.outcome("b"), Some(&RollbackOutcome::Irreversible));
    assert_eq!(report.outcome("a"), Some(&RollbackOutcome::Untouched));
    assert!(matches!(
        report.error,
        Some(MigrateError::IrreversibleChangeUnit { ref id }) if id == "b"
    ));
    assert_eq!(state(&migrator, "a").await?, Some(MigrationState::Executed));
    assert_eq!(state(&migrator, "b").await?, Some(MigrationState::Executed));
    assert_eq!(state(&migrator, "c").await?, Some(MigrationState::RolledBack));
    assert!(!migrator.locks().is_held().await?);

    Ok(())
}

pub async fn failed_rollback_keeps_ledger(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry = registry(vec![
        unit("a", "001", &journal),
        unit("b", "002", &journal),
        irreversible("c", "003", &journal)
            .rollback(|_store: Store| async {
                Err::<(), _>(anyhow::anyhow!("collection is locked"))
            }),
    ])?;
    let migrator = Migrator::new(store, &registry).config(config("rollback-failure"));

    migrator.run().await?.into_result()?;
    let report = migrator.rollback_all().await?;

    assert_eq!(
        report.outcome("c"),
        Some(&RollbackOutcome::Failed("collection is locked".to_owned()))
    );
    assert_eq!(report.outcome("b"), Some(&RollbackOutcome::Untouched));
    assert!(matches!(
        report.error,
        Some(MigrateError::RollbackFailure { ref id, .. }) if id == "c"
    ));
    assert_eq!(state(&migrator, "c").await?, Some(MigrationState::Executed));
    assert_eq!(state(&migrator, "b").await?, Some(MigrationState::Executed));

    Ok(())
}

pub async fn unregistered_unit_stops_rollback(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let full = registry(vec![unit("a", "001", &journal), unit("b", "002", &journal)])?;
    Migrator::new(store, &full)
        .config(config("orphan"))
        .run()
        .await?
        .into_result()?;

    let trimmed = registry(vec![unit("a", "001", &journal)])?;
    let migrator = Migrator::new(store, &trimmed).config(config("orphan"));

    let report = migrator.rollback_all().await?;

    assert!(matches!(
        report.error,
        Some(MigrateError::UnknownChangeUnit { ref id }) if id == "b"
    ));
    assert_eq!(state(&migrator, "a").await?, Some(MigrationState::Executed));

    Ok(())
}

pub async fn cancellation_before_run(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry = registry(vec![unit("a", "001", &journal), unit("b", "002", &journal)])?;
    let token = CancellationToken::new();
    let migrator = Migrator::new(store, &registry)
        .config(config("cancelled"))
        .cancellation(token.clone());

    token.cancel();
    let report = migrator.run().await?;

    assert!(matches!(report.error, Some(MigrateError::Cancelled)));
    assert_eq!(report.blocked(), vec!["a", "b"]);
    assert!(journal.entries().is_empty());
    assert!(migrator.history().list().await?.is_empty());
    assert!(!migrator.locks().is_held().await?);

    Ok(())
}

pub async fn cancellation_aborts_unit_in_flight(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let started = Arc::new(Notify::new());
    let registry = registry(vec![
        unit("a", "001", &journal),
        stuck("b", "002", &started),
        unit("c", "003", &journal),
    ])?;
    let token = CancellationToken::new();
    let migrator = Migrator::new(store, &registry)
        .config(config("interrupted"))
        .cancellation(token.clone());

    let run = tokio::spawn({
        let migrator = migrator.clone();
        async move { migrator.run().await }
    });

    started.notified().await;
    token.cancel();

    let report = run.await??;

    assert_eq!(report.outcome("a"), Some(&ExecutionOutcome::Executed));
    assert_eq!(
        report.outcome("b"),
        Some(&ExecutionOutcome::Failed("cancelled".to_owned()))
    );
    assert_eq!(report.outcome("c"), Some(&ExecutionOutcome::Blocked));
    assert!(matches!(report.error, Some(MigrateError::Cancelled)));

    let record = migrator.history().find("b").await?.expect("b is recorded");
    assert_eq!(record.state, MigrationState::Failed);
    assert_eq!(record.error.as_deref(), Some("cancelled"));
    assert!(!migrator.locks().is_held().await?);

    Ok(())
}

pub async fn lost_lease_aborts_unit_in_flight(store: &Store) -> anyhow::Result<()> {
    let started = Arc::new(Notify::new());
    let registry = registry(vec![stuck("a", "001", &started)])?;
    let config = ConfigBuilder::new()
        .executor_id("evicted")
        .lease_duration(Duration::from_secs(2))
        .renew_interval(Duration::from_millis(50))
        .build()?;
    let migrator = Migrator::new(store, &registry).config(config.clone());

    let run = tokio::spawn({
        let migrator = migrator.clone();
        async move { migrator.run().await }
    });

    started.notified().await;

    let now = Utc::now();
    store
        .upsert(
            &config.lock_collection,
            Lock {
                key: config.lock_key.to_owned(),
                owner_id: "intruder".to_owned(),
                acquired_at: now,
                expires_at: now + TimeDelta::seconds(60),
            },
        )
        .await?;

    let report = tokio::time::timeout(Duration::from_secs(10), run).await???;

    assert!(matches!(report.outcome("a"), Some(ExecutionOutcome::Failed(_))));
    assert!(matches!(
        report.error,
        Some(MigrateError::LockLost { ref owner_id }) if owner_id == "evicted"
    ));
    assert!(matches!(
        report.release_error,
        Some(MigrateError::LockLost { .. })
    ));
    assert_eq!(state(&migrator, "a").await?, Some(MigrationState::Failed));

    let lock = migrator.locks().current().await?.expect("intruder holds the lock");
    assert_eq!(lock.owner_id, "intruder");

    Ok(())
}

pub async fn run_until_executes_prefix(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry = registry(vec![
        unit("a", "001", &journal),
        unit("b", "002", &journal),
        unit("c", "003", &journal),
    ])?;
    let migrator = Migrator::new(store, &registry).config(config("partial"));

    let report = migrator.run_until("002").await?.into_result()?;

    assert_eq!(report.executed(), vec!["a", "b"]);
    assert_eq!(report.outcome("c"), None);

    let status = migrator.status().await?;
    let pending = status.pending().iter().map(|u| u.id.as_str()).collect::<Vec<_>>();
    assert_eq!(pending, vec!["c"]);

    Ok(())
}

pub async fn status_reports_plan_and_orphans(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let old = registry(vec![unit("a", "001", &journal), unit("b", "002", &journal)])?;
    Migrator::new(store, &old)
        .config(config("status"))
        .run()
        .await?
        .into_result()?;

    let current = registry(vec![
        unit("b", "002", &journal),
        irreversible("c", "003", &journal),
    ])?;
    let status = Migrator::new(store, &current)
        .config(config("status"))
        .status()
        .await?;

    let b = status.get("b").expect("b is planned");
    assert!(b.is_applied());
    assert!(b.reversible);
    assert!(!b.checksum_mismatch);

    let c = status.get("c").expect("c is planned");
    assert!(c.record.is_none());
    assert!(!c.reversible);

    let orphans = status
        .orphans
        .iter()
        .map(|r| r.change_unit_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(orphans, vec!["a"]);

    Ok(())
}

pub async fn run_always_unit_runs_every_time(store: &Store) -> anyhow::Result<()> {
    let executions = Arc::new(AtomicUsize::new(0));
    let always = |content: &str| {
        let executions = executions.clone();
        ChangeUnit::new("refresh-views", "900", "tests")
            .content(content)
            .run_always()
            .execute(move |_store: Store| {
                let executions = executions.clone();
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
    };

    let migrator = Migrator::new(store, &registry(vec![always("v1")])?).config(config("always"));
    migrator.run().await?.into_result()?;
    let report = migrator.run().await?.into_result()?;
    assert_eq!(report.executed(), vec!["refresh-views"]);

    let migrator = Migrator::new(store, &registry(vec![always("v2")])?).config(config("always"));
    let report = migrator.run().await?.into_result()?;
    assert_eq!(report.executed(), vec!["refresh-views"]);
    assert_eq!(executions.load(Ordering::SeqCst), 3);

    let record = migrator
        .history()
        .find("refresh-views")
        .await?
        .expect("recorded");
    assert_eq!(record.checksum, always("v2").current_checksum());

    Ok(())
}

pub async fn takeover_between_units_halts_run(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let config = config("evicted");
    let takeover = ChangeUnit::new("a", "001", "tests").execute({
        let config = config.clone();
        move |store: Store| intrude(store, config.clone())
    });
    let registry = registry(vec![takeover, unit("b", "002", &journal)])?;
    let migrator = Migrator::new(store, &registry).config(config);

    let report = migrator.run().await?;

    assert!(matches!(report.outcome("a"), Some(ExecutionOutcome::Failed(_))));
    assert_eq!(report.outcome("b"), Some(&ExecutionOutcome::Blocked));
    assert!(matches!(
        report.error,
        Some(MigrateError::LockLost { ref owner_id }) if owner_id == "evicted"
    ));
    assert!(matches!(
        report.release_error,
        Some(MigrateError::LockLost { .. })
    ));
    assert!(!report.is_success());

    assert!(journal.entries().is_empty());
    assert_eq!(state(&migrator, "a").await?, Some(MigrationState::Failed));
    assert_eq!(state(&migrator, "b").await?, None);

    let lock = migrator.locks().current().await?.expect("intruder holds the lock");
    assert_eq!(lock.owner_id, "intruder");

    Ok(())
}

pub async fn guard_detects_takeover(store: &Store) -> anyhow::Result<()> {
    store.init().await?;

    let config = config("evicted");
    let migrator = Migrator::new(store, &Registry::new()).config(config.clone());

    let guard = migrator.locks().lock().await?;
    guard.ensure_held().await?;
    assert!(!guard.is_lost());

    intrude(store.clone(), config.clone()).await?;

    let err = guard.ensure_held().await.expect_err("lock was taken over");
    assert!(matches!(err, MigrateError::LockLost { ref owner_id } if owner_id == "evicted"));
    assert!(guard.is_lost());

    // Once lost, the guard stays lost even if the intruder goes away.
    store
        .delete(&config.lock_collection, &Filter::by_id(&config.lock_key))
        .await?;
    assert!(guard.ensure_held().await.is_err());

    Ok(())
}

pub async fn rollback_stops_when_lock_is_taken_over(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let config = config("evicted");
    let takeover = irreversible("b", "002", &journal).rollback({
        let config = config.clone();
        move |store: Store| intrude(store, config.clone())
    });
    let registry = registry(vec![unit("a", "001", &journal), takeover])?;
    let migrator = Migrator::new(store, &registry).config(config);

    migrator.run().await?.into_result()?;

    let report = migrator.rollback_all().await?;

    assert!(matches!(report.outcome("b"), Some(RollbackOutcome::Failed(_))));
    assert_eq!(report.outcome("a"), Some(&RollbackOutcome::Untouched));
    assert!(matches!(report.error, Some(MigrateError::LockLost { .. })));
    assert!(matches!(report.release_error, Some(MigrateError::LockLost { .. })));

    assert_eq!(journal.entries(), vec!["+a", "+b"]);
    assert_eq!(state(&migrator, "a").await?, Some(MigrationState::Executed));
    assert_eq!(state(&migrator, "b").await?, Some(MigrationState::Executed));

    Ok(())
}

pub async fn renewal_slower_than_lease_is_rejected(store: &Store) -> anyhow::Result<()> {
    let journal = Journal::default();
    let registry = registry(vec![unit("a", "001", &journal)])?;
    let config = MigrateConfig {
        lease_duration: Duration::from_millis(100),
        renew_interval: Some(Duration::from_secs(5)),
        ..config("slow")
    };
    let migrator = Migrator::new(store, &registry).config(config);

    let err = migrator.run().await.expect_err("lease cannot be renewed in time");

    assert!(matches!(err, MigrateError::InvalidConfig(_)));
    assert!(journal.entries().is_empty());
    assert!(!migrator.locks().is_held().await?);

    Ok(())
}
