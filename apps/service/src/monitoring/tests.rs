/// Integration tests for the probe/notification pipeline
///
/// These tests verify end-to-end functionality of:
/// - Repository round-trips and the two-phase snapshot write
/// - Rolling window aggregation
/// - Notification decisions across state transitions
/// - Live probes against in-process HTTP listeners
/// - The adaptive scheduling chain
/// - The stranded-snapshot sweep
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tempfile::{TempDir, tempdir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::database::models::{Monitor, Snapshot, User};
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::monitoring::executor::ProbeExecutor;
use crate::monitoring::matcher::MatchRule;
use crate::monitoring::metrics;
use crate::monitoring::notifier::{NotificationEngine, NotifyChannel, NotifyError};
use crate::monitoring::scheduler::{Scheduler, TokioQueue, next_delay};
use crate::monitoring::sweeper::{INTERRUPTED_MESSAGE, SnapshotSweeper, SweepPolicy};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Helper to create a test database; the TempDir keeps the file alive.
async fn create_test_database() -> Result<(TempDir, Arc<DatabaseImpl>)> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("test.db");

    let db = libsql::Builder::new_local(db_path.to_string_lossy().as_ref()).build().await?;
    let pool: LibsqlPool = deadpool::managed::Pool::builder(LibsqlManager::new(db)).build()?;

    {
        let conn = pool.get().await?;
        initialize_database(&conn).await?;
    }

    Ok((temp_dir, Arc::new(DatabaseImpl::new_from_pool(pool))))
}

/// Seed an owner and a monitor with the scenario cadence (300/30/60).
async fn seed_monitor(database: &dyn Database, request_url: &str) -> Result<Monitor> {
    let user = User::new("ops", "ops@example.com");
    database.save_user(&user).await?;

    let mut monitor = Monitor::new("example", request_url, user.uuid);
    monitor.interval_normal = 300;
    monitor.interval_error = 30;
    monitor.interval_match = 60;
    let id = database.save_monitor(&monitor).await?;
    monitor.id = Some(id);

    Ok(monitor)
}

/// Insert a snapshot; completes it when `is_done` is set on the value.
async fn store_snapshot(database: &dyn Database, snapshot: &mut Snapshot) -> Result<()> {
    let id = database.insert_pending_snapshot(snapshot).await?;
    snapshot.id = Some(id);
    if snapshot.is_done {
        database.complete_snapshot(snapshot).await?;
    }
    Ok(())
}

fn done_snapshot(monitor_uuid: Uuid, is_error: bool, is_match: bool) -> Snapshot {
    let mut snapshot = Snapshot::pending(monitor_uuid);
    snapshot.is_done = true;
    snapshot.is_error = is_error;
    snapshot.is_match = is_match;
    if is_error {
        snapshot.error_message = "request error[connect]: connection refused".to_string();
    }
    snapshot
}

/// Minimal HTTP/1.1 listener answering every connection with a canned
/// response, so probe tests pass without network access.
async fn spawn_http_server(status_line: &'static str, body: &'static str) -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "{status_line}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Ok(port)
}

/// A 127.0.0.1 port with nothing listening on it.
async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Records delivered messages instead of sending them anywhere.
struct RecordingChannel {
    messages: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        _user: &User,
        message: &str,
        _snapshot: &Snapshot,
    ) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_monitor_roundtrip() -> Result<()> {
    let (_dir, database) = create_test_database().await?;

    let user = User::new("ops", "ops@example.com");
    database.save_user(&user).await?;

    let mut monitor = Monitor::new("api", "https://example.com/health", user.uuid);
    monitor.match_rule = MatchRule::BodyContains { needle: "down".to_string() };
    monitor.request_method = "POST".to_string();
    monitor.request_body = r#"{"ping":true}"#.to_string();
    database.save_monitor(&monitor).await?;

    let loaded = database.get_monitor_by_uuid(monitor.uuid).await?.expect("monitor saved");
    assert_eq!(loaded.name, "api");
    assert_eq!(loaded.request_method, "POST");
    assert_eq!(loaded.request_body, r#"{"ping":true}"#);
    assert_eq!(loaded.match_rule, MatchRule::BodyContains { needle: "down".to_string() });
    assert_eq!(loaded.user_uuid, user.uuid);
    assert_eq!(loaded.averages.hours_24, None);

    // unknown uuid is a miss, not an error
    assert!(database.get_monitor_by_uuid(Uuid::new_v4()).await?.is_none());

    // disabled monitors are not enumerated for arming
    let mut disabled = Monitor::new("old", "https://example.com/", user.uuid);
    disabled.enabled = false;
    database.save_monitor(&disabled).await?;
    let enabled = database.get_enabled_monitors().await?;
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].uuid, monitor.uuid);

    Ok(())
}

#[tokio::test]
async fn test_save_monitor_rejects_invalid_config() -> Result<()> {
    let (_dir, database) = create_test_database().await?;

    let user = User::new("ops", "ops@example.com");
    database.save_user(&user).await?;

    let monitor = Monitor::new("bad", "ftp://example.com/", user.uuid);
    assert!(database.save_monitor(&monitor).await.is_err());

    let mut monitor = Monitor::new("bad", "https://example.com/", user.uuid);
    monitor.interval_normal = 1;
    assert!(database.save_monitor(&monitor).await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_two_phase_snapshot_write() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let monitor = seed_monitor(database.as_ref(), "https://example.com/").await?;

    let mut snapshot = Snapshot::pending(monitor.uuid);
    let id = database.insert_pending_snapshot(&snapshot).await?;
    snapshot.id = Some(id);

    // phase one is observable before the probe completes
    let pending = database.latest_snapshot(monitor.uuid).await?.expect("row reserved");
    assert!(!pending.is_done);
    assert!(!pending.is_error);

    snapshot.http_status_code = Some(200);
    snapshot.headers = "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\n".to_string();
    snapshot.body_content = "ok".to_string();
    snapshot.time_total = 42;
    snapshot.time_dns = 3;
    snapshot.time_connection = 10;
    snapshot.time_transport = 30;
    snapshot.is_done = true;
    database.complete_snapshot(&snapshot).await?;

    let completed = database.latest_snapshot(monitor.uuid).await?.expect("row exists");
    assert!(completed.is_done);
    assert_eq!(completed.http_status_code, Some(200));
    assert_eq!(completed.body_content, "ok");
    assert_eq!(completed.time_total, 42);

    // a completed row cannot be completed again
    assert!(database.complete_snapshot(&snapshot).await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_snapshot_before_ordering() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let monitor = seed_monitor(database.as_ref(), "https://example.com/").await?;

    let mut first = done_snapshot(monitor.uuid, false, false);
    store_snapshot(database.as_ref(), &mut first).await?;
    let mut second = done_snapshot(monitor.uuid, true, false);
    store_snapshot(database.as_ref(), &mut second).await?;

    let previous = database
        .snapshot_before(monitor.uuid, second.id.unwrap())
        .await?
        .expect("first snapshot precedes second");
    assert_eq!(previous.id, first.id);

    // nothing precedes the first snapshot
    assert!(database.snapshot_before(monitor.uuid, first.id.unwrap()).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_rolling_averages_windows() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let monitor = seed_monitor(database.as_ref(), "https://example.com/").await?;
    let now = Utc::now();

    // inside every window
    let mut recent = done_snapshot(monitor.uuid, false, false);
    recent.time_total = 100;
    recent.created_at = now - chrono::Duration::minutes(10);
    store_snapshot(database.as_ref(), &mut recent).await?;

    // inside the 12h and 24h windows only
    let mut older = done_snapshot(monitor.uuid, false, false);
    older.time_total = 200;
    older.created_at = now - chrono::Duration::hours(2);
    store_snapshot(database.as_ref(), &mut older).await?;

    // outside all windows
    let mut ancient = done_snapshot(monitor.uuid, false, false);
    ancient.time_total = 9000;
    ancient.created_at = now - chrono::Duration::hours(30);
    store_snapshot(database.as_ref(), &mut ancient).await?;

    // pending rows never contribute
    let mut pending = Snapshot::pending(monitor.uuid);
    pending.created_at = now - chrono::Duration::minutes(5);
    database.insert_pending_snapshot(&pending).await?;

    let averages = metrics::rolling_averages(database.as_ref(), monitor.uuid, now).await?;
    assert_eq!(averages.minutes_15, Some(100.0));
    assert_eq!(averages.minutes_30, Some(100.0));
    assert_eq!(averages.hours_1, Some(100.0));
    assert_eq!(averages.hours_12, Some(150.0));
    assert_eq!(averages.hours_24, Some(150.0));

    // no qualifying rows yields None, not zero
    let empty = metrics::rolling_averages(database.as_ref(), Uuid::new_v4(), now).await?;
    assert_eq!(empty.minutes_15, None);
    assert_eq!(empty.hours_24, None);

    Ok(())
}

#[tokio::test]
async fn test_notification_scenario_error_and_recovery() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let monitor = seed_monitor(database.as_ref(), "https://example.com/").await?;

    let messages = Arc::new(Mutex::new(Vec::new()));
    let channel = Arc::new(RecordingChannel { messages: Arc::clone(&messages) });
    let engine = NotificationEngine::new(
        database.clone() as Arc<dyn Database>,
        vec![channel as Arc<dyn NotifyChannel>],
    );

    // probe 1: first-ever snapshot, clean -> suppressed, normal cadence
    let mut first = done_snapshot(monitor.uuid, false, false);
    store_snapshot(database.as_ref(), &mut first).await?;
    engine.handle_snapshot(&monitor, &first).await?;
    assert_eq!(next_delay(&monitor, Some(&first)), Duration::from_secs(300));

    // probe 2: transport error -> notified, error cadence
    let mut second = done_snapshot(monitor.uuid, true, false);
    store_snapshot(database.as_ref(), &mut second).await?;
    engine.handle_snapshot(&monitor, &second).await?;
    assert_eq!(next_delay(&monitor, Some(&second)), Duration::from_secs(30));

    assert!(wait_for(|| messages.lock().unwrap().len() == 1).await);
    assert_eq!(
        messages.lock().unwrap()[0],
        "request error, request error[connect]: connection refused"
    );

    // probe 3: still erroring -> suppressed
    let mut third = done_snapshot(monitor.uuid, true, false);
    store_snapshot(database.as_ref(), &mut third).await?;
    engine.handle_snapshot(&monitor, &third).await?;

    // probe 4: recovered -> notified, normal cadence
    let mut fourth = done_snapshot(monitor.uuid, false, false);
    store_snapshot(database.as_ref(), &mut fourth).await?;
    engine.handle_snapshot(&monitor, &fourth).await?;
    assert_eq!(next_delay(&monitor, Some(&fourth)), Duration::from_secs(300));

    assert!(wait_for(|| messages.lock().unwrap().len() == 2).await);
    assert_eq!(messages.lock().unwrap()[1], "recovered to normal");

    Ok(())
}

#[tokio::test]
async fn test_live_probe_records_match_and_monitor_state() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let port = spawn_http_server("HTTP/1.1 200 OK", "status: maintenance").await?;

    let mut monitor =
        seed_monitor(database.as_ref(), &format!("http://127.0.0.1:{port}/")).await?;
    monitor.match_rule = MatchRule::BodyContains { needle: "maintenance".to_string() };
    database.save_monitor(&monitor).await?;

    let executor = ProbeExecutor::new(database.clone() as Arc<dyn Database>, 10, 5);
    let snapshot = executor.run(&monitor).await?;

    assert!(snapshot.is_done);
    assert!(!snapshot.is_error);
    assert!(snapshot.is_match);
    assert_eq!(snapshot.http_status_code, Some(200));
    assert!(snapshot.headers.to_lowercase().contains("content-type"));
    assert_eq!(snapshot.body_content, "status: maintenance");
    // cumulative marks never decrease
    assert!(snapshot.time_dns <= snapshot.time_connection);
    assert!(snapshot.time_connection <= snapshot.time_total);

    let updated = database.get_monitor_by_uuid(monitor.uuid).await?.expect("monitor exists");
    assert!(updated.last_match);
    assert!(updated.last_match_time.is_some());
    assert!(!updated.last_error);
    assert!(updated.last_error_time.is_none());
    assert!(updated.averages.minutes_15.is_some());

    Ok(())
}

#[tokio::test]
async fn test_live_probe_suppresses_body_when_configured() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let port = spawn_http_server("HTTP/1.1 200 OK", "should not be stored").await?;

    let mut monitor =
        seed_monitor(database.as_ref(), &format!("http://127.0.0.1:{port}/")).await?;
    monitor.request_no_body = true;
    database.save_monitor(&monitor).await?;

    let executor = ProbeExecutor::new(database.clone() as Arc<dyn Database>, 10, 5);
    let snapshot = executor.run(&monitor).await?;

    assert!(!snapshot.is_error);
    assert_eq!(snapshot.http_status_code, Some(200));
    assert_eq!(snapshot.body_content, "");

    Ok(())
}

#[tokio::test]
async fn test_live_probe_transport_error_skips_matching() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let port = closed_port().await?;

    let mut monitor =
        seed_monitor(database.as_ref(), &format!("http://127.0.0.1:{port}/")).await?;
    // a rule that would match anything, to prove matching was skipped
    monitor.match_rule = MatchRule::StatusCode { expected: 200 };
    database.save_monitor(&monitor).await?;

    let executor = ProbeExecutor::new(database.clone() as Arc<dyn Database>, 5, 5);
    let snapshot = executor.run(&monitor).await?;

    assert!(snapshot.is_done);
    assert!(snapshot.is_error);
    assert!(snapshot.error_message.starts_with("request error["));
    assert!(!snapshot.is_match);
    assert_eq!(snapshot.http_status_code, None);

    let updated = database.get_monitor_by_uuid(monitor.uuid).await?.expect("monitor exists");
    assert!(updated.last_error);
    assert!(updated.last_error_time.is_some());
    assert!(!updated.last_match);

    Ok(())
}

#[tokio::test]
async fn test_scheduler_chain_probes_immediately_without_history() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let port = spawn_http_server("HTTP/1.1 200 OK", "pong").await?;
    let monitor = seed_monitor(database.as_ref(), &format!("http://127.0.0.1:{port}/")).await?;

    let executor =
        Arc::new(ProbeExecutor::new(database.clone() as Arc<dyn Database>, 10, 5));
    let notifier = Arc::new(NotificationEngine::new(
        database.clone() as Arc<dyn Database>,
        Vec::new(),
    ));
    let queue = Arc::new(TokioQueue::new("monitor"));
    let scheduler =
        Scheduler::new(database.clone() as Arc<dyn Database>, executor, notifier, queue);

    let armed = scheduler.arm_all().await?;
    assert_eq!(armed, 1);

    // no history: the first probe fires with zero delay
    let mut probed = false;
    for _ in 0..250 {
        if let Some(snapshot) = database.latest_snapshot(monitor.uuid).await? {
            if snapshot.is_done {
                probed = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(probed, "scheduling chain never completed a probe");

    let snapshot = database.latest_snapshot(monitor.uuid).await?.expect("probe ran");
    assert!(!snapshot.is_error);
    assert_eq!(snapshot.http_status_code, Some(200));

    Ok(())
}

#[tokio::test]
async fn test_sweeper_fails_only_stale_pending_rows() -> Result<()> {
    let (_dir, database) = create_test_database().await?;
    let monitor = seed_monitor(database.as_ref(), "https://example.com/").await?;

    // stranded by a crash an hour ago
    let mut stranded = Snapshot::pending(monitor.uuid);
    stranded.created_at = Utc::now() - chrono::Duration::hours(1);
    let stranded_id = database.insert_pending_snapshot(&stranded).await?;

    // a probe currently in flight
    let mut in_flight = Snapshot::pending(monitor.uuid);
    in_flight.created_at = Utc::now();
    let in_flight_id = database.insert_pending_snapshot(&in_flight).await?;

    let sweeper = SnapshotSweeper::new(
        database.clone() as Arc<dyn Database>,
        SweepPolicy { fail_after_seconds: 600, interval_seconds: 300 },
    );
    assert_eq!(sweeper.sweep_once().await?, 1);

    // the stranded row is now a completed failure
    let swept = database
        .snapshot_before(monitor.uuid, stranded_id + 1)
        .await?
        .expect("stranded row exists");
    assert_eq!(swept.id, Some(stranded_id));
    assert!(swept.is_done);
    assert!(swept.is_error);
    assert_eq!(swept.error_message, INTERRUPTED_MESSAGE);

    // the in-flight row is untouched
    let still_pending =
        database.stale_pending_snapshots(Utc::now() + chrono::Duration::seconds(1)).await?;
    assert_eq!(still_pending.len(), 1);
    assert_eq!(still_pending[0].id, Some(in_flight_id));

    // a second sweep finds nothing
    assert_eq!(sweeper.sweep_once().await?, 0);

    Ok(())
}
