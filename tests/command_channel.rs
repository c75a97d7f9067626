mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::NaiveDate;
use common::FakeGateway;
use printwatch::channel::{ChannelKind, CommandChannel, CommandResponseCoordinator, TickOutcome};
use printwatch::config::ChannelConfig;
use printwatch::control::{JobIdentity, SharedControlState};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

async fn active_control() -> Arc<SharedControlState> {
    let control = Arc::new(SharedControlState::new(Duration::from_secs(5)));
    control
        .begin_job(
            JobIdentity {
                filename: "part_square".to_string(),
                asset_id: "asset-1".into(),
                printer: "192.168.0.10".to_string(),
            },
            NaiveDate::from_ymd_opt(2025, 7, 29).unwrap().and_hms_opt(20, 0, 0).unwrap(),
        )
        .await
        .unwrap();
    control.set_active(true).await.unwrap();
    control
}

fn coordinator(
    kind: ChannelKind,
    fake: &Arc<FakeGateway>,
    control: &Arc<SharedControlState>,
) -> CommandResponseCoordinator {
    CommandResponseCoordinator::new(
        Arc::new(CommandChannel::new(kind)),
        "192.168.0.10".to_string(),
        fake.clone(),
        control.clone(),
        &ChannelConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_inactive_job_sends_nothing() {
    let fake = FakeGateway::new();
    let control = Arc::new(SharedControlState::new(Duration::from_secs(5)));
    let coordinator = coordinator(ChannelKind::Position, &fake, &control);

    assert_eq!(coordinator.tick().await, TickOutcome::Inactive);
    assert_eq!(coordinator.delay_after(TickOutcome::Inactive), Duration::from_secs(1));
    assert!(fake.sent_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_query_is_resent_once_per_timeout_window() {
    let fake = FakeGateway::new();
    let control = active_control().await;
    let coordinator = coordinator(ChannelKind::Position, &fake, &control);

    assert_eq!(coordinator.tick().await, TickOutcome::Dispatched);
    assert_eq!(fake.count_command("M114"), 1);

    let started = Instant::now();
    assert_eq!(coordinator.tick().await, TickOutcome::TimedOut);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(fake.count_command("M114"), 1);
    assert_eq!(coordinator.channel().stats().missed, 1);

    assert_eq!(coordinator.tick().await, TickOutcome::Dispatched);
    assert_eq!(fake.count_command("M114"), 2);
    assert!(coordinator.channel().is_awaiting());
}

#[tokio::test(start_paused = true)]
async fn test_observed_reply_allows_immediate_dispatch() {
    let fake = FakeGateway::new();
    let control = active_control().await;
    let coordinator = coordinator(ChannelKind::Speed, &fake, &control);

    assert_eq!(coordinator.tick().await, TickOutcome::Dispatched);
    coordinator.channel().signal_observed();

    let started = Instant::now();
    assert_eq!(coordinator.tick().await, TickOutcome::Dispatched);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(fake.count_command("M220"), 2);
    let stats = coordinator.channel().stats();
    assert_eq!((stats.dispatched, stats.observed, stats.missed), (2, 1, 0));
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_releases_permit() {
    let fake = FakeGateway::new();
    let control = active_control().await;
    let coordinator = coordinator(ChannelKind::Position, &fake, &control);

    fake.fail_commands.store(true, Ordering::SeqCst);
    assert_eq!(coordinator.tick().await, TickOutcome::TransportFailed);
    assert!(!coordinator.channel().is_awaiting());
    assert_eq!(coordinator.channel().stats().transport_failures, 1);

    fake.fail_commands.store(false, Ordering::SeqCst);
    assert_eq!(coordinator.tick().await, TickOutcome::Dispatched);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_paces_queries_and_stops_on_cancel() {
    let fake = FakeGateway::new();
    let control = active_control().await;
    let coordinator = coordinator(ChannelKind::Position, &fake, &control);
    let channel = coordinator.channel().clone();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(coordinator.run(cancel.clone()));

    // Answer every query promptly for a few seconds.
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        channel.signal_observed();
    }
    let sent = fake.count_command("M114");
    assert!(sent >= 5, "sent {sent}");

    // Stop answering: at most one more query per timeout window.
    tokio::time::sleep(Duration::from_secs(25)).await;
    let after = fake.count_command("M114");
    assert!(after - sent <= 4, "sent {} more", after - sent);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pausing_stops_dispatch() {
    let fake = FakeGateway::new();
    let control = active_control().await;
    let coordinator = coordinator(ChannelKind::Position, &fake, &control);
    control.set_active(false).await.unwrap();
    assert_eq!(coordinator.tick().await, TickOutcome::Inactive);
    assert!(fake.sent_commands().is_empty());
}
