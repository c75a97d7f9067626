mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use common::FakeGateway;
use printwatch::config::MilestoneConfig;
use printwatch::control::{JobIdentity, Milestone, SharedControlState};
use printwatch::gateway::{DimensionReport, QualityVerdict};
use printwatch::milestone::{MilestoneOutcome, MilestoneTrigger};
use printwatch_shared::{Position, TelemetrySample, TemperatureFragment};

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 7, 29).unwrap().and_hms_opt(20, 30, 0).unwrap()
}

fn sample_at(z: f64) -> TelemetrySample {
    let reading = TemperatureFragment {
        nozzle_temp: 201.0,
        nozzle_target: 200.0,
        bed_temp: 60.0,
        bed_target: 60.0,
        nozzle_pwm: 120,
        bed_pwm: 30,
    };
    TelemetrySample::from_reading(&reading, now(), "part_square").with_position(Position { x: 10.0, y: 5.0, z, e: 3.0 })
}

async fn setup() -> (Arc<FakeGateway>, Arc<SharedControlState>, Arc<MilestoneTrigger>) {
    let fake = FakeGateway::new();
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
    // Something to infer from.
    fake.stored.lock().unwrap().push(sample_at(0.2));
    let trigger = Arc::new(MilestoneTrigger::new(control.clone(), fake.gateways(), &MilestoneConfig::default()));
    (fake, control, trigger)
}

#[tokio::test]
async fn test_concurrent_first_layer_samples_classify_once() {
    let (fake, control, trigger) = setup().await;
    let ctx = control.snapshot().await.unwrap();

    let a = {
        let (trigger, ctx) = (trigger.clone(), ctx.clone());
        tokio::spawn(async move { trigger.on_sample(&sample_at(1.0), &ctx).await })
    };
    let b = {
        let (trigger, ctx) = (trigger.clone(), ctx.clone());
        tokio::spawn(async move { trigger.on_sample(&sample_at(1.0), &ctx).await })
    };
    let fired = [a.await.unwrap(), b.await.unwrap()]
        .iter()
        .filter(|report| !report.is_empty())
        .count();

    assert_eq!(fired, 1);
    assert_eq!(fake.classify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fake.ledger_states.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_nok_verdict_is_written_to_ledger() {
    let (fake, control, trigger) = setup().await;
    *fake.verdict.lock().unwrap() = Some(QualityVerdict::Nok);
    let ctx = control.snapshot().await.unwrap();

    let report = trigger.on_sample(&sample_at(1.0), &ctx).await;

    assert_eq!(
        report.outcome(Milestone::QualityCheck),
        Some(&MilestoneOutcome::Verdict(QualityVerdict::Nok))
    );
    assert_eq!(fake.ledger_states.lock().unwrap()[0].1, "predicted NOK");
}

#[tokio::test]
async fn test_dimension_check_writes_report() {
    let (fake, control, trigger) = setup().await;
    *fake.dimensions.lock().unwrap() = vec![40.0, 20.0, 10.0, 11.0, 5.0, 6.0, 4.0];
    let ctx = control.snapshot().await.unwrap();

    let report = trigger.on_sample(&sample_at(4.0), &ctx).await;

    assert!(matches!(
        report.outcome(Milestone::DimensionCheck),
        Some(MilestoneOutcome::Dimensions(DimensionReport::Extended { altura, .. })) if *altura == 4.0
    ));
    assert_eq!(fake.regress_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fake.classify_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fake.ledger_dimensions.lock().unwrap()[0].0, "asset-1");
}

#[tokio::test]
async fn test_invalid_dimension_vector_spends_milestone() {
    let (fake, control, trigger) = setup().await;
    *fake.dimensions.lock().unwrap() = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    let ctx = control.snapshot().await.unwrap();

    let report = trigger.on_sample(&sample_at(4.0), &ctx).await;
    assert!(matches!(report.outcome(Milestone::DimensionCheck), Some(MilestoneOutcome::Failed(_))));
    assert!(fake.ledger_dimensions.lock().unwrap().is_empty());

    let ctx = control.snapshot().await.unwrap();
    assert!(trigger.on_sample(&sample_at(4.0), &ctx).await.is_empty());
    assert_eq!(fake.regress_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_history_skips_inference() {
    let (fake, control, trigger) = setup().await;
    fake.stored.lock().unwrap().clear();
    let ctx = control.snapshot().await.unwrap();

    let report = trigger.on_sample(&sample_at(1.0), &ctx).await;

    assert_eq!(report.outcome(Milestone::QualityCheck), Some(&MilestoneOutcome::EmptyHistory));
    assert_eq!(fake.classify_calls.load(Ordering::SeqCst), 0);
    assert!(control.milestone_done(Milestone::QualityCheck).await.unwrap());
}

#[tokio::test]
async fn test_other_heights_and_speed_samples_do_nothing() {
    let (fake, control, trigger) = setup().await;
    let ctx = control.snapshot().await.unwrap();

    assert!(trigger.on_sample(&sample_at(2.0), &ctx).await.is_empty());
    assert!(trigger.on_sample(&sample_at(1.2), &ctx).await.is_empty());
    let speed = TelemetrySample { position: None, ..sample_at(1.0) }.with_speed_factor(100.0);
    assert!(trigger.on_sample(&speed, &ctx).await.is_empty());
    assert_eq!(fake.classify_calls.load(Ordering::SeqCst), 0);
    assert!(!control.milestone_done(Milestone::QualityCheck).await.unwrap());
}

#[tokio::test]
async fn test_custom_heights() {
    let (fake, control, _) = setup().await;
    let config = MilestoneConfig {
        quality_check_height: 0.6,
        dimension_check_height: 8.0,
    };
    let trigger = MilestoneTrigger::new(control.clone(), fake.gateways(), &config);
    let ctx = control.snapshot().await.unwrap();

    assert!(trigger.on_sample(&sample_at(1.0), &ctx).await.is_empty());
    assert!(!trigger.on_sample(&sample_at(0.6), &ctx).await.is_empty());
    assert_eq!(fake.classify_calls.load(Ordering::SeqCst), 1);
}
