//! ErgMode demo binary.
//!
//! With a device ID argument, runs a live session against that trainer.
//! Without one, fast-forwards a synthetic session through the demo workout
//! and prints the resulting summary.

use anyhow::Context;
use ergmode::analytics::CompletedWorkoutSummary;
use ergmode::config;
use ergmode::player::{Segment, SegmentType, Session, Workout, WorkoutPlayer};
use ergmode::sensors::{TrainerLink, TrainerMetrics};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ErgMode v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config().context("failed to load configuration")?;
    let workout = demo_workout();

    match std::env::args().nth(1) {
        Some(device_id) => live_session(&config, workout, &device_id).await,
        None => simulated_session(&config, workout),
    }
}

/// A short sweet-spot workout: warmup ramp, three intervals, cooldown.
fn demo_workout() -> Workout {
    let mut interval = Segment::steady(SegmentType::Interval, 300, 90.0);
    interval.repeat = Some(3);

    Workout::new(
        "Sweet Spot 3x5",
        vec![
            Segment::ramp(SegmentType::Warmup, 300, 40.0, 70.0),
            interval,
            Segment::steady(SegmentType::Recovery, 120, 50.0),
            Segment::ramp(SegmentType::Cooldown, 180, 60.0, 35.0),
        ],
    )
}

/// Drive the workout against a real trainer.
async fn live_session(
    config: &config::EngineConfig,
    workout: Workout,
    device_id: &str,
) -> anyhow::Result<()> {
    let mut trainer = TrainerLink::new(config.link_config());
    trainer.initialize().await.context("BLE init failed")?;
    trainer
        .connect(device_id)
        .await
        .with_context(|| format!("could not connect to {}", device_id))?;

    let trainer = Arc::new(trainer);
    let player = WorkoutPlayer::new(config.player_config());
    let mut session = Session::new(player, trainer.clone());

    session.load(workout).context("invalid workout")?;
    session.start();
    session.play().await.context("could not start playback")?;

    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = session.state();
        tracing::info!(
            "{} | segment {} | {:.0}s | target {}W",
            state.status,
            state.current_segment,
            state.elapsed_secs,
            state.target_power_watts
        );
        if state.status == ergmode::player::PlayerStatus::Completed {
            break;
        }
    }

    if let Some((points, summary)) = session.finish().await {
        print_summary(&summary, points.len());
    }

    session.shutdown();
    trainer.disconnect().await;
    Ok(())
}

/// Fast-forward a synthetic session, one simulated second per tick.
fn simulated_session(config: &config::EngineConfig, workout: Workout) -> anyhow::Result<()> {
    let mut player = WorkoutPlayer::new(config.player_config());
    player.load(workout).context("invalid workout")?;
    player.play().context("could not start playback")?;

    let total = player
        .segments()
        .iter()
        .map(|s| s.duration_secs)
        .sum::<u32>();
    let t0 = Instant::now();
    let live = TrainerMetrics::default();

    for second in 0..=total {
        player.tick(t0 + Duration::from_secs(second as u64), &live);
        player.record_tick(&live);
    }

    let threshold = config.profile.ftp_watts;
    let points = player
        .take_trace()
        .context("no trace produced by the simulated run")?;
    let summary = ergmode::analytics::summarize(&points, threshold);
    print_summary(&summary, points.len());
    Ok(())
}

fn print_summary(summary: &CompletedWorkoutSummary, samples: usize) {
    println!("Workout complete ({} samples recorded)", samples);
    println!("  Duration:   {}s", summary.duration_secs);
    if let Some(avg) = summary.avg_power {
        println!("  Avg power:  {}W", avg);
    }
    if let Some(np) = summary.normalized_power {
        println!("  NP:         {}W", np);
    }
    if let Some(if_value) = summary.intensity_factor {
        println!("  IF:         {:.2}", if_value);
    }
    if let Some(tss) = summary.tss {
        println!("  TSS:        {}", tss);
    }
    if let Some(hr) = summary.avg_heart_rate {
        println!("  Avg HR:     {} bpm", hr);
    }
    for peak in &summary.peak_powers {
        println!("  Peak {:>4}s: {}W", peak.duration_secs, peak.watts);
    }
}
