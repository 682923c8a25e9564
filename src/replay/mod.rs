//! Offline replay of a recorded or scripted session.
//!
//! Drives an [`AoiManager`] and its [`RecordStore`] through a scenario on a
//! virtual clock: scenario steps are applied at their timestamps and the
//! manager is polled once per poll interval, exactly as the live poll loop
//! would. The resulting session is persisted, summarized and exported.

pub mod scenario;

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::{
    aoi::{AoiManager, LoggingOverlay},
    db::{BoxedStore, MemoryStore, SqliteStore},
    models::{AnswerUpdate, EventPayload, PageInfo, Position, RegionStats, SessionStatistics},
    recorder::{ExportFormat, RecordStore, RecorderController},
    sampler::PositionSampler,
    settings::TrackerSettings,
    utils::{Clock, ManualClock, SharedClock, SystemClock},
};

pub use scenario::{Scenario, ScenarioStep, StepAction};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const DURABLE_NAMESPACE: &str = "localStorage";

/// Area-of-interest dwell tracking and session logging
#[derive(Parser, Debug)]
#[command(name = "aoitrack")]
#[command(about = "Replay AOI tracking scenarios and export session logs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a scenario file through the tracker and export the session
    Replay(ReplayArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Scenario JSON file
    #[arg(short, long, value_name = "FILE")]
    pub scenario: PathBuf,

    /// Tracker settings JSON file (defaults are used when absent)
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// SQLite database for the durable store (in-memory when absent)
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Directory the export is written to
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub out: PathBuf,

    /// Export format
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Json)]
    pub format: ExportFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub session: SessionStatistics,
    pub regions: BTreeMap<String, RegionStats>,
    pub export_path: PathBuf,
    pub saved: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Replay(args) => {
            let report = run_replay(&args).await?;
            let rendered =
                serde_json::to_string_pretty(&report).context("failed to render replay report")?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn load_settings(args: &ReplayArgs) -> Result<TrackerSettings> {
    match &args.settings {
        Some(path) => TrackerSettings::load(path),
        None => {
            let mut settings = TrackerSettings::default();
            settings.apply_env_overrides();
            Ok(settings)
        }
    }
}

fn open_durable(args: &ReplayArgs) -> Result<BoxedStore> {
    let store = match &args.db {
        Some(path) => SqliteStore::open(path.clone(), DURABLE_NAMESPACE)?,
        None => SqliteStore::open_in_memory(DURABLE_NAMESPACE)?,
    };
    Ok(Box::new(store))
}

pub async fn run_replay(args: &ReplayArgs) -> Result<ReplayReport> {
    let settings = load_settings(args)?;
    let scenario = Scenario::load(&args.scenario)?;

    let start_ms = scenario
        .start_ms
        .unwrap_or_else(|| SystemClock.now_ms());
    let clock = ManualClock::new(start_ms);
    let shared_clock: SharedClock = Arc::new(clock.clone());

    let store = RecordStore::new(
        scenario.task_id.clone(),
        &scenario.identity(),
        open_durable(args)?,
        Box::new(MemoryStore::new()),
        shared_clock.clone(),
        settings.clone(),
    )
    .into_shared();

    let controller = RecorderController::new(store.clone(), settings.forced_save_interval());
    let sampler = PositionSampler::new(shared_clock.clone()).with_recorder(store.clone());
    let manager = AoiManager::new(
        &scenario.regions,
        Arc::new(scenario.source()),
        &sampler,
        store.clone(),
        shared_clock,
        &settings,
    );
    if settings.debug_overlay {
        manager
            .set_overlay(Some(Box::new(LoggingOverlay::new())))
            .await;
    }

    controller
        .page_loaded(PageInfo {
            url: format!("replay://{}", args.scenario.display()),
            user_agent: format!("aoitrack/{}", env!("CARGO_PKG_VERSION")),
            ..PageInfo::default()
        })
        .await;

    let poll_ms = settings.poll_interval_ms.max(1) as i64;
    let forced_ms = settings.forced_save_interval_ms.max(1) as i64;
    let duration_ms = scenario.effective_duration_ms(poll_ms);
    log_info!(
        "Replaying {} steps over {}ms for task {}",
        scenario.steps.len(),
        duration_ms,
        scenario.task_id
    );

    let mut pending = scenario.steps.iter().peekable();
    let mut next_forced = forced_ms;
    let mut tick = 0;
    while tick <= duration_ms {
        while let Some(step) = pending.next_if(|step| step.at <= tick) {
            clock.set_ms(start_ms + step.at);
            apply_step(step, &manager, &sampler, &controller).await;
        }

        clock.set_ms(start_ms + tick);
        manager.poll_once().await;

        if tick >= next_forced {
            if !store.lock().await.force_save() {
                log_warn!("Periodic save failed at {}ms", tick);
            }
            next_forced += forced_ms;
        }
        tick += poll_ms;
    }

    for step in pending {
        log_warn!("Step at {}ms is past the end of the run; skipped", step.at);
    }

    clock.set_ms(start_ms + duration_ms);
    controller.page_hide().await;
    manager.cleanup().await;
    let saved = controller.shutdown().await;

    let regions = manager.statistics().await;
    let guard = store.lock().await;
    let export = guard.export_file(args.format, None)?;
    let export_path = export.write_to(&args.out)?;
    log_info!("Export written to {}", export_path.display());

    Ok(ReplayReport {
        session: guard.get_statistics(),
        regions,
        export_path,
        saved,
    })
}

async fn apply_step(
    step: &ScenarioStep,
    manager: &AoiManager,
    sampler: &PositionSampler,
    controller: &RecorderController,
) {
    match &step.action {
        StepAction::Move { x, y } => {
            sampler.push(*x, *y).await;
        }
        StepAction::Click {
            region,
            x,
            y,
            target,
            target_id,
        } => {
            let clicked = manager
                .handle_click(region, Position::new(*x, *y), target, target_id)
                .await;
            if clicked.is_none() {
                log_warn!("Click at {}ms on unknown or disabled region {}", step.at, region);
            }
        }
        StepAction::Answer { question, value } => {
            controller
                .store()
                .lock()
                .await
                .log_event(EventPayload::AnswerUpdated(AnswerUpdate {
                    question: question.clone(),
                    value: value.clone(),
                }));
        }
        StepAction::Event { event_type, data } => {
            controller
                .store()
                .lock()
                .await
                .log_raw_event(event_type, data.clone());
        }
        StepAction::Enable => manager.enable().await,
        StepAction::Disable => manager.disable().await,
        StepAction::Visibility { hidden } => {
            controller.visibility_changed(*hidden).await;
        }
    }
}
