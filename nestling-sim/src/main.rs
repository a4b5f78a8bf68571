//! Nestling sharing simulator
//!
//! Runs an owner and a participant device against one in-memory relay:
//! 1. The owner creates a profile with some entries and shares it
//! 2. The participant is invited and accepts
//! 3. Both sides edit, and orchestrator passes carry the edits across
//!
//! Usage:
//!   nestling-sim --entries 5 --data-dir ./sim
//!
//! With `--data-dir`, each device keeps its SQLite store and sync registry
//! there; otherwise everything stays in memory.

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use clap::Parser;
use nestling_model::{Activity, ActivityKind, Entity, EntityKind, GrowthMeasurement, Profile};
use nestling_storage::{LocalStore, LocalStoreExt, SqliteStore};
use nestling_sync::relay::memory::{RelayBackend, invitation_token};
use nestling_sync::{
    PassOutcome, ShareManager, SyncConfig, SyncEngine, SyncOrchestrator, SyncTrigger,
    UserIdentity,
};
use std::{fs, path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "nestling-sim")]
#[command(about = "Simulate profile sharing between two Nestling devices")]
struct Args {
    /// Activities to log before sharing
    #[arg(short, long, default_value = "3")]
    entries: usize,

    /// Directory for SQLite stores and sync registries
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Records per relay write
    #[arg(long, default_value = "400")]
    batch_size: usize,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

struct Device {
    name: &'static str,
    store: Arc<SqliteStore>,
    shares: Arc<ShareManager>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl Device {
    fn open(
        name: &'static str,
        backend: &Arc<RelayBackend>,
        identity: UserIdentity,
        args: &Args,
    ) -> Result<Self> {
        let store = match &args.data_dir {
            Some(dir) => SqliteStore::open(&dir.join(format!("{name}.sqlite")))
                .with_context(|| format!("Failed to open {name} store"))?,
            None => SqliteStore::open_in_memory().context("Failed to open in-memory store")?,
        };
        let store = Arc::new(store);
        let config = SyncConfig {
            batch_size: args.batch_size,
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(Arc::new(backend.register(identity)), store.clone(), config);
        let shares = Arc::new(ShareManager::new(Arc::new(engine)));
        Ok(Self {
            name,
            store,
            orchestrator: Arc::new(SyncOrchestrator::new(shares.clone())),
            shares,
        })
    }

    async fn pass(&self, trigger: SyncTrigger) {
        match self.orchestrator.run_pass(trigger).await {
            PassOutcome::Completed(report) => info!(
                device = self.name,
                synced = report.synced.len(),
                failed = report.failed.len(),
                "Pass complete"
            ),
            PassOutcome::Skipped => warn!(device = self.name, "Pass skipped"),
        }
    }

    fn summary(&self) -> Result<String> {
        let mut parts = Vec::new();
        for kind in EntityKind::ALL {
            parts.push(format!("{kind}={}", self.store.count(kind)?));
        }
        Ok(format!("{}: {}", self.name, parts.join(" ")))
    }

    async fn write_registry(&self, dir: &PathBuf) -> Result<()> {
        let snapshot = self.shares.engine().snapshot().await;
        let path = dir.join(format!("{}-sync.json", self.name));
        fs::write(&path, serde_json::to_vec_pretty(&snapshot)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// `RUST_LOG` wins; otherwise INFO, or DEBUG with `--verbose`.
fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    FmtSubscriber::builder()
        .with_env_filter(log_filter(args.verbose))
        .with_target(false)
        .compact()
        .init();

    if let Some(dir) = &args.data_dir {
        fs::create_dir_all(dir).context("Failed to create data directory")?;
    }

    let backend = RelayBackend::new();
    let owner = Device::open(
        "owner",
        &backend,
        UserIdentity::new("owner", "Olivia").with_email("olivia@example.com"),
        &args,
    )?;
    let guest = Device::open(
        "guest",
        &backend,
        UserIdentity::new("guest", "Pat").with_email("pat@example.com"),
        &args,
    )?;

    // Owner logs some care before sharing.
    let profile = Profile::new("Ada", Utc::now() - Duration::days(21));
    owner.store.insert(profile.clone().into())?;
    for i in 0..args.entries {
        let started = Utc::now() - Duration::hours(i as i64 * 3);
        let activity = Activity::new(profile.id, ActivityKind::BottleFeeding, started)
            .with_amount_ml(60.0 + i as f64 * 10.0);
        owner.store.insert(activity.into())?;
    }
    owner
        .store
        .insert(GrowthMeasurement::new(profile.id, Utc::now()).with_weight_kg(3.8).into())?;
    owner.store.save()?;

    let state = owner.shares.get_or_create_share(profile.id).await?;
    info!(url = ?state.share_url, "Profile shared");

    let state = owner
        .shares
        .add_participant("pat@example.com", profile.id)
        .await?;
    let Some(token) = state.share_url.as_deref().and_then(invitation_token) else {
        bail!("Share has no invitation URL");
    };

    let accepted = guest.shares.engine().accept_share(token).await?;
    info!(
        owner = %accepted.owner_display_name,
        inserted = accepted.merge.inserted,
        "Invitation accepted"
    );

    // Participant logs a diaper change; owner logs a bath.
    guest
        .store
        .insert(Activity::new(profile.id, ActivityKind::Diaper, Utc::now()).into())?;
    guest.pass(SyncTrigger::LocalChange(profile.id)).await;

    owner
        .store
        .insert(Activity::new(profile.id, ActivityKind::Bath, Utc::now()).into())?;
    owner.pass(SyncTrigger::LocalChange(profile.id)).await;
    guest.pass(SyncTrigger::RemoteNotification).await;

    let owner_entries: Vec<Entity> = owner.store.dependents_of(profile.id)?;
    let guest_entries: Vec<Entity> = guest.store.dependents_of(profile.id)?;
    if owner_entries.len() != guest_entries.len() {
        warn!(
            owner = owner_entries.len(),
            guest = guest_entries.len(),
            "Devices disagree"
        );
    }

    println!("{}", owner.summary()?);
    println!("{}", guest.summary()?);

    if let Some(dir) = &args.data_dir {
        owner.write_registry(dir).await?;
        guest.write_registry(dir).await?;
        info!("Wrote stores and registries to {}", dir.display());
    }
    Ok(())
}
