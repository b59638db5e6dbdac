//! Swim Meet Simulator
//!
//! Runs a demo meet: a men's freestyle round and a women's backstroke
//! round, then saves the competition.

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use swim_meet::{
    Category, Competition, MeetConfig, MeetEvent, RosterBuilder, SnapshotStore, Stroke, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Swim Meet Simulator v{}", VERSION);

    let config = MeetConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Pool: {} lanes of {}, tick {:?}",
        config.competition.lane_count, config.competition.lane_length, config.competition.timing.tick_interval
    );

    let mut builder = RosterBuilder::new().performance(config.performance);
    if let Some(seed) = config.seed {
        info!("Master seed: {}", seed);
        builder = builder.seed(seed);
    }
    let roster = builder
        .judge("Judy")?
        .spectator("Sam")?
        .spectator("Priya")?
        .staff("Lee")?
        .racer(Category::Male, "Ian")?
        .racer(Category::Male, "Tom")?
        .racer(Category::Male, "Ravi")?
        .racer(Category::Female, "Eve")?
        .racer(Category::Female, "Ida")?
        .racer(Category::Female, "Mei")?
        .build()
        .context("Invalid roster")?;
    info!("Roster: {}", roster.all_people().join(", "));

    let mut competition = Competition::new(roster, config.competition.clone())?;
    tokio::spawn(log_events(competition.subscribe_events()));

    for (category, stroke) in [(Category::Male, Stroke::Freestyle), (Category::Female, Stroke::Backstroke)] {
        let racers = competition.roster().racers_in(category);
        competition.prepare(category, stroke, &racers)?;
        competition.start()?;
        competition.wait_until_finished().await?;
        report(&competition)?;
    }

    for spectator in competition.roster().spectators() {
        info!("{} watched {} finishes", spectator.name(), spectator.finishes_seen());
    }

    let store = config.store().context("No snapshot directory")?;
    let snapshot = competition.snapshot()?;
    let name = format!("meet-{}", Utc::now().format("%Y%m%d-%H%M%S"));
    if store.save(&snapshot, &name) {
        info!("Saved competition as {:?} in {}", name, store.root().display());
    } else {
        warn!("Competition was not saved");
    }
    info!("Saved competitions: {}", store.list().join(", "));

    Ok(())
}

/// Log the result of the round that just finished.
fn report(competition: &Competition) -> Result<()> {
    let start = competition.start_time()?;
    let ranking = competition.ranking()?;
    let timecard = competition.timecard()?;

    info!("=== Round {} Results ===", competition.old_scoreboard_count() + 1);
    for (place, (racer, finished_at)) in ranking.iter().zip(&timecard).enumerate() {
        let elapsed = *finished_at - start;
        info!(
            "#{}: {} ({:?}, skill {:.3}) in {}.{:03}s",
            place + 1,
            racer,
            racer.uniform(),
            racer.skill(),
            elapsed.num_seconds(),
            elapsed.num_milliseconds() % 1000
        );
    }
    Ok(())
}

/// Log every competition event as JSON.
async fn log_events(mut events: broadcast::Receiver<MeetEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.to_json() {
                Ok(json) => debug!("event {}", json),
                Err(e) => warn!("Unserializable event: {}", e),
            },
            Err(RecvError::Lagged(missed)) => warn!("Event log missed {} events", missed),
            Err(RecvError::Closed) => break,
        }
    }
}
