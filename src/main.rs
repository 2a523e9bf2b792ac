use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use trail_follow::format::{elapsed_to_string, nice_timestamp};
use trail_follow::location::FixedLocation;
use trail_follow::matching::RowKind;
use trail_follow::sync::{guess_timestamp, DiagnosticLog, PendingQueue, SharedLogClient};
use trail_follow::track::{cumulative_gain, ReferenceTrack};
use trail_follow::{Config, LocalStore, Session};

#[derive(Parser, Debug)]
#[command(name = "trail_follow")]
#[command(about = "Follow participants along a course from shared GPS fixes", long_about = None)]
struct Args {
    /// JSON configuration (defaults when absent)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Persisted state, gzip-compressed JSON
    #[arg(long, value_name = "FILE", default_value = "trail_follow_state.json.gz")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved rows of a session key
    Rows {
        #[arg(long)]
        key: String,
        /// Start time (ISO, epoch seconds or milliseconds)
        #[arg(long)]
        start: Option<String>,
    },
    /// Print cumulative distance and elevation gain of a GPX trace
    Gain {
        #[arg(long)]
        gpx: PathBuf,
    },
    /// Record one fix and share it when sharing is enabled
    Contribute {
        #[arg(long)]
        key: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Observation time (ISO, epoch seconds or milliseconds), now when absent
        #[arg(long)]
        at: Option<String>,
    },
    /// Send contributions that could not be delivered earlier
    SendPending {
        #[arg(long)]
        key: String,
    },
    /// Import fixes from the shared log
    Pull {
        #[arg(long)]
        key: String,
    },
    /// Apply a contribution or invitation link
    Open { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("loading configuration")?;
    if let Command::Gain { gpx } = &args.command {
        return print_gain(gpx);
    }

    let store = LocalStore::load(&args.state).context("loading state")?;
    let diagnostics = DiagnosticLog::new();
    let client = SharedLogClient::http(
        config.sync.clone(),
        PendingQueue::from_chunks(store.pending.clone()),
        diagnostics.clone(),
    )
    .context("creating shared-log client")?;
    let mut session = Session::new(config, store, client);

    let outcome = run(&mut session, args.command).await;

    session
        .to_store()
        .save(&args.state)
        .context("saving state")?;
    for entry in diagnostics.entries() {
        eprintln!("[{}] {}", entry.class.as_str(), entry.text);
    }
    outcome
}

async fn run(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Rows { key, start } => {
            session.set_key(&key);
            if let Some(start) = start {
                session.set_start_time(guess_timestamp(&start)?);
            }
            session.load_track()?;
            print_rows(session)?;
        }
        Command::Contribute { key, lat, lon, at } => {
            session.set_key(&key);
            let timestamp = at.as_deref().map(guess_timestamp).transpose()?;
            let device = FixedLocation { lat, lon, timestamp };
            match session.contribute_device_location(&device).await {
                Some(fix) => println!("Recorded {} at {:.4},{:.4}", nice_timestamp(fix.timestamp), fix.lat, fix.lon),
                None => anyhow::bail!("no position recorded"),
            }
            if !session.config().preferences.share_new_points {
                println!("Sharing disabled, fix kept locally");
            }
        }
        Command::SendPending { key } => {
            session.set_key(&key);
            let queued = session.client().pending().len();
            if queued == 0 {
                println!("Nothing pending");
            } else {
                session.send_pending().await;
                println!("{} pending, {} left", queued, session.client().pending().len());
            }
        }
        Command::Pull { key } => {
            session.set_key(&key);
            let added = session.load_shared_points(None).await;
            println!("Imported {} new fixes ({} known)", added, session.fixes().len());
        }
        Command::Open { url } => {
            session.digest_link(&url).await?;
            println!("Following {} (start {})", session.key(), nice_timestamp(session.start_time()));
            println!("Shared log: {}", session.client().share_link(session.key()));
        }
        Command::Gain { .. } => {}
    }
    Ok(())
}

fn print_rows(session: &mut Session) -> Result<()> {
    let key = session.key().to_string();
    let rows = session.rows()?;
    if rows.is_empty() {
        println!("No trace loaded for {}", key);
        return Ok(());
    }

    println!(
        "{:<19}  {:>12}  {:>8}  {:>6}  {:>6}  {}",
        "time", "elapsed", "km", "D+ m", "km/h", "alternate"
    );
    for row in rows {
        let alternate = match &row.alternate {
            Some(alt) => format!("{:.2} km {:.0} m {:.1} km/h", alt.distance_km, alt.elevation_gain_m, alt.velocity_kmh),
            None => String::new(),
        };
        let marker = if row.kind == RowKind::Start { "  <start>" } else { "" };
        println!(
            "{:<19}  {:>12}  {:>8.2}  {:>6.0}  {:>6.1}  {}{}",
            nice_timestamp(row.timestamp),
            elapsed_to_string(row.elapsed_ms),
            row.distance_km,
            row.elevation_gain_m,
            row.velocity_kmh,
            alternate,
            marker
        );
    }
    Ok(())
}

fn print_gain(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let track = ReferenceTrack::parse(&text)?;
    let gain = cumulative_gain(&track);

    println!("{:>6}  {:>10}  {:>8}", "index", "km", "D+ m");
    for (point, gain) in track.points().iter().zip(&gain) {
        println!(
            "{:>6}  {:>10.3}  {:>8.0}",
            point.index,
            point.cumulative_distance / 1000.0,
            gain
        );
    }
    println!(
        "Total: {:.2} km, {:.0} m climb",
        track.total_distance() / 1000.0,
        gain.last().copied().unwrap_or(0.0)
    );
    Ok(())
}
