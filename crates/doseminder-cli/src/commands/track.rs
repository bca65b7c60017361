//! Live tracking of one medication.
//!
//! Prints every engine event as a JSON line on stdout. Reads commands from
//! stdin: `toggle` (double-confirm), `status`, `quit`. Ctrl-C disposes the
//! tracker before exiting.

use std::sync::Arc;

use chrono::NaiveDate;
use clap::Args;
use doseminder_core::{
    Config, DoseTracker, HistoryDb, HttpGateway, Medication, SystemClock, TrackerHandle,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(Args)]
pub struct TrackArgs {
    /// Medication id on the gateway
    medication_id: String,
    /// Next scheduled dose time (HH:MM)
    #[arg(long)]
    hour: String,
    /// Hours between doses
    #[arg(long, short)]
    interval: u32,
    /// Display name
    #[arg(long)]
    name: Option<String>,
    /// The last dose was confirmed taken
    #[arg(long)]
    taken: bool,
    /// First day of treatment (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Last day of treatment (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,
    /// Override gateway.user_id
    #[arg(long)]
    user: Option<String>,
    /// Do not write resolved doses to the local history
    #[arg(long)]
    no_history: bool,
}

pub fn run(args: TrackArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    config.validate()?;
    let user_id = args
        .user
        .clone()
        .unwrap_or_else(|| config.gateway.user_id.clone());
    if user_id.is_empty() {
        return Err("no user id: pass --user or set gateway.user_id".into());
    }

    let mut medication = Medication::new(&args.medication_id, &args.hour, args.interval)
        .with_status(args.taken)
        .with_period(args.start, args.end);
    if let Some(name) = &args.name {
        medication = medication.with_name(name);
    }

    let gateway = Arc::new(HttpGateway::from_config(&config.gateway)?);
    let mut tracker = DoseTracker::new(user_id, gateway, Arc::new(SystemClock))
        .with_policy(config.policy.to_policy());
    if !args.no_history {
        tracker = tracker.with_log(Arc::new(HistoryDb::open()?));
    }

    super::runtime()?.block_on(async move {
        let handle = tracker.spawn(medication)?;
        drive(handle).await
    })
}

async fn drive(handle: TrackerHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = handle.events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    print_json(&handle.snapshot())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_json(&event)?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match line.trim() {
                    "toggle" | "t" => match handle.confirm_toggle().await {
                        Ok(update) => print_json(&update)?,
                        Err(e) => eprintln!("error: {e}"),
                    },
                    "status" | "s" => print_json(&handle.snapshot())?,
                    "quit" | "q" => break,
                    "" => {}
                    other => eprintln!("unknown command: {other} (toggle, status, quit)"),
                },
                None => stdin_open = false,
            },
        }
    }

    handle.dispose().await?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
