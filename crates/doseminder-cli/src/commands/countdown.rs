use chrono::{Local, NaiveDateTime};
use clap::Args;
use doseminder_core::next_dose;
use serde::Serialize;

#[derive(Args)]
pub struct CountdownArgs {
    /// Scheduled dose time (HH:MM)
    hour: String,
    /// Hours between doses
    #[arg(long, short)]
    interval: u32,
    /// Evaluate at this local time instead of now (e.g. 2026-10-19T08:59:50)
    #[arg(long)]
    at: Option<NaiveDateTime>,
    /// Print as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CountdownOutput {
    due_at: NaiveDateTime,
    seconds_remaining: u64,
    countdown: String,
}

pub fn run(args: CountdownArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.interval == 0 {
        return Err("interval must be positive".into());
    }
    let now = args.at.unwrap_or_else(|| Local::now().naive_local());
    let next = next_dose(now, &args.hour, args.interval)?;

    if args.json {
        let output = CountdownOutput {
            due_at: next.due_at,
            seconds_remaining: next.seconds_remaining,
            countdown: next.countdown(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{} (next dose {})", next.countdown(), next.due_at);
    }
    Ok(())
}
