use clap::Subcommand;
use doseminder_core::HistoryDb;

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List resolved doses, newest first
    List {
        /// Only this medication
        #[arg(long)]
        medication: Option<String>,
        /// Maximum number of entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Taken/missed counts and adherence rate
    Stats {
        /// Only this medication
        #[arg(long)]
        medication: Option<String>,
    },
}

pub fn run(action: HistoryAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = HistoryDb::open()?;

    match action {
        HistoryAction::List { medication, limit } => {
            let events = match medication.as_deref() {
                Some(id) => db.events_for(id, limit)?,
                None => db.recent(limit)?,
            };
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        HistoryAction::Stats { medication } => {
            let stats = db.stats(medication.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}
