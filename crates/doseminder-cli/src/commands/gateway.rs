use clap::Subcommand;
use doseminder_core::{dispatch, Config, DoseAction, HttpGateway};

#[derive(Subcommand)]
pub enum GatewayAction {
    /// Confirm the current dose was taken
    Taken {
        medication_id: String,
        /// Override gateway.user_id
        #[arg(long)]
        user: Option<String>,
    },
    /// Register the current dose as missed
    Missed {
        medication_id: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Set the confirmed status explicitly
    Status {
        medication_id: String,
        #[arg(action = clap::ArgAction::Set)]
        status: bool,
        #[arg(long)]
        user: Option<String>,
    },
}

pub fn run(action: GatewayAction) -> Result<(), Box<dyn std::error::Error>> {
    let (medication_id, user, action) = match action {
        GatewayAction::Taken {
            medication_id,
            user,
        } => (medication_id, user, DoseAction::MarkTaken),
        GatewayAction::Missed {
            medication_id,
            user,
        } => (medication_id, user, DoseAction::RegisterMissed),
        GatewayAction::Status {
            medication_id,
            status,
            user,
        } => (medication_id, user, DoseAction::UpdateStatus { status }),
    };

    let config = Config::load()?;
    let user_id = user.unwrap_or_else(|| config.gateway.user_id.clone());
    if user_id.is_empty() {
        return Err("no user id: pass --user or set gateway.user_id".into());
    }
    let gateway = HttpGateway::from_config(&config.gateway)?;

    let update = super::runtime()?.block_on(dispatch(&gateway, &user_id, &medication_id, action))?;
    println!("{}", serde_json::to_string_pretty(&update)?);
    Ok(())
}
