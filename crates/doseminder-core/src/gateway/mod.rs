//! Remote adherence gateway.
//!
//! The backend owns the authoritative dose schedule: every mutation returns
//! the next dose time and the confirmed status, which the engine adopts
//! verbatim.

mod http;

use std::future::Future;

pub use crate::medication::DoseUpdate;
pub use http::HttpGateway;

use crate::adherence::DoseAction;
use crate::error::GatewayError;

/// Mutations the engine needs from the backend.
pub trait AdherenceGateway: Send + Sync + 'static {
    /// Confirm the current dose was taken.
    fn mark_taken(
        &self,
        user_id: &str,
        medication_id: &str,
    ) -> impl Future<Output = Result<DoseUpdate, GatewayError>> + Send;

    /// Register the current dose as missed.
    fn register_missed(
        &self,
        user_id: &str,
        medication_id: &str,
    ) -> impl Future<Output = Result<DoseUpdate, GatewayError>> + Send;

    /// Set the confirmed status explicitly.
    fn update_status(
        &self,
        user_id: &str,
        medication_id: &str,
        status: bool,
    ) -> impl Future<Output = Result<DoseUpdate, GatewayError>> + Send;
}

/// Route a [`DoseAction`] to the matching gateway method.
pub async fn dispatch<G: AdherenceGateway>(
    gateway: &G,
    user_id: &str,
    medication_id: &str,
    action: DoseAction,
) -> Result<DoseUpdate, GatewayError> {
    match action {
        DoseAction::MarkTaken => gateway.mark_taken(user_id, medication_id).await,
        DoseAction::RegisterMissed => gateway.register_missed(user_id, medication_id).await,
        DoseAction::UpdateStatus { status } => {
            gateway.update_status(user_id, medication_id, status).await
        }
    }
}
