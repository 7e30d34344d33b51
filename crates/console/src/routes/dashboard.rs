//! Dashboard and card tooling handlers.

use axum::Json;
use serde::Serialize;

use punchcard_core::{CustomerId, MerchantId};

use crate::error::{AppError, Result};
use crate::middleware::CurrentIdentity;

/// Merchant overview.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    /// Merchant account ID.
    pub merchant_id: MerchantId,
    /// Display name, falling back to the merchant ID.
    pub display_name: String,
    /// Principal's email as known to the identity provider.
    pub email: Option<String>,
}

/// Card tooling context.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardsView {
    /// Customer the card tooling acts for.
    pub customer_id: CustomerId,
}

/// Merchant overview.
pub async fn show(current: CurrentIdentity) -> Result<Json<DashboardView>> {
    let identity = current
        .identity
        .ok_or_else(|| AppError::Internal("dashboard reached without identity".to_string()))?;

    Ok(Json(DashboardView {
        display_name: identity.display_name().to_string(),
        merchant_id: identity.merchant_id,
        email: current.principal.email,
    }))
}

/// Card tooling, bound to the merchant's resolved customer.
pub async fn cards(current: CurrentIdentity) -> Result<Json<CardsView>> {
    let identity = current
        .identity
        .ok_or_else(|| AppError::Internal("cards reached without identity".to_string()))?;

    Ok(Json(CardsView {
        customer_id: identity.customer_id,
    }))
}
