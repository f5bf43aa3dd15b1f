use crate::error::GatewayError;
use crate::startup::AppState;
use crate::transport::{SdpType, SessionDescription};
use axum::{extract::State, Json};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::Deserialize;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct OfferRequest {
    #[serde(default)]
    pub sdp: String,
    #[serde(rename = "type", default)]
    pub sdp_type: String,
}

pub async fn webrtc_offer(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Json(body): Json<OfferRequest>,
) -> Result<Json<SessionDescription>, AppError> {
    let token = bearer.as_ref().map(|TypedHeader(auth)| auth.token());
    let caller = state.tokens.resolve(token).map_err(GatewayError::from)?;

    if body.sdp_type != "offer" {
        return Err(GatewayError::InvalidOffer(format!(
            "expected type offer, got {:?}",
            body.sdp_type
        ))
        .into());
    }

    let offer = SessionDescription {
        sdp: body.sdp,
        sdp_type: SdpType::Offer,
    };
    let answer = state
        .signaling
        .handle_offer(&caller.session_id, offer)
        .await?;

    Ok(Json(answer))
}
