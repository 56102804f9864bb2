use axum::extract::State;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::api::{TokenBalanceResponse, TokenPurchaseRequest};
use crate::services::tokens;

/// Tokens granted per watched ad.
const AD_REWARD_TOKENS: i64 = 1;

/// GET /api/v1/tokens/balance
pub async fn get_balance(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<TokenBalanceResponse>, ApiError> {
    let balance = tokens::balance(&state.db, user_id).await?;
    Ok(Json(TokenBalanceResponse { balance }))
}

/// POST /api/v1/tokens/purchase
pub async fn purchase(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<TokenPurchaseRequest>,
) -> Result<Json<TokenBalanceResponse>, ApiError> {
    request.validate()?;

    // Payment capture happens upstream; this endpoint only credits the ledger.
    let balance = tokens::credit(&state.db, user_id, request.amount).await?;
    Ok(Json(TokenBalanceResponse { balance }))
}

/// GET /api/v1/tokens/add-from-ad
pub async fn add_from_ad(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<TokenBalanceResponse>, ApiError> {
    let balance = tokens::credit(&state.db, user_id, AD_REWARD_TOKENS).await?;
    Ok(Json(TokenBalanceResponse { balance }))
}
