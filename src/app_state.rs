use sqlx::PgPool;
use std::sync::Arc;

use crate::auth::JwtVerifier;
use crate::services::{
    dispatch::DispatchChannel, image_proxy::ImageProxy, storage::CloudStorage, tokens::Pricing,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub dispatch: Arc<DispatchChannel>,
    pub storage: Arc<CloudStorage>,
    pub proxy: Arc<ImageProxy>,
    pub pricing: Arc<Pricing>,
    pub jwt: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        dispatch: DispatchChannel,
        storage: CloudStorage,
        proxy: ImageProxy,
        pricing: Pricing,
        jwt: JwtVerifier,
    ) -> Self {
        Self {
            db,
            dispatch: Arc::new(dispatch),
            storage: Arc::new(storage),
            proxy: Arc::new(proxy),
            pricing: Arc::new(pricing),
            jwt: Arc::new(jwt),
        }
    }
}
