use serde::Deserialize;

use crate::models::job::JobType;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for the sweeper.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the worker dispatch channel
    pub redis_url: String,

    /// Storage bucket name
    pub storage_bucket: String,

    /// S3-compatible storage endpoint URL
    pub storage_endpoint: String,

    /// Storage access key ID
    pub storage_access_key: String,

    /// Storage secret access key
    pub storage_secret_key: String,

    /// Public base URL under which stored objects are reachable
    pub storage_public_url: String,

    /// HMAC secret for validating Bearer tokens issued by the auth service
    pub jwt_secret: String,

    /// Routing keys for the per-type worker queues
    #[serde(default = "default_routing_key_bg_removal")]
    pub routing_key_bg_removal: String,
    #[serde(default = "default_routing_key_upscale")]
    pub routing_key_upscale: String,
    #[serde(default = "default_routing_key_enlarge")]
    pub routing_key_enlarge: String,
    #[serde(default = "default_routing_key_style_transfer")]
    pub routing_key_style_transfer: String,
    #[serde(default = "default_routing_key_object_removal")]
    pub routing_key_object_removal: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_routing_key_bg_removal() -> String {
    "bg-removal".to_string()
}

fn default_routing_key_upscale() -> String {
    "upscaling".to_string()
}

fn default_routing_key_enlarge() -> String {
    "enlarge".to_string()
}

fn default_routing_key_style_transfer() -> String {
    "style-transfer".to_string()
}

fn default_routing_key_object_removal() -> String {
    "object-removal".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Configured routing key for a job type.
    pub fn routing_key(&self, job_type: JobType) -> &str {
        match job_type {
            JobType::BgRemoval => &self.routing_key_bg_removal,
            JobType::Upscale => &self.routing_key_upscale,
            JobType::Enlarge => &self.routing_key_enlarge,
            JobType::StyleTransfer => &self.routing_key_style_transfer,
            JobType::ObjectRemoval => &self.routing_key_object_removal,
        }
    }
}
