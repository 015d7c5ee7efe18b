pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

pub use config::{Config, EngineConfig};
pub use error::{DiscoveryError, Result};
pub use services::{
    RecommendationEngine, RecommendationRequest, RecommendationResponse, StaticCatalog,
};
