//! Microstructure feature layer.
//!
//! - Density detection: liquidity walls and their consumption
//! - Activity tracking: composite z-score index with decay detection
//! - Level detection: horizontal S/R clustering with cascade flags

pub mod activity;
pub mod density;
pub mod error;
pub mod levels;

pub use activity::{
    ActivityConfig, ActivityDropEvent, ActivityMetrics, ActivitySample, ActivityTracker,
};
pub use density::{
    BookSide, DensityConfig, DensityDetector, DensityEvent, DensityEventKind, DensityLevel,
};
pub use error::{FeatureError, FeatureResult};
pub use levels::{ApproachQuality, LevelConfig, LevelDetector};
