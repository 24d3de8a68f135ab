//! Position lifecycle: exit FSM, take-profit ladder, rule-driven exits
//! and pre-entry validation.

pub mod config;
pub mod entry_validator;
pub mod exits;
pub mod manager;
pub mod tp;

pub use config::{
    EntryRulesConfig, ExitRulesConfig, FsmConfig, MarketQualityConfig, PositionConfig,
    SmartPlacementConfig, TpLevelConfig,
};
pub use entry_validator::{
    CheckPriority, EntryCheck, EntryContext, EntryValidation, EntryValidator,
};
pub use exits::{ExitMarketState, ExitRulesChecker, RuleExitSignal, Urgency};
pub use manager::{BarUpdate, PositionEvent, PositionManager};
pub use tp::{place_ladder, PlacedTp, PlacementContext};
