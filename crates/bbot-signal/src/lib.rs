//! Signal generation: momentum and retest strategies over scan results.

pub mod config;
pub mod generator;
pub mod history;
pub mod strategies;
pub mod validator;

pub use config::SignalConfig;
pub use generator::{SharedHistory, SignalGenerator};
pub use history::{BreakoutHistory, BreakoutRecord};
pub use strategies::{evaluate_momentum, evaluate_retest, SymbolFeatures};
pub use validator::{confidence, Cmp, PredicateRecord, Validator};
