//! Predicate evaluation with diagnostics recording.
//!
//! Both strategies funnel every check through the validator so each
//! predicate lands in diagnostics with its value, threshold and outcome,
//! pass or fail. The collected margins feed the confidence score.

use bbot_core::Symbol;
use bbot_diag::{DiagEvent, DiagSink};

/// One evaluated predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateRecord {
    pub name: String,
    pub value: f64,
    pub threshold: f64,
    pub passed: bool,
    /// How comfortably the predicate passed, in [0, 1].
    pub margin: f64,
}

/// Direction of a threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    /// Value must be at least the threshold.
    Gte,
    /// Value must be at most the threshold.
    Lte,
}

/// Collects predicate outcomes for one strategy evaluation.
pub struct Validator {
    symbol: Symbol,
    strategy: &'static str,
    records: Vec<PredicateRecord>,
    diag: DiagSink,
}

impl Validator {
    pub fn new(symbol: Symbol, strategy: &'static str, diag: DiagSink) -> Self {
        Self {
            symbol,
            strategy,
            records: Vec::new(),
            diag,
        }
    }

    /// Evaluate one predicate and record it. Returns whether it passed.
    pub fn check(&mut self, name: &str, value: f64, threshold: f64, cmp: Cmp) -> bool {
        let passed = match cmp {
            Cmp::Gte => value >= threshold,
            Cmp::Lte => value <= threshold,
        };
        let margin = if passed {
            let denom = threshold.abs().max(1e-9);
            match cmp {
                Cmp::Gte => ((value - threshold) / denom).clamp(0.0, 1.0),
                Cmp::Lte => ((threshold - value) / denom).clamp(0.0, 1.0),
            }
        } else {
            0.0
        };

        self.records.push(PredicateRecord {
            name: name.to_string(),
            value,
            threshold,
            passed,
            margin,
        });

        self.diag.record(
            DiagEvent::new("signal", "predicate")
                .with_symbol(self.symbol.clone())
                .with_reason(format!("{}:{}", self.strategy, name))
                .with_passed(passed)
                .with_field("value", value)
                .with_field("threshold", threshold),
        );

        passed
    }

    /// Record a predicate that failed for lack of data.
    pub fn fail(&mut self, name: &str, reason: &str) {
        self.records.push(PredicateRecord {
            name: name.to_string(),
            value: f64::NAN,
            threshold: f64::NAN,
            passed: false,
            margin: 0.0,
        });
        self.diag.record(
            DiagEvent::new("signal", "predicate")
                .with_symbol(self.symbol.clone())
                .with_reason(format!("{}:{}", self.strategy, name))
                .with_passed(false)
                .with_field("reason", reason),
        );
    }

    pub fn all_passed(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.passed)
    }

    /// Mean margin across passed predicates.
    pub fn mean_margin(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.records.iter().map(|r| r.margin).sum::<f64>() / self.records.len() as f64
    }

    pub fn records(&self) -> &[PredicateRecord] {
        &self.records
    }
}

/// Confidence from predicate margins and the scan score.
///
/// A full sweep of comfortable passes on a well-scored candidate lands
/// near 1.0; threshold-grazing passes stay near 0.5.
pub fn confidence(mean_margin: f64, scan_score: f64) -> f64 {
    let score_term = (scan_score / 3.0).clamp(-1.0, 1.0) * 0.1;
    (0.55 + 0.4 * mean_margin + score_term).clamp(0.0, 1.0)
}
