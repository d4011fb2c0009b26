//! Scriptorium Balance
//!
//! Measures how evenly knowledge is spread across the corpus and applies
//! explicit, reviewable corrections.
//!
//! - Density: KUs per cited page, by domain and by source document
//! - Skew: domain imbalance, density variance, coverage gaps, quality drift
//! - Calibration: rule plans with idempotent execution and an action history
//!
//! # Examples
//!
//! ```no_run
//! use scriptorium_audit::CorpusView;
//! use scriptorium_balance::{DensityAnalyzer, SkewConfig, SkewDetector};
//! use scriptorium_store::{KnowledgeStore, NullChunkStore, StoreLayout};
//!
//! let store = KnowledgeStore::open(StoreLayout::new("corpus")).unwrap();
//! let view = CorpusView::load(&store, &NullChunkStore).unwrap();
//! let density = DensityAnalyzer::new(&view).analyze();
//! let skew = SkewDetector::new(SkewConfig::default()).detect(&density);
//! println!("balance health {}", skew.health_score);
//! ```

#![warn(missing_docs)]

mod calibration;
mod config;
mod density;
mod error;
mod skew;

pub use calibration::{
    CalibrationAction, CalibrationEvent, CalibrationPlan, CalibrationRule, CalibrationState, Calibrator,
    ExecutionReport,
};
pub use config::{CalibrationConfig, SkewConfig};
pub use density::{infer_domain, DensityAnalyzer, DensityReport, DomainDensity, SourceDensity};
pub use error::BalanceError;
pub use skew::{coefficient_of_variation, gini, SkewAlert, SkewDetector, SkewKind, SkewReport};
