pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod key;
pub mod row;
pub mod series;

pub use config::EngineConfig;
pub use error::CoreError;
pub use ids::*;
pub use key::{ALL_CLIENTS, ClientFilter, CurveKey, normalize_label};
pub use row::RawRow;
pub use series::{MONTHS, MaskedSeries, MonthlySeries};
