//! Chronological train/validation split

use crate::{
    errors::{DataError, Result},
    table::Table,
};
use tracing::debug;

/// Default share of rows held out for validation (about one month of a
/// 2009–2015 training range)
pub const DEFAULT_SPLIT_RATIO: f64 = 0.02;

/// A time-ordered table cut into a training prefix and a validation suffix
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSplit {
    pub train: Table,
    pub validation: Table,
}

impl TrainingSplit {
    /// Split `table` without shuffling; the validation suffix holds
    /// `round(len * ratio)` rows, with halves rounded away from zero.
    pub fn chronological(table: Table, ratio: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&ratio) {
            return Err(DataError::InvalidSplitRatio(ratio));
        }
        let total = table.len();
        let validation_rows = validation_len(total, ratio);
        let (train, validation) = table.split_at(total - validation_rows);

        debug!(
            train = train.len(),
            validation = validation.len(),
            ratio,
            "chronological split"
        );
        Ok(Self { train, validation })
    }
}

/// Number of validation rows for `total` rows at `ratio`
pub fn validation_len(total: usize, ratio: f64) -> usize {
    ((total as f64) * ratio).round().min(total as f64) as usize
}
