//! # API Request Models
//!
//! Structures for incoming API request bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST /deposit` and `POST /withdraw`.
///
/// ## Example JSON
///
/// ```json
/// {
///     "amount": "100.50"
/// }
/// ```
///
/// ## Notes
///
/// - `amount` is a decimal string in whole asset units, not base units
/// - At most `ASSET_DECIMALS` fractional digits; extra precision is rejected
/// - A JSON number is rejected so that no float rounding can happen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountBody {
    pub amount: String,
}
