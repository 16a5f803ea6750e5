// Stay pricing derived from a date selection.
// Everything here is recomputed on demand; nothing is cached.

use crate::calendar::DateSelection;
use chrono::NaiveDate;

pub const SERVICE_FEE_RATE: f64 = 0.10;

// Whole days between the two ends, 0 when either end is missing
pub fn nights(check_in: Option<NaiveDate>, check_out: Option<NaiveDate>) -> u32 {
    match (check_in, check_out) {
        (Some(check_in), Some(check_out)) => {
            u32::try_from((check_out - check_in).num_days().max(0)).unwrap_or(u32::MAX)
        }
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub nights: u32,
    pub nightly_rate: f64,
    pub total_price: f64,
    pub service_fee: f64,
    pub final_total: f64,
}

impl PriceQuote {
    pub fn new(nights: u32, nightly_rate: f64) -> Self {
        let total_price = f64::from(nights) * nightly_rate;
        let service_fee = total_price * SERVICE_FEE_RATE;
        Self {
            nights,
            nightly_rate,
            total_price,
            service_fee,
            final_total: total_price + service_fee,
        }
    }

    pub fn for_selection(selection: &DateSelection, nightly_rate: f64) -> Self {
        Self::new(selection.nights(), nightly_rate)
    }
}
