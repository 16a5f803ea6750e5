// Date-range selection for the availability calendar and the booking date-picker.
//
// The engine is pure: a click is resolved against the availability feed and a
// `today` reference, and the selection either moves to its next state or stays
// exactly as it was.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One calendar day of a listing as reported by the availability feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub blocked: bool,
    // Display only; the engine never reads it
    #[serde(default)]
    pub price_override: Option<f64>,
    #[serde(default)]
    pub minimum_stay_override: Option<u32>,
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl DayAvailability {
    pub fn open(date: NaiveDate) -> Self {
        Self {
            date,
            available: Some(true),
            blocked: false,
            price_override: None,
            minimum_stay_override: None,
            block_reason: None,
        }
    }

    pub fn unavailable(date: NaiveDate) -> Self {
        Self {
            available: Some(false),
            ..Self::open(date)
        }
    }

    pub fn blocked(date: NaiveDate, reason: Option<&str>) -> Self {
        Self {
            blocked: true,
            block_reason: reason.map(str::to_string),
            ..Self::open(date)
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.unwrap_or(true)
    }
}

/// The availability feed for one listing, indexed by day.
///
/// Days missing from the feed count as available.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvailabilityFeed {
    days: BTreeMap<NaiveDate, DayAvailability>,
}

impl AvailabilityFeed {
    pub fn new(records: Vec<DayAvailability>) -> Self {
        records.into_iter().collect()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&DayAvailability> {
        self.days.get(&date)
    }

    pub fn is_available(&self, date: NaiveDate) -> bool {
        self.days.get(&date).map_or(true, DayAvailability::is_available)
    }

    pub fn is_blocked(&self, date: NaiveDate) -> bool {
        self.days.get(&date).map_or(false, |day| day.blocked)
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DayAvailability> {
        self.days.values()
    }
}

impl FromIterator<DayAvailability> for AvailabilityFeed {
    // A later record for the same date replaces the earlier one
    fn from_iter<I: IntoIterator<Item = DayAvailability>>(iter: I) -> Self {
        let days = iter.into_iter().map(|day| (day.date, day)).collect();
        Self { days }
    }
}

// Rendering classification, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayStatus {
    Past,
    Blocked,
    Unavailable,
    Available,
}

pub fn classify_day(date: NaiveDate, feed: &AvailabilityFeed, today: NaiveDate) -> DayStatus {
    if date < today {
        DayStatus::Past
    } else if feed.is_blocked(date) {
        DayStatus::Blocked
    } else if !feed.is_available(date) {
        DayStatus::Unavailable
    } else {
        DayStatus::Available
    }
}

/// Check-in / check-out pair picked by the user.
///
/// When both ends are set, `check_out` is strictly after `check_in`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateSelection {
    check_in: Option<NaiveDate>,
    check_out: Option<NaiveDate>,
}

impl DateSelection {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn starting(check_in: NaiveDate) -> Self {
        Self {
            check_in: Some(check_in),
            check_out: None,
        }
    }

    // Returns None unless check_out > check_in
    pub fn range(check_in: NaiveDate, check_out: NaiveDate) -> Option<Self> {
        (check_out > check_in).then_some(Self {
            check_in: Some(check_in),
            check_out: Some(check_out),
        })
    }

    pub fn check_in(&self) -> Option<NaiveDate> {
        self.check_in
    }

    pub fn check_out(&self) -> Option<NaiveDate> {
        self.check_out
    }

    pub fn is_empty(&self) -> bool {
        self.check_in.is_none() && self.check_out.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_some()
    }

    pub fn nights(&self) -> u32 {
        crate::pricing::nights(self.check_in, self.check_out)
    }

    /// True for either endpoint and for every day strictly between them.
    pub fn contains(&self, date: NaiveDate) -> bool {
        if self.check_in == Some(date) || self.check_out == Some(date) {
            return true;
        }
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) => date > check_in && date < check_out,
            _ => false,
        }
    }

    // Each night of the stay: check-in day up to, not including, check-out day
    pub fn stay_nights(&self) -> Vec<NaiveDate> {
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) => check_in
                .iter_days()
                .take_while(|day| *day < check_out)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Past,
    Unavailable,
    Blocked,
    // Would produce a zero-night stay
    SameAsCheckIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Ignored(IgnoreReason),
    CheckInSet,
    CheckInRestarted,
    CheckOutSet,
    SelectionRestarted,
}

impl ClickOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, ClickOutcome::Ignored(_))
    }
}

/// Click protocol over a [`DateSelection`].
///
/// | state                             | click      | result                                |
/// |-----------------------------------|------------|---------------------------------------|
/// | nothing picked                    | eligible D | check-in = D, awaiting check-out      |
/// | awaiting check-out, D < check-in  |            | check-in = D, still awaiting          |
/// | awaiting check-out, D > check-in  |            | check-out = D, range complete         |
/// | awaiting check-out, D == check-in |            | ignored                               |
/// | range complete                    | eligible D | check-in = D, check-out cleared       |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionEngine {
    selection: DateSelection,
    awaiting_check_out: bool,
}

impl SelectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> DateSelection {
        self.selection
    }

    pub fn awaiting_check_out(&self) -> bool {
        self.awaiting_check_out
    }

    // Days before today, host-blocked days and unavailable days are not selectable.
    // Reasons follow the precedence of `classify_day`.
    pub fn eligibility(
        date: NaiveDate,
        feed: &AvailabilityFeed,
        today: NaiveDate,
    ) -> Result<(), IgnoreReason> {
        if date < today {
            return Err(IgnoreReason::Past);
        }
        if feed.is_blocked(date) {
            return Err(IgnoreReason::Blocked);
        }
        if !feed.is_available(date) {
            return Err(IgnoreReason::Unavailable);
        }
        Ok(())
    }

    pub fn click(
        &mut self,
        date: NaiveDate,
        feed: &AvailabilityFeed,
        today: NaiveDate,
    ) -> ClickOutcome {
        if let Err(reason) = Self::eligibility(date, feed, today) {
            return ClickOutcome::Ignored(reason);
        }

        match self.selection.check_in {
            None => {
                self.selection = DateSelection::starting(date);
                self.awaiting_check_out = true;
                ClickOutcome::CheckInSet
            }
            Some(check_in) if self.awaiting_check_out => {
                if date < check_in {
                    self.selection = DateSelection::starting(date);
                    ClickOutcome::CheckInRestarted
                } else if date == check_in {
                    ClickOutcome::Ignored(IgnoreReason::SameAsCheckIn)
                } else {
                    self.selection.check_out = Some(date);
                    self.awaiting_check_out = false;
                    ClickOutcome::CheckOutSet
                }
            }
            Some(_) => {
                self.selection = DateSelection::starting(date);
                self.awaiting_check_out = true;
                ClickOutcome::SelectionRestarted
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
