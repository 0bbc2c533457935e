//! Date-range planning: which monthly bundles cover a window and which days
//! have to be served from daily bundles.
//!
//! The server publishes a month's bundle some time after the month ends, and
//! nothing at all before a symbol's data begins. So for a window the plan is:
//! - trailing months without a monthly bundle fall back to daily bundles, from
//!   the first such month up to `end`;
//! - leading months without a monthly bundle are a history gap and are dropped
//!   with a warning.
//!
//! Existence always comes from the server (or a cached copy of the archive),
//! never from the calendar, so plans stay correct as the publication frontier
//! moves.

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use log::warn;

use super::probe::ExistenceCheck;
use super::provider::FetchError;
use super::url::ArchiveSpec;
use crate::domain::{days_between, months_between, Period};

/// Ordered periods to fetch for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub months: Vec<Period>,
    pub days: Vec<Period>,
    /// Leading range with no published data, if any.
    pub gap: Option<HistoryGap>,
}

impl Plan {
    /// Months first, then days, each in chronological order.
    pub fn periods(&self) -> impl Iterator<Item = Period> + '_ {
        self.months.iter().chain(self.days.iter()).copied()
    }

    pub fn len(&self) -> usize {
        self.months.len() + self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty() && self.days.is_empty()
    }
}

/// Leading months for which the server has no monthly bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryGap {
    pub first_missing: Period,
    /// Day before the first remaining month, or the window end.
    pub through: NaiveDateTime,
}

impl HistoryGap {
    pub fn describe(&self) -> String {
        format!(
            "data does not exist for the period: {} to {}",
            self.first_missing.label(),
            self.through.format("%Y-%m")
        )
    }
}

/// Probes each URL at most once per plan.
struct Memo<'a> {
    inner: &'a dyn ExistenceCheck,
    seen: RefCell<HashMap<String, bool>>,
}

impl Memo<'_> {
    fn exists(&self, url: &str) -> Result<bool, FetchError> {
        if let Some(&known) = self.seen.borrow().get(url) {
            return Ok(known);
        }
        let found = self.inner.exists(url)?;
        self.seen.borrow_mut().insert(url.to_string(), found);
        Ok(found)
    }
}

/// Compute the monthly and daily periods covering `[start, end]` (naive UTC).
pub fn plan(
    check: &dyn ExistenceCheck,
    base_url: &str,
    spec: &ArchiveSpec,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Plan, FetchError> {
    if start > end {
        return Err(FetchError::InvalidRequest(format!(
            "start {start} is after end {end}"
        )));
    }

    let memo = Memo {
        inner: check,
        seen: RefCell::new(HashMap::new()),
    };
    let mut months = months_between(start, end);

    // Trailing months not yet bundled monthly.
    let mut daily_from = None;
    while let Some(&last) = months.last() {
        if memo.exists(&spec.url(base_url, last)?)? {
            break;
        }
        months.pop();
        daily_from = Some(last);
    }

    let days = match daily_from {
        Some(month) if spec.kind.has_daily_archives() && month.start() != end => {
            days_between(month.first_day(), end)
        }
        _ => Vec::new(),
    };

    // Leading months before publication began.
    let mut first_missing = None;
    let mut leading = 0;
    for &month in &months {
        if memo.exists(&spec.url(base_url, month)?)? {
            break;
        }
        first_missing.get_or_insert(month);
        leading += 1;
    }
    let months = months.split_off(leading);

    let gap = first_missing.map(|first_missing| {
        let through = months
            .first()
            .map(|m| m.start() - Duration::days(1))
            .unwrap_or(end);
        HistoryGap {
            first_missing,
            through,
        }
    });
    if let Some(gap) = &gap {
        warn!("{} ({})", gap.describe(), spec.symbol);
    }

    Ok(Plan { months, days, gap })
}
