use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::model::DayViewItem;

use super::{Engine, EngineError};

impl Engine {
    /// One row per committed entry on `date`, ascending by time.
    pub async fn day_view(&self, date: NaiveDate) -> Vec<DayViewItem> {
        let Some(day) = self.existing_day(date) else {
            return Vec::new();
        };
        day.read()
            .await
            .entries
            .iter()
            .map(|e| DayViewItem {
                slot: e.slot,
                kind: e.kind,
                id: e.id,
            })
            .collect()
    }

    /// Every day of the month mapped to whether it has at least one entry.
    pub async fn month_badges(
        &self,
        year: i32,
        month: u32,
    ) -> Result<BTreeMap<NaiveDate, bool>, EngineError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EngineError::Validation(format!("{year}-{month:02} is not a month")))?;

        let mut badges = BTreeMap::new();
        for date in first.iter_days().take_while(|d| d.month() == month) {
            let busy = match self.existing_day(date) {
                Some(day) => !day.read().await.is_empty(),
                None => false,
            };
            badges.insert(date, busy);
        }
        Ok(badges)
    }
}
