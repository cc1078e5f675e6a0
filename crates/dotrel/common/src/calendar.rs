// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Legacy calendar correction.
//!
//! Some clients submit dates in the Buddhist era (Gregorian + 543). Values
//! that went through the conversion twice arrive shifted by 1086 years.
//! Both shapes are detected by year range and folded back before a date
//! is formatted or bound.

use crate::value::Value;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};

/// Years above this are treated as doubly shifted
pub const DOUBLE_SHIFT_THRESHOLD: i32 = 3000;
/// Years above this (and not above [`DOUBLE_SHIFT_THRESHOLD`]) are treated as singly shifted
pub const SINGLE_SHIFT_THRESHOLD: i32 = 2500;
pub const ERA_OFFSET_YEARS: i32 = 543;

pub fn corrected_year(year: i32) -> i32 {
    if year > DOUBLE_SHIFT_THRESHOLD {
        year - 2 * ERA_OFFSET_YEARS
    } else if year > SINGLE_SHIFT_THRESHOLD {
        year - ERA_OFFSET_YEARS
    } else {
        year
    }
}

/// Feb 29 of a leap year whose corrected year is not leap clamps to Feb 28.
pub fn correct_date(date: NaiveDate) -> NaiveDate {
    let year = corrected_year(date.year());
    if year == date.year() {
        return date;
    }
    date.with_year(year).or_else(|| NaiveDate::from_ymd_opt(year, date.month(), 28)).unwrap_or(date)
}

pub fn correct_datetime(value: NaiveDateTime) -> NaiveDateTime {
    NaiveDateTime::new(correct_date(value.date()), value.time())
}

pub fn correct_offset_datetime(value: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let local = correct_datetime(value.naive_local());
    value.offset().from_local_datetime(&local).single().unwrap_or(value)
}

impl Value {
    /// Date values with the legacy era shift removed; other values are returned unchanged
    pub fn calendar_corrected(&self) -> Value {
        match self {
            Value::Date(d) => Value::Date(correct_date(*d)),
            Value::DateTime(d) => Value::DateTime(correct_datetime(*d)),
            Value::DateTimeOffset(d) => Value::DateTimeOffset(correct_offset_datetime(*d)),
            other => other.clone(),
        }
    }
}
