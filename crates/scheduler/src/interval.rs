use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use common::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    fn from_suffix(c: char) -> Option<Self> {
        match c {
            's' => Some(IntervalUnit::Seconds),
            'm' => Some(IntervalUnit::Minutes),
            'h' => Some(IntervalUnit::Hours),
            'd' => Some(IntervalUnit::Days),
            _ => None,
        }
    }

    fn suffix(self) -> char {
        match self {
            IntervalUnit::Seconds => 's',
            IntervalUnit::Minutes => 'm',
            IntervalUnit::Hours => 'h',
            IntervalUnit::Days => 'd',
        }
    }

    fn seconds(self) -> u64 {
        match self {
            IntervalUnit::Seconds => 1,
            IntervalUnit::Minutes => 60,
            IntervalUnit::Hours => 3_600,
            IntervalUnit::Days => 86_400,
        }
    }
}

/// Recurrence of a scheduled task, written `<positive integer><s|m|h|d>`
/// (e.g. `30s`, `5m`, `1d`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    magnitude: NonZeroU32,
    unit: IntervalUnit,
}

impl Interval {
    pub fn magnitude(&self) -> u32 {
        self.magnitude.get()
    }

    pub fn unit(&self) -> IntervalUnit {
        self.unit
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.magnitude.get()) * self.unit.seconds())
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidInterval(s.to_string());

        let mut chars = s.chars();
        let unit = chars
            .next_back()
            .and_then(IntervalUnit::from_suffix)
            .ok_or_else(invalid)?;
        let digits = chars.as_str();
        // u32::from_str accepts a leading '+', the grammar does not
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let magnitude = digits
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(invalid)?;

        Ok(Self { magnitude, unit })
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit.suffix())
    }
}
