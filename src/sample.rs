//! CPS sample identifiers and candidate generation.
//!
//! IPUMS names each CPS release with a token such as `cps2023_01s`:
//! collection prefix, four-digit year, `_`, two-digit month and a
//! one-letter variant. Which variant exists for a given month varies by
//! year, so [`generate_candidates`] produces every syntactically possible
//! token and the catalog decides which ones are real.

use std::fmt;
use std::str::FromStr;

use crate::error::ExtractError;

/// Collection prefix for the Current Population Survey.
pub const CPS_COLLECTION: &str = "cps";

/// Number of monthly releases per year.
pub const SEQUENCES_PER_YEAR: u8 = 12;

/// Variant suffix of a sample identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleVariant {
    /// Basic monthly sample with supplement (`s`).
    Supplement,
    /// Basic monthly sample (`b`).
    Basic,
}

impl SampleVariant {
    /// Variants in enumeration order.
    pub const ALL: [Self; 2] = [Self::Supplement, Self::Basic];

    /// Single-letter suffix used in the identifier.
    #[must_use]
    pub fn suffix(self) -> char {
        match self {
            Self::Supplement => 's',
            Self::Basic => 'b',
        }
    }
}

/// One sample identifier, e.g. `cps2023_01s`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleIdentifier {
    token: String,
}

impl SampleIdentifier {
    /// Builds an identifier from its parts.
    #[must_use]
    pub fn new(collection: &str, year: u16, sequence: u8, variant: SampleVariant) -> Self {
        Self {
            token: format!("{collection}{year:04}_{sequence:02}{}", variant.suffix()),
        }
    }

    /// The identifier token as sent to the API.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }
}

impl fmt::Display for SampleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

impl AsRef<str> for SampleIdentifier {
    fn as_ref(&self) -> &str {
        &self.token
    }
}

/// Inclusive range of survey years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    start: u16,
    end: u16,
}

impl YearRange {
    /// Creates an inclusive range.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Validation`] when a year is not four digits or
    /// `start > end`.
    pub fn new(start: u16, end: u16) -> Result<Self, ExtractError> {
        for year in [start, end] {
            if !(1000..=9999).contains(&year) {
                return Err(ExtractError::validation(
                    format!("year {year} is not a four-digit year"),
                    "Use years such as 2023 or a range such as 2022-2023",
                ));
            }
        }
        if start > end {
            return Err(ExtractError::validation(
                format!("year range {start}-{end} is inverted"),
                "Put the earlier year first, e.g. 2022-2023",
            ));
        }
        Ok(Self { start, end })
    }

    /// Normalizes a single year to the degenerate range `(year, year)`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Validation`] when `year` is not four digits.
    pub fn single(year: u16) -> Result<Self, ExtractError> {
        Self::new(year, year)
    }

    /// First year of the range.
    #[must_use]
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Last year of the range (inclusive).
    #[must_use]
    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of years covered.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Always false; a valid range covers at least one year.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates the years in ascending order.
    pub fn years(&self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for YearRange {
    type Err = ExtractError;

    /// Accepts `2023`, `2022-2023` or `2022..2023`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (start, end) = match trimmed.split_once("..").or_else(|| trimmed.split_once('-')) {
            Some((start, end)) => (start, end),
            None => (trimmed, trimmed),
        };
        let start = parse_year(start, s)?;
        let end = parse_year(end, s)?;
        Self::new(start, end)
    }
}

fn parse_year(value: &str, original: &str) -> Result<u16, ExtractError> {
    value.trim().parse::<u16>().map_err(|_| {
        ExtractError::validation(
            format!("cannot parse year range '{original}'"),
            "Use a single year (2023) or an inclusive range (2022-2023)",
        )
    })
}

/// Produces every possible sample identifier for `years` in `collection`.
///
/// Order is year ascending, then variant (`s` before `b`), then month
/// ascending. The result is `years.len() * 2 * 12` long.
#[must_use]
pub fn generate_candidates(collection: &str, years: YearRange) -> Vec<SampleIdentifier> {
    let mut candidates =
        Vec::with_capacity(years.len() * SampleVariant::ALL.len() * usize::from(SEQUENCES_PER_YEAR));
    for year in years.years() {
        for variant in SampleVariant::ALL {
            for sequence in 1..=SEQUENCES_PER_YEAR {
                candidates.push(SampleIdentifier::new(collection, year, sequence, variant));
            }
        }
    }
    candidates
}
