use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Normalized Swedish personal identity number (`YYYYMMDDNNNN`, 12 digits).
///
/// Guaranteed normalized by construction. Parsing accepts the provider's and
/// users' usual spellings (`YYMMDD-NNNN`, `YYMMDD+NNNN`, `YYYYMMDDNNNN`, with
/// or without whitespace) and expands the short form to four-digit years.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersonalNumber(String);

impl PersonalNumber {
    /// Normalizes `raw` relative to the current calendar year.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPersonalNumber`] if `raw` contains anything but
    /// digits and separators, or is not 10 or 12 digits long.
    pub fn normalize(raw: &str) -> Result<Self, Error> {
        Self::normalize_for_year(raw, time::OffsetDateTime::now_utc().year())
    }

    /// Normalizes `raw`, inferring the century of a 10-digit number from
    /// `current_year`.
    ///
    /// A two-digit year greater than the current two-digit year belongs to
    /// the previous century. A `+` separator marks a person aged 100 or more
    /// and moves the birth year back one further century.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPersonalNumber`] on malformed input.
    pub fn normalize_for_year(raw: &str, current_year: i32) -> Result<Self, Error> {
        let centenarian = raw.contains('+');
        let digits: String = raw
            .chars()
            .filter(|c| !matches!(c, '-' | '+') && !c.is_whitespace())
            .collect();

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidPersonalNumber(raw.to_owned()));
        }

        match digits.len() {
            12 => Ok(Self(digits)),
            10 => {
                let short_year: i32 = digits[..2]
                    .parse()
                    .map_err(|_| Error::InvalidPersonalNumber(raw.to_owned()))?;
                let mut century = current_year / 100;
                if short_year > current_year % 100 {
                    century -= 1;
                }
                if centenarian {
                    century -= 1;
                }
                Ok(Self(format!("{century:02}{digits}")))
            }
            _ => Err(Error::InvalidPersonalNumber(raw.to_owned())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PersonalNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PersonalNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl TryFrom<String> for PersonalNumber {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::normalize(&s)
    }
}

impl From<PersonalNumber> for String {
    fn from(p: PersonalNumber) -> Self {
        p.0
    }
}
