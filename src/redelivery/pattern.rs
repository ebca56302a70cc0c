//! Stepwise delay schedules such as `"0:1000;3:5000"`.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Ordered `(threshold, delay)` steps.
///
/// The delay for attempt `n` is the delay of the greatest threshold `<= n`.
/// Attempts below the first threshold wait zero.
///
/// ```
/// use std::time::Duration;
///
/// use redelivery::redelivery::DelayPattern;
///
/// let pattern: DelayPattern = "0:1000;3:5000".parse().expect("valid pattern");
/// assert_eq!(pattern.delay_for(2), Duration::from_millis(1000));
/// assert_eq!(pattern.delay_for(3), Duration::from_millis(5000));
/// assert_eq!(pattern.to_string(), "0:1000;3:5000");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DelayPattern {
    steps: Vec<(u32, Duration)>,
}

impl DelayPattern {
    /// Build a pattern from `(threshold, delay)` steps in any order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDelayPattern`] when `steps` is empty or a
    /// threshold appears twice.
    pub fn new(steps: impl IntoIterator<Item = (u32, Duration)>) -> Result<Self, ConfigError> {
        let mut steps: Vec<_> = steps.into_iter().collect();
        steps.sort_by_key(|&(threshold, _)| threshold);
        let pattern = Self { steps };
        if pattern.steps.is_empty() {
            return Err(pattern.invalid("no steps"));
        }
        if let Some(w) = pattern.steps.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(pattern.invalid(&format!("threshold {} repeated", w[0].0)));
        }
        Ok(pattern)
    }

    /// Steps in ascending threshold order.
    #[must_use]
    pub fn steps(&self) -> &[(u32, Duration)] { &self.steps }

    /// Delay applicable to `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.steps
            .iter()
            .rev()
            .find(|&&(threshold, _)| threshold <= attempt)
            .map_or(Duration::ZERO, |&(_, delay)| delay)
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::InvalidDelayPattern {
            pattern: self.to_string(),
            reason: reason.to_owned(),
        }
    }
}

fn parse_error(text: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidDelayPattern {
        pattern: text.to_owned(),
        reason: reason.into(),
    }
}

impl FromStr for DelayPattern {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let steps = text
            .split(';')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(|group| {
                let (threshold, delay) = group
                    .split_once(':')
                    .ok_or_else(|| parse_error(text, format!("group {group:?} lacks ':'")))?;
                let threshold = threshold
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| parse_error(text, format!("threshold {threshold:?}: {e}")))?;
                let delay = delay
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| parse_error(text, format!("delay {delay:?}: {e}")))?;
                Ok((threshold, Duration::from_millis(delay)))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Self::new(steps).map_err(|e| match e {
            ConfigError::InvalidDelayPattern { reason, .. } => parse_error(text, reason),
            other => other,
        })
    }
}

impl fmt::Display for DelayPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (threshold, delay)) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{threshold}:{}", delay.as_millis())?;
        }
        Ok(())
    }
}

impl TryFrom<String> for DelayPattern {
    type Error = ConfigError;

    fn try_from(text: String) -> Result<Self, Self::Error> { text.parse() }
}

impl From<DelayPattern> for String {
    fn from(pattern: DelayPattern) -> Self { pattern.to_string() }
}
