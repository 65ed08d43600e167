//! Series name filters

use regex::Regex;

use crate::client::Series;
use crate::config::RegexFilter;
use crate::error::ConfigError;

/// A compiled `is` / `isNot` filter
#[derive(Debug, Clone)]
pub struct SeriesFilter {
    regex: Regex,
    positive: bool,
}

impl SeriesFilter {
    pub fn new(config: &RegexFilter) -> Result<Self, ConfigError> {
        let (pattern, positive) = match (config.is.as_str(), config.is_not.as_str()) {
            ("", "") => return Err(ConfigError::EmptyFilter),
            (is, "") => (is, true),
            ("", is_not) => (is_not, false),
            (is, is_not) => {
                return Err(ConfigError::ConflictingFilter {
                    is: is.to_string(),
                    is_not: is_not.to_string(),
                })
            }
        };

        let regex = Regex::new(pattern).map_err(|e| ConfigError::Regex {
            pattern: pattern.to_string(),
            source: e,
        })?;
        Ok(Self { regex, positive })
    }

    /// Filter that keeps names matching `pattern`
    pub fn is(pattern: &str) -> Result<Self, ConfigError> {
        Self::new(&RegexFilter::is(pattern))
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name) == self.positive
    }
}

/// Filters that must all match; an empty chain keeps everything
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<SeriesFilter>,
}

impl FilterChain {
    pub fn new(filters: Vec<SeriesFilter>) -> Self {
        Self { filters }
    }

    pub fn push(&mut self, filter: SeriesFilter) {
        self.filters.push(filter);
    }

    pub fn matches(&self, name: &str) -> bool {
        self.filters.iter().all(|f| f.matches(name))
    }

    pub fn filter(&self, series: &[Series]) -> Vec<Series> {
        series
            .iter()
            .filter(|s| self.matches(&s.name))
            .cloned()
            .collect()
    }
}
