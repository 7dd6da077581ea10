//! Column inference
//!
//! Which column holds the timestamp, which holds voltage, and so on, is
//! decided by a [`MatchStrategy`]: an ordered list of [`ColumnMatcher`]s.
//! Earlier matchers take priority; within one matcher the first matching
//! column wins. The built-in strategies match on column names only, and a
//! stricter content-based strategy can be passed wherever a name-based one
//! is accepted.

use crate::dataset::{Column, ColumnData, Dataset};
use crate::timestamp::{looks_like_timestamp, parse_timestamp};

/// A predicate deciding whether a column plays some role
pub trait ColumnMatcher: Send + Sync {
    fn matches(&self, column: &Column) -> bool;

    /// Human-readable description, used in logs
    fn describe(&self) -> String;
}

/// Matches columns whose name contains any of the given needles
#[derive(Clone, Debug)]
pub struct NameContains {
    needles: Vec<String>,
    case_sensitive: bool,
}

impl NameContains {
    /// Case-sensitive substring match
    pub fn exact(needle: impl Into<String>) -> Self {
        Self {
            needles: vec![needle.into()],
            case_sensitive: true,
        }
    }

    /// Case-insensitive match against any of the needles
    pub fn any_ignore_case<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            needles: needles.into_iter().map(|n| n.into().to_lowercase()).collect(),
            case_sensitive: false,
        }
    }
}

impl ColumnMatcher for NameContains {
    fn matches(&self, column: &Column) -> bool {
        if self.case_sensitive {
            self.needles.iter().any(|n| column.name.contains(n.as_str()))
        } else {
            let name = column.name.to_lowercase();
            self.needles.iter().any(|n| name.contains(n.as_str()))
        }
    }

    fn describe(&self) -> String {
        let mode = if self.case_sensitive { "" } else { " (any case)" };
        format!("name contains {:?}{}", self.needles, mode)
    }
}

/// Matches columns whose values parse as timestamps
///
/// Looks at up to `sample` present values; at least `min_ratio` of them must
/// parse. Columns that already hold timestamps always match.
#[derive(Clone, Debug)]
pub struct ContentIsTemporal {
    pub sample: usize,
    pub min_ratio: f64,
}

impl Default for ContentIsTemporal {
    fn default() -> Self {
        Self {
            sample: 50,
            min_ratio: 0.9,
        }
    }
}

impl ColumnMatcher for ContentIsTemporal {
    fn matches(&self, column: &Column) -> bool {
        let values = match &column.data {
            ColumnData::Timestamp(_) => return true,
            ColumnData::Number(_) => return false,
            ColumnData::Text(values) => values,
        };
        let present: Vec<&str> = values
            .iter()
            .filter_map(|v| v.as_deref())
            .take(self.sample)
            .collect();
        if present.is_empty() {
            return false;
        }
        let parsed = present
            .iter()
            .filter(|v| looks_like_timestamp(v) && parse_timestamp(v).is_some())
            .count();
        parsed as f64 / present.len() as f64 >= self.min_ratio
    }

    fn describe(&self) -> String {
        format!("content parses as timestamps (>= {:.0}%)", self.min_ratio * 100.0)
    }
}

/// Matches when every inner matcher matches
pub struct AllOf(pub Vec<Box<dyn ColumnMatcher>>);

impl ColumnMatcher for AllOf {
    fn matches(&self, column: &Column) -> bool {
        self.0.iter().all(|m| m.matches(column))
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|m| m.describe()).collect();
        parts.join(" and ")
    }
}

/// Ordered list of matchers locating one column
#[derive(Default)]
pub struct MatchStrategy {
    matchers: Vec<Box<dyn ColumnMatcher>>,
}

impl MatchStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-priority matcher
    pub fn then(mut self, matcher: impl ColumnMatcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    /// Name-based timestamp detection: the first column whose lower-cased
    /// name contains "time" or "date"
    pub fn timestamp_by_name() -> Self {
        Self::new().then(NameContains::any_ignore_case(["time", "date"]))
    }

    /// Stricter detection: a time/date-named column whose content also
    /// parses, falling back to any column whose content parses
    pub fn timestamp_by_content() -> Self {
        Self::new()
            .then(AllOf(vec![
                Box::new(NameContains::any_ignore_case(["time", "date"])),
                Box::new(ContentIsTemporal::default()),
            ]))
            .then(ContentIsTemporal::default())
    }

    /// Index of the column chosen by this strategy, if any
    pub fn find(&self, dataset: &Dataset) -> Option<usize> {
        self.matchers
            .iter()
            .find_map(|m| dataset.columns().iter().position(|c| m.matches(c)))
    }

    /// Name of the column chosen by this strategy, if any
    pub fn find_name(&self, dataset: &Dataset) -> Option<String> {
        self.find(dataset)
            .map(|i| dataset.columns()[i].name.clone())
    }

    pub fn describe(&self) -> String {
        let parts: Vec<String> = self.matchers.iter().map(|m| m.describe()).collect();
        parts.join(", then ")
    }
}
