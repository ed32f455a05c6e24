//! Clockspec parsing and the resolved since point.
//!
//! A clockspec names a point in logical time: a tick from a previously
//! returned clock (`c:<instance>:<tick>`), a named cursor (`n:<name>`),
//! or a Unix timestamp. Clockspecs cannot be fully evaluated at parse
//! time; named cursors and fresh-instance detection depend on the root's
//! state when the query executes.

use serde_json::Value;

use crate::error::{Result, ViewError};

/// A parsed, unresolved since point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockSpec {
    /// Unix seconds.
    Timestamp(i64),
    /// A clock previously rendered by this process.
    Clock { instance_id: u64, ticks: u32 },
    /// A named cursor kept by the root.
    NamedCursor(String),
}

impl ClockSpec {
    pub fn parse(value: &Value) -> Result<Self> {
        if let Some(secs) = value.as_i64() {
            return Ok(Self::Timestamp(secs));
        }
        match value.as_str() {
            Some(text) => Self::parse_str(text),
            None => Err(ViewError::parse(format!(
                "clockspec must be a string or integer, got {value}"
            ))),
        }
    }

    pub fn parse_str(text: &str) -> Result<Self> {
        if let Some(name) = text.strip_prefix("n:") {
            if name.is_empty() {
                return Err(ViewError::parse("named cursor must not be empty"));
            }
            return Ok(Self::NamedCursor(name.to_string()));
        }
        if let Some(rest) = text.strip_prefix("c:") {
            let mut parts = rest.splitn(2, ':');
            let instance = parts.next().unwrap_or("");
            let ticks = parts.next().ok_or_else(|| {
                ViewError::parse(format!("malformed clock string {text:?}"))
            })?;
            let instance_id = instance
                .parse::<u64>()
                .map_err(|_| ViewError::parse(format!("malformed clock string {text:?}")))?;
            let ticks = ticks
                .parse::<u32>()
                .map_err(|_| ViewError::parse(format!("malformed clock string {text:?}")))?;
            return Ok(Self::Clock { instance_id, ticks });
        }
        if let Ok(secs) = text.parse::<i64>() {
            return Ok(Self::Timestamp(secs));
        }
        Err(ViewError::parse(format!("unrecognized clockspec {text:?}")))
    }
}

/// Renders the clock returned to clients.
pub fn clock_string(instance_id: u64, ticks: u32) -> String {
    format!("c:{instance_id}:{ticks}")
}

/// A clockspec resolved against a live root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySince {
    pub mode: SinceMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinceMode {
    Ticks { ticks: u32, fresh_instance: bool },
    Timestamp(i64),
}

impl QuerySince {
    /// The whole dataset is the answer: the view cannot narrow the
    /// response to "changes since".
    pub fn fresh_instance() -> Self {
        Self {
            mode: SinceMode::Ticks {
                ticks: 0,
                fresh_instance: true,
            },
        }
    }

    pub fn at_ticks(ticks: u32) -> Self {
        Self {
            mode: SinceMode::Ticks {
                ticks,
                fresh_instance: false,
            },
        }
    }

    pub fn at_timestamp(timestamp: i64) -> Self {
        Self {
            mode: SinceMode::Timestamp(timestamp),
        }
    }

    pub fn is_fresh_instance(&self) -> bool {
        matches!(
            self.mode,
            SinceMode::Ticks {
                fresh_instance: true,
                ..
            }
        )
    }
}

impl Default for QuerySince {
    fn default() -> Self {
        Self::fresh_instance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_all_forms() {
        assert_eq!(
            ClockSpec::parse(&json!(1700000000)).unwrap(),
            ClockSpec::Timestamp(1700000000)
        );
        assert_eq!(
            ClockSpec::parse(&json!("c:42:7")).unwrap(),
            ClockSpec::Clock {
                instance_id: 42,
                ticks: 7
            }
        );
        assert_eq!(
            ClockSpec::parse(&json!("n:mycursor")).unwrap(),
            ClockSpec::NamedCursor("mycursor".to_string())
        );
        assert_eq!(
            ClockSpec::parse(&json!("1700000000")).unwrap(),
            ClockSpec::Timestamp(1700000000)
        );
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(ClockSpec::parse(&json!("c:oops")).is_err());
        assert!(ClockSpec::parse(&json!("c:1:many")).is_err());
        assert!(ClockSpec::parse(&json!("n:")).is_err());
        assert!(ClockSpec::parse(&json!("yesterday")).is_err());
        assert!(ClockSpec::parse(&json!(["c:1:2"])).is_err());
    }

    #[test]
    fn clock_round_trips_through_render() {
        let rendered = clock_string(9, 41);
        assert_eq!(
            ClockSpec::parse_str(&rendered).unwrap(),
            ClockSpec::Clock {
                instance_id: 9,
                ticks: 41
            }
        );
    }
}
