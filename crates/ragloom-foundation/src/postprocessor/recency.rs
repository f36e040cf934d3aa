//! Recency weighting.
//!
//! Dates are read from one metadata key. Accepted forms: RFC 3339
//! timestamps, `YYYY-MM-DD` dates (midnight UTC) and unix seconds (number or
//! numeric string).

use super::{NodePostprocessor, sort_by_score};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::{Clock, SystemClock};
use ragloom_kernel::schema::{NodeWithScore, QueryBundle};
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_DATE_KEY: &str = "date";

/// How age affects a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecencyMode {
    /// Drop nodes older than this, and nodes with no usable date.
    MaxAge(Duration),
    /// Multiply the score by `1 - age / horizon`, floored at zero.
    LinearDecay { horizon: Duration },
    /// Multiply the score by `exp(-rate * age_in_days)`.
    ExponentialDecay { rate: f64 },
    /// Multiply the score by `factor` once the age exceeds `threshold`.
    Step { threshold: Duration, factor: f32 },
    /// Newest first; undated nodes last. Scores are untouched.
    SortByDate,
}

pub struct RecencyPostprocessor {
    date_key: String,
    mode: RecencyMode,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RecencyPostprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecencyPostprocessor")
            .field("date_key", &self.date_key)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl RecencyPostprocessor {
    pub fn new(mode: RecencyMode) -> Self {
        Self {
            date_key: DEFAULT_DATE_KEY.to_string(),
            mode,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_date_key(mut self, key: impl Into<String>) -> Self {
        self.date_key = key.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn validate(&self) -> KernelResult<()> {
        match self.mode {
            RecencyMode::LinearDecay { horizon } if horizon <= Duration::zero() => Err(
                KernelError::ConfigInvalid("linear decay horizon must be positive".into()),
            ),
            RecencyMode::ExponentialDecay { rate } if rate.is_nan() || rate < 0.0 => Err(
                KernelError::ConfigInvalid(format!("decay rate must be non-negative, got {rate}")),
            ),
            _ => Ok(()),
        }
    }

    fn date_of(&self, node: &NodeWithScore) -> Option<DateTime<Utc>> {
        node.node.metadata().get(&self.date_key).and_then(parse_date)
    }
}

/// Parse a metadata date value.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            }
            s.parse::<i64>().ok().and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

fn age_days(age: Duration) -> f64 {
    age.num_milliseconds() as f64 / 86_400_000.0
}

#[async_trait]
impl NodePostprocessor for RecencyPostprocessor {
    fn name(&self) -> &str {
        "recency"
    }

    async fn postprocess_nodes(
        &self,
        nodes: Vec<NodeWithScore>,
        _query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>> {
        self.validate()?;
        let now = self.clock.now();
        let mut nodes = nodes;
        // Dates in the future count as age zero.
        let ages: Vec<Option<Duration>> = nodes
            .iter()
            .map(|n| self.date_of(n).map(|d| (now - d).max(Duration::zero())))
            .collect();

        match self.mode {
            RecencyMode::MaxAge(max_age) => {
                let mut ages = ages.into_iter();
                nodes.retain(|_| ages.next().flatten().is_some_and(|a| a <= max_age));
            }
            RecencyMode::LinearDecay { horizon } => {
                for (node, age) in nodes.iter_mut().zip(ages) {
                    if let Some(a) = age {
                        let weight = (1.0 - age_days(a) / age_days(horizon)).max(0.0);
                        node.score *= weight as f32;
                    }
                }
                sort_by_score(&mut nodes);
            }
            RecencyMode::ExponentialDecay { rate } => {
                for (node, age) in nodes.iter_mut().zip(ages) {
                    if let Some(a) = age {
                        node.score *= (-rate * age_days(a)).exp() as f32;
                    }
                }
                sort_by_score(&mut nodes);
            }
            RecencyMode::Step { threshold, factor } => {
                for (node, age) in nodes.iter_mut().zip(ages) {
                    if age.is_some_and(|a| a > threshold) {
                        node.score *= factor;
                    }
                }
                sort_by_score(&mut nodes);
            }
            RecencyMode::SortByDate => {
                // Stable: equal dates keep their incoming order.
                nodes.sort_by(|a, b| match (self.date_of(a), self.date_of(b)) {
                    (Some(x), Some(y)) => y.cmp(&x),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                });
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocessor::test_support::ids;
    use ragloom_kernel::llm::FixedClock;
    use ragloom_kernel::schema::Node;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
    }

    fn dated(id: &str, date: Option<Value>, score: f32) -> NodeWithScore {
        let mut node = Node::text(id).with_id(id);
        if let Some(date) = date {
            node = node.with_metadata_entry(DEFAULT_DATE_KEY, date);
        }
        NodeWithScore::new(node, score)
    }

    /// new: 1 day old, mid: 5 days, old: 30 days, none: undated.
    fn sample() -> Vec<NodeWithScore> {
        vec![
            dated("old", Some(Value::from("2024-02-10")), 0.9),
            dated("none", None, 0.8),
            dated("mid", Some(Value::from("2024-03-06T00:00:00Z")), 0.7),
            dated("new", Some(Value::from(now().timestamp() - 86_400)), 0.6),
        ]
    }

    fn processor(mode: RecencyMode) -> RecencyPostprocessor {
        RecencyPostprocessor::new(mode).with_clock(Arc::new(FixedClock(now())))
    }

    #[test]
    fn parses_supported_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_date(&Value::from("2024-01-02")), Some(expected));
        assert_eq!(parse_date(&Value::from("2024-01-02T01:00:00+01:00")), Some(expected));
        assert_eq!(parse_date(&Value::from(expected.timestamp())), Some(expected));
        assert_eq!(parse_date(&Value::from(expected.timestamp().to_string())), Some(expected));
        assert_eq!(parse_date(&Value::from("last tuesday")), None);
        assert_eq!(parse_date(&Value::Bool(true)), None);
    }

    #[tokio::test]
    async fn max_age_drops_old_and_undated() {
        let out = processor(RecencyMode::MaxAge(Duration::days(7)))
            .postprocess_nodes(sample(), None)
            .await
            .unwrap();
        assert_eq!(ids(&out), vec!["mid", "new"]);
    }

    #[tokio::test]
    async fn linear_decay_reorders_by_weighted_score() {
        let out = processor(RecencyMode::LinearDecay { horizon: Duration::days(10) })
            .postprocess_nodes(sample(), None)
            .await
            .unwrap();
        // old -> 0, none stays 0.8, mid 0.35, new 0.54
        assert_eq!(ids(&out), vec!["none", "new", "mid", "old"]);
        assert_eq!(out[3].score, 0.0);
    }

    #[tokio::test]
    async fn exponential_decay_halves_at_ln2_days() {
        let rate = std::f64::consts::LN_2;
        let out = processor(RecencyMode::ExponentialDecay { rate })
            .postprocess_nodes(vec![dated("new", Some(Value::from(now().timestamp() - 86_400)), 0.6)], None)
            .await
            .unwrap();
        assert!((out[0].score - 0.3).abs() < 1e-5);
    }

    #[tokio::test]
    async fn step_penalises_past_threshold() {
        let out = processor(RecencyMode::Step { threshold: Duration::days(3), factor: 0.5 })
            .postprocess_nodes(sample(), None)
            .await
            .unwrap();
        // old 0.45, none 0.8, mid 0.35, new 0.6
        assert_eq!(ids(&out), vec!["none", "new", "old", "mid"]);
    }

    #[tokio::test]
    async fn sort_by_date_puts_undated_last() {
        let out = processor(RecencyMode::SortByDate)
            .postprocess_nodes(sample(), None)
            .await
            .unwrap();
        assert_eq!(ids(&out), vec!["new", "mid", "old", "none"]);
        assert_eq!(out[0].score, 0.6);
    }

    #[tokio::test]
    async fn invalid_horizon_is_rejected() {
        let err = processor(RecencyMode::LinearDecay { horizon: Duration::zero() })
            .postprocess_nodes(sample(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::ConfigInvalid(_)));
    }
}
