//! User-declared placement filters.
//!
//! A filter is a predicate over one offer: its hostname, one of its agent
//! attributes, or one of its advertised resource scalars. A task's filter
//! set is AND-composed. Unknown operators and types are rejected when the
//! filter is registered, not at match time, so a bad deploy fails fast
//! instead of never matching.

use bosun_events::Offer;
use serde::{Deserialize, Serialize};

use super::ResourceManagerError;

/// What part of the offer the predicate examines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// The agent's hostname.
    Hostname,
    /// A named agent attribute.
    Attribute,
    /// A named scalar resource.
    Resource,
}

/// Comparison applied to the examined value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Neq,
    /// Substring match.
    Like,
    /// Negated substring match.
    Unlike,
    In,
    NotIn,
}

/// A validated placement predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub kind: FilterKind,
    pub operator: FilterOperator,

    /// Subject name for `Attribute` and `Resource` filters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Operand values. Single-operand comparisons use the first entry.
    pub values: Vec<String>,
}

/// The unvalidated wire form a deploy request carries.
///
/// Operator and type arrive as free text; [`Filter::from_spec`] is where
/// unknown values are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Filter {
    /// Validate a wire-form filter into a predicate.
    pub fn from_spec(spec: &FilterSpec) -> Result<Self, ResourceManagerError> {
        let kind = match spec.kind.to_uppercase().as_str() {
            "HOSTNAME" => FilterKind::Hostname,
            "ATTRIBUTE" => FilterKind::Attribute,
            "RESOURCE" => FilterKind::Resource,
            other => {
                return Err(ResourceManagerError::InvalidFilter(format!(
                    "unknown filter type '{other}'"
                )))
            }
        };

        let operator = match spec.operator.to_uppercase().as_str() {
            "EQ" => FilterOperator::Eq,
            "NEQ" => FilterOperator::Neq,
            "LIKE" => FilterOperator::Like,
            "UNLIKE" => FilterOperator::Unlike,
            "IN" => FilterOperator::In,
            "NOTIN" => FilterOperator::NotIn,
            other => {
                return Err(ResourceManagerError::InvalidFilter(format!(
                    "unknown filter operator '{other}'"
                )))
            }
        };

        let filter = Self {
            kind,
            operator,
            subject: spec.subject.clone(),
            values: spec.values.clone(),
        };
        filter.validate()?;
        Ok(filter)
    }

    fn validate(&self) -> Result<(), ResourceManagerError> {
        if self.values.is_empty() {
            return Err(ResourceManagerError::InvalidFilter(
                "filter requires at least one value".to_string(),
            ));
        }

        match self.kind {
            FilterKind::Hostname => {}
            FilterKind::Attribute | FilterKind::Resource => {
                if self.subject.as_deref().unwrap_or("").is_empty() {
                    return Err(ResourceManagerError::InvalidFilter(format!(
                        "{:?} filter requires a subject name",
                        self.kind
                    )));
                }
            }
        }

        if self.kind == FilterKind::Resource {
            match self.operator {
                FilterOperator::Like | FilterOperator::Unlike => {
                    return Err(ResourceManagerError::InvalidFilter(
                        "resource filters do not support LIKE/UNLIKE".to_string(),
                    ));
                }
                _ => {
                    for value in &self.values {
                        if value.parse::<f64>().is_err() {
                            return Err(ResourceManagerError::InvalidFilter(format!(
                                "resource filter value '{value}' is not numeric"
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// True when the offer satisfies this predicate.
    #[must_use]
    pub fn matches(&self, offer: &Offer) -> bool {
        match self.kind {
            FilterKind::Hostname => self.matches_text(Some(offer.hostname.as_str())),
            FilterKind::Attribute => {
                let subject = self.subject.as_deref().unwrap_or("");
                self.matches_text(offer.attributes.get(subject).map(String::as_str))
            }
            FilterKind::Resource => {
                let subject = self.subject.as_deref().unwrap_or("");
                let advertised = offer
                    .resources
                    .iter()
                    .filter(|r| r.name == subject)
                    .filter_map(|r| r.as_scalar())
                    .sum::<f64>();
                self.matches_scalar(advertised)
            }
        }
    }

    fn matches_text(&self, actual: Option<&str>) -> bool {
        // A missing attribute satisfies only the negated operators.
        let Some(actual) = actual else {
            return matches!(
                self.operator,
                FilterOperator::Neq | FilterOperator::Unlike | FilterOperator::NotIn
            );
        };

        let first = self.values.first().map(String::as_str).unwrap_or("");
        match self.operator {
            FilterOperator::Eq => actual == first,
            FilterOperator::Neq => actual != first,
            FilterOperator::Like => actual.contains(first),
            FilterOperator::Unlike => !actual.contains(first),
            FilterOperator::In => self.values.iter().any(|v| v == actual),
            FilterOperator::NotIn => !self.values.iter().any(|v| v == actual),
        }
    }

    fn matches_scalar(&self, actual: f64) -> bool {
        let parsed: Vec<f64> = self
            .values
            .iter()
            .filter_map(|v| v.parse::<f64>().ok())
            .collect();
        let first = parsed.first().copied().unwrap_or(0.0);
        let close = |a: f64, b: f64| (a - b).abs() < bosun_events::EPSILON;

        match self.operator {
            FilterOperator::Eq => close(actual, first),
            FilterOperator::Neq => !close(actual, first),
            FilterOperator::In => parsed.iter().any(|v| close(actual, *v)),
            FilterOperator::NotIn => !parsed.iter().any(|v| close(actual, *v)),
            // Rejected at validation time.
            FilterOperator::Like | FilterOperator::Unlike => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_events::Resource;
    use std::collections::BTreeMap;

    fn offer(hostname: &str, attributes: &[(&str, &str)]) -> Offer {
        Offer {
            id: "offer-1".parse().unwrap(),
            agent_id: "agent-1".parse().unwrap(),
            hostname: hostname.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            resources: vec![Resource::scalar("cpus", 4.0)],
        }
    }

    fn spec(kind: &str, operator: &str, subject: Option<&str>, values: &[&str]) -> FilterSpec {
        FilterSpec {
            kind: kind.to_string(),
            operator: operator.to_string(),
            subject: subject.map(str::to_string),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let result = Filter::from_spec(&spec("HOSTNAME", "MATCHES", None, &["host-a"]));
        assert!(matches!(
            result,
            Err(ResourceManagerError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = Filter::from_spec(&spec("RACK", "EQ", None, &["rack-1"]));
        assert!(matches!(
            result,
            Err(ResourceManagerError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_attribute_filter_requires_subject() {
        let result = Filter::from_spec(&spec("ATTRIBUTE", "EQ", None, &["ssd"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_hostname_eq() {
        let filter = Filter::from_spec(&spec("HOSTNAME", "EQ", None, &["host-a"])).unwrap();
        assert!(filter.matches(&offer("host-a", &[])));
        assert!(!filter.matches(&offer("host-b", &[])));
    }

    #[test]
    fn test_hostname_like_is_substring() {
        let filter = Filter::from_spec(&spec("HOSTNAME", "LIKE", None, &["rack1"])).unwrap();
        assert!(filter.matches(&offer("node-rack1-03", &[])));
        assert!(!filter.matches(&offer("node-rack2-03", &[])));
    }

    #[test]
    fn test_hostname_in() {
        let filter =
            Filter::from_spec(&spec("HOSTNAME", "IN", None, &["host-a", "host-b"])).unwrap();
        assert!(filter.matches(&offer("host-b", &[])));
        assert!(!filter.matches(&offer("host-c", &[])));
    }

    #[test]
    fn test_attribute_eq_and_missing() {
        let filter =
            Filter::from_spec(&spec("ATTRIBUTE", "EQ", Some("disk_type"), &["ssd"])).unwrap();
        assert!(filter.matches(&offer("h", &[("disk_type", "ssd")])));
        assert!(!filter.matches(&offer("h", &[("disk_type", "hdd")])));
        // Agent without the attribute cannot satisfy a positive match.
        assert!(!filter.matches(&offer("h", &[])));
    }

    #[test]
    fn test_attribute_neq_missing_matches() {
        let filter =
            Filter::from_spec(&spec("ATTRIBUTE", "NEQ", Some("disk_type"), &["ssd"])).unwrap();
        assert!(filter.matches(&offer("h", &[])));
        assert!(filter.matches(&offer("h", &[("disk_type", "hdd")])));
    }

    #[test]
    fn test_resource_filter_numeric() {
        let filter = Filter::from_spec(&spec("RESOURCE", "EQ", Some("cpus"), &["4"])).unwrap();
        assert!(filter.matches(&offer("h", &[])));

        let filter = Filter::from_spec(&spec("RESOURCE", "NEQ", Some("cpus"), &["2"])).unwrap();
        assert!(filter.matches(&offer("h", &[])));
    }

    #[test]
    fn test_resource_filter_rejects_like() {
        let result = Filter::from_spec(&spec("RESOURCE", "LIKE", Some("cpus"), &["4"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_resource_filter_rejects_non_numeric() {
        let result = Filter::from_spec(&spec("RESOURCE", "EQ", Some("cpus"), &["many"]));
        assert!(result.is_err());
    }
}
