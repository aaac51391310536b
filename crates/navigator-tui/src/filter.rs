//! Filter predicates over content nodes.

use crate::content::ContentNode;

/// Predicate selecting which nodes a screen shows.
///
/// The default matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    All,
    /// Case-insensitive substring of the label or any attribute value
    Text(String),
    /// Attribute `key` equal to `value`, ignoring case
    Attribute { key: String, value: String },
}

impl Filter {
    /// Parse operator input: empty is match-all, `key=value` compares one
    /// attribute, anything else is a text search.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return Self::All;
        }
        match input.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() && !key.contains(' ') => Self::Attribute {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            },
            _ => Self::Text(input.to_string()),
        }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn matches(&self, node: &ContentNode) -> bool {
        match self {
            Self::All => true,
            Self::Text(needle) => {
                let needle = needle.to_lowercase();
                node.label.to_lowercase().contains(&needle)
                    || node
                        .attributes
                        .values()
                        .any(|value| value.to_lowercase().contains(&needle))
            }
            Self::Attribute { key, value } => node
                .attributes
                .get(key)
                .is_some_and(|actual| actual.eq_ignore_ascii_case(value)),
        }
    }

    /// Match a key/value pair, used by detail screens.
    pub fn matches_pair(&self, key: &str, value: &str) -> bool {
        match self {
            Self::All => true,
            Self::Text(needle) => {
                let needle = needle.to_lowercase();
                key.to_lowercase().contains(&needle) || value.to_lowercase().contains(&needle)
            }
            Self::Attribute { key: wanted, value: expected } => {
                key == wanted && value.eq_ignore_ascii_case(expected)
            }
        }
    }

    /// Short text shown in the status line.
    pub fn describe(&self) -> String {
        match self {
            Self::All => String::new(),
            Self::Text(needle) => format!("/{needle}"),
            Self::Attribute { key, value } => format!("{key}={value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::NodeKind;
    use std::collections::BTreeMap;

    fn node(label: &str, attrs: &[(&str, &str)]) -> ContentNode {
        ContentNode {
            id: "n".into(),
            kind: NodeKind::Task,
            label: label.into(),
            seq: 1,
            parent: None,
            children: Vec::new(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(Filter::parse("  "), Filter::All);
        assert_eq!(Filter::parse("ping"), Filter::Text("ping".into()));
        assert_eq!(
            Filter::parse("outcome=failed"),
            Filter::Attribute {
                key: "outcome".into(),
                value: "failed".into()
            }
        );
        assert_eq!(Filter::parse("a b=c"), Filter::Text("a b=c".into()));
    }

    #[test]
    fn test_text_matches_label_and_attributes() {
        let n = node("Install packages", &[("action", "ansible.builtin.dnf")]);
        assert!(Filter::Text("INSTALL".into()).matches(&n));
        assert!(Filter::Text("dnf".into()).matches(&n));
        assert!(!Filter::Text("apt".into()).matches(&n));
        assert!(Filter::All.matches(&n));
    }

    #[test]
    fn test_attribute_match() {
        let n = node("web1", &[("outcome", "failed")]);
        assert!(Filter::parse("outcome=FAILED").matches(&n));
        assert!(!Filter::parse("outcome=ok").matches(&n));
        assert!(!Filter::parse("host=web1").matches(&n));
    }

    #[test]
    fn test_describe() {
        assert_eq!(Filter::All.describe(), "");
        assert_eq!(Filter::parse("ping").describe(), "/ping");
        assert_eq!(Filter::parse("outcome=ok").describe(), "outcome=ok");
    }
}
