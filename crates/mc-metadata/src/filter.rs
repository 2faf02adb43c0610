//! Include/exclude rules applied to retrieved items.

use std::str::FromStr;

use crate::cache::FOLDER_PATH_FIELD;
use crate::error::{Error, ErrorKind};
use crate::item::{field_string, MetadataItem};

/// Relation field carrying an item's folder path.
pub const FOLDER_RELATION_FIELD: &str = "r__folder_Path";

/// One predicate over an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRule {
    /// Item lives in this folder or below it.
    FolderPrefix(String),
    /// Field equals the value.
    FieldEquals { field: String, value: String },
    /// Field starts with the value.
    FieldStartsWith { field: String, value: String },
}

impl FilterRule {
    pub fn matches(&self, item: &MetadataItem) -> bool {
        match self {
            FilterRule::FolderPrefix(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                field_string(item, FOLDER_RELATION_FIELD)
                    .or_else(|| field_string(item, FOLDER_PATH_FIELD))
                    .is_some_and(|path| {
                        path == prefix
                            || path
                                .strip_prefix(prefix)
                                .is_some_and(|rest| rest.starts_with('/'))
                    })
            }
            FilterRule::FieldEquals { field, value } => {
                field_string(item, field).is_some_and(|v| v == *value)
            }
            FilterRule::FieldStartsWith { field, value } => {
                field_string(item, field).is_some_and(|v| v.starts_with(value.as_str()))
            }
        }
    }
}

/// Parses `folder:<path>`, `<field>^=<value>` and `<field>=<value>`.
impl FromStr for FilterRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("folder:") {
            return Ok(FilterRule::FolderPrefix(path.to_string()));
        }
        if let Some((field, value)) = s.split_once("^=") {
            return Ok(FilterRule::FieldStartsWith {
                field: field.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
        if let Some((field, value)) = s.split_once('=') {
            return Ok(FilterRule::FieldEquals {
                field: field.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
        Err(Error::new(ErrorKind::Config(format!("invalid filter rule: {s}"))))
    }
}

/// Retrieve filter: an item is kept when it matches any include rule (or
/// there are none) and no exclude rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveFilter {
    pub include: Vec<FilterRule>,
    pub exclude: Vec<FilterRule>,
}

impl RetrieveFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, rule: FilterRule) -> Self {
        self.include.push(rule);
        self
    }

    pub fn exclude(mut self, rule: FilterRule) -> Self {
        self.exclude.push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn matches(&self, item: &MetadataItem) -> bool {
        (self.include.is_empty() || self.include.iter().any(|r| r.matches(item)))
            && !self.exclude.iter().any(|r| r.matches(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: serde_json::Value) -> MetadataItem {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_folder_prefix_respects_segments() {
        let rule: FilterRule = "folder:Query/Shared".parse().unwrap();
        assert!(rule.matches(&item(json!({"r__folder_Path": "Query/Shared"}))));
        assert!(rule.matches(&item(json!({"r__folder_Path": "Query/Shared/Sub"}))));
        assert!(!rule.matches(&item(json!({"r__folder_Path": "Query/SharedOther"}))));
        assert!(rule.matches(&item(json!({"Path": "Query/Shared/x"}))));
    }

    #[test]
    fn test_include_and_exclude() {
        let filter = RetrieveFilter::new()
            .include("key^=PRD_".parse().unwrap())
            .exclude("status=Inactive".parse().unwrap());

        assert!(filter.matches(&item(json!({"key": "PRD_a", "status": "Active"}))));
        assert!(!filter.matches(&item(json!({"key": "PRD_b", "status": "Inactive"}))));
        assert!(!filter.matches(&item(json!({"key": "DEV_c"}))));
        assert!(RetrieveFilter::new().matches(&item(json!({}))));
    }

    #[test]
    fn test_invalid_rule() {
        assert!("nonsense".parse::<FilterRule>().is_err());
    }
}
