//! Raw directory records.

use ldap3::SearchEntry;
use std::collections::BTreeMap;

const DN_KEY: &str = "dn";

/// Snapshot of a directory entry.
///
/// Attribute names are case-insensitive and every attribute is multi-valued, with values kept
/// in server order. The reserved `dn` attribute always holds the entry's distinguished name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Creates an entry with only its distinguished name set.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(DN_KEY.to_string(), vec![dn.into()]);
        Self { attributes }
    }

    /// Adds (or replaces) an attribute.
    #[must_use]
    pub fn with_attribute<I, S>(mut self, attribute: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_values(attribute, values.into_iter().map(Into::into).collect());
        self
    }

    /// Distinguished name of the entry.
    #[must_use]
    pub fn dn(&self) -> &str {
        self.last(DN_KEY).unwrap_or_default()
    }

    /// All values of an attribute; empty when the attribute is absent.
    #[must_use]
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .get(&attribute.to_ascii_lowercase())
            .map_or(&[][..], Vec::as_slice)
    }

    /// The last value of an attribute, which is what single-valued accessors report.
    #[must_use]
    pub fn last(&self, attribute: &str) -> Option<&str> {
        self.values(attribute).last().map(String::as_str)
    }

    /// Returns true if the attribute holds exactly `value`.
    #[must_use]
    pub fn has_value(&self, attribute: &str, value: &str) -> bool {
        self.values(attribute).iter().any(|v| v == value)
    }

    /// Replaces the local copy of an attribute. The reserved `dn` key cannot be changed.
    pub fn set_values(&mut self, attribute: &str, values: Vec<String>) {
        let key = attribute.to_ascii_lowercase();
        if key == DN_KEY {
            return;
        }
        self.attributes.insert(key, values);
    }

    /// Lower-cased names of the attributes present on the entry.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.attributes.keys().map(String::as_str)
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        entry
            .attrs
            .into_iter()
            .fold(Self::new(entry.dn), |mut acc, (attribute, values)| {
                acc.set_values(&attribute, values);
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn attribute_names_are_case_insensitive() {
        let entry = DirectoryEntry::new("cn=test1,ou=groups,dc=example,dc=com")
            .with_attribute("memberOf", ["cn=test2,ou=groups,dc=example,dc=com"]);
        assert_eq!(entry.values("memberof").len(), 1);
        assert_eq!(entry.values("MEMBEROF").len(), 1);
        assert!(entry.values("member").is_empty());
    }

    #[test]
    fn last_value_wins_for_single_valued_reads() {
        let entry = DirectoryEntry::new("cn=x,dc=example,dc=com")
            .with_attribute("description", ["first", "second"]);
        assert_eq!(entry.last("description"), Some("second"));
        assert_eq!(entry.last("mail"), None);
    }

    #[test]
    fn dn_is_reserved() {
        let mut entry = DirectoryEntry::new("cn=x,dc=example,dc=com");
        entry.set_values("DN", vec!["cn=y".to_string()]);
        assert_eq!(entry.dn(), "cn=x,dc=example,dc=com");
        assert_eq!(entry.values("dn"), ["cn=x,dc=example,dc=com".to_string()]);
    }

    #[test]
    fn converts_search_entries() {
        let mut attrs = HashMap::new();
        attrs.insert("sAMAccountName".to_string(), vec!["jdoe".to_string()]);
        let entry = DirectoryEntry::from(SearchEntry {
            dn: "cn=John Doe,ou=users,dc=example,dc=com".to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        });
        assert_eq!(entry.dn(), "cn=John Doe,ou=users,dc=example,dc=com");
        assert_eq!(entry.last("samaccountname"), Some("jdoe"));
        assert!(entry.has_value("samAccountName", "jdoe"));
    }
}
