//! Distinguished name parsing for values read out of membership attributes.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component was not of the form `attribute=value`.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// The distinguished name ended with an escape character.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
    /// Hex-pair escapes in a value did not decode to UTF-8.
    #[error("invalid escaped value: {0}")]
    InvalidEscape(String),
}

/// A single `attribute=value` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Attribute portion (e.g. `CN`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped value portion.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Case-insensitive attribute comparison.
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

/// Parsed distinguished name.
///
/// Keeps the original text alongside the components; each outer element is one RDN, which
/// may hold several `+`-joined pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<Vec<RelativeDistinguishedName>>,
}

impl DistinguishedName {
    /// Parses a distinguished name.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] for empty input or malformed components.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, DistinguishedNameError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let rdns = split_unescaped(raw, ',')?
            .into_iter()
            .map(|rdn| {
                split_unescaped(rdn, '+')?
                    .into_iter()
                    .map(parse_pair)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            rdns,
        })
    }

    /// The distinguished name as it was read.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The RDNs in order, most specific first.
    #[must_use]
    pub fn rdns(&self) -> &[Vec<RelativeDistinguishedName>] {
        &self.rdns
    }

    /// Value of the leading RDN when its attribute is `attribute`.
    ///
    /// For `CN=admins,OU=Groups,DC=example,DC=com` and `cn` this is `admins`; the name of an
    /// entry is only ever taken from its own RDN, never from an ancestor.
    #[must_use]
    pub fn leading_value(&self, attribute: &str) -> Option<&str> {
        self.rdns
            .first()?
            .iter()
            .find(|rdn| rdn.matches_attribute(attribute))
            .map(RelativeDistinguishedName::value)
    }

    /// Returns true if any RDN matches the attribute/value pair (case-insensitive).
    #[must_use]
    pub fn contains(&self, attribute: &str, value: &str) -> bool {
        self.rdns
            .iter()
            .flatten()
            .any(|rdn| rdn.matches_attribute(attribute) && rdn.value.eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Splits on `delimiter` wherever it is not preceded by a backslash.
fn split_unescaped(input: &str, delimiter: char) -> Result<Vec<&str>, DistinguishedNameError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        match (escaped, ch) {
            (true, _) => escaped = false,
            (false, '\\') => escaped = true,
            (false, c) if c == delimiter => {
                parts.push(input[start..idx].trim());
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    if escaped {
        return Err(DistinguishedNameError::UnterminatedEscape);
    }
    parts.push(input[start..].trim());

    if parts.iter().any(|part| part.is_empty()) {
        return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn parse_pair(component: &str) -> Result<RelativeDistinguishedName, DistinguishedNameError> {
    let (attribute, value) = component
        .split_once('=')
        .map(|(attribute, value)| (attribute.trim(), value.trim()))
        .filter(|(attribute, value)| !attribute.is_empty() && !value.is_empty())
        .ok_or_else(|| DistinguishedNameError::InvalidComponent(component.to_string()))?;

    Ok(RelativeDistinguishedName {
        attribute: attribute.to_string(),
        value: unescape(value)?,
    })
}

/// Decodes `\<char>` and `\<hex><hex>` escapes; hex pairs are UTF-8 bytes.
fn unescape(value: &str) -> Result<String, DistinguishedNameError> {
    let mut decoded = Vec::with_capacity(value.len());
    let mut rest = value;
    while let Some(idx) = rest.find('\\') {
        decoded.extend_from_slice(rest[..idx].as_bytes());
        let escaped = &rest[idx + 1..];
        if let Some(byte) = escaped.get(..2).and_then(hex_pair) {
            decoded.push(byte);
            rest = &escaped[2..];
        } else {
            let ch = escaped
                .chars()
                .next()
                .ok_or(DistinguishedNameError::UnterminatedEscape)?;
            decoded.extend_from_slice(ch.encode_utf8(&mut [0; 4]).as_bytes());
            rest = &escaped[ch.len_utf8()..];
        }
    }
    decoded.extend_from_slice(rest.as_bytes());

    String::from_utf8(decoded).map_err(|_| DistinguishedNameError::InvalidEscape(value.to_string()))
}

fn hex_pair(pair: &str) -> Option<u8> {
    if pair.bytes().all(|b| b.is_ascii_hexdigit()) {
        u8::from_str_radix(pair, 16).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_value_reads_own_rdn_only() {
        let dn = DistinguishedName::parse("CN=test2,OU=Groups,DC=example,DC=com").unwrap();
        assert_eq!(dn.leading_value("cn"), Some("test2"));
        assert_eq!(dn.leading_value("ou"), None);
        assert_eq!(dn.to_string(), "CN=test2,OU=Groups,DC=example,DC=com");
    }

    #[test]
    fn escaped_commas_stay_in_value() {
        let dn = DistinguishedName::parse("cn=Smith\\, John,ou=People,dc=example,dc=com").unwrap();
        assert_eq!(dn.leading_value("CN"), Some("Smith, John"));
        assert_eq!(dn.rdns().len(), 4);
    }

    #[test]
    fn hex_pair_escapes_are_decoded() {
        let dn = DistinguishedName::parse("CN=Smith\\2C John,OU=Groups,DC=example,DC=com").unwrap();
        assert_eq!(dn.leading_value("cn"), Some("Smith, John"));
        assert_eq!(dn.rdns().len(), 4);

        let dn = DistinguishedName::parse("cn=Caf\\C3\\A9 Team,ou=Groups,dc=example,dc=com").unwrap();
        assert_eq!(dn.leading_value("cn"), Some("Caf\u{e9} Team"));

        let dn = DistinguishedName::parse("cn=a\\\\b\\+c,dc=example,dc=com").unwrap();
        assert_eq!(dn.leading_value("cn"), Some("a\\b+c"));
    }

    #[test]
    fn undecodable_hex_pairs_are_rejected() {
        assert!(matches!(
            DistinguishedName::parse("cn=bad\\FF,dc=example,dc=com").unwrap_err(),
            DistinguishedNameError::InvalidEscape(_)
        ));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let dn = DistinguishedName::parse(
            "CN=fakedistro,OU=Distribution Groups,DC=example,DC=com",
        )
        .unwrap();
        assert!(dn.contains("ou", "distribution groups"));
        assert!(!dn.contains("ou", "Groups"));
    }

    #[test]
    fn multi_valued_rdn() {
        let dn = DistinguishedName::parse("cn=John+uid=1234,ou=People,dc=example,dc=com").unwrap();
        assert_eq!(dn.leading_value("uid"), Some("1234"));
        assert!(dn.contains("cn", "john"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(
            DistinguishedName::parse("  ").unwrap_err(),
            DistinguishedNameError::Empty
        );
        assert!(matches!(
            DistinguishedName::parse("cn=John,").unwrap_err(),
            DistinguishedNameError::InvalidComponent(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("not a dn").unwrap_err(),
            DistinguishedNameError::InvalidComponent(_)
        ));
        assert_eq!(
            DistinguishedName::parse("cn=John\\").unwrap_err(),
            DistinguishedNameError::UnterminatedEscape
        );
    }
}
