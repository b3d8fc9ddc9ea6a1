//! In-memory directory used by the entity and membership tests.

use crate::{
    client::{DirectoryConnection, LdapConnector, LdapSession, SearchScope},
    directory::Directory,
    entry::DirectoryEntry,
    Result,
};
use async_trait::async_trait;
use cratus_core::{ConnectionOptions, SchemaConfig};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) const BASE_DN: &str = "dc=example,dc=com";

pub(crate) fn sample_options() -> ConnectionOptions {
    ConnectionOptions::builder()
        .host("ldap.example.com")
        .port(389)
        .basedn(BASE_DN)
        .credentials("cn=admin,dc=example,dc=com", "secret")
        .build()
        .expect("sample options are complete")
}

/// A recorded `replace` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Write {
    pub dn: String,
    pub attribute: String,
    pub values: Vec<String>,
}

#[derive(Default)]
struct State {
    entries: Vec<DirectoryEntry>,
    writes: Vec<Write>,
    searches: usize,
}

/// Serves searches from a list of entries.
///
/// Understands `(attr=value)` and `(attr=*)` filters. A base-object search at a DN that holds
/// no entry answers with no result, the way a server reports `noSuchObject`.
#[derive(Clone, Default)]
pub(crate) struct FakeDirectory {
    state: Arc<Mutex<State>>,
}

impl FakeDirectory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_entry(self, entry: DirectoryEntry) -> Self {
        self.state().entries.push(entry);
        self
    }

    pub(crate) fn writes(&self) -> Vec<Write> {
        self.state().writes.clone()
    }

    pub(crate) fn search_count(&self) -> usize {
        self.state().searches
    }

    pub(crate) fn connection(&self) -> DirectoryConnection {
        DirectoryConnection::with_connector(sample_options(), Box::new(self.clone()))
    }

    /// A bound directory over this fake.
    pub(crate) async fn directory(&self, schema: SchemaConfig) -> Directory {
        let mut directory = Directory::new(self.connection(), schema);
        directory.connect().await.expect("fake bind succeeds");
        directory
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake directory lock poisoned")
    }
}

#[async_trait]
impl LdapConnector for FakeDirectory {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl LdapSession for FakeDirectory {
    async fn simple_bind(&mut self, _dn: &str, _password: &str) -> Result<()> {
        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Option<Vec<DirectoryEntry>>> {
        let mut state = self.state();
        state.searches += 1;

        if scope == SearchScope::Base
            && !state
                .entries
                .iter()
                .any(|entry| entry.dn().eq_ignore_ascii_case(base_dn))
        {
            return Ok(None);
        }

        let (attribute, value) = parse_filter(filter);
        Ok(Some(
            state
                .entries
                .iter()
                .filter(|entry| in_scope(entry.dn(), base_dn, scope))
                .filter(|entry| matches(entry, &attribute, &value))
                .map(|entry| project(entry, attributes))
                .collect(),
        ))
    }

    async fn replace(&mut self, dn: &str, attribute: &str, values: &[String]) -> Result<()> {
        let mut state = self.state();
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|entry| entry.dn().eq_ignore_ascii_case(dn))
        {
            entry.set_values(attribute, values.to_vec());
        }
        state.writes.push(Write {
            dn: dn.to_string(),
            attribute: attribute.to_string(),
            values: values.to_vec(),
        });
        Ok(())
    }
}

fn parse_filter(filter: &str) -> (String, String) {
    let inner = filter.trim_start_matches('(').trim_end_matches(')');
    let (attribute, value) = inner.split_once('=').unwrap_or((inner, "*"));
    (attribute.to_string(), value.to_string())
}

fn in_scope(dn: &str, base_dn: &str, scope: SearchScope) -> bool {
    let dn = dn.to_ascii_lowercase();
    let base_dn = base_dn.to_ascii_lowercase();
    match scope {
        SearchScope::Base => dn == base_dn,
        SearchScope::OneLevel => dn
            .strip_suffix(&format!(",{base_dn}"))
            .is_some_and(|rdn| !rdn.contains(',')),
        SearchScope::Subtree => dn == base_dn || dn.ends_with(&format!(",{base_dn}")),
    }
}

fn matches(entry: &DirectoryEntry, attribute: &str, value: &str) -> bool {
    let values = entry.values(attribute);
    if value == "*" {
        return !values.is_empty();
    }
    values.iter().any(|v| v.eq_ignore_ascii_case(value))
}

fn project(entry: &DirectoryEntry, attributes: &[String]) -> DirectoryEntry {
    if attributes.is_empty() {
        return entry.clone();
    }
    attributes
        .iter()
        .filter(|attribute| !entry.values(attribute).is_empty())
        .fold(DirectoryEntry::new(entry.dn()), |acc, attribute| {
            acc.with_attribute(attribute, entry.values(attribute).iter().cloned())
        })
}

pub(crate) fn group_dn(name: &str) -> String {
    format!("cn={name},ou=groups,{BASE_DN}")
}

pub(crate) fn user_dn(name: &str) -> String {
    format!("cn={name},ou=users,{BASE_DN}")
}

/// A group entry with the default schema's attributes.
pub(crate) fn group_entry(name: &str, members: &[String], parents: &[String]) -> DirectoryEntry {
    DirectoryEntry::new(group_dn(name))
        .with_attribute("objectClass", ["top", "group"])
        .with_attribute("cn", [name])
        .with_attribute("description", [format!("{name} group")])
        .with_attribute("member", members.iter().cloned())
        .with_attribute("memberOf", parents.iter().cloned())
}

/// A user entry with the default schema's attributes.
pub(crate) fn user_entry(username: &str, parents: &[String]) -> DirectoryEntry {
    DirectoryEntry::new(user_dn(username))
        .with_attribute("objectClass", ["top", "person", "user"])
        .with_attribute("samaccountname", [username])
        .with_attribute("department", ["IT"])
        .with_attribute("mail", [format!("{username}@example.com")])
        .with_attribute("displayName", [format!("User {username}")])
        .with_attribute("memberOf", parents.iter().cloned())
        .with_attribute("lockoutTime", ["0"])
        .with_attribute("userAccountControl", ["512"])
}
