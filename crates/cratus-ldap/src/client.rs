//! Directory connection and search abstraction.

use crate::{entry::DirectoryEntry, Result};
use async_trait::async_trait;
use cratus_core::{ConnectionOptions, Error};
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use secrecy::ExposeSecret;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

impl SearchScope {
    /// Canonical logical name of the scope.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Base => "object",
            Self::OneLevel => "single",
            Self::Subtree => "subtree",
        }
    }
}

impl FromStr for SearchScope {
    type Err = Error;

    /// Maps a logical scope name (case-insensitive, with synonyms) to a scope.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "subtree" | "recursive" | "whole_subtree" => Ok(Self::Subtree),
            "single" | "single_level" => Ok(Self::OneLevel),
            "object" | "base_object" => Ok(Self::Base),
            _ => Err(Error::InvalidScope(s.to_string())),
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Logical parameters of a search.
///
/// `basedn` is required at search time; `attrs` defaults to every attribute and `scope` to
/// `subtree`. The scope is kept as a name and checked when the search runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    basedn: Option<String>,
    attrs: Vec<String>,
    scope: Option<String>,
}

impl SearchOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the search base.
    #[must_use]
    pub fn basedn(mut self, basedn: impl Into<String>) -> Self {
        self.basedn = Some(basedn.into());
        self
    }

    /// Sets the attributes to return.
    #[must_use]
    pub fn attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.attrs = attrs.into_iter().map(|attr| attr.to_string()).collect();
        self
    }

    /// Sets the scope by logical name (`subtree`, `single`, `object` and their synonyms).
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the scope from a typed value.
    #[must_use]
    pub fn with_scope(self, scope: SearchScope) -> Self {
        self.scope(scope.name())
    }

    /// The configured search base, if any.
    #[must_use]
    pub fn search_base(&self) -> Option<&str> {
        self.basedn.as_deref()
    }

    /// The attributes to return (empty means all).
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attrs
    }

    /// Resolves the scope name, defaulting to [`SearchScope::Subtree`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScope`] for an unrecognised name.
    pub fn resolved_scope(&self) -> Result<SearchScope> {
        self.scope
            .as_deref()
            .map_or(Ok(SearchScope::Subtree), SearchScope::from_str)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapSession: Send {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;
    /// `Ok(None)` means the server produced no usable result for the search.
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Option<Vec<DirectoryEntry>>>;
    async fn replace(&mut self, dn: &str, attribute: &str, values: &[String]) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn LdapSession>>;
}

/// A single directory connection, bound once and then reused for every operation.
///
/// The connection is owned by the caller. Operations take `&mut self`; sharing one connection
/// across tasks requires external synchronisation.
pub struct DirectoryConnection {
    options: Arc<ConnectionOptions>,
    connector: Box<dyn LdapConnector>,
    session: Option<Box<dyn LdapSession>>,
}

impl DirectoryConnection {
    /// Creates an unbound connection that uses the real LDAP transport.
    #[must_use]
    pub fn new(options: ConnectionOptions) -> Self {
        let options = Arc::new(options);
        let connector: Box<dyn LdapConnector> = Box::new(RealLdapConnector::new(options.clone()));
        Self {
            options,
            connector,
            session: None,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_connector(options: ConnectionOptions, connector: Box<dyn LdapConnector>) -> Self {
        Self {
            options: Arc::new(options),
            connector,
            session: None,
        }
    }

    /// The options this connection was configured with.
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Root distinguished name of the directory.
    #[must_use]
    pub fn base_dn(&self) -> &str {
        self.options.basedn()
    }

    /// Returns true once [`DirectoryConnection::connect`] has succeeded.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Opens the transport and performs the simple bind.
    ///
    /// Does nothing if the connection is already bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalServiceError`] if the transport or the bind is rejected and
    /// [`Error::Timeout`] if the bind does not complete in time.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("directory connection already bound");
            return Ok(());
        }

        let mut session = self.connector.connect().await?;
        with_timeout(
            self.options.operation_timeout(),
            "bind",
            session.simple_bind(
                self.options.username(),
                self.options.password().expose_secret(),
            ),
        )
        .await?;
        info!(
            "bound to {} as {}",
            self.options.url(),
            self.options.username()
        );
        self.session = Some(session);
        Ok(())
    }

    /// Runs a search and returns the matching entries in server order.
    ///
    /// # Errors
    ///
    /// * [`Error::ConfigError`] if `options` has no search base;
    /// * [`Error::InvalidScope`] if the scope name is not recognised;
    /// * [`Error::NotConnected`] if the connection has not been bound;
    /// * [`Error::SearchFailed`] if the directory returned no result for the search.
    pub async fn search(
        &mut self,
        filter: &str,
        options: &SearchOptions,
    ) -> Result<Vec<DirectoryEntry>> {
        let basedn = options
            .search_base()
            .ok_or_else(|| Error::ConfigError("missing option: basedn".to_string()))?;
        let scope = options.resolved_scope()?;
        let limit = self.options.operation_timeout();
        let session = self.session_mut()?;

        debug!(
            "search base={basedn} scope={scope} filter={filter} attrs={:?}",
            options.attributes()
        );
        let result = with_timeout(
            limit,
            "search",
            session.search(basedn, scope, filter, options.attributes()),
        )
        .await?;

        result.ok_or_else(|| {
            Error::SearchFailed(format!("no result for `{filter}` under `{basedn}`"))
        })
    }

    /// Replaces every value of `attribute` on the entry at `dn` with `values`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the connection has not been bound, or the transport
    /// error if the directory rejects the modification.
    pub async fn replace_attribute(
        &mut self,
        dn: &str,
        attribute: &str,
        values: &[String],
    ) -> Result<()> {
        let limit = self.options.operation_timeout();
        let session = self.session_mut()?;
        debug!("replace {attribute} on {dn} with {} value(s)", values.len());
        with_timeout(limit, "modify", session.replace(dn, attribute, values)).await
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn LdapSession>> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::NotConnected("call connect() before using the directory".to_string()))
    }
}

async fn with_timeout<F, T>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let result = match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("directory {operation} timed out"))),
    };
    result.map_err(|err| {
        if err.should_log() {
            error!("directory {operation} failed ({}): {err}", err.error_code());
        }
        err
    })
}

/// Real LDAP connector backed by `ldap3`.
pub(crate) struct RealLdapConnector {
    options: Arc<ConnectionOptions>,
}

impl RealLdapConnector {
    pub(crate) fn new(options: Arc<ConnectionOptions>) -> Self {
        Self { options }
    }
}

#[async_trait]
impl LdapConnector for RealLdapConnector {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.options.operation_timeout());
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.options.url())
            .await
            .map_err(map_ldap_error)?;
        ldap3::drive!(conn);
        Ok(Box::new(RealLdapSession { inner: ldap }))
    }
}

struct RealLdapSession {
    inner: ldap3::Ldap,
}

#[async_trait]
impl LdapSession for RealLdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.inner
            .simple_bind(dn, password)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Option<Vec<DirectoryEntry>>> {
        let ldap3::SearchResult(entries, result) = self
            .inner
            .search(base_dn, scope.into(), filter, attributes.to_vec())
            .await
            .map_err(map_ldap_error)?;

        if result.rc != 0 {
            debug!(
                "search under {base_dn} answered rc={} ({})",
                result.rc, result.text
            );
            return Ok(None);
        }

        Ok(Some(
            entries
                .into_iter()
                .filter(|entry| !entry.is_ref())
                .map(SearchEntry::construct)
                .map(DirectoryEntry::from)
                .collect(),
        ))
    }

    async fn replace(&mut self, dn: &str, attribute: &str, values: &[String]) -> Result<()> {
        let modification = Mod::Replace(
            attribute.to_string(),
            values.iter().cloned().collect::<HashSet<_>>(),
        );
        self.inner
            .modify(dn, vec![modification])
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }
}

fn map_ldap_error(err: ldap3::LdapError) -> Error {
    Error::ExternalServiceError {
        service: "ldap".to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_options;

    fn bound_connection(session: MockLdapSession) -> DirectoryConnection {
        let mut connector = MockLdapConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move || Ok(Box::new(session)));
        DirectoryConnection::with_connector(sample_options(), Box::new(connector))
    }

    fn session_with_bind() -> MockLdapSession {
        let mut session = MockLdapSession::new();
        session
            .expect_simple_bind()
            .withf(|dn, password| dn == "cn=admin,dc=example,dc=com" && password == "secret")
            .times(1)
            .returning(|_, _| Ok(()));
        session
    }

    fn user_entry() -> DirectoryEntry {
        DirectoryEntry::new("uid=foobar,ou=users,dc=example,dc=com")
            .with_attribute("uid", ["foobar"])
            .with_attribute("displayname", ["Foo Bar"])
            .with_attribute("department", ["IT"])
            .with_attribute("samaccountname", ["foobar"])
            .with_attribute("lockouttime", ["0"])
    }

    #[test]
    fn scope_names_and_synonyms() {
        for name in ["subtree", "recursive", "whole_subtree", "SUBTREE"] {
            assert_eq!(name.parse::<SearchScope>().unwrap(), SearchScope::Subtree);
        }
        for name in ["single", "single_level", "Single_Level"] {
            assert_eq!(name.parse::<SearchScope>().unwrap(), SearchScope::OneLevel);
        }
        for name in ["object", "base_object"] {
            assert_eq!(name.parse::<SearchScope>().unwrap(), SearchScope::Base);
        }
        assert_eq!(
            "foobar".parse::<SearchScope>().unwrap_err(),
            Error::InvalidScope("foobar".to_string())
        );
    }

    #[test]
    fn search_options_defaults() {
        let options = SearchOptions::new().basedn("dc=example,dc=com");
        assert!(options.attributes().is_empty());
        assert_eq!(options.resolved_scope().unwrap(), SearchScope::Subtree);
        assert_eq!(
            SearchOptions::new()
                .with_scope(SearchScope::OneLevel)
                .resolved_scope()
                .unwrap(),
            SearchScope::OneLevel
        );
    }

    #[tokio::test]
    async fn stalled_operation_times_out() {
        let err = with_timeout(
            Duration::from_millis(20),
            "search",
            std::future::pending::<Result<Vec<DirectoryEntry>>>(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, Error::Timeout("directory search timed out".to_string()));
        assert_eq!(err.error_code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn completed_operation_passes_through() {
        let value = with_timeout(Duration::from_secs(1), "bind", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = with_timeout(Duration::from_secs(1), "modify", async {
            Err::<(), _>(Error::ExternalServiceError {
                service: "ldap".to_string(),
                message: "unwillingToPerform".to_string(),
            })
        })
        .await
        .unwrap_err();
        assert!(err.should_log());
    }

    #[tokio::test]
    async fn is_not_connected_by_default() {
        let connection =
            DirectoryConnection::with_connector(sample_options(), Box::new(MockLdapConnector::new()));
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn connect_binds_once() {
        let mut connection = bound_connection(session_with_bind());
        connection.connect().await.unwrap();
        assert!(connection.is_connected());
        connection.connect().await.unwrap();
        assert!(connection.is_connected());
    }

    #[tokio::test]
    async fn rejected_bind_leaves_connection_unbound() {
        let mut session = MockLdapSession::new();
        session.expect_simple_bind().returning(|_, _| {
            Err(Error::ExternalServiceError {
                service: "ldap".to_string(),
                message: "invalidCredentials".to_string(),
            })
        });
        let mut connection = bound_connection(session);
        let err = connection.connect().await.unwrap_err();
        assert_eq!(err.error_code(), "EXTERNAL_SERVICE_ERROR");
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn search_forwards_parameters_unchanged() {
        let mut session = session_with_bind();
        session
            .expect_search()
            .withf(|base, scope, filter, attrs| {
                base == "ou=users,dc=example,dc=com"
                    && *scope == SearchScope::Subtree
                    && filter == "(uid=foo*)"
                    && attrs == ["uid", "displayname", "department", "samaccountname", "lockouttime"]
            })
            .times(1)
            .returning(|_, _, _, _| Ok(Some(vec![user_entry()])));

        let mut connection = bound_connection(session);
        connection.connect().await.unwrap();

        let options = SearchOptions::new()
            .basedn("ou=users,dc=example,dc=com")
            .attrs(["uid", "displayname", "department", "samaccountname", "lockouttime"]);
        let entries = connection.search("(uid=foo*)", &options).await.unwrap();
        assert_eq!(entries, vec![user_entry()]);
    }

    #[tokio::test]
    async fn search_normalises_scope_synonyms() {
        let mut session = session_with_bind();
        session
            .expect_search()
            .withf(|_, scope, _, attrs| *scope == SearchScope::Base && attrs.is_empty())
            .times(1)
            .returning(|_, _, _, _| Ok(Some(Vec::new())));

        let mut connection = bound_connection(session);
        connection.connect().await.unwrap();

        let options = SearchOptions::new()
            .basedn("cn=test1,ou=groups,dc=example,dc=com")
            .scope("BASE_OBJECT");
        let entries = connection.search("(objectClass=*)", &options).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn search_without_basedn_is_a_configuration_error() {
        let mut connection =
            DirectoryConnection::with_connector(sample_options(), Box::new(MockLdapConnector::new()));
        let options = SearchOptions::new().scope("foobar").attrs(["cn"]);
        let err = connection.search("(cn=*)", &options).await.unwrap_err();
        assert_eq!(err, Error::ConfigError("missing option: basedn".to_string()));
    }

    #[tokio::test]
    async fn search_with_unknown_scope_fails() {
        let mut connection = bound_connection(session_with_bind());
        connection.connect().await.unwrap();
        let options = SearchOptions::new()
            .basedn("dc=example,dc=com")
            .scope("foobar");
        let err = connection.search("(cn=*)", &options).await.unwrap_err();
        assert_eq!(err, Error::InvalidScope("foobar".to_string()));
    }

    #[tokio::test]
    async fn search_before_connect_fails() {
        let mut connection =
            DirectoryConnection::with_connector(sample_options(), Box::new(MockLdapConnector::new()));
        let options = SearchOptions::new().basedn("dc=example,dc=com");
        let err = connection.search("(cn=*)", &options).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }

    #[tokio::test]
    async fn missing_result_is_a_failed_search() {
        let mut session = session_with_bind();
        session
            .expect_search()
            .returning(|_, _, _, _| Ok(None));
        let mut connection = bound_connection(session);
        connection.connect().await.unwrap();

        let options = SearchOptions::new().basedn("ou=users,dc=example,dc=com");
        let err = connection.search("(uid=baz*)", &options).await.unwrap_err();
        assert!(matches!(err, Error::SearchFailed(_)));
    }

    #[tokio::test]
    async fn replace_attribute_forwards_full_value_list() {
        let mut session = session_with_bind();
        session
            .expect_replace()
            .withf(|dn, attribute, values| {
                dn == "cn=test2,ou=groups,dc=example,dc=com"
                    && attribute == "member"
                    && values == ["cn=a,dc=example,dc=com", "cn=b,dc=example,dc=com"]
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut connection = bound_connection(session);
        connection.connect().await.unwrap();

        connection
            .replace_attribute(
                "cn=test2,ou=groups,dc=example,dc=com",
                "member",
                &[
                    "cn=a,dc=example,dc=com".to_string(),
                    "cn=b,dc=example,dc=com".to_string(),
                ],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replace_attribute_requires_bind() {
        let mut connection =
            DirectoryConnection::with_connector(sample_options(), Box::new(MockLdapConnector::new()));
        let err = connection
            .replace_attribute("cn=x,dc=example,dc=com", "member", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }
}
