//! Configuration structures for Cratus.
//!
//! Settings are layered: built-in defaults, then the optional `~/.cratus.yml` file, then
//! `CRATUS_*` environment variables. The result is split into [`ConnectionOptions`] (how to
//! reach and bind to the directory) and [`SchemaConfig`] (which physical attribute names play
//! which logical role).

use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use validator::Validate;

/// File name of the per-user configuration file, resolved against the home directory.
pub const CONFIG_FILE_NAME: &str = ".cratus.yml";

/// Prefix of environment variables that override settings.
pub const ENV_PREFIX: &str = "CRATUS_";

/// Default operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Setting keys that can be overridden from the environment.
pub const SETTING_KEYS: &[&str] = &[
    "host",
    "port",
    "basedn",
    "username",
    "password",
    "operation_timeout_secs",
    "group_dn_attribute",
    "group_member_attribute",
    "group_description_attribute",
    "group_memberof_attribute",
    "group_objectclass",
    "group_basedn",
    "user_dn_attribute",
    "user_objectclass",
    "user_basedn",
    "user_department_attribute",
    "user_mail_attribute",
    "user_displayname_attribute",
    "user_memberof_attribute",
    "user_lockout_attribute",
    "user_account_control_attribute",
    "include_distribution_groups",
    "distribution_groups_ou",
];

/// Mapping from logical attribute roles to the physical names used by a directory.
///
/// Every key has a default, so a partially specified configuration is always complete.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Attribute holding a group's short name (`cn`)
    pub group_dn_attribute: String,
    /// Attribute listing a group's member DNs
    pub group_member_attribute: String,
    /// Attribute holding a group's description
    pub group_description_attribute: String,
    /// Attribute listing the DNs of a group's parent groups
    pub group_memberof_attribute: String,
    /// Object class of group entries
    pub group_objectclass: String,
    /// Search base for groups
    pub group_basedn: String,
    /// Attribute holding a user's login name (`samaccountname`)
    pub user_dn_attribute: String,
    /// Object class of user entries
    pub user_objectclass: String,
    /// Search base for users
    pub user_basedn: String,
    /// Attribute holding a user's department
    pub user_department_attribute: String,
    /// Attribute holding a user's email address
    pub user_mail_attribute: String,
    /// Attribute holding a user's display name
    pub user_displayname_attribute: String,
    /// Attribute listing the DNs of the groups a user belongs to
    pub user_memberof_attribute: String,
    /// Attribute holding the lockout timestamp (100ns ticks since 1601)
    pub user_lockout_attribute: String,
    /// Attribute holding the account-control code
    pub user_account_control_attribute: String,
    /// Whether distribution groups take part in parent-group resolution
    pub include_distribution_groups: bool,
    /// Organizational unit that marks a group as a distribution group
    pub distribution_groups_ou: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            group_dn_attribute: "cn".to_string(),
            group_member_attribute: "member".to_string(),
            group_description_attribute: "description".to_string(),
            group_memberof_attribute: "memberOf".to_string(),
            group_objectclass: "group".to_string(),
            group_basedn: "ou=groups,dc=example,dc=com".to_string(),
            user_dn_attribute: "samaccountname".to_string(),
            user_objectclass: "user".to_string(),
            user_basedn: "ou=users,dc=example,dc=com".to_string(),
            user_department_attribute: "department".to_string(),
            user_mail_attribute: "mail".to_string(),
            user_displayname_attribute: "displayName".to_string(),
            user_memberof_attribute: "memberOf".to_string(),
            user_lockout_attribute: "lockoutTime".to_string(),
            user_account_control_attribute: "userAccountControl".to_string(),
            include_distribution_groups: false,
            distribution_groups_ou: "Distribution Groups".to_string(),
        }
    }
}

impl SchemaConfig {
    /// Attributes requested when loading a group.
    #[must_use]
    pub fn group_attributes(&self) -> Vec<String> {
        vec![
            self.group_dn_attribute.clone(),
            self.group_member_attribute.clone(),
            self.group_description_attribute.clone(),
            self.group_memberof_attribute.clone(),
        ]
    }

    /// Attributes requested when loading a user.
    #[must_use]
    pub fn user_attributes(&self) -> Vec<String> {
        vec![
            self.user_dn_attribute.clone(),
            self.user_department_attribute.clone(),
            self.user_mail_attribute.clone(),
            self.user_displayname_attribute.clone(),
            self.user_memberof_attribute.clone(),
            self.user_lockout_attribute.clone(),
            self.user_account_control_attribute.clone(),
        ]
    }
}

/// Validated options for connecting and binding to the directory.
#[derive(Clone)]
pub struct ConnectionOptions {
    host: String,
    port: u16,
    basedn: String,
    username: String,
    password: SecretString,
    operation_timeout_secs: u64,
}

impl ConnectionOptions {
    /// Starts a builder with no options set.
    #[must_use]
    pub fn builder() -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::default()
    }

    /// Directory host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Directory port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Root distinguished name of the directory.
    #[must_use]
    pub fn basedn(&self) -> &str {
        &self.basedn
    }

    /// Bind DN or login used for the simple bind.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password used for the simple bind.
    #[must_use]
    pub const fn password(&self) -> &SecretString {
        &self.password
    }

    /// Per-operation timeout.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// The `ldap://host:port` URL handed to the protocol client.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ldap://{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("basedn", &self.basedn)
            .field("username", &self.username)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ConnectionOptions`].
///
/// Every option except the timeout is required; [`ConnectionOptionsBuilder::build`] names the
/// first missing one.
#[derive(Default)]
pub struct ConnectionOptionsBuilder {
    host: Option<String>,
    port: Option<u16>,
    basedn: Option<String>,
    username: Option<String>,
    password: Option<SecretString>,
    operation_timeout_secs: Option<u64>,
}

impl ConnectionOptionsBuilder {
    /// Sets the directory host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the directory port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the root distinguished name.
    #[must_use]
    pub fn basedn(mut self, basedn: impl Into<String>) -> Self {
        self.basedn = Some(basedn.into());
        self
    }

    /// Sets the simple-bind credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Overrides the per-operation timeout in seconds.
    #[must_use]
    pub const fn operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = Some(seconds);
        self
    }

    /// Validates the collected options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] when a required option is missing and
    /// [`Error::InvalidEndpoint`] when host and port do not form a valid URL.
    pub fn build(self) -> Result<ConnectionOptions> {
        let options = ConnectionOptions {
            host: required(self.host, "host")?,
            port: required(self.port, "port")?,
            basedn: required(self.basedn, "basedn")?,
            username: required(self.username, "username")?,
            password: required(self.password, "password")?,
            operation_timeout_secs: self
                .operation_timeout_secs
                .unwrap_or(DEFAULT_OPERATION_TIMEOUT_SECS),
        };
        Url::parse(&options.url())?;
        Ok(options)
    }
}

fn required<T>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| Error::ConfigError(format!("missing option: {key}")))
}

/// Flat, layered settings as found in `~/.cratus.yml` or the environment.
#[derive(Clone, Deserialize, Validate)]
#[serde(default)]
pub struct Settings {
    /// Directory host
    #[validate(length(min = 1))]
    pub host: String,

    /// Directory port
    #[validate(range(min = 1))]
    pub port: u16,

    /// Root distinguished name
    #[validate(length(min = 1))]
    pub basedn: String,

    /// Bind login
    pub username: Option<String>,

    /// Bind password
    pub password: Option<String>,

    /// Per-operation timeout in seconds
    #[validate(range(min = 1, max = 300))]
    pub operation_timeout_secs: u64,

    /// Attribute mapping
    #[serde(flatten)]
    pub schema: SchemaConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "ldap.example.com".to_string(),
            port: 389,
            basedn: "dc=example,dc=com".to_string(),
            username: None,
            password: None,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            schema: SchemaConfig::default(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("basedn", &self.basedn)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("schema", &self.schema)
            .finish()
    }
}

impl Settings {
    /// Loads settings from defaults, `~/.cratus.yml` and `CRATUS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] when an environment override cannot be parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::layered(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Location of the per-user configuration file, if a home directory is known.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }

    /// Applies the file at `path` (if readable) and then the variables produced by `lookup`.
    ///
    /// An unreadable or malformed file is reported and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] when an environment override cannot be parsed.
    pub fn layered<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match path {
            Some(path) if path.is_file() => Self::from_file(path).unwrap_or_else(|err| {
                warn!("Unable to read from {}: {err}", path.display());
                Self::default()
            }),
            _ => Self::default(),
        };
        settings.apply_env(lookup)?;
        Ok(settings)
    }

    /// Reads settings from a YAML file; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("loading settings from {}", path.display());
        let raw = std::fs::read_to_string(path).map_err(|err| {
            Error::ConfigError(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parses settings from YAML text; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the text is not a valid settings document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Applies `CRATUS_<KEY>` overrides obtained through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] when a value cannot be parsed for its key.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in SETTING_KEYS {
            let variable = format!("{ENV_PREFIX}{}", key.to_uppercase());
            if let Some(value) = lookup(&variable) {
                debug!("applying override from {variable}");
                self.set(key, value)?;
            }
        }
        Ok(())
    }

    /// Sets a single setting by key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] for unknown keys or unparsable values.
    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        let schema = &mut self.schema;
        match key {
            "host" => self.host = value,
            "port" => self.port = parse_setting(key, &value)?,
            "basedn" => self.basedn = value,
            "username" => self.username = Some(value),
            "password" => self.password = Some(value),
            "operation_timeout_secs" => self.operation_timeout_secs = parse_setting(key, &value)?,
            "group_dn_attribute" => schema.group_dn_attribute = value,
            "group_member_attribute" => schema.group_member_attribute = value,
            "group_description_attribute" => schema.group_description_attribute = value,
            "group_memberof_attribute" => schema.group_memberof_attribute = value,
            "group_objectclass" => schema.group_objectclass = value,
            "group_basedn" => schema.group_basedn = value,
            "user_dn_attribute" => schema.user_dn_attribute = value,
            "user_objectclass" => schema.user_objectclass = value,
            "user_basedn" => schema.user_basedn = value,
            "user_department_attribute" => schema.user_department_attribute = value,
            "user_mail_attribute" => schema.user_mail_attribute = value,
            "user_displayname_attribute" => schema.user_displayname_attribute = value,
            "user_memberof_attribute" => schema.user_memberof_attribute = value,
            "user_lockout_attribute" => schema.user_lockout_attribute = value,
            "user_account_control_attribute" => schema.user_account_control_attribute = value,
            "include_distribution_groups" => {
                schema.include_distribution_groups = parse_flag(key, &value)?;
            }
            "distribution_groups_ou" => schema.distribution_groups_ou = value,
            other => return Err(Error::ConfigError(format!("unknown setting: {other}"))),
        }
        Ok(())
    }

    /// Builds validated connection options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if a field is out of range and
    /// [`Error::ConfigError`] if the credentials are missing.
    pub fn connection_options(&self) -> Result<ConnectionOptions> {
        self.validate()?;
        let mut builder = ConnectionOptions::builder()
            .host(self.host.clone())
            .port(self.port)
            .basedn(self.basedn.clone())
            .operation_timeout_secs(self.operation_timeout_secs);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            builder = builder.credentials(username.clone(), password.clone());
        }
        builder.build()
    }

    /// The attribute mapping.
    #[must_use]
    pub fn schema(&self) -> SchemaConfig {
        self.schema.clone()
    }
}

fn parse_setting<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::ConfigError(format!("invalid value for {key}: {value}")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::ConfigError(format!(
            "invalid value for {key}: {value}"
        ))),
    }
}
