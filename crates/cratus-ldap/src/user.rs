//! Directory user accounts.

use crate::{
    client::{SearchOptions, SearchScope},
    directory::{escape_filter_value, object_class_filter, Directory, DirectoryObject},
    entry::DirectoryEntry,
    group::Group,
    membership,
    Result,
};
use chrono::{DateTime, Utc};
use cratus_core::{Error, SchemaConfig};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info};

/// Ticks (100 ns) between 1601-01-01 and the Unix epoch.
pub const WINDOWS_EPOCH_OFFSET_TICKS: i64 = 116_444_736_000_000_000;

const TICKS_PER_SECOND: i64 = 10_000_000;

const ENABLED_CODE: i64 = 512;
const DISABLED_CODE: i64 = 514;

const DOMAIN_FILTER: &str = "(objectClass=domain)";
const LOCKOUT_DURATION_ATTRIBUTE: &str = "lockoutDuration";

/// State of the account-control attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountControl {
    /// Normal, enabled account (`512`).
    Enabled,
    /// Disabled account (`514`).
    Disabled,
    /// Missing, or any other code.
    Unknown,
}

impl AccountControl {
    fn from_value(value: Option<&str>) -> Self {
        match value.and_then(|v| v.trim().parse::<i64>().ok()) {
            Some(ENABLED_CODE) => Self::Enabled,
            Some(DISABLED_CODE) => Self::Disabled,
            _ => Self::Unknown,
        }
    }
}

/// State an account can be switched to.
#[derive(Debug, Clone, Copy)]
enum Switch {
    Enable,
    Disable,
}

impl Switch {
    const fn state(self) -> AccountControl {
        match self {
            Self::Enable => AccountControl::Enabled,
            Self::Disable => AccountControl::Disabled,
        }
    }

    const fn code(self) -> i64 {
        match self {
            Self::Enable => ENABLED_CODE,
            Self::Disable => DISABLED_CODE,
        }
    }
}

/// Result of [`User::unlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The lockout was cleared.
    Unlocked,
    /// Nothing needed to change.
    Unchanged,
    /// The account is disabled; unlocking it is refused.
    RefusedDisabled,
}

impl UnlockOutcome {
    /// False only when the unlock was refused.
    #[must_use]
    pub const fn is_success(self) -> bool {
        !matches!(self, Self::RefusedDisabled)
    }
}

/// A user account looked up by username.
///
/// Like [`Group`], a lookup that matches nothing still produces a value whose accessors
/// return `None`. Equality and ordering use the username only.
#[derive(Clone)]
pub struct User {
    username: String,
    schema: Arc<SchemaConfig>,
    entry: Option<DirectoryEntry>,
}

impl User {
    /// Looks up `username` under the configured user base; the last matching entry wins.
    ///
    /// # Errors
    ///
    /// Propagates search errors.
    pub async fn find(directory: &mut Directory, username: &str) -> Result<Self> {
        let schema = directory.schema_handle();
        let entry = Self::load(directory, &schema, username).await?;
        Ok(Self {
            username: username.to_string(),
            schema,
            entry,
        })
    }

    /// Every user under the configured user base, each loaded with its own lookup.
    ///
    /// # Errors
    ///
    /// Propagates search errors.
    pub async fn all(directory: &mut Directory) -> Result<Vec<Self>> {
        let schema = directory.schema_handle();
        let filter = object_class_filter(&schema.user_objectclass);
        let options = SearchOptions::new()
            .basedn(schema.user_basedn.as_str())
            .attrs([schema.user_dn_attribute.as_str()]);

        let usernames: Vec<String> = directory
            .search(&filter, &options)
            .await?
            .iter()
            .filter_map(|entry| entry.last(&schema.user_dn_attribute).map(str::to_string))
            .collect();

        let mut users = Vec::with_capacity(usernames.len());
        for username in usernames {
            users.push(Self::find(directory, &username).await?);
        }
        Ok(users)
    }

    pub(crate) fn from_entry(schema: Arc<SchemaConfig>, entry: DirectoryEntry) -> Option<Self> {
        let username = entry.last(&schema.user_dn_attribute)?.to_string();
        Some(Self {
            username,
            schema,
            entry: Some(entry),
        })
    }

    async fn load(
        directory: &mut Directory,
        schema: &SchemaConfig,
        username: &str,
    ) -> Result<Option<DirectoryEntry>> {
        let filter = format!(
            "({}={})",
            schema.user_dn_attribute,
            escape_filter_value(username)
        );
        let options = SearchOptions::new()
            .basedn(schema.user_basedn.as_str())
            .attrs(schema.user_attributes());

        let entry = directory.search(&filter, &options).await?.pop();
        if entry.is_none() {
            debug!("no user named {username} under {}", schema.user_basedn);
        }
        Ok(entry)
    }

    /// Reloads the entry from the directory.
    ///
    /// # Errors
    ///
    /// Propagates search errors.
    pub async fn refresh(&mut self, directory: &mut Directory) -> Result<()> {
        self.entry = Self::load(directory, &self.schema, &self.username).await?;
        Ok(())
    }

    /// The username used for the lookup.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns true if the lookup found an entry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.entry.is_some()
    }

    /// The loaded entry, if any.
    #[must_use]
    pub fn entry(&self) -> Option<&DirectoryEntry> {
        self.entry.as_ref()
    }

    /// Distinguished name of the account.
    #[must_use]
    pub fn dn(&self) -> Option<&str> {
        self.entry.as_ref().map(DirectoryEntry::dn)
    }

    /// Department.
    #[must_use]
    pub fn department(&self) -> Option<&str> {
        self.attribute(&self.schema.user_department_attribute)
    }

    /// Email address.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.attribute(&self.schema.user_mail_attribute)
    }

    /// Display name.
    #[must_use]
    pub fn fullname(&self) -> Option<&str> {
        self.attribute(&self.schema.user_displayname_attribute)
    }

    fn attribute(&self, attribute: &str) -> Option<&str> {
        self.entry.as_ref()?.last(attribute)
    }

    /// Lockout timestamp in ticks since 1601-01-01; `0` when missing or unparsable.
    #[must_use]
    pub fn lockout_time(&self) -> i64 {
        self.attribute(&self.schema.user_lockout_attribute)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Domain lockout duration in ticks, read from the domain object at the directory root.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] if there is no domain object or it carries no duration;
    /// * [`Error::InvalidRequest`] if the duration is not an integer;
    /// * search errors.
    pub async fn lockout_duration(&self, directory: &mut Directory) -> Result<i64> {
        let options = SearchOptions::new()
            .basedn(directory.connection().base_dn())
            .with_scope(SearchScope::Base)
            .attrs([LOCKOUT_DURATION_ATTRIBUTE]);

        let domain = directory
            .search(DOMAIN_FILTER, &options)
            .await?
            .pop()
            .ok_or_else(|| Error::NotFound("domain policy object".to_string()))?;
        let raw = domain
            .last(LOCKOUT_DURATION_ATTRIBUTE)
            .ok_or_else(|| Error::NotFound(format!("{LOCKOUT_DURATION_ATTRIBUTE} on {}", domain.dn())))?;

        raw.trim()
            .parse::<i64>()
            .map(i64::saturating_abs)
            .map_err(|err| Error::InvalidRequest(format!("{LOCKOUT_DURATION_ATTRIBUTE} {raw:?}: {err}")))
    }

    /// Returns true if the account is locked out now.
    ///
    /// # Errors
    ///
    /// See [`User::lockout_duration`]; no search is made when the lockout time is `0`.
    pub async fn is_locked(&self, directory: &mut Directory) -> Result<bool> {
        self.is_locked_at(directory, Utc::now()).await
    }

    /// Returns true if the account is locked out at `now`.
    ///
    /// # Errors
    ///
    /// See [`User::is_locked`].
    pub async fn is_locked_at(&self, directory: &mut Directory, now: DateTime<Utc>) -> Result<bool> {
        let lockout = self.lockout_time();
        if lockout == 0 {
            return Ok(false);
        }
        let duration = self.lockout_duration(directory).await?;
        Ok(lockout_active(lockout, duration, now.timestamp()))
    }

    /// Current account-control state.
    #[must_use]
    pub fn account_control(&self) -> AccountControl {
        AccountControl::from_value(self.attribute(&self.schema.user_account_control_attribute))
    }

    /// Returns true if the account-control code is the enabled code.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.account_control() == AccountControl::Enabled
    }

    /// Returns true if the account-control code is the disabled code.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.account_control() == AccountControl::Disabled
    }

    /// Enables the account; writes nothing if it already is.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the user was not found, or the write/refresh error.
    pub async fn enable(&mut self, directory: &mut Directory) -> Result<()> {
        self.set_account_control(directory, Switch::Enable).await
    }

    /// Disables the account; writes nothing if it already is.
    ///
    /// # Errors
    ///
    /// See [`User::enable`].
    pub async fn disable(&mut self, directory: &mut Directory) -> Result<()> {
        self.set_account_control(directory, Switch::Disable).await
    }

    async fn set_account_control(
        &mut self,
        directory: &mut Directory,
        switch: Switch,
    ) -> Result<()> {
        let target = switch.state();
        if self.account_control() == target {
            debug!("{} is already {target:?}", self.username);
            return Ok(());
        }

        let dn = self.require_dn()?;
        directory
            .replace_attribute(
                &dn,
                &self.schema.user_account_control_attribute,
                &[switch.code().to_string()],
            )
            .await?;
        info!("{} is now {target:?}", self.username);
        self.refresh(directory).await
    }

    /// Clears a lockout on an enabled account.
    ///
    /// Disabled accounts are refused; an account that is not locked is left alone.
    ///
    /// # Errors
    ///
    /// See [`User::is_locked`] and [`User::enable`].
    pub async fn unlock(&mut self, directory: &mut Directory) -> Result<UnlockOutcome> {
        self.unlock_at(directory, Utc::now()).await
    }

    /// Clears a lockout that is still active at `now`.
    ///
    /// # Errors
    ///
    /// See [`User::unlock`].
    pub async fn unlock_at(
        &mut self,
        directory: &mut Directory,
        now: DateTime<Utc>,
    ) -> Result<UnlockOutcome> {
        if self.is_disabled() {
            return Ok(UnlockOutcome::RefusedDisabled);
        }
        if !(self.is_enabled() && self.is_locked_at(directory, now).await?) {
            return Ok(UnlockOutcome::Unchanged);
        }

        let dn = self.require_dn()?;
        directory
            .replace_attribute(&dn, &self.schema.user_lockout_attribute, &["0".to_string()])
            .await?;
        info!("unlocked {}", self.username);
        self.refresh(directory).await?;
        Ok(UnlockOutcome::Unlocked)
    }

    /// Groups this user belongs to, directly or through nesting.
    ///
    /// # Errors
    ///
    /// Propagates search errors from the group lookups.
    pub async fn member_of(&self, directory: &mut Directory) -> Result<Vec<Group>> {
        membership::resolve_parents(
            directory,
            &self.username,
            self.entry.as_ref(),
            &self.schema.user_memberof_attribute,
        )
        .await
    }

    /// Alias of [`User::member_of`].
    ///
    /// # Errors
    ///
    /// See [`User::member_of`].
    pub async fn groups(&self, directory: &mut Directory) -> Result<Vec<Group>> {
        self.member_of(directory).await
    }

    fn require_dn(&self) -> Result<String> {
        self.dn()
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound(format!("user {}", self.username)))
    }
}

/// `now_secs * 10^7 - (lockout - offset) < duration`, in 128-bit arithmetic.
fn lockout_active(lockout: i64, duration: i64, now_secs: i64) -> bool {
    let current = i128::from(now_secs) * i128::from(TICKS_PER_SECOND);
    let locked_since = i128::from(lockout) - i128::from(WINDOWS_EPOCH_OFFSET_TICKS);
    current - locked_since < i128::from(duration)
}

impl DirectoryObject for User {
    fn dn(&self) -> Option<&str> {
        User::dn(self)
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("dn", &self.dn())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
    }
}

impl Eq for User {}

impl PartialOrd for User {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for User {
    fn cmp(&self, other: &Self) -> Ordering {
        self.username.cmp(&other.username)
    }
}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.username.hash(state);
    }
}
