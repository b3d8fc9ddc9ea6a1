//! Directory groups.

use crate::{
    client::SearchOptions,
    directory::{escape_filter_value, Directory, DirectoryObject},
    entry::DirectoryEntry,
    membership::{self, Membership},
    user::User,
    Result,
};
use cratus_core::{Error, SchemaConfig};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

/// A group looked up by its short name.
///
/// A lookup that matches nothing still produces a `Group`; it is reported as invalid and
/// contributes nothing to membership traversal. Equality and ordering use the name only.
#[derive(Clone)]
pub struct Group {
    name: String,
    schema: Arc<SchemaConfig>,
    entry: Option<DirectoryEntry>,
}

impl Group {
    /// Looks up the group named `name` under the configured group base.
    ///
    /// When several entries match, the last one returned by the directory is used.
    ///
    /// # Errors
    ///
    /// Propagates search errors from [`crate::DirectoryConnection::search`].
    pub async fn find(directory: &mut Directory, name: &str) -> Result<Self> {
        let schema = directory.schema_handle();
        let filter = format!(
            "({}={})",
            schema.group_dn_attribute,
            escape_filter_value(name)
        );
        let options = SearchOptions::new()
            .basedn(schema.group_basedn.as_str())
            .attrs(schema.group_attributes());

        let entry = directory.search(&filter, &options).await?.pop();
        if entry.is_none() {
            debug!("no group named {name} under {}", schema.group_basedn);
        }
        Ok(Self {
            name: name.to_string(),
            schema,
            entry,
        })
    }

    /// Every group under the configured group base, each loaded with its own lookup.
    ///
    /// # Errors
    ///
    /// Propagates search errors.
    pub async fn all(directory: &mut Directory) -> Result<Vec<Self>> {
        let schema = directory.schema_handle();
        let filter = format!("({}=*)", schema.group_dn_attribute);
        let options = SearchOptions::new()
            .basedn(schema.group_basedn.as_str())
            .attrs([schema.group_dn_attribute.as_str()]);

        let names: Vec<String> = directory
            .search(&filter, &options)
            .await?
            .iter()
            .filter_map(|entry| entry.last(&schema.group_dn_attribute).map(str::to_string))
            .collect();

        let mut groups = Vec::with_capacity(names.len());
        for name in names {
            groups.push(Self::find(directory, &name).await?);
        }
        Ok(groups)
    }

    /// Builds a group from an entry that was already fetched with the group attributes.
    pub(crate) fn from_entry(schema: Arc<SchemaConfig>, entry: DirectoryEntry) -> Option<Self> {
        let name = entry.last(&schema.group_dn_attribute)?.to_string();
        Some(Self {
            name,
            schema,
            entry: Some(entry),
        })
    }

    /// The short name used for the lookup.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
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

    /// Distinguished name of the group.
    #[must_use]
    pub fn dn(&self) -> Option<&str> {
        self.entry.as_ref().map(DirectoryEntry::dn)
    }

    /// The group's description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.entry
            .as_ref()?
            .last(&self.schema.group_description_attribute)
    }

    /// Raw member DNs, without expansion.
    #[must_use]
    pub fn direct_members(&self) -> &[String] {
        self.entry
            .as_ref()
            .map_or(&[][..], |entry| entry.values(&self.schema.group_member_attribute))
    }

    /// Users that belong to this group directly or through nested groups.
    ///
    /// # Errors
    ///
    /// Propagates search errors other than a member DN that no longer resolves.
    pub async fn members(&self, directory: &mut Directory) -> Result<Vec<User>> {
        Ok(self.membership(directory).await?.users)
    }

    /// Groups nested in this group at any depth.
    ///
    /// # Errors
    ///
    /// See [`Group::members`].
    pub async fn member_groups(&self, directory: &mut Directory) -> Result<Vec<Self>> {
        Ok(self.membership(directory).await?.groups)
    }

    /// Users and groups nested in this group, resolved in one traversal.
    ///
    /// # Errors
    ///
    /// See [`Group::members`].
    pub async fn membership(&self, directory: &mut Directory) -> Result<Membership> {
        membership::resolve_members(directory, self).await
    }

    /// Groups this group belongs to, directly or through nesting.
    ///
    /// # Errors
    ///
    /// Propagates search errors from the parent lookups.
    pub async fn member_of(&self, directory: &mut Directory) -> Result<Vec<Self>> {
        membership::resolve_parents(
            directory,
            &self.name,
            self.entry.as_ref(),
            &self.schema.group_memberof_attribute,
        )
        .await
    }

    /// Adds `member` to the group's member list.
    ///
    /// Adding a member that is already present writes nothing.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidUser`] if `member` has no distinguished name;
    /// * [`Error::NotFound`] if this group was not found;
    /// * the transport error if the directory rejects the modification.
    pub async fn add_user<M>(&mut self, directory: &mut Directory, member: &M) -> Result<()>
    where
        M: DirectoryObject + ?Sized,
    {
        let member_dn = required_dn(member)?;
        if self.has_member(&member_dn) {
            debug!("{member_dn} is already a member of {}", self.name);
            return Ok(());
        }

        let mut members = self.direct_members().to_vec();
        members.push(member_dn);
        self.write_members(directory, members).await
    }

    /// Removes `member` from the group's member list.
    ///
    /// Removing a member that is not present writes nothing.
    ///
    /// # Errors
    ///
    /// Same as [`Group::add_user`].
    pub async fn remove_user<M>(&mut self, directory: &mut Directory, member: &M) -> Result<()>
    where
        M: DirectoryObject + ?Sized,
    {
        let member_dn = required_dn(member)?;
        if !self.has_member(&member_dn) {
            debug!("{member_dn} is not a member of {}", self.name);
            return Ok(());
        }

        let members = self
            .direct_members()
            .iter()
            .filter(|dn| !dn.eq_ignore_ascii_case(&member_dn))
            .cloned()
            .collect();
        self.write_members(directory, members).await
    }

    fn has_member(&self, dn: &str) -> bool {
        self.direct_members()
            .iter()
            .any(|member| member.eq_ignore_ascii_case(dn))
    }

    async fn write_members(
        &mut self,
        directory: &mut Directory,
        mut members: Vec<String>,
    ) -> Result<()> {
        let Some(entry) = self.entry.as_mut() else {
            return Err(Error::NotFound(format!("group {}", self.name)));
        };

        let mut seen = HashSet::new();
        members.retain(|dn| seen.insert(dn.to_ascii_lowercase()));

        let attribute = &self.schema.group_member_attribute;
        let group_dn = entry.dn().to_string();
        directory
            .replace_attribute(&group_dn, attribute, &members)
            .await?;
        entry.set_values(attribute, members);
        Ok(())
    }
}

fn required_dn<M>(member: &M) -> Result<String>
where
    M: DirectoryObject + ?Sized,
{
    match member.dn() {
        Some(dn) => Ok(dn.to_string()),
        None => {
            warn!("refusing to change membership for an entry without a DN");
            Err(Error::InvalidUser("member has no distinguished name".to_string()))
        }
    }
}

impl DirectoryObject for Group {
    fn dn(&self) -> Option<&str> {
        Group::dn(self)
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("dn", &self.dn())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Group {}

impl PartialOrd for Group {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Group {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for Group {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
