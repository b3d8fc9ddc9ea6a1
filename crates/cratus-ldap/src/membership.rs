//! Nested membership traversal.
//!
//! Membership graphs live in the directory and may contain cycles, so both directions walk an
//! explicit stack and expand every group at most once. Output order follows a depth-first,
//! pre-order walk of the member (or `memberOf`) lists as the directory returns them.

use crate::{
    client::{SearchOptions, SearchScope},
    directory::{object_class_filter, Directory},
    dn::DistinguishedName,
    entry::DirectoryEntry,
    group::Group,
    user::User,
    Result,
};
use cratus_core::{Error, SchemaConfig};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Users and groups reached from a group, each listed once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    /// Member users, deduplicated by username.
    pub users: Vec<User>,
    /// Nested groups, deduplicated by name.
    pub groups: Vec<Group>,
}

impl Membership {
    /// Returns true if nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }
}

enum Probe {
    Found(DirectoryEntry),
    NoMatch,
    Missing,
}

enum Member {
    User(User),
    Group(Group),
}

pub(crate) async fn resolve_members(directory: &mut Directory, root: &Group) -> Result<Membership> {
    let mut membership = Membership::default();
    if !root.is_valid() {
        warn!(
            "group {} is invalid or beyond the search scope; it has no members",
            root.name()
        );
        return Ok(membership);
    }

    let schema = directory.schema_handle();
    let mut probed = HashSet::new();
    let mut users = HashSet::new();
    let mut groups = HashSet::new();
    let mut expanded = HashSet::from([root.name().to_string()]);
    let mut stack = vec![root.direct_members().to_vec().into_iter()];

    while let Some(frame) = stack.last_mut() {
        let Some(member_dn) = frame.next() else {
            stack.pop();
            continue;
        };
        if !probed.insert(member_dn.to_ascii_lowercase()) {
            continue;
        }

        match classify(directory, &schema, &member_dn).await? {
            Some(Member::User(user)) => {
                if users.insert(user.username().to_string()) {
                    membership.users.push(user);
                }
            }
            Some(Member::Group(group)) => {
                if expanded.insert(group.name().to_string()) {
                    stack.push(group.direct_members().to_vec().into_iter());
                }
                if groups.insert(group.name().to_string()) {
                    membership.groups.push(group);
                }
            }
            None => {}
        }
    }

    debug!(
        "group {} has {} user(s) and {} nested group(s)",
        root.name(),
        membership.users.len(),
        membership.groups.len()
    );
    Ok(membership)
}

/// Decides whether `member_dn` is a user or a group, trying the user class first.
async fn classify(
    directory: &mut Directory,
    schema: &SchemaConfig,
    member_dn: &str,
) -> Result<Option<Member>> {
    let user_filter = object_class_filter(&schema.user_objectclass);
    match probe(directory, member_dn, &user_filter, schema.user_attributes()).await? {
        Probe::Found(entry) => {
            let user = User::from_entry(directory.schema_handle(), entry);
            if user.is_none() {
                warn!("member {member_dn} has no {}; skipping", schema.user_dn_attribute);
            }
            return Ok(user.map(Member::User));
        }
        Probe::Missing => return Ok(None),
        Probe::NoMatch => {}
    }

    let group_filter = object_class_filter(&schema.group_objectclass);
    match probe(directory, member_dn, &group_filter, schema.group_attributes()).await? {
        Probe::Found(entry) => {
            let group = Group::from_entry(directory.schema_handle(), entry);
            if group.is_none() {
                warn!("member {member_dn} has no {}; skipping", schema.group_dn_attribute);
            }
            Ok(group.map(Member::Group))
        }
        Probe::NoMatch | Probe::Missing => {
            debug!("member {member_dn} is neither a user nor a group");
            Ok(None)
        }
    }
}

async fn probe(
    directory: &mut Directory,
    member_dn: &str,
    filter: &str,
    attributes: Vec<String>,
) -> Result<Probe> {
    let options = SearchOptions::new()
        .basedn(member_dn)
        .with_scope(SearchScope::Base)
        .attrs(attributes);

    match directory.search(filter, &options).await {
        Ok(mut entries) => Ok(entries.pop().map_or(Probe::NoMatch, Probe::Found)),
        Err(Error::SearchFailed(message)) => {
            warn!("member {member_dn} could not be read ({message}); skipping");
            Ok(Probe::Missing)
        }
        Err(err) => Err(err),
    }
}

/// Parent groups of `owner`, read from `attribute` on its entry and then followed upwards.
///
/// Direct parents come first, followed by the ancestry of each parent in turn.
pub(crate) async fn resolve_parents(
    directory: &mut Directory,
    owner: &str,
    entry: Option<&DirectoryEntry>,
    attribute: &str,
) -> Result<Vec<Group>> {
    let Some(entry) = entry else {
        warn!("{owner} is invalid or beyond the search scope; it has no parent groups");
        return Ok(Vec::new());
    };

    let schema = directory.schema_handle();
    let mut visited = HashSet::new();
    let direct = parent_groups(directory, &schema, entry.values(attribute), &mut visited).await?;

    let mut resolved = direct.clone();
    let mut stack = vec![direct.into_iter()];
    while let Some(frame) = stack.last_mut() {
        let Some(group) = frame.next() else {
            stack.pop();
            continue;
        };
        let Some(group_entry) = group.entry() else {
            warn!(
                "group {} is invalid or beyond the search scope; skipping its parents",
                group.name()
            );
            continue;
        };

        let parents = parent_groups(
            directory,
            &schema,
            group_entry.values(&schema.group_memberof_attribute),
            &mut visited,
        )
        .await?;
        resolved.extend(parents.iter().cloned());
        stack.push(parents.into_iter());
    }

    Ok(resolved)
}

/// Looks up each group named by `raw`, skipping ones already visited.
async fn parent_groups(
    directory: &mut Directory,
    schema: &SchemaConfig,
    raw: &[String],
    visited: &mut HashSet<String>,
) -> Result<Vec<Group>> {
    let mut groups = Vec::new();
    for value in raw {
        let dn = match DistinguishedName::parse(value) {
            Ok(dn) => dn,
            Err(err) => {
                warn!("ignoring membership value {value:?}: {err}");
                continue;
            }
        };
        if !schema.include_distribution_groups
            && dn.contains("ou", &schema.distribution_groups_ou)
        {
            debug!("skipping distribution group {dn}");
            continue;
        }
        let Some(name) = dn.leading_value(&schema.group_dn_attribute) else {
            warn!(
                "membership value {dn} is not named by {}; skipping",
                schema.group_dn_attribute
            );
            continue;
        };
        if !visited.insert(name.to_string()) {
            continue;
        }

        let group = Group::find(directory, name).await?;
        if !group.is_valid() {
            warn!("parent group {name} of {dn} could not be found");
        }
        groups.push(group);
    }
    Ok(groups)
}
