//! The connection plus attribute mapping that entity operations run against.

use crate::{
    client::{DirectoryConnection, SearchOptions},
    entry::DirectoryEntry,
    Result,
};
use cratus_core::{SchemaConfig, Settings};
use std::sync::Arc;

/// Anything that lives at a distinguished name and can therefore be added to a group.
pub trait DirectoryObject {
    /// The entry's distinguished name, or `None` when the lookup found no entry.
    fn dn(&self) -> Option<&str>;
}

/// A directory connection paired with the schema used to interpret its entries.
pub struct Directory {
    connection: DirectoryConnection,
    schema: Arc<SchemaConfig>,
}

impl Directory {
    /// Pairs an existing connection with a schema.
    #[must_use]
    pub fn new(connection: DirectoryConnection, schema: SchemaConfig) -> Self {
        Self {
            connection,
            schema: Arc::new(schema),
        }
    }

    /// Builds an unbound directory from layered settings.
    ///
    /// # Errors
    ///
    /// Returns [`cratus_core::Error::ConfigError`] when a connection option is missing.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let options = settings.connection_options()?;
        Ok(Self::new(DirectoryConnection::new(options), settings.schema()))
    }

    /// The attribute mapping.
    #[must_use]
    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }

    pub(crate) fn schema_handle(&self) -> Arc<SchemaConfig> {
        Arc::clone(&self.schema)
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &DirectoryConnection {
        &self.connection
    }

    /// Mutable access to the underlying connection.
    pub fn connection_mut(&mut self) -> &mut DirectoryConnection {
        &mut self.connection
    }

    /// Binds the underlying connection.
    ///
    /// # Errors
    ///
    /// See [`DirectoryConnection::connect`].
    pub async fn connect(&mut self) -> Result<()> {
        self.connection.connect().await
    }

    pub(crate) async fn search(
        &mut self,
        filter: &str,
        options: &SearchOptions,
    ) -> Result<Vec<DirectoryEntry>> {
        self.connection.search(filter, options).await
    }

    pub(crate) async fn replace_attribute(
        &mut self,
        dn: &str,
        attribute: &str,
        values: &[String],
    ) -> Result<()> {
        self.connection.replace_attribute(dn, attribute, values).await
    }
}

/// Escapes a value for use inside an equality filter.
pub(crate) fn escape_filter_value(value: &str) -> String {
    value
        .chars()
        .fold(String::with_capacity(value.len()), |mut escaped, ch| {
            match ch {
                '*' => escaped.push_str("\\2a"),
                '(' => escaped.push_str("\\28"),
                ')' => escaped.push_str("\\29"),
                '\\' => escaped.push_str("\\5c"),
                '\0' => escaped.push_str("\\00"),
                _ => escaped.push(ch),
            }
            escaped
        })
}

/// Equality filter on `objectClass`.
pub(crate) fn object_class_filter(object_class: &str) -> String {
    format!("(objectClass={})", escape_filter_value(object_class))
}
