//! Repository object model as seen by the synchronization subsystem.
//!
//! Items own bundles of bitstreams and belong to collections, which in turn
//! belong to communities. Only the fields that end up in sync documents are
//! modelled here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration keyword and URL segment for the site scope.
pub const SITE_SCOPE: &str = "site";

/// Containment identifier that partitions audit events and documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scope {
    /// The whole repository.
    Site,
    /// A collection or community, identified by its handle.
    Container(String),
}

impl Scope {
    /// Parse a configured scope: `site` or a container handle.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case(SITE_SCOPE) {
            Scope::Site
        } else {
            Scope::Container(value.to_string())
        }
    }

    /// Create a container scope from a handle.
    pub fn container(handle: impl Into<String>) -> Self {
        Scope::Container(handle.into())
    }

    /// True for the site scope.
    pub fn is_site(&self) -> bool {
        matches!(self, Scope::Site)
    }

    /// Output sub-directory name; the site scope lives in the root directory.
    pub fn dir_name(&self) -> Option<String> {
        match self {
            Scope::Site => None,
            Scope::Container(handle) => Some(escape_handle(handle)),
        }
    }

    /// Segment used to address the scope in delivery URLs.
    pub fn url_segment(&self) -> String {
        self.dir_name().unwrap_or_else(|| SITE_SCOPE.to_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Site => f.write_str(SITE_SCOPE),
            Scope::Container(handle) => f.write_str(handle),
        }
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        Scope::parse(&value)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// Replace the characters a handle may contain that are reserved in paths.
pub fn escape_handle(handle: &str) -> String {
    handle
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

/// Kind of repository object an audit event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// An archived item.
    Item,
    /// A file attached to an item.
    Bitstream,
    /// A collection.
    Collection,
    /// A community.
    Community,
}

/// Nature of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Resource appeared.
    Create,
    /// Resource content or metadata changed.
    Update,
    /// Resource disappeared.
    Remove,
}

impl ChangeType {
    /// Value of the `change` attribute in ResourceSync documents.
    pub fn as_resourcesync(&self) -> &'static str {
        match self {
            ChangeType::Create => "created",
            ChangeType::Update => "updated",
            ChangeType::Remove => "deleted",
        }
    }

    /// Parse a ResourceSync `change` attribute value.
    pub fn from_resourcesync(value: &str) -> Option<Self> {
        match value {
            "created" => Some(ChangeType::Create),
            "updated" => Some(ChangeType::Update),
            "deleted" => Some(ChangeType::Remove),
            _ => None,
        }
    }
}

/// A file attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitstream {
    /// Repository identifier.
    pub id: String,
    /// Sequence number, unique within the owning item.
    pub sequence: u32,
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Checksum value as recorded at ingest.
    pub checksum: String,
    /// Algorithm the checksum was computed with, e.g. `MD5`.
    pub checksum_algorithm: String,
}

impl Bitstream {
    /// ResourceSync `hash` attribute value.
    pub fn hash_attribute(&self) -> String {
        format!(
            "{}:{}",
            self.checksum_algorithm.to_ascii_lowercase(),
            self.checksum
        )
    }
}

/// A named group of bitstreams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Bundle name, e.g. `ORIGINAL`.
    pub name: String,
    /// Bitstreams in this bundle.
    #[serde(default)]
    pub bitstreams: Vec<Bitstream>,
}

/// One qualified metadata value, e.g. `dc.title`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataValue {
    /// Qualified field name.
    pub field: String,
    /// Field value.
    pub value: String,
}

impl MetadataValue {
    /// Create a metadata value.
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// An archived item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Repository identifier.
    pub id: String,
    /// Persistent handle, e.g. `123456789/42`.
    pub handle: String,
    /// Last modification time; bitstreams inherit it.
    pub last_modified: DateTime<Utc>,
    /// Withdrawn items are never advertised as present.
    #[serde(default)]
    pub withdrawn: bool,
    /// Handles of owning collections.
    #[serde(default)]
    pub collections: Vec<String>,
    /// Handles of communities the owning collections belong to.
    #[serde(default)]
    pub communities: Vec<String>,
    /// Bundles attached to the item.
    #[serde(default)]
    pub bundles: Vec<Bundle>,
    /// Descriptive metadata.
    #[serde(default)]
    pub metadata: Vec<MetadataValue>,
}

impl Item {
    /// Bitstreams in bundles on the allow-list, in bundle then sequence order.
    pub fn exposed_bitstreams<'a>(
        &'a self,
        exposed_bundles: &'a [String],
    ) -> impl Iterator<Item = &'a Bitstream> + 'a {
        self.bundles
            .iter()
            .filter(move |b| is_exposed(exposed_bundles, &b.name))
            .flat_map(|b| b.bitstreams.iter())
    }

    /// Collection and community scopes containing this item.
    pub fn container_scopes(&self) -> Vec<Scope> {
        self.collections
            .iter()
            .chain(self.communities.iter())
            .map(|h| Scope::container(h.clone()))
            .collect()
    }

    /// True if any owning collection or community is the given handle.
    pub fn is_contained_in(&self, handle: &str) -> bool {
        self.collections.iter().any(|c| c == handle) || self.communities.iter().any(|c| c == handle)
    }
}

/// True if a bundle name is on the allow-list.
pub fn is_exposed(exposed_bundles: &[String], bundle: &str) -> bool {
    exposed_bundles.iter().any(|b| b == bundle)
}

/// A collection and the communities it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    /// Persistent handle.
    pub handle: String,
    /// Handles of parent communities.
    #[serde(default)]
    pub communities: Vec<String>,
}

/// A metadata export advertised for every item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFormat {
    /// Short name used in URLs, e.g. `oai_dc`.
    pub prefix: String,
    /// Namespace or profile URI of the format.
    pub namespace: String,
    /// MIME type of rendered exports.
    pub mime_type: String,
}

impl MetadataFormat {
    /// Create a format descriptor.
    pub fn new(
        prefix: impl Into<String>,
        namespace: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            namespace: namespace.into(),
            mime_type: mime_type.into(),
        }
    }

    /// The Dublin Core format every deployment advertises by default.
    pub fn oai_dc() -> Self {
        Self::new(
            "oai_dc",
            "http://www.openarchives.org/OAI/2.0/oai_dc/",
            "application/xml",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_scope_parses_case_insensitively() {
        assert_eq!(Scope::parse("site"), Scope::Site);
        assert_eq!(Scope::parse(" SITE "), Scope::Site);
        assert_eq!(
            Scope::parse("123456789/2"),
            Scope::Container("123456789/2".to_string())
        );
    }

    #[test]
    fn dir_name_replaces_separators() {
        assert_eq!(Scope::Site.dir_name(), None);
        assert_eq!(
            Scope::container("123456789/2").dir_name().as_deref(),
            Some("123456789_2")
        );
        assert_eq!(escape_handle("a:b\\c/d"), "a_b_c_d");
    }

    #[test]
    fn url_segment_of_site_is_keyword() {
        assert_eq!(Scope::Site.url_segment(), "site");
        assert_eq!(Scope::container("1/2").url_segment(), "1_2");
    }

    #[test]
    fn scope_serializes_as_string() {
        let json = serde_json::to_string(&Scope::container("1/2")).unwrap();
        assert_eq!(json, "\"1/2\"");
        let back: Scope = serde_json::from_str("\"site\"").unwrap();
        assert_eq!(back, Scope::Site);
    }

    #[test]
    fn change_type_attribute_values() {
        assert_eq!(ChangeType::Create.as_resourcesync(), "created");
        assert_eq!(ChangeType::Update.as_resourcesync(), "updated");
        assert_eq!(ChangeType::Remove.as_resourcesync(), "deleted");
        assert_eq!(
            ChangeType::from_resourcesync("deleted"),
            Some(ChangeType::Remove)
        );
        assert_eq!(ChangeType::from_resourcesync("moved"), None);
    }

    #[test]
    fn hash_attribute_lowercases_algorithm() {
        let bs = Bitstream {
            id: "b1".to_string(),
            sequence: 1,
            name: "a.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size: 3,
            checksum: "abc".to_string(),
            checksum_algorithm: "MD5".to_string(),
        };
        assert_eq!(bs.hash_attribute(), "md5:abc");
    }
}
