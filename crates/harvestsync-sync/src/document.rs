//! ResourceSync document model and XML serialization.
//!
//! Resource lists, change lists, capability lists, description documents and
//! dump manifests are sitemap `<urlset>` documents; the change-list archive
//! is a `<sitemapindex>`.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::SyncError;
use crate::model::ChangeType;
use crate::xml::XmlBuilder;

/// Sitemap namespace.
pub const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
/// ResourceSync namespace.
pub const RS_NS: &str = "http://www.openarchives.org/rs/terms/";

/// Link relation from a bitstream to its metadata exports.
pub const REL_DESCRIBED_BY: &str = "describedby";
/// Link relation from a metadata export to the bitstreams it describes.
pub const REL_DESCRIBES: &str = "describes";
/// Link relation to an owning collection.
pub const REL_COLLECTION: &str = "collection";
/// Link relation to a format's profile.
pub const REL_PROFILE: &str = "profile";
/// Link relation to the same content in another format.
pub const REL_ALTERNATE: &str = "alternate";
/// Link relation to the parent document.
pub const REL_UP: &str = "up";

/// W3C datetime with second precision.
pub fn w3c_datetime(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Role a document plays, written as `<rs:md capability=...>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Source description.
    Description,
    /// Capability list.
    CapabilityList,
    /// Resource list.
    ResourceList,
    /// Resource dump.
    ResourceDump,
    /// Manifest inside a resource dump.
    ResourceDumpManifest,
    /// Change list.
    ChangeList,
    /// Change dump.
    ChangeDump,
    /// Manifest inside a change dump.
    ChangeDumpManifest,
    /// Change-list archive index.
    ChangeListArchive,
}

impl Capability {
    /// Attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Description => "description",
            Capability::CapabilityList => "capabilitylist",
            Capability::ResourceList => "resourcelist",
            Capability::ResourceDump => "resourcedump",
            Capability::ResourceDumpManifest => "resourcedump-manifest",
            Capability::ChangeList => "changelist",
            Capability::ChangeDump => "changedump",
            Capability::ChangeDumpManifest => "changedump-manifest",
            Capability::ChangeListArchive => "changelist-archive",
        }
    }
}

/// A typed link relation on an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Relation name.
    pub rel: String,
    /// Target URL.
    pub href: String,
    /// MIME type of the target, if known.
    pub mime_type: Option<String>,
}

impl Link {
    /// Create a link without a type.
    pub fn new(rel: &str, href: impl Into<String>) -> Self {
        Self {
            rel: rel.to_string(),
            href: href.into(),
            mime_type: None,
        }
    }

    /// Create a link with a type.
    pub fn typed(rel: &str, href: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            rel: rel.to_string(),
            href: href.into(),
            mime_type: Some(mime_type.into()),
        }
    }
}

/// One `<url>` entry: a resource locator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlEntry {
    /// Location of the resource.
    pub loc: String,
    /// Last modification time.
    pub lastmod: Option<DateTime<Utc>>,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Size in bytes.
    pub length: Option<u64>,
    /// `algorithm:value` digest.
    pub hash: Option<String>,
    /// Change type; overrides the document default.
    pub change: Option<ChangeType>,
    /// Sitemap change frequency hint.
    pub changefreq: Option<String>,
    /// Path of the bytes inside a dump archive.
    pub path: Option<String>,
    /// Capability of the target, for entries that point at documents.
    pub capability: Option<Capability>,
    /// Typed link relations.
    pub links: Vec<Link>,
}

impl UrlEntry {
    /// Entry with only a location.
    pub fn new(loc: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            ..Self::default()
        }
    }

    fn write(&self, xb: &mut XmlBuilder, default_change: Option<ChangeType>) {
        xb.open("url");
        xb.elem("loc", &self.loc);
        if let Some(lastmod) = self.lastmod {
            xb.elem("lastmod", &w3c_datetime(lastmod));
        }
        xb.elem_opt("changefreq", self.changefreq.as_deref());

        let length = self.length.map(|l| l.to_string());
        let change = self.change.or(default_change);
        let mut md: Vec<(&str, &str)> = Vec::new();
        if let Some(capability) = self.capability {
            md.push(("capability", capability.as_str()));
        }
        if let Some(hash) = &self.hash {
            md.push(("hash", hash));
        }
        if let Some(length) = &length {
            md.push(("length", length));
        }
        if let Some(mime) = &self.mime_type {
            md.push(("type", mime));
        }
        if let Some(change) = change {
            md.push(("change", change.as_resourcesync()));
        }
        if let Some(path) = &self.path {
            md.push(("path", path));
        }
        if !md.is_empty() {
            xb.empty("rs:md", &md);
        }
        for link in &self.links {
            write_link(xb, link);
        }
        xb.close("url");
    }
}

fn write_link(xb: &mut XmlBuilder, link: &Link) {
    let mut attrs = vec![("rel", link.rel.as_str()), ("href", link.href.as_str())];
    if let Some(mime) = &link.mime_type {
        attrs.push(("type", mime.as_str()));
    }
    xb.empty("rs:ln", &attrs);
}

fn open_urlset(xb: &mut XmlBuilder, links: &[Link], md: &[(&str, &str)]) {
    xb.header();
    xb.open_with("urlset", &[("xmlns", SITEMAP_NS), ("xmlns:rs", RS_NS)]);
    for link in links {
        write_link(xb, link);
    }
    xb.empty("rs:md", md);
}

/// Baseline resource list, or the manifest of a resource dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceList {
    /// `ResourceList` or `ResourceDumpManifest`.
    pub capability: Capability,
    /// Capability list this document belongs to.
    pub up: Option<String>,
    /// Entries in traversal order.
    pub entries: Vec<UrlEntry>,
}

impl ResourceList {
    /// A resource list.
    pub fn new(up: Option<String>, entries: Vec<UrlEntry>) -> Self {
        Self {
            capability: Capability::ResourceList,
            up,
            entries,
        }
    }

    /// A resource dump manifest.
    pub fn manifest(up: Option<String>, entries: Vec<UrlEntry>) -> Self {
        Self {
            capability: Capability::ResourceDumpManifest,
            up,
            entries,
        }
    }

    /// Serialize to XML.
    ///
    /// Carries no generation timestamp so that unchanged content always
    /// serializes to the same bytes.
    pub fn to_xml(&self) -> String {
        let mut xb = XmlBuilder::new();
        let links: Vec<Link> = self.up.iter().map(|u| Link::new(REL_UP, u.clone())).collect();
        open_urlset(&mut xb, &links, &[("capability", self.capability.as_str())]);
        for entry in &self.entries {
            entry.write(&mut xb, None);
        }
        xb.close("urlset");
        xb.finish()
    }
}

/// Change list for the window `[from, until]`, or the manifest of a change dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeList {
    /// `ChangeList` or `ChangeDumpManifest`.
    pub capability: Capability,
    /// Capability list this document belongs to.
    pub up: String,
    /// Start of the window.
    pub from: DateTime<Utc>,
    /// End of the window.
    pub until: DateTime<Utc>,
    /// Change type for entries without their own.
    pub default_change: ChangeType,
    /// Entries in event order.
    pub entries: Vec<UrlEntry>,
}

impl ChangeList {
    /// A change list.
    pub fn new(
        up: impl Into<String>,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        entries: Vec<UrlEntry>,
    ) -> Self {
        Self {
            capability: Capability::ChangeList,
            up: up.into(),
            from,
            until,
            default_change: ChangeType::Update,
            entries,
        }
    }

    /// A change dump manifest.
    pub fn manifest(
        up: impl Into<String>,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        entries: Vec<UrlEntry>,
    ) -> Self {
        Self {
            capability: Capability::ChangeDumpManifest,
            ..Self::new(up, from, until, entries)
        }
    }

    /// Serialize to XML; every entry carries an explicit change type.
    pub fn to_xml(&self) -> String {
        let mut xb = XmlBuilder::new();
        let from = w3c_datetime(self.from);
        let until = w3c_datetime(self.until);
        open_urlset(
            &mut xb,
            &[Link::new(REL_UP, self.up.clone())],
            &[
                ("capability", self.capability.as_str()),
                ("from", &from),
                ("until", &until),
            ],
        );
        for entry in &self.entries {
            entry.write(&mut xb, Some(self.default_change));
        }
        xb.close("urlset");
        xb.finish()
    }
}

/// Discovery document listing what a scope currently publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityList {
    /// Parent document (the scope's description).
    pub up: Option<String>,
    /// Optional `describedby` link.
    pub described_by: Option<String>,
    /// Published capability to URL.
    pub capabilities: BTreeMap<Capability, String>,
}

impl CapabilityList {
    /// Empty capability list.
    pub fn new(up: Option<String>, described_by: Option<String>) -> Self {
        Self {
            up,
            described_by,
            capabilities: BTreeMap::new(),
        }
    }

    /// Publish or replace one capability.
    pub fn set(&mut self, capability: Capability, url: impl Into<String>) -> &mut Self {
        self.capabilities.insert(capability, url.into());
        self
    }

    /// URL published for a capability.
    pub fn get(&self, capability: Capability) -> Option<&str> {
        self.capabilities.get(&capability).map(|s| s.as_str())
    }

    /// Serialize to XML.
    pub fn to_xml(&self) -> String {
        let mut xb = XmlBuilder::new();
        let mut links = Vec::new();
        if let Some(d) = &self.described_by {
            links.push(Link::new(REL_DESCRIBED_BY, d.clone()));
        }
        if let Some(up) = &self.up {
            links.push(Link::new(REL_UP, up.clone()));
        }
        open_urlset(
            &mut xb,
            &links,
            &[("capability", Capability::CapabilityList.as_str())],
        );
        for (capability, url) in &self.capabilities {
            let entry = UrlEntry {
                capability: Some(*capability),
                ..UrlEntry::new(url.clone())
            };
            entry.write(&mut xb, None);
        }
        xb.close("urlset");
        xb.finish()
    }
}

/// Source description pointing at a scope's capability list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    /// Optional `describedby` link.
    pub described_by: Option<String>,
    /// Capability list URL.
    pub capability_list: String,
    /// Generation time.
    pub at: DateTime<Utc>,
}

impl SourceDescription {
    /// Serialize to XML.
    pub fn to_xml(&self) -> String {
        let mut xb = XmlBuilder::new();
        let links: Vec<Link> = self
            .described_by
            .iter()
            .map(|d| Link::new(REL_DESCRIBED_BY, d.clone()))
            .collect();
        let at = w3c_datetime(self.at);
        open_urlset(
            &mut xb,
            &links,
            &[("capability", Capability::Description.as_str()), ("at", &at)],
        );
        let entry = UrlEntry {
            capability: Some(Capability::CapabilityList),
            ..UrlEntry::new(self.capability_list.clone())
        };
        entry.write(&mut xb, None);
        xb.close("urlset");
        xb.finish()
    }
}

/// Index of every published dated change list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeListArchive {
    /// Site capability list.
    pub up: String,
    /// Change-list URL to the time it was produced.
    pub entries: BTreeMap<String, DateTime<Utc>>,
}

impl ChangeListArchive {
    /// Empty archive.
    pub fn new(up: impl Into<String>) -> Self {
        Self {
            up: up.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Record a change list.
    pub fn insert(&mut self, loc: impl Into<String>, at: DateTime<Utc>) {
        self.entries.insert(loc.into(), at);
    }

    /// Number of archived change lists.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been archived.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by timestamp, then location.
    pub fn ordered(&self) -> Vec<(&str, DateTime<Utc>)> {
        let mut ordered: Vec<_> = self.entries.iter().map(|(l, t)| (l.as_str(), *t)).collect();
        ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ordered
    }

    /// Serialize to XML.
    pub fn to_xml(&self) -> String {
        let mut xb = XmlBuilder::new();
        xb.header();
        xb.open_with(
            "sitemapindex",
            &[("xmlns", SITEMAP_NS), ("xmlns:rs", RS_NS)],
        );
        write_link(&mut xb, &Link::new(REL_UP, self.up.clone()));
        xb.empty(
            "rs:md",
            &[("capability", Capability::ChangeListArchive.as_str())],
        );
        for (loc, at) in self.ordered() {
            xb.open("sitemap");
            xb.elem("loc", loc);
            xb.elem("lastmod", &w3c_datetime(at));
            xb.close("sitemap");
        }
        xb.close("sitemapindex");
        xb.finish()
    }

    /// Read a previously written archive back. The `up` link is not read;
    /// it is always re-derived from the site capability list.
    pub fn from_xml(xml: &str, up: impl Into<String>) -> Result<Self, SyncError> {
        let mut archive = Self::new(up);
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut current: Option<&'static str> = None;
        let mut loc: Option<String> = None;
        let mut lastmod: Option<DateTime<Utc>> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    current = match e.local_name().as_ref() {
                        b"sitemap" | b"url" => {
                            loc = None;
                            lastmod = None;
                            None
                        }
                        b"loc" => Some("loc"),
                        b"lastmod" => Some("lastmod"),
                        _ => None,
                    };
                }
                Event::Text(t) => {
                    let text = t.unescape()?.into_owned();
                    match current {
                        Some("loc") => loc = Some(text),
                        Some("lastmod") => {
                            let parsed = DateTime::parse_from_rfc3339(&text).map_err(|e| {
                                SyncError::Xml {
                                    msg: format!("bad lastmod {}: {}", text, e),
                                }
                            })?;
                            lastmod = Some(parsed.with_timezone(&Utc));
                        }
                        _ => {}
                    }
                }
                Event::End(e) => {
                    current = None;
                    if matches!(e.local_name().as_ref(), b"sitemap" | b"url") {
                        match (loc.take(), lastmod.take()) {
                            (Some(l), Some(t)) => archive.insert(l, t),
                            _ => {
                                return Err(SyncError::Xml {
                                    msg: "archive entry without loc or lastmod".to_string(),
                                })
                            }
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ts;

    fn entry() -> UrlEntry {
        UrlEntry {
            lastmod: Some(ts(0)),
            mime_type: Some("application/pdf".to_string()),
            length: Some(1234),
            hash: Some("md5:abc".to_string()),
            links: vec![
                Link::typed(REL_DESCRIBED_BY, "http://r/resource/1/1/oai_dc", "application/xml"),
                Link::new(REL_COLLECTION, "http://r/handle/1/2"),
            ],
            ..UrlEntry::new("http://r/bitstream/1/1/1/a.pdf")
        }
    }

    #[test]
    fn resource_list_shape() {
        let xml = ResourceList::new(Some("http://r/rs/capabilitylist.xml".to_string()), vec![entry()])
            .to_xml();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\" xmlns:rs=\"http://www.openarchives.org/rs/terms/\">"));
        assert!(xml.contains("<rs:ln rel=\"up\" href=\"http://r/rs/capabilitylist.xml\"/><rs:md capability=\"resourcelist\"/>"));
        assert!(xml.contains("<loc>http://r/bitstream/1/1/1/a.pdf</loc><lastmod>1970-01-01T00:00:00Z</lastmod>"));
        assert!(xml.contains("<rs:md hash=\"md5:abc\" length=\"1234\" type=\"application/pdf\"/>"));
        assert!(xml.contains("<rs:ln rel=\"describedby\" href=\"http://r/resource/1/1/oai_dc\" type=\"application/xml\"/>"));
        assert!(xml.contains("<rs:ln rel=\"collection\" href=\"http://r/handle/1/2\"/>"));
        assert!(!xml.contains("change="));
        assert!(xml.ends_with("</urlset>"));
    }

    #[test]
    fn manifest_carries_paths() {
        let mut e = entry();
        e.path = Some("resources/1_1/1_a.pdf".to_string());
        let xml = ResourceList::manifest(None, vec![e]).to_xml();
        assert!(xml.contains("capability=\"resourcedump-manifest\""));
        assert!(xml.contains("path=\"resources/1_1/1_a.pdf\""));
        assert!(!xml.contains("rel=\"up\""));
    }

    #[test]
    fn change_list_defaults_and_overrides_change() {
        let mut deleted = UrlEntry::new("http://r/resource/1/9/oai_dc");
        deleted.change = Some(ChangeType::Remove);
        let list = ChangeList::new("http://r/rs/capabilitylist.xml", ts(10), ts(20), vec![entry(), deleted]);
        let xml = list.to_xml();
        assert!(xml.contains(
            "<rs:md capability=\"changelist\" from=\"1970-01-01T00:00:10Z\" until=\"1970-01-01T00:00:20Z\"/>"
        ));
        assert!(xml.contains("change=\"updated\""));
        assert!(xml.contains("<rs:md change=\"deleted\"/>"));
    }

    #[test]
    fn capability_list_links() {
        let mut caps = CapabilityList::new(
            Some("http://r/rs/description.xml".to_string()),
            Some("http://r/about".to_string()),
        );
        caps.set(Capability::ResourceList, "http://r/rs/resourcelist.xml")
            .set(Capability::ChangeList, "http://r/rs/changelist_a.xml");
        let xml = caps.to_xml();
        assert!(xml.contains("<rs:ln rel=\"describedby\" href=\"http://r/about\"/><rs:ln rel=\"up\" href=\"http://r/rs/description.xml\"/><rs:md capability=\"capabilitylist\"/>"));
        assert!(xml.contains("<url><loc>http://r/rs/resourcelist.xml</loc><rs:md capability=\"resourcelist\"/></url>"));
        assert!(xml.contains("<url><loc>http://r/rs/changelist_a.xml</loc><rs:md capability=\"changelist\"/></url>"));
        assert_eq!(caps.get(Capability::ResourceDump), None);
    }

    #[test]
    fn description_points_at_capability_list() {
        let xml = SourceDescription {
            described_by: None,
            capability_list: "http://r/rs/capabilitylist.xml".to_string(),
            at: ts(5),
        }
        .to_xml();
        assert!(xml.contains("<rs:md capability=\"description\" at=\"1970-01-01T00:00:05Z\"/>"));
        assert!(xml.contains("<loc>http://r/rs/capabilitylist.xml</loc><rs:md capability=\"capabilitylist\"/>"));
    }

    #[test]
    fn archive_orders_by_time_and_reads_back() {
        let mut archive = ChangeListArchive::new("http://r/rs/capabilitylist.xml");
        archive.insert("http://r/rs/changelist_b.xml", ts(200));
        archive.insert("http://r/rs/1_2/changelist_a.xml", ts(100));
        archive.insert("http://r/rs/changelist_a.xml", ts(100));
        let xml = archive.to_xml();
        assert!(xml.contains("<sitemapindex"));
        assert!(xml.contains("<rs:md capability=\"changelist-archive\"/>"));
        let first = xml.find("1_2/changelist_a").unwrap();
        let second = xml.find("rs/changelist_a").unwrap();
        let third = xml.find("changelist_b").unwrap();
        assert!(first < second && second < third);

        let back = ChangeListArchive::from_xml(&xml, "http://other/capabilitylist.xml").unwrap();
        assert_eq!(back.entries, archive.entries);
        assert_eq!(back.up, "http://other/capabilitylist.xml");
    }

    #[test]
    fn archive_read_rejects_incomplete_entries() {
        let xml = "<sitemapindex><sitemap><loc>http://x</loc></sitemap></sitemapindex>";
        assert!(matches!(
            ChangeListArchive::from_xml(xml, "up"),
            Err(SyncError::Xml { .. })
        ));
    }

    #[test]
    fn archive_read_unescapes_locations() {
        let xml = "<sitemapindex><sitemap><loc>http://x/?a=1&amp;b=2</loc><lastmod>2024-05-01T10:00:00Z</lastmod></sitemap></sitemapindex>";
        let archive = ChangeListArchive::from_xml(xml, "up").unwrap();
        assert!(archive.entries.contains_key("http://x/?a=1&b=2"));
    }
}
