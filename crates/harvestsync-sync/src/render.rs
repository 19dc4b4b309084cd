//! Metadata crosswalk interface and the built-in XML renderer.

use std::io::Write;

use crate::error::SyncError;
use crate::model::{Item, MetadataFormat};
use crate::xml::XmlBuilder;

/// Renders an item's metadata in a given export format.
pub trait MetadataRenderer: Send + Sync {
    /// Write the export of `item` in `format` to `out`.
    fn render(
        &self,
        item: &Item,
        format: &MetadataFormat,
        out: &mut dyn Write,
    ) -> Result<(), SyncError>;

    /// Render into a fresh buffer.
    fn render_to_vec(&self, item: &Item, format: &MetadataFormat) -> Result<Vec<u8>, SyncError> {
        let mut buf = Vec::new();
        self.render(item, format, &mut buf)?;
        Ok(buf)
    }
}

const OAI_DC_PREFIX: &str = "oai_dc";
const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";

/// Renders flat item metadata as XML.
///
/// `oai_dc` produces a Dublin Core record from the `dc.*` fields, keeping
/// only the element name (`dc.contributor.author` becomes `dc:contributor`).
/// Any other format produces a generic `<metadata>` record in the format's
/// namespace with one `<field>` per value.
#[derive(Debug, Default, Clone)]
pub struct XmlMetadataRenderer;

impl XmlMetadataRenderer {
    /// Create a renderer.
    pub fn new() -> Self {
        Self
    }

    fn dublin_core(item: &Item, format: &MetadataFormat) -> String {
        let mut xb = XmlBuilder::new();
        xb.header();
        xb.open_with(
            "oai_dc:dc",
            &[
                ("xmlns:oai_dc", format.namespace.as_str()),
                ("xmlns:dc", DC_NAMESPACE),
            ],
        );
        for value in &item.metadata {
            let mut parts = value.field.split('.');
            if parts.next() != Some("dc") {
                continue;
            }
            if let Some(element) = parts.next().filter(|e| !e.is_empty()) {
                xb.elem(&format!("dc:{}", element), &value.value);
            }
        }
        xb.elem("dc:identifier", &item.handle);
        xb.close("oai_dc:dc");
        xb.finish()
    }

    fn generic(item: &Item, format: &MetadataFormat) -> String {
        let mut xb = XmlBuilder::new();
        xb.header();
        xb.open_with(
            "metadata",
            &[
                ("xmlns", format.namespace.as_str()),
                ("handle", item.handle.as_str()),
            ],
        );
        for value in &item.metadata {
            xb.open_with("field", &[("name", value.field.as_str())]);
            xb.elem("value", &value.value);
            xb.close("field");
        }
        xb.close("metadata");
        xb.finish()
    }
}

impl MetadataRenderer for XmlMetadataRenderer {
    fn render(
        &self,
        item: &Item,
        format: &MetadataFormat,
        out: &mut dyn Write,
    ) -> Result<(), SyncError> {
        let doc = if format.prefix == OAI_DC_PREFIX {
            Self::dublin_core(item, format)
        } else {
            Self::generic(item, format)
        };
        out.write_all(doc.as_bytes())
            .map_err(|e| SyncError::Render {
                handle: item.handle.clone(),
                prefix: format.prefix.clone(),
                msg: e.to_string(),
            })
    }
}
