//! Minimal XML writer for sync documents and metadata exports.

/// Append-only XML string builder.
pub struct XmlBuilder {
    buf: String,
}

impl XmlBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Write the XML declaration.
    pub fn header(&mut self) -> &mut Self {
        self.buf
            .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self
    }

    /// Open a tag without attributes.
    pub fn open(&mut self, tag: &str) -> &mut Self {
        self.open_with(tag, &[])
    }

    /// Open a tag with attributes.
    pub fn open_with(&mut self, tag: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.buf.push('<');
        self.buf.push_str(tag);
        self.attrs(attrs);
        self.buf.push('>');
        self
    }

    /// Write a self-closing tag with attributes.
    pub fn empty(&mut self, tag: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.buf.push('<');
        self.buf.push_str(tag);
        self.attrs(attrs);
        self.buf.push_str("/>");
        self
    }

    /// Close a tag.
    pub fn close(&mut self, tag: &str) -> &mut Self {
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push('>');
        self
    }

    /// Write `<tag>value</tag>` with the value escaped.
    pub fn elem(&mut self, tag: &str, value: &str) -> &mut Self {
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push('>');
        self.buf.push_str(&escape(value));
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push('>');
        self
    }

    /// Write an element only when a value is present.
    pub fn elem_opt(&mut self, tag: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value {
            self.elem(tag, v);
        }
        self
    }

    fn attrs(&mut self, attrs: &[(&str, &str)]) {
        for (name, value) in attrs {
            self.buf.push(' ');
            self.buf.push_str(name);
            self.buf.push_str("=\"");
            self.buf.push_str(&escape(value));
            self.buf.push('"');
        }
    }

    /// Consume the builder and return the document.
    pub fn finish(self) -> String {
        self.buf
    }
}

impl Default for XmlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape text for use in element content or attribute values.
pub fn escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close() {
        let mut xb = XmlBuilder::new();
        xb.open("url").close("url");
        assert_eq!(xb.finish(), "<url></url>");
    }

    #[test]
    fn attributes_are_escaped() {
        let mut xb = XmlBuilder::new();
        xb.empty("rs:ln", &[("rel", "up"), ("href", "http://x/?a=1&b=\"2\"")]);
        assert_eq!(
            xb.finish(),
            "<rs:ln rel=\"up\" href=\"http://x/?a=1&amp;b=&quot;2&quot;\"/>"
        );
    }

    #[test]
    fn elem_escapes_text() {
        let mut xb = XmlBuilder::new();
        xb.elem("loc", "a < b & 'c'");
        assert_eq!(xb.finish(), "<loc>a &lt; b &amp; &apos;c&apos;</loc>");
    }

    #[test]
    fn elem_opt_skips_none() {
        let mut xb = XmlBuilder::new();
        xb.elem_opt("changefreq", None).elem_opt("lastmod", Some("x"));
        assert_eq!(xb.finish(), "<lastmod>x</lastmod>");
    }

    #[test]
    fn header_is_first_line() {
        let mut xb = XmlBuilder::new();
        xb.header().open_with("urlset", &[("xmlns", "ns")]);
        assert!(xb
            .finish()
            .starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"ns\">"));
    }
}
