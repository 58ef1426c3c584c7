//! Streaming rewrite of OOXML parts
//!
//! Parts are streamed through [`rewrite`] with quick-xml. Everything an
//! [`XmlEditor`] does not touch is written back as it was read, so untouched
//! markup keeps its original escaping and whitespace. Rebuilt attributes
//! encode tabs and line breaks as character references so that XML
//! attribute-value normalization cannot turn them into spaces.

use crate::error::{CoaError, CoaResult};
use quick_xml::escape::partial_escape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use std::borrow::Cow;

pub type Attrs = Vec<(String, String)>;

/// What to do with an element after [`XmlEditor::element`] has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Write the element (with any attribute edits) and keep streaming.
    Keep,
    /// Drop the element and its whole subtree.
    Drop,
    /// Buffer the subtree and hand it to [`XmlEditor::captured`].
    Capture,
}

/// An owned element subtree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Attrs,
    pub children: Vec<XmlChild>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlChild {
    Element(XmlNode),
    /// Unescaped character data
    Text(String),
}

impl XmlNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(XmlChild::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlChild::Text(text.into()));
        self
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        attr(&self.attrs, key)
    }

    /// Replace `key` in place, or append it.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        set_attr(&mut self.attrs, key, value)
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlNode> {
        self.children.iter().filter_map(|child| match child {
            XmlChild::Element(node) => Some(node),
            XmlChild::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut XmlNode> {
        self.children.iter_mut().filter_map(|child| match child {
            XmlChild::Element(node) => Some(node),
            XmlChild::Text(_) => None,
        })
    }

    /// Concatenated text of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                XmlChild::Text(text) => Some(text.as_str()),
                XmlChild::Element(_) => None,
            })
            .collect()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.retain(|child| matches!(child, XmlChild::Element(_)));
        self.children.insert(0, XmlChild::Text(text.into()));
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> CoaResult<()> {
        let start = rebuild(&self.name, &self.attrs);
        if self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;
        for child in &self.children {
            match child {
                XmlChild::Element(node) => node.write_to(writer)?,
                XmlChild::Text(text) => writer.write_event(Event::Text(text_event(text)))?,
            }
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

/// Hooks called while a part streams through [`rewrite`].
pub trait XmlEditor {
    /// Called for every start or empty element outside captured subtrees.
    /// `parent` is the local name of the enclosing element.
    fn element(&mut self, name: &str, parent: Option<&str>, attrs: &mut Attrs) -> CoaResult<Visit> {
        let _ = (name, parent, attrs);
        Ok(Visit::Keep)
    }

    /// Called for character data outside captured subtrees. Returning
    /// `Some` replaces the text.
    fn text(&mut self, parent: Option<&str>, text: &str) -> CoaResult<Option<String>> {
        let _ = (parent, text);
        Ok(None)
    }

    /// Receives a subtree for which [`XmlEditor::element`] returned
    /// [`Visit::Capture`]; the returned nodes are written in its place.
    fn captured(&mut self, node: XmlNode) -> CoaResult<Vec<XmlNode>> {
        Ok(vec![node])
    }
}

/// Local part of a possibly prefixed name (`x:row` → `row`).
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

pub fn attr<'a>(attrs: &'a Attrs, key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

pub fn set_attr(attrs: &mut Attrs, key: &str, value: impl Into<String>) {
    let value = value.into();
    match attrs.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = value,
        None => attrs.push((key.to_string(), value)),
    }
}

fn read_attrs(start: &BytesStart<'_>) -> CoaResult<Attrs> {
    let mut attrs = Vec::new();
    for attribute in start.attributes().with_checks(false) {
        let attribute = attribute?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|e| CoaError::Xml(format!("attribute name is not UTF-8: {e}")))?
            .to_string();
        let value = attribute.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok(attrs)
}

fn element_name(start: &BytesStart<'_>) -> CoaResult<String> {
    std::str::from_utf8(start.name().as_ref())
        .map(str::to_string)
        .map_err(|e| CoaError::Xml(format!("element name is not UTF-8: {e}")))
}

/// Character data escaped for element content; quotes stay literal.
fn text_event(text: &str) -> BytesText<'_> {
    BytesText::from_escaped(partial_escape(text))
}

/// Escape an attribute value for a double-quoted attribute.
fn escape_attr(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\t', '\n', '\r']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\t' => escaped.push_str("&#9;"),
            '\n' => escaped.push_str("&#10;"),
            '\r' => escaped.push_str("&#13;"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

fn rebuild(name: &str, attrs: &Attrs) -> BytesStart<'static> {
    let mut start = BytesStart::new(name.to_string());
    for (key, value) in attrs {
        let escaped = escape_attr(value);
        start.push_attribute(Attribute {
            key: QName(key.as_bytes()),
            value: Cow::Borrowed(escaped.as_bytes()),
        });
    }
    start
}

/// Read the subtree whose start tag was just consumed.
fn capture_subtree(reader: &mut Reader<&[u8]>, mut node: XmlNode) -> CoaResult<XmlNode> {
    let mut stack: Vec<XmlNode> = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let child = XmlNode {
                    name: element_name(&e)?,
                    attrs: read_attrs(&e)?,
                    children: Vec::new(),
                };
                stack.push(std::mem::replace(&mut node, child));
            }
            Event::Empty(e) => {
                node.children.push(XmlChild::Element(XmlNode {
                    name: element_name(&e)?,
                    attrs: read_attrs(&e)?,
                    children: Vec::new(),
                }));
            }
            Event::End(_) => match stack.pop() {
                Some(parent) => {
                    let child = std::mem::replace(&mut node, parent);
                    node.children.push(XmlChild::Element(child));
                }
                None => return Ok(node),
            },
            Event::Text(e) => {
                let text = e.unescape()?.into_owned();
                if !text.is_empty() {
                    node.children.push(XmlChild::Text(text));
                }
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                node.children.push(XmlChild::Text(text));
            }
            Event::Eof => {
                return Err(CoaError::Xml(format!(
                    "unexpected end of document inside <{}>",
                    node.name
                )))
            }
            _ => {}
        }
    }
}

/// Skip the subtree whose start tag was just consumed.
fn skip_subtree(reader: &mut Reader<&[u8]>) -> CoaResult<()> {
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(()),
            Event::End(_) => depth -= 1,
            Event::Eof => {
                return Err(CoaError::Xml(
                    "unexpected end of document in dropped element".to_string(),
                ))
            }
            _ => {}
        }
    }
}

/// Stream `xml` through `editor` and return the rewritten document.
pub fn rewrite<E: XmlEditor>(xml: &str, editor: &mut E) -> CoaResult<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut open: Vec<String> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                let local = local_name(&name).to_string();
                let parent = open.last().map(|p| local_name(p).to_string());
                let original = read_attrs(&e)?;
                let mut attrs = original.clone();
                match editor.element(&local, parent.as_deref(), &mut attrs)? {
                    Visit::Keep => {
                        if attrs == original {
                            writer.write_event(Event::Start(e))?;
                        } else {
                            writer.write_event(Event::Start(rebuild(&name, &attrs)))?;
                        }
                        open.push(name);
                    }
                    Visit::Drop => skip_subtree(&mut reader)?,
                    Visit::Capture => {
                        let node = capture_subtree(
                            &mut reader,
                            XmlNode {
                                name,
                                attrs,
                                children: Vec::new(),
                            },
                        )?;
                        for replacement in editor.captured(node)? {
                            replacement.write_to(&mut writer)?;
                        }
                    }
                }
            }
            Event::Empty(e) => {
                let name = element_name(&e)?;
                let local = local_name(&name).to_string();
                let parent = open.last().map(|p| local_name(p).to_string());
                let original = read_attrs(&e)?;
                let mut attrs = original.clone();
                match editor.element(&local, parent.as_deref(), &mut attrs)? {
                    Visit::Keep if attrs == original => writer.write_event(Event::Empty(e))?,
                    Visit::Keep => writer.write_event(Event::Empty(rebuild(&name, &attrs)))?,
                    Visit::Drop => {}
                    Visit::Capture => {
                        let node = XmlNode {
                            name,
                            attrs,
                            children: Vec::new(),
                        };
                        for replacement in editor.captured(node)? {
                            replacement.write_to(&mut writer)?;
                        }
                    }
                }
            }
            Event::End(e) => {
                open.pop();
                writer.write_event(Event::End(e))?;
            }
            Event::Text(e) => {
                let parent = open.last().map(|p| local_name(p).to_string());
                let text = e.unescape()?.into_owned();
                match editor.text(parent.as_deref(), &text)? {
                    Some(replacement) => {
                        writer.write_event(Event::Text(text_event(&replacement)))?
                    }
                    None => writer.write_event(Event::Text(e))?,
                }
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| CoaError::Xml(format!("rewritten document is not UTF-8: {e}")))
}

/// Collect every element named `local` (start or empty) with its attributes.
pub fn find_elements(xml: &str, local: &str) -> CoaResult<Vec<Attrs>> {
    struct Finder<'a> {
        local: &'a str,
        found: Vec<Attrs>,
    }

    impl XmlEditor for Finder<'_> {
        fn element(&mut self, name: &str, _: Option<&str>, attrs: &mut Attrs) -> CoaResult<Visit> {
            if name == self.local {
                self.found.push(attrs.clone());
            }
            Ok(Visit::Keep)
        }
    }

    let mut finder = Finder {
        local,
        found: Vec::new(),
    };
    rewrite(xml, &mut finder)?;
    Ok(finder.found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Renamer;

    impl XmlEditor for Renamer {
        fn element(&mut self, name: &str, _: Option<&str>, attrs: &mut Attrs) -> CoaResult<Visit> {
            match name {
                "drop" => Ok(Visit::Drop),
                "item" => {
                    set_attr(attrs, "id", "x");
                    Ok(Visit::Keep)
                }
                _ => Ok(Visit::Keep),
            }
        }

        fn text(&mut self, parent: Option<&str>, text: &str) -> CoaResult<Option<String>> {
            Ok((parent == Some("item")).then(|| text.to_uppercase()))
        }
    }

    #[test]
    fn test_rewrite_keeps_untouched_markup() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<root a="1 &amp; 2"><other>x &lt; y</other></root>"#;
        let out = rewrite(xml, &mut Renamer).unwrap();
        assert_eq!(out, xml);
    }

    #[test]
    fn test_rewrite_edits_attrs_text_and_drops() {
        let xml = r#"<root><item id="1">a&amp;b</item><drop><deep/></drop><item id="2"/></root>"#;
        let out = rewrite(xml, &mut Renamer).unwrap();
        assert_eq!(out, r#"<root><item id="x">A&amp;B</item><item id="x"/></root>"#);
    }

    struct RowDoubler;

    impl XmlEditor for RowDoubler {
        fn element(&mut self, name: &str, _: Option<&str>, _: &mut Attrs) -> CoaResult<Visit> {
            Ok(if name == "row" { Visit::Capture } else { Visit::Keep })
        }

        fn captured(&mut self, node: XmlNode) -> CoaResult<Vec<XmlNode>> {
            let mut copy = node.clone();
            copy.set_attr("r", "copy");
            Ok(vec![node, copy])
        }
    }

    #[test]
    fn test_capture_replaces_subtree() {
        let xml = r#"<sheetData><row r="1"><c r="A1"><v>1</v></c></row><row r="2"/></sheetData>"#;
        let out = rewrite(xml, &mut RowDoubler).unwrap();
        assert_eq!(
            out,
            concat!(
                r#"<sheetData><row r="1"><c r="A1"><v>1</v></c></row>"#,
                r#"<row r="copy"><c r="A1"><v>1</v></c></row>"#,
                r#"<row r="2"/><row r="copy"/></sheetData>"#
            )
        );
    }

    struct Mover;

    impl XmlEditor for Mover {
        fn element(&mut self, name: &str, _: Option<&str>, attrs: &mut Attrs) -> CoaResult<Visit> {
            if name == "dataValidation" {
                set_attr(attrs, "sqref", "A53");
            }
            Ok(Visit::Keep)
        }
    }

    #[test]
    fn test_attribute_line_breaks_survive_rewrite() {
        let xml = r#"<dataValidations><dataValidation prompt="Line one&#10;Line two&#9;end" sqref="A52"/></dataValidations>"#;

        let untouched = rewrite(xml, &mut Renamer).unwrap();
        assert_eq!(untouched, xml);

        let edited = rewrite(xml, &mut Mover).unwrap();
        assert_eq!(
            edited,
            r#"<dataValidations><dataValidation prompt="Line one&#10;Line two&#9;end" sqref="A53"/></dataValidations>"#
        );
    }

    #[test]
    fn test_captured_attributes_keep_character_references() {
        let xml = r#"<sheetData><row r="1" x="a&#13;&#10;b &quot;q&quot;"/></sheetData>"#;
        let out = rewrite(xml, &mut RowDoubler).unwrap();
        assert!(out.contains(r#"x="a&#13;&#10;b &quot;q&quot;""#), "{out}");
        assert!(!out.contains('\n'));
    }

    #[test]
    fn test_find_elements() {
        let xml = r#"<sheets><sheet name="A" r:id="rId1"/><sheet name="B" r:id="rId2"/></sheets>"#;
        let found = find_elements(xml, "sheet").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(attr(&found[1], "r:id"), Some("rId2"));
    }

    #[test]
    fn test_node_text_helpers() {
        let mut node = XmlNode::new("f").with_attr("t", "shared").with_text("A1+1");
        assert_eq!(node.text(), "A1+1");
        node.set_text("A2+1");
        assert_eq!(node.text(), "A2+1");
        assert_eq!(node.attr("t"), Some("shared"));
        assert_eq!(XmlNode::new("x:row").local_name(), "row");
    }
}
