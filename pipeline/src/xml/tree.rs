//! Tolerant XML parsing into a generic node tree.
//!
//! The authority's output is not prefix-consistent: the same protocol node
//! arrives as `<protNFe>`, `<nfe:protNFe>`, or worse depending on which of
//! their gateways answered. The tree built here strips prefixes and keeps
//! local names, attributes, text, and child order. Unknown elements are
//! kept, not dropped, so a response field we have never heard of survives a
//! round trip through [`XmlNode::to_xml`].

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::xml::XmlError;

/// One element of a parsed document: local name, attributes in document
/// order, concatenated trimmed text, and child elements in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parses a document and returns its root element.
    ///
    /// Namespace prefixes are stripped from element and attribute names.
    /// Comments, processing instructions, and the XML declaration are
    /// skipped. Whitespace-only text is discarded.
    pub fn parse(xml: &str) -> Result<XmlNode, XmlError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlNode> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    stack.push(node_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let node = node_from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        // A self-closing root element.
                        None => return Ok(node),
                    }
                }
                Event::Text(text) => {
                    let value = text.unescape()?;
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some(current) = stack.last_mut() {
                        if !current.text.is_empty() {
                            current.text.push(' ');
                        }
                        current.text.push_str(trimmed);
                    }
                }
                Event::CData(data) => {
                    let raw = data.into_inner();
                    let value = String::from_utf8_lossy(&raw);
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some(current) = stack.last_mut() {
                        if !current.text.is_empty() {
                            current.text.push(' ');
                        }
                        current.text.push_str(trimmed);
                    }
                }
                Event::End(_) => {
                    let finished = match stack.pop() {
                        Some(node) => node,
                        None => continue,
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(finished),
                        None => return Ok(finished),
                    }
                }
                Event::Eof => {
                    return match stack.pop() {
                        // Truncated input: report the element left open.
                        Some(node) => Err(XmlError::UnexpectedEof(node.name)),
                        None => Err(XmlError::EmptyDocument),
                    };
                }
                // Declarations, comments, doctypes, processing instructions.
                _ => {}
            }
        }
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for the first descendant (or self) with the name.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Walks a path of child names from this node.
    pub fn descendant(&self, path: &[&str]) -> Option<&XmlNode> {
        let mut current = self;
        for name in path {
            current = current.child(name)?;
        }
        Some(current)
    }

    /// Attribute value by local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed text of a direct child, when present and non-empty.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Serializes this node and everything under it back to XML.
    ///
    /// The output is canonical in this crate's sense: local names, attribute
    /// order as stored, no insignificant whitespace. Parsing the result
    /// yields an equal tree.
    pub fn to_xml(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        self.write_into(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|_| XmlError::NonUtf8)
    }

    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), XmlError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.text.is_empty() && self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;
        if !self.text.is_empty() {
            writer.write_event(Event::Text(BytesText::new(&self.text)))?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

fn node_from_start(start: &BytesStart<'_>) -> Result<XmlNode, XmlError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        // xmlns and xmlns:prefix declarations are namespace plumbing, not
        // data. Matching on the qualified name catches both forms; the
        // local name of xmlns:nfe is just "nfe".
        let qualified = attr.key.as_ref();
        if qualified == b"xmlns" || qualified.starts_with(b"xmlns:") {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok(XmlNode {
        name,
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}
