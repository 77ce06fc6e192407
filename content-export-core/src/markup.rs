//! Owned XML element tree used for a node's raw metadata.
//!
//! Library archives are read once with `quick-xml` into [`Element`] values and
//! written back with the same crate's writer. Whitespace-only text between
//! elements is dropped on read; the writer re-indents the document.

use std::borrow::Cow;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::ParseError;

/// An XML element with its attributes (document order) and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    CData(String),
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn with_cdata(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::CData(text.into()));
        self
    }

    /// Element name without any namespace prefix.
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Direct child elements, in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Direct child elements with the given local name.
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.local_name() == local)
    }

    pub fn child(&self, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.local_name() == local)
    }

    /// Concatenated text and CDATA content of this element's direct children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                XmlNode::Text(t) | XmlNode::CData(t) => out.push_str(t),
                XmlNode::Element(_) => {}
            }
        }
        out
    }

    /// Text of the first child element with the given local name, trimmed.
    pub fn child_text(&self, local: &str) -> Option<String> {
        self.child(local).map(|c| c.text().trim().to_string())
    }

    /// Drops direct child elements for which `keep` returns false.
    pub fn retain_elements<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Element) -> bool,
    {
        self.children.retain(|c| match c {
            XmlNode::Element(e) => keep(e),
            _ => true,
        });
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name)
}

/// Parse a whole XML document and return its root element.
pub fn parse_document(content: &str) -> Result<Element, ParseError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut text = String::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event()?;
        if root.is_some() {
            match event {
                Event::Eof => break,
                Event::Text(e) if <[u8] as AsRef<[u8]>>::as_ref(&e).iter().all(u8::is_ascii_whitespace) => {}
                Event::Start(_)
                | Event::Empty(_)
                | Event::End(_)
                | Event::Text(_)
                | Event::CData(_)
                | Event::GeneralRef(_) => {
                    return Err(ParseError::Unbalanced("content after the root element".into()));
                }
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(e) => {
                flush_text(&mut stack, &mut text);
                stack.push(element_from_start(&e)?);
            }
            Event::Empty(e) => {
                flush_text(&mut stack, &mut text);
                let element = element_from_start(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::Element(element)),
                    None => root = Some(element),
                }
            }
            Event::End(_) => {
                flush_text(&mut stack, &mut text);
                let element = stack
                    .pop()
                    .ok_or_else(|| ParseError::Unbalanced("closing tag without opening tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::Element(element)),
                    None => root = Some(element),
                }
            }
            Event::Text(e) => {
                if !stack.is_empty() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                } else if !<[u8] as AsRef<[u8]>>::as_ref(&e).iter().all(u8::is_ascii_whitespace) {
                    return Err(ParseError::Unbalanced("text outside the root element".into()));
                }
            }
            Event::GeneralRef(e) => {
                if !stack.is_empty() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    match resolve_entity(&entity) {
                        Some(resolved) => text.push_str(&resolved),
                        None => {
                            text.push('&');
                            text.push_str(&entity);
                            text.push(';');
                        }
                    }
                }
            }
            Event::CData(e) => {
                flush_text(&mut stack, &mut text);
                if let Some(parent) = stack.last_mut() {
                    let data = String::from_utf8(e.into_inner().into_owned())?;
                    parent.children.push(XmlNode::CData(data));
                }
            }
            Event::Eof => break,
            // declarations, comments, processing instructions, doctype
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ParseError::Unbalanced(format!(
            "document ended inside <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }
    root.ok_or_else(|| ParseError::Unbalanced("document has no root element".into()))
}

fn flush_text(stack: &mut [Element], text: &mut String) {
    if text.is_empty() {
        return;
    }
    if let Some(parent) = stack.last_mut() {
        if !text.trim().is_empty() {
            parent.children.push(XmlNode::Text(std::mem::take(text)));
        }
    }
    text.clear();
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, ParseError> {
    let name = String::from_utf8(start.name().as_ref().to_vec())?;
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8(attr.key.as_ref().to_vec())?;
        let raw = String::from_utf8(attr.value.to_vec())?;
        let value = unescape(&raw)?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn resolve_entity(entity: &str) -> Option<Cow<'static, str>> {
    match entity {
        "apos" => return Some(Cow::Borrowed("'")),
        "quot" => return Some(Cow::Borrowed("\"")),
        "lt" => return Some(Cow::Borrowed("<")),
        "gt" => return Some(Cow::Borrowed(">")),
        "amp" => return Some(Cow::Borrowed("&")),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };
    code.and_then(char::from_u32)
        .map(|c| Cow::Owned(c.to_string()))
}

/// Serialize `root` as a standalone, indented UTF-8 document.
pub fn to_document_string(root: &Element) -> Result<String, ParseError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_element(&mut writer, root)?;
    let mut out = String::from_utf8(writer.into_inner())?;
    out.push('\n');
    Ok(out)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), ParseError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(writer, e)?,
            XmlNode::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
            XmlNode::CData(t) => writer.write_event(Event::CData(BytesCData::new(t.as_str())))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}
