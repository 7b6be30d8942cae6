//! Loading fragment markup into an owned element tree.
//!
//! Markup is parsed with `xot` and copied into [`XmlElement`] values so the
//! schema validator and the converter can walk it without holding the arena.
//! Only the element and attribute names of the fragment vocabulary are
//! resolved; unknown attributes are dropped and unknown elements keep their
//! tag name so the validator can reject them by name.

use std::collections::BTreeMap;
use std::path::Path;

use xot::{NameId, Node, ParseError, Xot};

use crate::error::{Error, Result};

const ELEMENT_NAMES: &[&str] = &[
    "cruise",
    "pipelines",
    "pipeline",
    "materials",
    "svn",
    "hg",
    "git",
    "dependency",
    "filter",
    "ignore",
    "stage",
    "approval",
    "jobs",
    "job",
    "tasks",
    "exec",
    "arg",
    "ant",
    "rake",
    "fetchartifact",
    "environments",
    "environment",
    "environmentvariables",
    "variable",
    "value",
];

const ATTRIBUTE_NAMES: &[&str] = &[
    "schemaVersion",
    "group",
    "name",
    "lockBehavior",
    "labeltemplate",
    "url",
    "username",
    "password",
    "branch",
    "dest",
    "checkexternals",
    "pipeline",
    "stage",
    "pattern",
    "type",
    "command",
    "args",
    "workingdir",
    "target",
];

/// An element of a parsed fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<XmlElement>,
    /// Text content when the element holds a single text node.
    pub text: Option<String>,
}

impl XmlElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Path segment identifying this element among its siblings, e.g.
    /// `pipeline[@name='up42']`.
    pub fn segment(&self) -> String {
        match (self.attribute("name"), self.attribute("group")) {
            (Some(name), _) => format!("{}[@name='{}']", self.name, name),
            (None, Some(group)) => format!("{}[@group='{}']", self.name, group),
            (None, None) => self.name.clone(),
        }
    }
}

struct Vocabulary {
    elements: Vec<(NameId, &'static str)>,
    attributes: Vec<(NameId, &'static str)>,
}

impl Vocabulary {
    fn register(xot: &mut Xot) -> Self {
        Self {
            elements: ELEMENT_NAMES.iter().map(|n| (xot.add_name(n), *n)).collect(),
            attributes: ATTRIBUTE_NAMES.iter().map(|n| (xot.add_name(n), *n)).collect(),
        }
    }

    fn element_name(&self, xot: &Xot, node: Node) -> String {
        let Some(element) = xot.element(node) else {
            return "unknown".to_string();
        };
        let id = element.name();
        self.elements
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| xot.local_name_str(id).to_string())
    }
}

fn build(xot: &Xot, vocabulary: &Vocabulary, node: Node) -> XmlElement {
    let attributes = vocabulary
        .attributes
        .iter()
        .filter_map(|(id, name)| {
            xot.get_attribute(node, *id)
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect();
    let children = xot
        .children(node)
        .filter(|child| xot.is_element(*child))
        .map(|child| build(xot, vocabulary, child))
        .collect();
    XmlElement {
        name: vocabulary.element_name(xot, node),
        attributes,
        children,
        text: xot.text_content_str(node).map(|t| t.trim().to_string()),
    }
}

/// Line of the byte `offset` in `text`, counting from 1.
fn line_at(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

fn malformed(file: &Path, text: &str, error: &ParseError) -> Error {
    Error::MalformedDocument {
        file: file.to_path_buf(),
        line: Some(line_at(text, error.span().start)),
        message: error.to_string(),
    }
}

/// Parse fragment markup, failing with `MalformedDocument` when it is not
/// well-formed.
pub fn load_document(file: &Path, text: &str) -> Result<XmlElement> {
    let mut xot = Xot::new();
    let vocabulary = Vocabulary::register(&mut xot);

    let document = xot.parse(text).map_err(|e| malformed(file, text, &e))?;
    let root = xot
        .children(document)
        .find(|node| xot.is_element(*node))
        .ok_or_else(|| Error::MalformedDocument {
            file: file.to_path_buf(),
            line: None,
            message: "document has no root element".to_string(),
        })?;

    Ok(build(&xot, &vocabulary, root))
}
