//! JSON page fixtures used by the CLI and scenario tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Document, NodeId};

/// A page description: origin plus the contents of `head` and `body`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageFixture {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub head: Vec<ElementFixture>,
    #[serde(default)]
    pub body: Vec<ElementFixture>,
}

/// One element and its subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementFixture {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Rendered `[width, height]`
    #[serde(default)]
    pub size: Option<[u32; 2]>,
    #[serde(default)]
    pub children: Vec<ElementFixture>,
}

fn default_url() -> String {
    "https://localhost/".to_string()
}

impl PageFixture {
    pub fn parse(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// Build a fresh document from the fixture.
    ///
    /// Mutation records produced while building are discarded, the page
    /// starts "already loaded".
    pub fn build_document(&self) -> Document {
        let mut document = Document::new();
        let head = document.head();
        let body = document.body();
        for element in &self.head {
            let node = element.build(&mut document);
            document.append_child(head, node);
        }
        for element in &self.body {
            let node = element.build(&mut document);
            document.append_child(body, node);
        }
        document.take_mutations();
        document
    }
}

impl ElementFixture {
    /// Create the subtree detached from the document
    pub fn build(&self, document: &mut Document) -> NodeId {
        let attributes: Vec<(&str, &str)> = self
            .attrs
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let node = document.build(&self.tag, &attributes, self.text.as_deref());
        if let Some([width, height]) = self.size {
            document.set_size(node, width, height);
        }
        for child in &self.children {
            let child = child.build(document);
            document.append_child(node, child);
        }
        node
    }
}
