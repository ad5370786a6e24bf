//! Visible page content, compressed for the model.
//!
//! The page is dumped once by [`DUMP_JS`] into a [`RawNode`] tree. Everything
//! after that happens here: visibility filtering, pointer assignment, wrapper
//! collapsing and YAML rendering. The pointers handed out are written back to
//! the live DOM by [`mark_pointers_js`] so actions can find their element.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Attribute carrying a pointer on the live element.
pub const POINTER_ATTR: &str = "data-tk-pointer";

const IGNORE_TAGS: [&str; 7] = ["SCRIPT", "STYLE", "NOSCRIPT", "HEAD", "META", "LINK", "HR"];
const IMAGE_TAGS: [&str; 2] = ["IMG", "SVG"];
const TRANSPARENT_TAGS: [&str; 2] = ["HTML", "BODY"];
const WRAPPER_TAGS: [&str; 8] = ["SPAN", "DIV", "CENTER", "UL", "P", "FOOTER", "SECTION", "SMALL"];

/// JavaScript injected into the page to dump the render tree as JSON.
///
/// Every element is kept in `window.__tkHandles`; its index there is the
/// `handle` used later to write pointers back. Pointers from an earlier dump
/// are removed first so a stale pointer can never resolve.
pub const DUMP_JS: &str = r#"
(() => {
  const IGNORE = new Set(['SCRIPT','STYLE','NOSCRIPT','HEAD','META','LINK','HR']);
  document.querySelectorAll('[data-tk-pointer]').forEach(el => el.removeAttribute('data-tk-pointer'));
  const handles = [];
  window.__tkHandles = handles;

  function isVisible(el) {
    let style = null;
    try { style = window.getComputedStyle(el); } catch (e) { style = null; }
    if (style && (style.display === 'none' || style.visibility === 'hidden')) return false;
    if (typeof el.checkVisibility === 'function' && !el.checkVisibility()) return false;
    if (style && style.display === 'contents') return true;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 || rect.height > 0;
  }

  function currentValue(el) {
    if (el.matches('input, textarea, select') && typeof el.value === 'string') return el.value;
    return el.getAttribute('value');
  }

  function dump(node) {
    if (node.nodeType === Node.TEXT_NODE) {
      return { kind: 'text', text: node.textContent || '' };
    }
    if (node.nodeType !== Node.ELEMENT_NODE) return null;
    const tag = node.tagName.toUpperCase();
    const handle = handles.length;
    handles.push(node);
    const visible = tag === 'HTML' || tag === 'BODY' || isVisible(node);
    const out = {
      kind: 'element',
      handle,
      tag,
      classes: Array.from(node.classList || []),
      id: node.id || '',
      value: currentValue(node),
      alt: node.getAttribute('alt'),
      visible,
      children: [],
    };
    if (visible && !IGNORE.has(tag)) {
      for (const child of node.childNodes) {
        const dumped = dump(child);
        if (dumped) out.children.push(dumped);
      }
    }
    return out;
  }

  return JSON.stringify(dump(document.documentElement));
})()
"#;

/// Script writing `assignments` back onto the elements of the last dump.
/// Evaluates to the number of elements marked.
pub fn mark_pointers_js(assignments: &[PointerAssignment]) -> String {
    let pairs: Vec<(usize, u32)> = assignments.iter().map(|a| (a.handle, a.pointer)).collect();
    let pairs = serde_json::to_string(&pairs).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
  const handles = window.__tkHandles || [];
  let marked = 0;
  for (const [handle, pointer] of {pairs}) {{
    const el = handles[handle];
    if (el) {{ el.setAttribute('{POINTER_ATTR}', String(pointer)); marked++; }}
  }}
  return marked;
}})()"#
    )
}

/// CSS selector resolving a pointer on the live page.
pub fn pointer_selector(pointer: u32) -> String {
    format!("[{POINTER_ATTR}=\"{pointer}\"]")
}

/// A node as dumped by [`DUMP_JS`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawNode {
    Text {
        text: String,
    },
    Element {
        handle: usize,
        tag: String,
        #[serde(default)]
        classes: Vec<String>,
        #[serde(default)]
        id: String,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        alt: Option<String>,
        visible: bool,
        #[serde(default)]
        children: Vec<RawNode>,
    },
}

/// Structured view of the visible page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PageNode {
    Text(String),
    Element(ElementNode),
    List(Vec<PageNode>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementNode {
    pub pointer: u32,
    pub tag: String,
    #[serde(skip)]
    pub classes: Vec<String>,
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PageNode>,
}

/// Issues pointers for one extraction. Starts at 1.
#[derive(Debug)]
pub struct PointerCounter {
    next: u32,
}

impl Default for PointerCounter {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl PointerCounter {
    pub fn issue(&mut self) -> u32 {
        let pointer = self.next;
        self.next += 1;
        pointer
    }
}

/// Link between a dumped element and the pointer it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerAssignment {
    pub handle: usize,
    pub pointer: u32,
}

/// Result of turning a raw dump into a structured tree.
#[derive(Debug, Default)]
pub struct StructuredPage {
    pub root: Option<PageNode>,
    pub assignments: Vec<PointerAssignment>,
    /// Tag name of every pointer handed out, including collapsed wrappers.
    pub pointers: BTreeMap<u32, String>,
}

/// Build the structured tree for `root`, numbering elements in document order.
pub fn build_tree(root: &RawNode) -> StructuredPage {
    let mut counter = PointerCounter::default();
    let mut page = StructuredPage::default();
    let root = build_node(root, &mut counter, &mut page);
    page.root = root;
    page
}

fn build_node(
    node: &RawNode,
    counter: &mut PointerCounter,
    page: &mut StructuredPage,
) -> Option<PageNode> {
    match node {
        RawNode::Text { text } => {
            let text = collapse_whitespace(text);
            (!text.is_empty()).then_some(PageNode::Text(text))
        }
        RawNode::Element {
            handle,
            tag,
            classes,
            id,
            value,
            alt,
            visible,
            children,
        } => {
            let tag = tag.to_uppercase();
            if !visible || IGNORE_TAGS.contains(&tag.as_str()) {
                return None;
            }

            if IMAGE_TAGS.contains(&tag.as_str()) {
                return alt
                    .as_deref()
                    .filter(|alt| !alt.is_empty())
                    .map(|alt| PageNode::Text(alt.to_string()));
            }

            if TRANSPARENT_TAGS.contains(&tag.as_str()) {
                let mut kids = build_children(children, counter, page);
                return match kids.len() {
                    0 => None,
                    1 => kids.pop(),
                    _ => Some(PageNode::List(kids)),
                };
            }

            let pointer = counter.issue();
            page.assignments.push(PointerAssignment {
                handle: *handle,
                pointer,
            });
            page.pointers.insert(pointer, tag.clone());

            let mut kids = Vec::with_capacity(children.len() + 1);
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                kids.push(PageNode::Text(value.to_string()));
            }
            kids.extend(build_children(children, counter, page));

            Some(PageNode::Element(ElementNode {
                pointer,
                tag,
                classes: classes.clone(),
                id: id.clone(),
                children: kids,
            }))
        }
    }
}

fn build_children(
    children: &[RawNode],
    counter: &mut PointerCounter,
    page: &mut StructuredPage,
) -> Vec<PageNode> {
    children
        .iter()
        .filter_map(|child| build_node(child, counter, page))
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fold purely structural wrappers into their single child and drop empty ones.
pub fn collapse_wrappers(node: PageNode) -> Option<PageNode> {
    match node {
        PageNode::Text(text) => Some(PageNode::Text(text)),
        PageNode::List(items) => {
            let items: Vec<_> = items.into_iter().filter_map(collapse_wrappers).collect();
            (!items.is_empty()).then_some(PageNode::List(items))
        }
        PageNode::Element(mut element) => {
            let mut children: Vec<_> = element
                .children
                .drain(..)
                .filter_map(collapse_wrappers)
                .collect();

            if WRAPPER_TAGS.contains(&element.tag.as_str()) {
                match children.len() {
                    0 => return None,
                    1 => return children.pop(),
                    _ => {}
                }
            }

            element.children = children;
            Some(PageNode::Element(element))
        }
    }
}

/// Render the cleaned tree as a top-level YAML list.
pub fn render_yaml(root: Option<PageNode>) -> Result<String, serde_yaml::Error> {
    let list = match root {
        Some(PageNode::List(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    serde_yaml::to_string(&list)
}

/// Text handed to the model for one page, plus what is needed to resolve pointers.
#[derive(Debug)]
pub struct PageContent {
    pub text: String,
    pub assignments: Vec<PointerAssignment>,
    pub pointers: BTreeMap<u32, String>,
}

/// Turn a raw dump into model-facing text, keeping an audit copy in `audit_dir`.
pub fn extract(raw: &RawNode, audit_dir: &Path) -> Result<PageContent, serde_yaml::Error> {
    let page = build_tree(raw);
    let text = render_yaml(page.root.and_then(collapse_wrappers))?;

    match write_audit_copy(audit_dir, &text) {
        Ok(path) => debug!("Content: {}", path.display()),
        Err(e) => warn!("could not write page content audit copy: {e}"),
    }

    Ok(PageContent {
        text,
        assignments: page.assignments,
        pointers: page.pointers,
    })
}

fn write_audit_copy(dir: &Path, text: &str) -> std::io::Result<PathBuf> {
    let stamp = chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
        .replace(':', "-");
    let path = dir.join(format!("browser_content_{stamp}.yaml"));
    std::fs::write(&path, text)?;
    Ok(path)
}
