//! Targeted edits over a parsed document.
//!
//! Callers walk the parsed tree with selectors and record an [`HtmlEdits`]
//! plan keyed by node id. The plan is then applied to the tree in place and
//! the result goes through `scraper`'s own serializer.

use std::collections::{BTreeMap, HashMap};

use ego_tree::{NodeId, Tree};
use html5ever::{ns, LocalName, QualName};
use scraper::node::{Element, Text};
use scraper::{ElementRef, Html, Node};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Edit {
    Remove,
    Unwrap,
    ReplaceWithText(String),
    Attributes(BTreeMap<String, Option<String>>),
}

/// Pending changes to a parsed document.
#[derive(Debug, Default, Clone)]
pub struct HtmlEdits {
    edits: HashMap<NodeId, Edit>,
}

impl HtmlEdits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Drop the node and everything under it.
    pub fn remove(&mut self, id: NodeId) {
        self.edits.insert(id, Edit::Remove);
    }

    /// Replace the node by its children.
    pub fn unwrap(&mut self, id: NodeId) {
        self.edits.insert(id, Edit::Unwrap);
    }

    /// Replace the node and its subtree by a text node.
    pub fn replace_with_text(&mut self, id: NodeId, text: impl Into<String>) {
        self.edits.insert(id, Edit::ReplaceWithText(text.into()));
    }

    /// Set (or add) an attribute. Structural edits on the same node win.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        self.attr_change(id, name, Some(value.into()));
    }

    /// Remove an attribute if present.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        self.attr_change(id, name, None);
    }

    fn attr_change(&mut self, id: NodeId, name: &str, value: Option<String>) {
        let entry = self
            .edits
            .entry(id)
            .or_insert_with(|| Edit::Attributes(BTreeMap::new()));
        if let Edit::Attributes(changes) = entry {
            changes.insert(name.to_string(), value);
        }
    }

    /// Apply every edit to `tree`. Nodes without a parent are left alone.
    pub fn apply(self, tree: &mut Tree<Node>) {
        for (id, edit) in self.edits {
            let has_parent = tree.get(id).is_some_and(|node| node.parent().is_some());
            if !has_parent {
                continue;
            }
            match edit {
                Edit::Remove => {
                    if let Some(mut node) = tree.get_mut(id) {
                        node.detach();
                    }
                }
                Edit::Unwrap => unwrap_node(tree, id),
                Edit::ReplaceWithText(text) => {
                    if let Some(mut node) = tree.get_mut(id) {
                        node.insert_before(Node::Text(Text { text: text.into() }));
                        node.detach();
                    }
                }
                Edit::Attributes(changes) => {
                    if let Some(mut node) = tree.get_mut(id) {
                        if let Node::Element(element) = node.value() {
                            update_attrs(element, changes);
                        }
                    }
                }
            }
        }
    }
}

/// Serialize a full document with `edits` applied.
#[must_use]
pub fn render_document(mut document: Html, edits: HtmlEdits) -> String {
    edits.apply(&mut document.tree);
    document.html()
}

/// Serialize a document produced by [`Html::parse_fragment`] with `edits`
/// applied, without the synthetic `<html>` wrapper.
#[must_use]
pub fn render_fragment(mut fragment: Html, edits: HtmlEdits) -> String {
    edits.apply(&mut fragment.tree);
    fragment.root_element().inner_html()
}

/// Parse `html` as a body fragment, let `plan` collect edits, and re-render.
pub fn edit_fragment<F>(html: &str, plan: F) -> String
where
    F: FnOnce(&Html, &mut HtmlEdits),
{
    let fragment = Html::parse_fragment(html);
    let mut edits = HtmlEdits::new();
    plan(&fragment, &mut edits);
    render_fragment(fragment, edits)
}

/// Whether any ancestor of `element` is named `tag`.
#[must_use]
pub fn has_ancestor(element: &ElementRef, tag: &str) -> bool {
    element
        .ancestors()
        .filter_map(|node| node.value().as_element())
        .any(|el| el.name() == tag)
}

/// Move the node's children in front of it, in order, then drop it.
fn unwrap_node(tree: &mut Tree<Node>, id: NodeId) {
    let children: Vec<NodeId> = match tree.get(id) {
        Some(node) => node.children().map(|child| child.id()).collect(),
        None => return,
    };
    let Some(mut node) = tree.get_mut(id) else {
        return;
    };
    for child in children {
        node.insert_id_before(child);
    }
    node.detach();
}

/// `Element::attr` binary-searches `attrs`, so they stay sorted by name.
fn update_attrs(element: &mut Element, changes: BTreeMap<String, Option<String>>) {
    for (name, value) in changes {
        let qualname = QualName::new(None, ns!(), LocalName::from(name.as_str()));
        let position = element
            .attrs
            .binary_search_by(|(key, _)| key.cmp(&qualname));
        match (position, value) {
            (Ok(index), Some(value)) => element.attrs[index].1 = value.into(),
            (Err(index), Some(value)) => element.attrs.insert(index, (qualname, value.into())),
            (Ok(index), None) => {
                element.attrs.remove(index);
            }
            (Err(_), None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use scraper::Selector;

    use super::*;

    fn first<'a>(doc: &'a Html, selector: &str) -> ElementRef<'a> {
        doc.select(&Selector::parse(selector).unwrap()).next().unwrap()
    }

    #[test]
    fn test_render_without_edits_is_stable() {
        let input = r#"<p class="a">Tom &amp; Jerry <img src="x.jpg" alt="&quot;q&quot;"><br></p>"#;
        let once = edit_fragment(input, |_, _| {});
        let twice = edit_fragment(&once, |_, _| {});
        assert_eq!(once, twice);
        assert!(once.contains("Tom &amp; Jerry"));
        assert!(once.contains(r#"src="x.jpg""#));
        assert!(once.contains(r#"alt="&quot;q&quot;""#));
        assert!(!once.contains("</img>"));
    }

    #[test]
    fn test_remove_unwrap_and_attrs() {
        let input = r#"<div><a href="/p"><img src="a.jpg"></a><span>gone</span></div>"#;
        let output = edit_fragment(input, |doc, edits| {
            edits.unwrap(first(doc, "a").id());
            edits.remove(first(doc, "span").id());
            let img = first(doc, "img").id();
            edits.set_attr(img, "src", "/media/a.jpg");
            edits.set_attr(img, "class", "alignleft");
        });
        assert_eq!(
            output,
            r#"<div><img class="alignleft" src="/media/a.jpg"></div>"#
        );
    }

    #[test]
    fn test_unwrap_keeps_child_order() {
        let input = "<p>a<span>b<em>c</em>d</span>e</p>";
        let output = edit_fragment(input, |doc, edits| {
            edits.unwrap(first(doc, "span").id());
        });
        assert_eq!(output, "<p>ab<em>c</em>de</p>");
    }

    #[test]
    fn test_nested_unwraps() {
        let input = "<div><div><p>x</p></div><p>y</p></div>";
        let output = edit_fragment(input, |doc, edits| {
            for div in doc.select(&Selector::parse("div").unwrap()) {
                edits.unwrap(div.id());
            }
        });
        assert_eq!(output, "<p>x</p><p>y</p>");
    }

    #[test]
    fn test_added_attr_is_visible_to_lookups() {
        let mut doc = Html::parse_fragment(r#"<img src="a.jpg" title="t">"#);
        let mut edits = HtmlEdits::new();
        let img = first(&doc, "img").id();
        edits.set_attr(img, "alt", "added");
        edits.set_attr(img, "width", "10");
        edits.remove_attr(img, "title");
        edits.apply(&mut doc.tree);

        let element = first(&doc, "img");
        assert_eq!(element.value().attr("alt"), Some("added"));
        assert_eq!(element.value().attr("src"), Some("a.jpg"));
        assert_eq!(element.value().attr("width"), Some("10"));
        assert_eq!(element.value().attr("title"), None);
    }

    #[test]
    fn test_replace_with_text_and_remove_attr() {
        let input = r#"<p style="x">one<br>two</p>"#;
        let output = edit_fragment(input, |doc, edits| {
            edits.replace_with_text(first(doc, "br").id(), " ");
            edits.remove_attr(first(doc, "p").id(), "style");
        });
        assert_eq!(output, "<p>one two</p>");
    }

    #[test]
    fn test_replacement_text_is_escaped() {
        let output = edit_fragment("<p><br></p>", |doc, edits| {
            edits.replace_with_text(first(doc, "br").id(), "a < b & c");
        });
        assert_eq!(output, "<p>a &lt; b &amp; c</p>");
    }

    #[test]
    fn test_script_text_is_raw() {
        let input = "<script>if (a < b && c) {}</script>";
        assert_eq!(edit_fragment(input, |_, _| {}), input);
    }

    #[test]
    fn test_render_document_keeps_doctype() {
        let doc = Html::parse_document(
            "<!DOCTYPE html><html><head></head><body><p>x</p></body></html>",
        );
        let out = render_document(doc, HtmlEdits::new());
        assert!(out.starts_with("<!DOCTYPE html><html>"));
        assert!(out.contains("<body><p>x</p></body>"));
    }
}
