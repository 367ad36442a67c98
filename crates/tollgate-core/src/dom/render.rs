//! Indented HTML serialization for inspection and snapshots.

use std::fmt::Write as _;

use super::{Document, NodeId};

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "link", "meta", "source"];

/// Serialize the whole document, two spaces per nesting level.
pub fn render_html(document: &Document) -> String {
    let mut output = String::new();
    render_node(document, document.root(), 0, &mut output);
    output
}

fn render_node(document: &Document, node: NodeId, depth: usize, output: &mut String) {
    let indent = "  ".repeat(depth);
    let tag = document.tag(node);

    let _ = write!(output, "{indent}<{tag}");
    let classes = document.classes(node);
    if !classes.is_empty() {
        let _ = write!(output, " class=\"{}\"", escape(&classes.join(" ")));
    }
    for (name, value) in document.attributes(node) {
        if value.is_empty() {
            let _ = write!(output, " {name}");
        } else {
            let _ = write!(output, " {name}=\"{}\"", escape(&value));
        }
    }
    let style = document.style_text(node);
    if !style.is_empty() {
        let _ = write!(output, " style=\"{}\"", escape(&style));
    }
    output.push('>');

    if VOID_ELEMENTS.contains(&tag) {
        output.push('\n');
        return;
    }

    let children = document.children(node);
    let text = document.text(node).map(escape);
    if children.is_empty() {
        let _ = writeln!(output, "{}</{tag}>", text.unwrap_or_default());
        return;
    }

    output.push('\n');
    if let Some(text) = text {
        let _ = writeln!(output, "{indent}  {text}");
    }
    for child in children {
        render_node(document, *child, depth + 1, output);
    }
    let _ = writeln!(output, "{indent}</{tag}>");
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_attributes_classes_and_style() {
        let mut document = Document::new();
        let body = document.body();
        let link = document.build(
            "a",
            &[("class", "cta"), ("href", "#"), ("title", "Say \"hi\"")],
            Some("Shop"),
        );
        document.set_style(link, "opacity", "0.6");
        let input = document.build("input", &[("disabled", "")], None);
        document.append_child(body, link);
        document.append_child(body, input);

        let html = render_html(&document);
        assert_eq!(
            html,
            "<html>\n  <head></head>\n  <body>\n    <a class=\"cta\" href=\"#\" title=\"Say &quot;hi&quot;\" style=\"opacity: 0.6\">Shop</a>\n    <input disabled>\n  </body>\n</html>\n"
        );
    }
}
