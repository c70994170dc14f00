//! DOM boundary
//!
//! The small slice of `document` the loader needs: create an element, set its
//! attributes and text, append it to `<head>`, and find one again with a
//! `tag[attr]` selector. [`HeadDocument`] keeps the head in memory and renders
//! it back to HTML.

use std::cell::RefCell;

/// Handle to an element created by a [`Document`].
pub type ElementId = usize;

pub trait Document {
    fn create_element(&self, tag: &str) -> ElementId;

    fn set_attribute(&self, element: ElementId, name: &str, value: &str);

    fn set_text_content(&self, element: ElementId, text: &str);

    fn text_content(&self, element: ElementId) -> Option<String>;

    fn append_to_head(&self, element: ElementId);

    /// First element in `<head>` matching `tag`, `[attr]`, `tag[attr]` or
    /// `tag[attr="value"]`.
    fn query_selector(&self, selector: &str) -> Option<ElementId>;
}

#[derive(Debug, Clone, Default)]
struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
}

impl Element {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Selector {
    tag: Option<String>,
    attribute: Option<(String, Option<String>)>,
}

impl Selector {
    fn parse(selector: &str) -> Option<Self> {
        let selector = selector.trim();
        let (tag, rest) = match selector.find('[') {
            Some(idx) => (&selector[..idx], Some(&selector[idx..])),
            None => (selector, None),
        };
        let tag = (!tag.is_empty()).then(|| tag.to_ascii_lowercase());

        let attribute = match rest {
            None => None,
            Some(rest) => {
                let inner = rest.strip_prefix('[')?.strip_suffix(']')?;
                match inner.split_once('=') {
                    Some((name, value)) => Some((
                        name.trim().to_string(),
                        Some(value.trim().trim_matches(['"', '\'']).to_string()),
                    )),
                    None => Some((inner.trim().to_string(), None)),
                }
            }
        };

        if tag.is_none() && attribute.is_none() {
            return None;
        }
        Some(Self { tag, attribute })
    }

    fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if &element.tag != tag {
                return false;
            }
        }
        match &self.attribute {
            None => true,
            Some((name, None)) => element.attribute(name).is_some(),
            Some((name, Some(value))) => element.attribute(name) == Some(value.as_str()),
        }
    }
}

#[derive(Debug, Default)]
struct HeadState {
    elements: Vec<Element>,
    head: Vec<ElementId>,
}

/// In-memory document head.
#[derive(Debug, Default)]
pub struct HeadDocument {
    state: RefCell<HeadState>,
}

impl HeadDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of every `<tag>` element in the head, in document order.
    pub fn texts_of(&self, tag: &str) -> Vec<String> {
        let state = self.state.borrow();
        state
            .head
            .iter()
            .filter_map(|id| state.elements.get(*id))
            .filter(|el| el.tag == tag)
            .map(|el| el.text.clone())
            .collect()
    }

    pub fn head_len(&self) -> usize {
        self.state.borrow().head.len()
    }

    /// Render the head as HTML.
    pub fn render_head(&self) -> String {
        let state = self.state.borrow();
        let mut html = String::from("<head>\n");
        for element in state.head.iter().filter_map(|id| state.elements.get(*id)) {
            html.push_str("  <");
            html.push_str(&element.tag);
            for (name, value) in &element.attributes {
                if value.is_empty() {
                    html.push_str(&format!(" {}", name));
                } else {
                    html.push_str(&format!(" {}=\"{}\"", name, escape_attribute(value)));
                }
            }
            html.push('>');
            html.push_str(&element.text.replace("</", "<\\/"));
            html.push_str(&format!("</{}>\n", element.tag));
        }
        html.push_str("</head>");
        html
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

impl Document for HeadDocument {
    fn create_element(&self, tag: &str) -> ElementId {
        let mut state = self.state.borrow_mut();
        state.elements.push(Element {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        });
        state.elements.len() - 1
    }

    fn set_attribute(&self, element: ElementId, name: &str, value: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(el) = state.elements.get_mut(element) {
            match el.attributes.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => el.attributes.push((name.to_string(), value.to_string())),
            }
        }
    }

    fn set_text_content(&self, element: ElementId, text: &str) {
        if let Some(el) = self.state.borrow_mut().elements.get_mut(element) {
            el.text = text.to_string();
        }
    }

    fn text_content(&self, element: ElementId) -> Option<String> {
        self.state
            .borrow()
            .elements
            .get(element)
            .map(|el| el.text.clone())
    }

    fn append_to_head(&self, element: ElementId) {
        let mut state = self.state.borrow_mut();
        if element < state.elements.len() && !state.head.contains(&element) {
            state.head.push(element);
        }
    }

    fn query_selector(&self, selector: &str) -> Option<ElementId> {
        let selector = Selector::parse(selector)?;
        let state = self.state.borrow();
        state
            .head
            .iter()
            .copied()
            .find(|id| state.elements.get(*id).is_some_and(|el| selector.matches(el)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse() {
        assert_eq!(
            Selector::parse("script[data-rwtra-importmap]"),
            Some(Selector {
                tag: Some("script".to_string()),
                attribute: Some(("data-rwtra-importmap".to_string(), None)),
            })
        );
        assert_eq!(
            Selector::parse("[type=\"importmap\"]"),
            Some(Selector {
                tag: None,
                attribute: Some(("type".to_string(), Some("importmap".to_string()))),
            })
        );
        assert_eq!(Selector::parse(""), None);
        assert_eq!(Selector::parse("script[broken"), None);
    }

    #[test]
    fn test_query_only_sees_attached_elements() {
        let doc = HeadDocument::new();
        let script = doc.create_element("script");
        doc.set_attribute(script, "data-rwtra-importmap", "");
        assert_eq!(doc.query_selector("script[data-rwtra-importmap]"), None);

        doc.append_to_head(script);
        assert_eq!(doc.query_selector("script[data-rwtra-importmap]"), Some(script));
        assert_eq!(doc.query_selector("style"), None);
    }

    #[test]
    fn test_render_head() {
        let doc = HeadDocument::new();
        let style = doc.create_element("style");
        doc.set_text_content(style, "body { color: red; }");
        doc.append_to_head(style);
        let script = doc.create_element("script");
        doc.set_attribute(script, "type", "importmap");
        doc.set_text_content(script, "{\"imports\":{}}");
        doc.append_to_head(script);

        let html = doc.render_head();
        assert!(html.contains("<style>body { color: red; }</style>"));
        assert!(html.contains("<script type=\"importmap\">{\"imports\":{}}</script>"));
        assert_eq!(doc.texts_of("style"), vec!["body { color: red; }"]);
        assert_eq!(doc.head_len(), 2);
    }
}
