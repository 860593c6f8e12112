use roxmltree::{Document, Node, NodeType};
use uisl_core::{Location, ScriptError};

/// Owned XML element tree with source locations, detached from the
/// roxmltree document lifetime.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XmlElement {
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub location: Location,
}

impl XmlElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub(crate) fn parse_xml_root(
    source: &str,
    file_name: Option<&str>,
) -> Result<XmlElement, ScriptError> {
    let document = Document::parse(source)
        .map_err(|error| ScriptError::new("PARSE_XML_ERROR", error.to_string()))?;

    let Some(root) = document.root().children().find(|node| node.is_element()) else {
        return Err(ScriptError::new(
            "PARSE_XML_ERROR",
            "XML document must contain a root element.",
        ));
    };

    Ok(parse_element(&document, root, file_name))
}

fn parse_element(document: &Document<'_>, node: Node<'_, '_>, file_name: Option<&str>) -> XmlElement {
    let mut attributes = Vec::new();
    for attribute in node.attributes() {
        attributes.push((attribute.name().to_string(), attribute.value().to_string()));
    }

    let mut children = Vec::new();
    for child in node.children() {
        if child.node_type() == NodeType::Element {
            children.push(parse_element(document, child, file_name));
        }
    }

    XmlElement {
        name: node.tag_name().name().to_string(),
        attributes,
        children,
        location: node_location(document, node, file_name),
    }
}

fn node_location(document: &Document<'_>, node: Node<'_, '_>, file_name: Option<&str>) -> Location {
    let position = document.text_pos_at(node.range().start);
    Location::new(
        file_name.map(|name| name.to_string()),
        position.row,
        position.col,
        format!("<{}>", node.tag_name().name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_xml_root_builds_tree_with_ordered_attributes() {
        let source = r#"<suite name="s"><test_case name="tc"><set var="x" expression="1"/></test_case></suite>"#;
        let root = parse_xml_root(source, Some("s.xml")).expect("xml should parse");
        assert_eq!(root.name, "suite");
        assert_eq!(root.attribute("name"), Some("s"));

        let case = &root.children[0];
        assert_eq!(case.name, "test_case");
        let set = &case.children[0];
        assert_eq!(
            set.attributes,
            vec![
                ("var".to_string(), "x".to_string()),
                ("expression".to_string(), "1".to_string()),
            ]
        );
        assert_eq!(set.location.file.as_deref(), Some("s.xml"));
        assert_eq!(set.location.line, 1);
    }

    #[test]
    fn parse_xml_root_skips_text_and_comment_nodes() {
        let source = "<suite><!-- c -->text<def name=\"d\"/></suite>";
        let root = parse_xml_root(source, None).expect("xml should parse");
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, "def");
    }

    #[test]
    fn parse_xml_root_rejects_invalid_xml() {
        let error = parse_xml_root("<suite>", None).expect_err("invalid xml should fail");
        assert_eq!(error.code, "PARSE_XML_ERROR");
    }

    #[test]
    fn parse_xml_root_rejects_element_less_documents() {
        let error = parse_xml_root("<?xml version=\"1.0\"?><!---->", None)
            .expect_err("missing root element should fail");
        assert_eq!(error.code, "PARSE_XML_ERROR");
    }
}
