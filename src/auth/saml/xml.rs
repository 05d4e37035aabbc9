//! Minimal namespace-aware XML tree and canonicalization.
//!
//! Only what SAML response verification needs: element/attribute/text
//! nodes with resolved namespaces, plus Exclusive C14N and C14N 1.0
//! (both without comments). Comments, processing instructions and the
//! XML declaration are dropped at parse time; a DOCTYPE is an error.

use std::collections::{BTreeMap, HashSet};

use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),

    #[error("DOCTYPE declarations are not allowed")]
    DocType,

    #[error("unbound namespace prefix '{0}'")]
    UnboundPrefix(String),

    #[error("document has no root element")]
    NoRoot,
}

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    /// Every namespace binding in scope at this element, `""` for the default.
    in_scope: BTreeMap<String, String>,
}

impl Element {
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of an attribute with no namespace.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.local == local)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn children_named<'a, 'n>(
        &'a self,
        namespace: &'n str,
        local: &'n str,
    ) -> impl Iterator<Item = &'a Element> {
        self.child_elements().filter(move |e| e.is(namespace, local))
    }

    pub fn child(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.children_named(namespace, local).next()
    }

    /// Concatenated text of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// This element and every element below it, in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = vec![self];
        for child in self.child_elements() {
            out.extend(child.descendants());
        }
        out
    }

    /// Elements anywhere in the subtree carrying `ID="id"`.
    pub fn find_by_id(&self, id: &str) -> Vec<&Element> {
        self.descendants()
            .into_iter()
            .filter(|e| e.attr("ID") == Some(id))
            .collect()
    }

    /// IDs that occur more than once in the subtree.
    pub fn duplicate_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dups = Vec::new();
        for el in self.descendants() {
            if let Some(id) = el.attr("ID")
                && !seen.insert(id)
            {
                dups.push(id.to_string());
            }
        }
        dups
    }

    fn qname(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

/// A parsed document; only the root element is retained.
#[derive(Debug, Clone)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        Self::parse_in_scope(input, &BTreeMap::new())
    }

    /// Parse `input` as if it stood in place of `context`, so prefixes
    /// declared on `context` or its ancestors resolve inside it. Used for
    /// decrypted content, which inherits the namespaces of the element it
    /// replaces.
    pub fn parse_fragment(input: &str, context: &Element) -> Result<Self, XmlError> {
        Self::parse_in_scope(input, &context.in_scope)
    }

    fn parse_in_scope(input: &str, base: &BTreeMap<String, String>) -> Result<Self, XmlError> {
        // XML processors normalise line endings before anything else
        let normalized = input.replace("\r\n", "\n").replace('\r', "\n");
        let mut reader = Reader::from_str(&normalized);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| XmlError::Parse(e.to_string()))?;
            match event {
                Event::Start(start) => {
                    let el = open_element(&start, stack.last().map_or(base, |p| &p.in_scope))?;
                    stack.push(el);
                }
                Event::Empty(start) => {
                    let el = open_element(&start, stack.last().map_or(base, |p| &p.in_scope))?;
                    close_element(el, &mut stack, &mut root)?;
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| XmlError::Parse("unexpected end tag".into()))?;
                    close_element(el, &mut stack, &mut root)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| XmlError::Parse(e.to_string()))?;
                    push_text(&mut stack, &text)?;
                }
                Event::CData(data) => {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| XmlError::Parse(e.to_string()))?
                        .to_string();
                    push_text(&mut stack, &text)?;
                }
                Event::DocType(_) => return Err(XmlError::DocType),
                Event::Eof => break,
                // comments, processing instructions, declaration
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Parse("unclosed element".into()));
        }
        root.map(|root| Self { root }).ok_or(XmlError::NoRoot)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }
}

fn open_element(
    start: &BytesStart<'_>,
    parent_scope: &BTreeMap<String, String>,
) -> Result<Element, XmlError> {
    let mut in_scope = parent_scope.clone();
    let mut raw_attrs = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| XmlError::Parse(e.to_string()))?
            .to_string();
        let raw = std::str::from_utf8(&attr.value).map_err(|e| XmlError::Parse(e.to_string()))?;
        // attribute-value normalisation: literal whitespace becomes a space
        let raw = raw.replace(['\t', '\n'], " ");
        let value = quick_xml::escape::unescape(&raw)
            .map_err(|e| XmlError::Parse(e.to_string()))?
            .into_owned();

        if key == "xmlns" {
            in_scope.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            in_scope.insert(prefix.to_string(), value);
        } else {
            raw_attrs.push((key, value));
        }
    }

    // an empty default namespace declaration undeclares the default
    if in_scope.get("").is_some_and(|uri| uri.is_empty()) {
        in_scope.remove("");
    }

    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| XmlError::Parse(e.to_string()))?
        .to_string();
    let (prefix, local) = split_qname(&name);
    let namespace = match &prefix {
        Some(p) => Some(resolve(&in_scope, p)?),
        None => in_scope.get("").cloned(),
    };

    let mut attributes = Vec::with_capacity(raw_attrs.len());
    for (key, value) in raw_attrs {
        let (prefix, local) = split_qname(&key);
        let namespace = match &prefix {
            Some(p) => Some(resolve(&in_scope, p)?),
            None => None,
        };
        attributes.push(Attribute {
            prefix,
            local,
            namespace,
            value,
        });
    }

    Ok(Element {
        prefix,
        local,
        namespace,
        attributes,
        children: Vec::new(),
        in_scope,
    })
}

fn close_element(
    el: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(el)),
        None => {
            if root.is_some() {
                return Err(XmlError::Parse("multiple root elements".into()));
            }
            *root = Some(el);
        }
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            if let Some(Node::Text(prev)) = parent.children.last_mut() {
                prev.push_str(text);
            } else {
                parent.children.push(Node::Text(text.to_string()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(XmlError::Parse("text outside the root element".into())),
    }
}

fn split_qname(name: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.to_string()),
    }
}

fn resolve(in_scope: &BTreeMap<String, String>, prefix: &str) -> Result<String, XmlError> {
    if prefix == "xml" {
        return Ok(XML_NS.to_string());
    }
    in_scope
        .get(prefix)
        .cloned()
        .ok_or_else(|| XmlError::UnboundPrefix(prefix.to_string()))
}

/// Canonicalization algorithm applied to a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum C14nMethod {
    /// Exclusive XML Canonicalization 1.0, with the `InclusiveNamespaces`
    /// prefix list (`"#default"` stands for the default namespace).
    Exclusive { inclusive_prefixes: Vec<String> },
    /// Canonical XML 1.0.
    Inclusive,
}

/// Canonicalize `apex` and its descendants, leaving out `exclude` (the
/// enveloped signature) when given.
pub fn canonicalize(apex: &Element, method: &C14nMethod, exclude: Option<&Element>) -> String {
    let mut out = String::new();
    let rendered = BTreeMap::new();
    write_element(apex, method, exclude, &rendered, &mut out);
    out
}

fn write_element(
    el: &Element,
    method: &C14nMethod,
    exclude: Option<&Element>,
    rendered: &BTreeMap<String, String>,
    out: &mut String,
) {
    if exclude.is_some_and(|ex| std::ptr::eq(ex, el)) {
        return;
    }

    let wanted: Vec<String> = match method {
        C14nMethod::Inclusive => std::iter::once(String::new())
            .chain(el.in_scope.keys().filter(|p| !p.is_empty()).cloned())
            .collect(),
        C14nMethod::Exclusive { inclusive_prefixes } => {
            let mut prefixes: Vec<String> = Vec::new();
            prefixes.push(el.prefix.clone().unwrap_or_default());
            for attr in &el.attributes {
                if let Some(p) = &attr.prefix
                    && p != "xml"
                {
                    prefixes.push(p.clone());
                }
            }
            for p in inclusive_prefixes {
                let p = if p == "#default" { String::new() } else { p.clone() };
                if p.is_empty() || el.in_scope.contains_key(&p) {
                    prefixes.push(p);
                }
            }
            prefixes
        }
    };

    let mut now_rendered = rendered.clone();
    let mut decls: BTreeMap<String, String> = BTreeMap::new();
    for prefix in wanted {
        let uri = el.in_scope.get(&prefix).cloned().unwrap_or_default();
        let current = rendered.get(&prefix).map(String::as_str).unwrap_or("");
        if prefix.is_empty() {
            // emit xmlns="" only to undo a rendered non-empty default
            if uri != current {
                decls.insert(prefix.clone(), uri.clone());
            }
        } else if rendered.get(&prefix) != Some(&uri) {
            decls.insert(prefix.clone(), uri.clone());
        }
        now_rendered.insert(prefix, uri);
    }

    out.push('<');
    out.push_str(&el.qname());
    for (prefix, uri) in &decls {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        escape_attr(uri, out);
        out.push('"');
    }

    let mut attrs: Vec<&Attribute> = el.attributes.iter().collect();
    attrs.sort_by(|a, b| {
        let a_ns = a.namespace.as_deref().unwrap_or("");
        let b_ns = b.namespace.as_deref().unwrap_or("");
        a_ns.cmp(b_ns).then_with(|| a.local.cmp(&b.local))
    });
    for attr in attrs {
        out.push(' ');
        if let Some(p) = &attr.prefix {
            out.push_str(p);
            out.push(':');
        }
        out.push_str(&attr.local);
        out.push_str("=\"");
        escape_attr(&attr.value, out);
        out.push('"');
    }
    out.push('>');

    for child in &el.children {
        match child {
            Node::Element(c) => write_element(c, method, exclude, &now_rendered, out),
            Node::Text(t) => escape_text(t, out),
        }
    }

    out.push_str("</");
    out.push_str(&el.qname());
    out.push('>');
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exclusive() -> C14nMethod {
        C14nMethod::Exclusive {
            inclusive_prefixes: Vec::new(),
        }
    }

    #[test]
    fn test_parse_resolves_namespaces() {
        let doc = Document::parse(
            r#"<samlp:Response xmlns:samlp="urn:p" xmlns:saml="urn:a" ID="r1">
                 <saml:Issuer>idp</saml:Issuer>
               </samlp:Response>"#,
        )
        .unwrap();
        let root = doc.root();
        assert!(root.is("urn:p", "Response"));
        assert_eq!(root.attr("ID"), Some("r1"));
        assert_eq!(root.child("urn:a", "Issuer").unwrap().text(), "idp");
    }

    #[test]
    fn test_fragment_inherits_context_namespaces() {
        let doc = Document::parse(
            r#"<samlp:Response xmlns:samlp="urn:p" xmlns:saml="urn:a"><saml:EncryptedAssertion/></samlp:Response>"#,
        )
        .unwrap();
        let context = doc.root().child("urn:a", "EncryptedAssertion").unwrap();

        let fragment =
            Document::parse_fragment(r#"<saml:Assertion ID="x"><saml:Issuer>idp</saml:Issuer></saml:Assertion>"#, context)
                .unwrap();
        assert!(fragment.root().is("urn:a", "Assertion"));
        assert_eq!(fragment.root().child("urn:a", "Issuer").unwrap().text(), "idp");
        assert_eq!(
            canonicalize(fragment.root(), &exclusive(), None),
            r#"<saml:Assertion xmlns:saml="urn:a" ID="x"><saml:Issuer>idp</saml:Issuer></saml:Assertion>"#
        );

        assert!(matches!(
            Document::parse("<saml:Assertion/>"),
            Err(XmlError::UnboundPrefix(_))
        ));
    }

    #[test]
    fn test_doctype_rejected() {
        let err = Document::parse(r#"<!DOCTYPE foo [<!ENTITY x "y">]><foo>&x;</foo>"#).unwrap_err();
        assert!(matches!(err, XmlError::DocType));
    }

    #[test]
    fn test_unbound_prefix_rejected() {
        let err = Document::parse("<a:root/>").unwrap_err();
        assert!(matches!(err, XmlError::UnboundPrefix(p) if p == "a"));
    }

    #[test]
    fn test_c14n_expands_empty_elements_and_sorts_attributes() {
        let doc = Document::parse(r#"<?xml version="1.0"?><!-- c --><e b="2" a="1"/>"#).unwrap();
        assert_eq!(
            canonicalize(doc.root(), &C14nMethod::Inclusive, None),
            r#"<e a="1" b="2"></e>"#
        );
    }

    #[test]
    fn test_c14n_escaping() {
        let doc = Document::parse("<e a=\"&lt;&amp;&quot;&#9;&#10;\">x &gt; y &amp; z\r\n</e>").unwrap();
        assert_eq!(
            canonicalize(doc.root(), &exclusive(), None),
            "<e a=\"&lt;&amp;&quot;&#x9;&#xA;\">x &gt; y &amp; z\n</e>"
        );
    }

    #[test]
    fn test_c14n_cdata_becomes_text() {
        let doc = Document::parse("<e><![CDATA[a<b]]></e>").unwrap();
        assert_eq!(canonicalize(doc.root(), &exclusive(), None), "<e>a&lt;b</e>");
    }

    #[test]
    fn test_exclusive_omits_unused_namespaces() {
        let doc = Document::parse(
            r#"<a:root xmlns:a="urn:a" xmlns:b="urn:b" xmlns:c="urn:c"><a:child b:attr="v"/></a:root>"#,
        )
        .unwrap();
        let child = doc.root().child_elements().next().unwrap();
        assert_eq!(
            canonicalize(child, &exclusive(), None),
            r#"<a:child xmlns:a="urn:a" xmlns:b="urn:b" b:attr="v"></a:child>"#
        );
    }

    #[test]
    fn test_exclusive_inclusive_prefix_list() {
        let doc = Document::parse(
            r#"<a:root xmlns:a="urn:a" xmlns:xs="urn:xs"><a:child/></a:root>"#,
        )
        .unwrap();
        let child = doc.root().child_elements().next().unwrap();
        let method = C14nMethod::Exclusive {
            inclusive_prefixes: vec!["xs".into()],
        };
        assert_eq!(
            canonicalize(child, &method, None),
            r#"<a:child xmlns:a="urn:a" xmlns:xs="urn:xs"></a:child>"#
        );
    }

    #[test]
    fn test_inclusive_renders_ancestor_namespaces() {
        let doc = Document::parse(
            r#"<a:root xmlns:a="urn:a" xmlns:b="urn:b"><a:child/></a:root>"#,
        )
        .unwrap();
        let child = doc.root().child_elements().next().unwrap();
        assert_eq!(
            canonicalize(child, &C14nMethod::Inclusive, None),
            r#"<a:child xmlns:a="urn:a" xmlns:b="urn:b"></a:child>"#
        );
    }

    #[test]
    fn test_namespace_not_redeclared_in_descendants() {
        let doc = Document::parse(r#"<a:r xmlns:a="urn:a"><a:c><a:d/></a:c></a:r>"#).unwrap();
        assert_eq!(
            canonicalize(doc.root(), &exclusive(), None),
            r#"<a:r xmlns:a="urn:a"><a:c><a:d></a:d></a:c></a:r>"#
        );
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let doc = Document::parse(r#"<r xmlns="urn:d"><c xmlns=""/></r>"#).unwrap();
        assert_eq!(
            canonicalize(doc.root(), &C14nMethod::Inclusive, None),
            r#"<r xmlns="urn:d"><c xmlns=""></c></r>"#
        );
    }

    #[test]
    fn test_excluded_subtree_omitted() {
        let doc = Document::parse(r#"<r ID="x"><sig>s</sig><body>b</body></r>"#).unwrap();
        let sig = doc.root().child_elements().next().unwrap();
        assert_eq!(
            canonicalize(doc.root(), &exclusive(), Some(sig)),
            r#"<r ID="x"><body>b</body></r>"#
        );
    }

    #[test]
    fn test_duplicate_ids_detected() {
        let doc = Document::parse(r#"<r ID="a"><c ID="b"/><d ID="a"/></r>"#).unwrap();
        assert_eq!(doc.root().duplicate_ids(), vec!["a".to_string()]);
        assert_eq!(doc.root().find_by_id("b").len(), 1);
    }
}
