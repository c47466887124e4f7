//! Fact extraction from uploaded filing archives.
//!
//! Inline XBRL pages (`.html`, `.xhtml`) are scanned for `nonFraction` and
//! `nonNumeric` tags; raw instances (`.xbrl`, `.xml`) contribute the
//! children of their root element. Every value goes through
//! [`normalize`](crate::numeric::normalize) and values that are not numbers
//! are dropped.

use crate::archive::Archive;
use crate::model::InlineFact;
use crate::numeric::{normalize, parse_decimals_hint};
use crate::{strip_bom, Error, Result, LINK_NS, XBRLI_NS, XSI_NS};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use roxmltree::ParsingOptions;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_UNIT: &str = "IDR";

const FACT_TAGS: [&str; 2] = ["nonfraction", "nonnumeric"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberKind {
    Markup,
    Instance,
    Other,
}

impl MemberKind {
    fn of(name: &str) -> Self {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("html" | "xhtml") => MemberKind::Markup,
            Some("xbrl" | "xml") => MemberKind::Instance,
            _ => MemberKind::Other,
        }
    }
}

pub struct FactExtractor {
    default_unit: String,
}

impl Default for FactExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FactExtractor {
    pub fn new() -> Self {
        Self {
            default_unit: DEFAULT_UNIT.to_string(),
        }
    }

    pub fn with_default_unit(mut self, unit: impl Into<String>) -> Self {
        self.default_unit = unit.into();
        self
    }

    /// Facts of a single archive member. Members of unknown type yield
    /// nothing; a member that cannot be read as XML at all is an error.
    pub fn extract(&self, member_name: &str, content: &[u8]) -> Result<Vec<InlineFact>> {
        match MemberKind::of(member_name) {
            MemberKind::Markup => {
                let text = String::from_utf8_lossy(strip_bom(content));
                Ok(Markup::parse(&text).facts(&self.default_unit))
            }
            MemberKind::Instance => self.extract_instance(strip_bom(content)),
            MemberKind::Other => Ok(Vec::new()),
        }
    }

    /// Facts of every member, in archive order. Fails with
    /// [`Error::NoFacts`] when no member yields any.
    pub fn extract_archive(&self, archive: &mut Archive) -> Result<Vec<InlineFact>> {
        let mut facts = Vec::new();

        for name in archive.member_names() {
            if MemberKind::of(&name) == MemberKind::Other {
                debug!("Skipping archive member {}", name);
                continue;
            }

            let content = match archive.read_member(&name) {
                Ok(content) => content,
                Err(e) => {
                    debug!("Unable to read archive member {}: {}", name, e);
                    continue;
                }
            };

            match self.extract(&name, &content) {
                Ok(found) => {
                    debug!("{} facts in {}", found.len(), name);
                    facts.extend(found);
                }
                Err(e) => debug!("Skipping unparseable member {}: {}", name, e),
            }
        }

        if facts.is_empty() {
            return Err(Error::NoFacts);
        }
        Ok(facts)
    }

    pub fn extract_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<InlineFact>> {
        let path = path.as_ref();
        let mut archive = Archive::open(path)?;
        let facts = self.extract_archive(&mut archive)?;
        info!("Extracted {} facts from {}", facts.len(), path.display());
        Ok(facts)
    }

    fn extract_instance(&self, content: &[u8]) -> Result<Vec<InlineFact>> {
        let mut reader = NsReader::from_reader(content);
        let mut facts = Vec::new();
        let mut depth = 0usize;
        let mut current: Option<PendingFact> = None;

        loop {
            let (namespace, event) = reader.read_resolved_event().map_err(parse_error)?;
            let core = is_core_namespace(&namespace);
            match event {
                Event::Start(start) => {
                    depth += 1;
                    if depth == 2 {
                        current = if core { None } else { self.begin_fact(&reader, &start)? };
                    }
                }
                Event::Text(text) => {
                    if let Some(fact) = current.as_mut() {
                        fact.text.push_str(&text.unescape().map_err(parse_error)?);
                    }
                }
                Event::CData(data) => {
                    if let Some(fact) = current.as_mut() {
                        fact.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::End(_) => {
                    if depth == 2 {
                        if let Some(fact) = current.take() {
                            facts.extend(fact.finish());
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                // self-closing elements carry no value
                _ => {}
            }
        }

        Ok(facts)
    }

    fn begin_fact(&self, reader: &NsReader<&[u8]>, start: &BytesStart<'_>) -> Result<Option<PendingFact>> {
        let mut unit = None;
        let mut decimals = None;
        for attr in start.attributes() {
            let attr = attr.map_err(parse_error)?;
            let (attr_ns, local) = reader.resolve_attribute(attr.key);
            let value = attr.unescape_value().map_err(parse_error)?;
            match (attr_ns, local.as_ref()) {
                (ResolveResult::Bound(Namespace(ns)), b"nil") if ns == XSI_NS.as_bytes() => {
                    if value.trim().eq_ignore_ascii_case("true") {
                        return Ok(None);
                    }
                }
                (ResolveResult::Unbound, b"unitRef") => unit = Some(value.trim().to_string()),
                (ResolveResult::Unbound, b"decimals") => decimals = parse_decimals_hint(&value),
                _ => {}
            }
        }

        Ok(Some(PendingFact {
            line_item: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            unit: unit.filter(|u| !u.is_empty()).unwrap_or_else(|| self.default_unit.clone()),
            decimals,
            text: String::new(),
        }))
    }
}

/// A fact element whose text is still being read
struct PendingFact {
    line_item: String,
    unit: String,
    decimals: Option<i32>,
    text: String,
}

impl PendingFact {
    fn finish(self) -> Option<InlineFact> {
        let value = normalize(&self.text, self.decimals)?;
        Some(InlineFact {
            line_item: self.line_item,
            value,
            unit: self.unit,
        })
    }
}

/// Inline XBRL markup, parsed as XML when it is well-formed and as HTML
/// otherwise.
enum Markup<'a> {
    Strict(roxmltree::Document<'a>),
    Lenient(scraper::Html),
}

impl<'a> Markup<'a> {
    fn parse(text: &'a str) -> Self {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        match roxmltree::Document::parse_with_options(text, options) {
            Ok(doc) => Markup::Strict(doc),
            Err(e) => {
                debug!("Markup is not well-formed XML ({}), falling back to HTML parsing", e);
                Markup::Lenient(scraper::Html::parse_document(text))
            }
        }
    }

    fn facts(&self, default_unit: &str) -> Vec<InlineFact> {
        let tagged: Vec<TaggedValue> = match self {
            Markup::Strict(doc) => doc
                .descendants()
                .filter(|n| n.is_element() && is_fact_tag(n.tag_name().name()))
                .map(|n| TaggedValue {
                    name: xml_attr(n, "name"),
                    unit: xml_attr(n, "unitRef"),
                    decimals: xml_attr(n, "decimals"),
                    text: n
                        .descendants()
                        .filter(|d| d.is_text())
                        .filter_map(|d| d.text())
                        .collect(),
                })
                .collect(),
            Markup::Lenient(html) => html
                .root_element()
                .descendants()
                .filter_map(scraper::ElementRef::wrap)
                .filter(|e| is_fact_tag(e.value().name()))
                .map(|e| TaggedValue {
                    name: html_attr(&e, "name"),
                    unit: html_attr(&e, "unitRef"),
                    decimals: html_attr(&e, "decimals"),
                    text: e.text().collect(),
                })
                .collect(),
        };

        tagged
            .into_iter()
            .filter_map(|tagged| tagged.into_fact(default_unit))
            .collect()
    }
}

/// Attributes and text of one tagged element, before normalization
struct TaggedValue {
    name: Option<String>,
    unit: Option<String>,
    decimals: Option<String>,
    text: String,
}

impl TaggedValue {
    fn into_fact(self, default_unit: &str) -> Option<InlineFact> {
        let line_item = self.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
        let text = self.text.trim();
        if text.is_empty() {
            return None;
        }

        let decimals = self.decimals.as_deref().and_then(parse_decimals_hint);
        let Some(value) = normalize(text, decimals) else {
            debug!("Dropping {}: {:?} is not a number", line_item, text);
            return None;
        };

        Some(InlineFact {
            line_item,
            value,
            unit: self
                .unit
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| default_unit.to_string()),
        })
    }
}

fn is_core_namespace(namespace: &ResolveResult<'_>) -> bool {
    match namespace {
        ResolveResult::Bound(Namespace(ns)) => *ns == XBRLI_NS.as_bytes() || *ns == LINK_NS.as_bytes(),
        _ => false,
    }
}

// HTML parsing keeps the prefix in the tag name (`ix:nonfraction`)
fn is_fact_tag(name: &str) -> bool {
    let local = name.rsplit(':').next().unwrap_or(name);
    FACT_TAGS.iter().any(|tag| local.eq_ignore_ascii_case(tag))
}

fn xml_attr(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    node.attributes()
        .find(|a| a.namespace().is_none() && a.name().eq_ignore_ascii_case(name))
        .map(|a| a.value().to_string())
}

fn html_attr(element: &scraper::ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attrs()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.to_string())
}

fn parse_error(e: impl std::fmt::Display) -> Error {
    Error::Parse(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::zip_bytes;
    use pretty_assertions::assert_eq;

    fn fact(line_item: &str, value: f64, unit: &str) -> InlineFact {
        InlineFact {
            line_item: line_item.to_string(),
            value,
            unit: unit.to_string(),
        }
    }

    const XHTML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:ix="http://www.xbrl.org/2013/inlineXBRL">
  <body>
    <table>
      <tr><td>Revenue</td><td><ix:nonFraction name="idx-cor:Revenue" contextRef="c1" unitRef="IDR" decimals="-6">21.829.432</ix:nonFraction></td></tr>
      <tr><td>Loss</td><td><ix:nonFraction name="idx-cor:ProfitLoss" contextRef="c1" decimals="2">(<span>1,234.567</span>)</ix:nonFraction></td></tr>
      <tr><td>Note</td><td><ix:nonNumeric name="idx-cor:Auditor" contextRef="c1">Purwantono</ix:nonNumeric></td></tr>
      <tr><td>Blank</td><td><ix:nonFraction name="idx-cor:Blank" contextRef="c1" unitRef="IDR">  </ix:nonFraction></td></tr>
      <tr><td>Unnamed</td><td><ix:nonFraction contextRef="c1" unitRef="IDR">5</ix:nonFraction></td></tr>
    </table>
  </body>
</html>"#;

    #[test]
    fn test_strict_markup() {
        let facts = FactExtractor::new().extract("report.xhtml", XHTML.as_bytes()).unwrap();
        assert_eq!(
            facts,
            vec![
                fact("idx-cor:Revenue", 21829432.0, "IDR"),
                fact("idx-cor:ProfitLoss", -1234.57, "IDR"),
            ]
        );
    }

    #[test]
    fn test_lenient_markup_fallback() {
        // unescaped entity and unclosed tags are not XML
        let html = r#"<html><body><p>Laba &nbsp; bersih<br>
<IX:NONFRACTION NAME="NetIncome" UNITREF="USD" DECIMALS="0">1.234,56</IX:NONFRACTION>
<ix:nonNumeric name="Revenue">2 500</ix:nonNumeric>
</body></html>"#;
        let facts = FactExtractor::new().extract("page.HTML", html.as_bytes()).unwrap();
        assert_eq!(
            facts,
            vec![fact("NetIncome", 1235.0, "USD"), fact("Revenue", 2500.0, "IDR")]
        );
    }

    #[test]
    fn test_instance_member() {
        let xbrl = r#"<?xml version="1.0"?>
<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance"
            xmlns:link="http://www.xbrl.org/2003/linkbase"
            xmlns:xlink="http://www.w3.org/1999/xlink"
            xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
            xmlns:idx="urn:idx">
  <link:schemaRef xlink:type="simple" xlink:href="Taxonomy.xsd"/>
  <xbrli:context id="c1"><xbrli:entity><xbrli:identifier scheme="x">123</xbrli:identifier></xbrli:entity></xbrli:context>
  <xbrli:unit id="u1"><xbrli:measure>iso4217:IDR</xbrli:measure></xbrli:unit>
  <idx:Assets contextRef="c1" unitRef="u1" decimals="0">1.000.000</idx:Assets>
  <idx:Cash contextRef="c1" decimals="INF"><![CDATA[12,5]]></idx:Cash>
  <idx:Equity contextRef="c1" unitRef="u1" xsi:nil="true"/>
  <idx:Debt contextRef="c1" unitRef="u1" xsi:nil="true">99</idx:Debt>
  <idx:Name contextRef="c1">PT Astra &amp; Co</idx:Name>
  <idx:Segment><idx:Inner contextRef="c1">7</idx:Inner></idx:Segment>
</xbrli:xbrl>"#;
        let facts = FactExtractor::new().extract("instance.xbrl", xbrl.as_bytes()).unwrap();
        // nested content counts towards the child of the root that holds it
        assert_eq!(
            facts,
            vec![
                fact("Assets", 1_000_000.0, "u1"),
                fact("Cash", 12.5, "IDR"),
                fact("Segment", 7.0, "IDR"),
            ]
        );
    }

    #[test]
    fn test_broken_instance_member_is_an_error() {
        let result = FactExtractor::new().extract("data.xml", b"<a><b></a>");
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_other_members_ignored() {
        let facts = FactExtractor::new().extract("notes.pdf", b"%PDF-1.4").unwrap();
        assert!(facts.is_empty());
    }

    #[test]
    fn test_archive_end_to_end() {
        let page = r#"<html xmlns:ix="http://www.xbrl.org/2013/inlineXBRL"><body>
<ix:nonFraction name="Revenue" unitRef="u1" decimals="0">(1,000)</ix:nonFraction>
</body></html>"#;
        let mut archive = Archive::from_bytes(zip_bytes(&[
            ("filing/report.xhtml", page),
            ("filing/logo.png", "not an image"),
            ("filing/broken.xml", "<a><b></a>"),
        ]))
        .unwrap();

        let facts = FactExtractor::new().extract_archive(&mut archive).unwrap();
        assert_eq!(facts, vec![fact("Revenue", -1000.0, "u1")]);
    }

    #[test]
    fn test_archive_without_facts() {
        let mut archive = Archive::from_bytes(zip_bytes(&[
            ("report.html", "<html><body><p>No tags here</p></body></html>"),
            ("broken.xbrl", "<<<"),
            ("readme.txt", "hello"),
        ]))
        .unwrap();

        let err = FactExtractor::new().extract_archive(&mut archive).unwrap_err();
        assert!(matches!(err, Error::NoFacts));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_member_kind() {
        assert_eq!(MemberKind::of("a/B.XHTML"), MemberKind::Markup);
        assert_eq!(MemberKind::of("x.htm"), MemberKind::Other);
        assert_eq!(MemberKind::of("instance.XBRL"), MemberKind::Instance);
        assert_eq!(MemberKind::of("noext"), MemberKind::Other);
    }
}
