// Taxonomy schema resolution for XBRL
//
// A resolution walks the import graph from one entry-point schema with an
// explicit worklist. Each schema is keyed by its canonical path, so circular
// `import`/`include` chains end as soon as they revisit a file. Remote
// locations go through the schema cache; anything that cannot be fetched,
// found or parsed is logged and skipped.

use crate::cache::SchemaCache;
use crate::fetch::{Fetch, HttpFetcher, FETCH_TIMEOUT};
use crate::model::*;
use crate::qname::QName;
use crate::{strip_bom, Error, Result, LINK_NS, XBRLI_NS, XLINK_NS, XS_NS};
use ahash::AHashSet;
use roxmltree::{Document, Node, ParsingOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const SCHEMA_DIRECTIVES: [&str; 3] = ["import", "include", "redefine"];

pub struct TaxonomyResolver<F = HttpFetcher> {
    cache: SchemaCache,
    fetcher: F,
    timeout: Duration,
}

/// A schema waiting to be visited
#[derive(Debug)]
struct Pending {
    path: PathBuf,
    // URL the schema was downloaded from, for schemas living in the cache
    origin: Option<Url>,
}

impl TaxonomyResolver<HttpFetcher> {
    pub fn with_http(cache: SchemaCache) -> Result<Self> {
        Ok(Self::new(cache, HttpFetcher::new()?))
    }
}

impl<F: Fetch> TaxonomyResolver<F> {
    pub fn new(cache: SchemaCache, fetcher: F) -> Self {
        Self {
            cache,
            fetcher,
            timeout: FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the taxonomy rooted at `root`. Never fails as a whole: the
    /// result holds whatever the readable schemas provided.
    pub fn resolve<P: AsRef<Path>>(&self, root: P) -> Taxonomy {
        let mut taxonomy = Taxonomy::default();
        let mut visited: AHashSet<PathBuf> = AHashSet::new();
        let mut pending = vec![Pending {
            path: canonical(root.as_ref()),
            origin: None,
        }];

        while let Some(schema) = pending.pop() {
            if !visited.insert(schema.path.clone()) {
                continue;
            }
            taxonomy.schemas.push(schema.path.clone());

            let read = match schema.origin {
                Some(_) => self.cache.read(&schema.path),
                None => std::fs::read(&schema.path).map_err(Error::from),
            };
            let bytes = match read {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read taxonomy schema {}: {}", schema.path.display(), e);
                    continue;
                }
            };
            let text = String::from_utf8_lossy(strip_bom(&bytes));
            let options = ParsingOptions {
                allow_dtd: true,
                ..ParsingOptions::default()
            };
            let doc = match Document::parse_with_options(&text, options) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Failed to load taxonomy schema {}: {}", schema.path.display(), e);
                    continue;
                }
            };

            let root = doc.root_element();
            if !root.has_tag_name((XS_NS, "schema")) {
                debug!("{} is not an XML schema, skipping", schema.path.display());
                continue;
            }

            let locations = collect_schema(root, &mut taxonomy);
            for location in locations {
                if let Some(next) = self.locate(&location, &schema) {
                    pending.push(next);
                }
            }
        }

        debug!(
            "Resolved {} concepts from {} schemas",
            taxonomy.concepts.len(),
            taxonomy.schemas.len()
        );
        taxonomy
    }

    fn locate(&self, location: &str, from: &Pending) -> Option<Pending> {
        if is_remote(location) {
            return self.fetch_cached(location);
        }

        if let Some(origin) = &from.origin {
            if !location.starts_with("file://") {
                return match origin.join(location) {
                    Ok(url) => self.fetch_cached(url.as_str()),
                    Err(e) => {
                        warn!("Unable to resolve schema location {} against {}: {}", location, origin, e);
                        None
                    }
                };
            }
        }

        let location = location.strip_prefix("file://").unwrap_or(location);
        let base = from.path.parent().unwrap_or_else(|| Path::new("."));
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if let Some(path) = find_local(location, base, &cwd) {
            return Some(Pending { path, origin: None });
        }

        warn!(
            "Unable to resolve schema location {} referenced from {}",
            location,
            from.path.display()
        );
        None
    }

    fn fetch_cached(&self, url: &str) -> Option<Pending> {
        let path = self.cache.path_for(url);

        if !self.cache.exists(&path) {
            info!("Downloading taxonomy schema: {}", url);
            let data = match self.fetcher.get(url, self.timeout) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Unable to download schema {}: {}", url, e);
                    return None;
                }
            };
            if let Err(e) = self.cache.write(&path, &data) {
                warn!("Unable to cache schema {} at {}: {}", url, path.display(), e);
                return None;
            }
        }

        Some(Pending {
            path: canonical(&path),
            origin: Url::parse(url).ok(),
        })
    }
}

/// Pull concepts, linkbase refs and role refs out of one schema and return
/// the locations of the schemas it pulls in.
fn collect_schema(root: Node<'_, '_>, taxonomy: &mut Taxonomy) -> Vec<String> {
    let target_namespace = root.attribute("targetNamespace").unwrap_or_default();
    let target_prefix = prefix_for(root, target_namespace);

    for node in root.descendants().filter(|n| n.is_element()) {
        if node.has_tag_name((LINK_NS, "linkbaseRef")) {
            taxonomy.linkbase_refs.push(LinkbaseRef {
                target_namespace: target_namespace.to_string(),
                href: xlink(node, "href"),
                role: xlink(node, "role"),
                arcrole: xlink(node, "arcrole"),
                link_type: xlink(node, "type"),
            });
        } else if node.has_tag_name((LINK_NS, "roleRef")) {
            taxonomy.role_refs.push(RoleRef {
                target_namespace: target_namespace.to_string(),
                role_uri: non_empty(node.attribute("roleURI"))
                    .or_else(|| non_empty(node.attribute("roleUri"))),
                href: xlink(node, "href"),
            });
        }
    }

    for element in root.children().filter(|n| n.has_tag_name((XS_NS, "element"))) {
        if let Some(concept) = concept_from(element, target_namespace, target_prefix) {
            taxonomy.insert(concept);
        }
    }

    root.children()
        .filter(|n| {
            n.is_element()
                && n.tag_name().namespace() == Some(XS_NS)
                && SCHEMA_DIRECTIVES.contains(&n.tag_name().name())
        })
        .filter_map(|n| non_empty(n.attribute("schemaLocation")))
        .collect()
}

fn concept_from(element: Node<'_, '_>, target_namespace: &str, target_prefix: Option<&str>) -> Option<Concept> {
    let name = non_empty(element.attribute("name"))?;

    let substitution_group = non_empty(element.attribute("substitutionGroup"));
    if let Some(group) = &substitution_group {
        if is_linkbase_group(element, group) {
            return None;
        }
    }

    let period_type = element.attribute((XBRLI_NS, "periodType")).and_then(|value| {
        let parsed = PeriodType::parse(value);
        if parsed.is_none() {
            debug!("Unknown periodType {:?} on {}", value, name);
        }
        parsed
    });
    let balance = element.attribute((XBRLI_NS, "balance")).and_then(Balance::parse);

    let is_abstract = element
        .attribute("abstract")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let nillable = element
        .attribute("nillable")
        .map(|v| !v.trim().eq_ignore_ascii_case("false"))
        .unwrap_or(true);

    let qname = match target_prefix {
        Some(prefix) => format!("{prefix}:{name}"),
        None => name.clone(),
    };

    Some(Concept {
        key: ConceptKey::new(target_namespace, name),
        qname,
        id_attr: non_empty(element.attribute("id")),
        substitution_group,
        type_name: non_empty(element.attribute("type")),
        period_type,
        balance,
        is_abstract,
        nillable,
        documentation: documentation(element),
        origin: ConceptOrigin::Taxonomy,
    })
}

fn is_linkbase_group(element: Node<'_, '_>, group: &str) -> bool {
    group.starts_with("link:") || QName::resolve(element, group).namespace == LINK_NS
}

fn documentation(element: Node<'_, '_>) -> Option<String> {
    let node = element
        .children()
        .filter(|n| n.has_tag_name((XS_NS, "annotation")))
        .flat_map(|n| n.children())
        .find(|n| n.has_tag_name((XS_NS, "documentation")))?;

    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    non_empty(Some(text.as_str()))
}

// Prefer a named binding over the default namespace
fn prefix_for<'a>(root: Node<'a, '_>, namespace: &str) -> Option<&'a str> {
    if namespace.is_empty() {
        return None;
    }
    root.namespaces()
        .filter(|ns| ns.uri() == namespace)
        .find_map(|ns| ns.name())
}

fn xlink(node: Node<'_, '_>, name: &str) -> Option<String> {
    non_empty(node.attribute((XLINK_NS, name)))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Look a local location up next to the referencing schema, then under `cwd`
fn find_local(location: &str, base: &Path, cwd: &Path) -> Option<PathBuf> {
    [base.join(location), cwd.join(location)]
        .into_iter()
        .find(|candidate| candidate.exists())
        .map(|candidate| canonical(&candidate))
}

fn is_remote(location: &str) -> bool {
    let lower = location.get(..8).unwrap_or(location).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::fs;

    #[derive(Default)]
    struct FakeFetcher {
        documents: AHashMap<String, Vec<u8>>,
        requests: RefCell<Vec<String>>,
    }

    impl FakeFetcher {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.documents.insert(url.to_string(), body.as_bytes().to_vec());
            self
        }
    }

    impl Fetch for FakeFetcher {
        fn get(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
            self.requests.borrow_mut().push(url.to_string());
            self.documents
                .get(url)
                .cloned()
                .ok_or_else(|| Error::Fetch(format!("{url}: 404")))
        }
    }

    fn schema(target: &str, body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:xbrli="http://www.xbrl.org/2003/instance"
           xmlns:link="http://www.xbrl.org/2003/linkbase"
           xmlns:xlink="http://www.w3.org/1999/xlink"
           xmlns:t="{target}"
           targetNamespace="{target}">
{body}
</xs:schema>"#
        )
    }

    fn resolver(cache_dir: &Path) -> TaxonomyResolver<FakeFetcher> {
        TaxonomyResolver::new(SchemaCache::new(cache_dir), FakeFetcher::default())
    }

    #[test]
    fn test_extracts_concepts_and_refs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Taxonomy.xsd");
        fs::write(
            &root,
            schema(
                "urn:idx",
                r#"
  <xs:annotation>
    <xs:appinfo>
      <link:linkbaseRef xlink:type="simple" xlink:href="lab.xml"
          xlink:role="http://www.xbrl.org/2003/role/labelLinkbaseRef"
          xlink:arcrole="http://www.w3.org/1999/xlink/properties/linkbase"/>
      <link:roleRef roleURI="urn:idx:role:balance" xlink:href="roles.xsd#balance"/>
    </xs:appinfo>
  </xs:annotation>
  <xs:element name="Revenue" id="idx_Revenue" type="xbrli:monetaryItemType"
      substitutionGroup="xbrli:item" xbrli:periodType="duration" xbrli:balance="credit"
      nillable="false">
    <xs:annotation><xs:documentation> Total revenue </xs:documentation></xs:annotation>
  </xs:element>
  <xs:element name="Heading" type="xbrli:stringItemType" substitutionGroup="xbrli:item"
      abstract="true" xbrli:periodType="instant"/>
  <xs:element name="customArc" substitutionGroup="link:arc"/>
  <xs:element name="" type="xbrli:stringItemType"/>
"#,
            ),
        )
        .unwrap();

        let taxonomy = resolver(&dir.path().join("cache")).resolve(&root);
        assert_eq!(taxonomy.concepts.len(), 2);

        let revenue = taxonomy.concept("urn:idx", "Revenue").unwrap();
        assert_eq!(revenue.qname, "t:Revenue");
        assert_eq!(revenue.id_attr.as_deref(), Some("idx_Revenue"));
        assert_eq!(revenue.type_name.as_deref(), Some("xbrli:monetaryItemType"));
        assert_eq!(revenue.period_type, Some(PeriodType::Duration));
        assert_eq!(revenue.balance, Some(Balance::Credit));
        assert!(!revenue.nillable);
        assert!(!revenue.is_abstract);
        assert_eq!(revenue.documentation.as_deref(), Some("Total revenue"));

        let heading = taxonomy.concept("urn:idx", "Heading").unwrap();
        assert!(heading.is_abstract);
        assert!(heading.nillable);
        assert_eq!(heading.balance, None);

        assert!(taxonomy.concept("urn:idx", "customArc").is_none());

        assert_eq!(taxonomy.linkbase_refs.len(), 1);
        let linkbase = &taxonomy.linkbase_refs[0];
        assert_eq!(linkbase.target_namespace, "urn:idx");
        assert_eq!(linkbase.href.as_deref(), Some("lab.xml"));
        assert_eq!(linkbase.link_type.as_deref(), Some("simple"));

        assert_eq!(taxonomy.role_refs.len(), 1);
        assert_eq!(taxonomy.role_refs[0].role_uri.as_deref(), Some("urn:idx:role:balance"));
    }

    #[test]
    fn test_circular_imports_terminate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.xsd"),
            schema(
                "urn:a",
                r#"<xs:import namespace="urn:b" schemaLocation="b.xsd"/>
  <xs:element name="A" substitutionGroup="xbrli:item"/>"#,
            ),
        )
        .unwrap();
        fs::write(
            dir.path().join("b.xsd"),
            schema(
                "urn:b",
                r#"<xs:import namespace="urn:a" schemaLocation="a.xsd"/>
  <xs:include schemaLocation="./sub/../c.xsd"/>
  <xs:element name="B" substitutionGroup="xbrli:item"/>"#,
            ),
        )
        .unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(
            dir.path().join("c.xsd"),
            schema(
                "urn:b",
                r#"<xs:redefine schemaLocation="b.xsd"/>
  <xs:import schemaLocation="a.xsd"/>
  <xs:element name="C" substitutionGroup="xbrli:item"/>"#,
            ),
        )
        .unwrap();

        let taxonomy = resolver(&dir.path().join("cache")).resolve(dir.path().join("a.xsd"));
        assert_eq!(taxonomy.schemas.len(), 3);
        let unique: AHashSet<_> = taxonomy.schemas.iter().collect();
        assert_eq!(unique.len(), 3);
        assert_eq!(taxonomy.concepts.len(), 3);
        assert!(taxonomy.concept("urn:b", "C").is_some());
    }

    #[test]
    fn test_missing_and_broken_schemas_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("root.xsd"),
            schema(
                "urn:r",
                r#"<xs:import schemaLocation="missing.xsd"/>
  <xs:import schemaLocation="broken.xsd"/>
  <xs:import schemaLocation="file://good.xsd"/>
  <xs:element name="Root" substitutionGroup="xbrli:item"/>"#,
            ),
        )
        .unwrap();
        fs::write(dir.path().join("broken.xsd"), "<xs:schema <<<").unwrap();
        fs::write(
            dir.path().join("good.xsd"),
            schema("urn:g", r#"<xs:element name="Good" substitutionGroup="xbrli:item"/>"#),
        )
        .unwrap();

        let taxonomy = resolver(&dir.path().join("cache")).resolve(dir.path().join("root.xsd"));
        assert!(taxonomy.concept("urn:r", "Root").is_some());
        assert!(taxonomy.concept("urn:g", "Good").is_some());
        assert_eq!(taxonomy.concepts.len(), 2);
    }

    #[test]
    fn test_unreadable_root_yields_empty_taxonomy() {
        let dir = tempfile::tempdir().unwrap();
        let taxonomy = resolver(&dir.path().join("cache")).resolve(dir.path().join("nope.xsd"));
        assert!(taxonomy.concepts.is_empty());
        assert_eq!(taxonomy.schemas.len(), 1);
    }

    #[test]
    fn test_remote_schemas_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        fs::write(
            dir.path().join("root.xsd"),
            schema(
                "urn:r",
                r#"<xs:import namespace="urn:core" schemaLocation="https://taxonomy.example.org/2024/core.xsd"/>
  <xs:import schemaLocation="HTTPS://taxonomy.example.org/2024/gone.xsd"/>"#,
            ),
        )
        .unwrap();

        let fetcher = FakeFetcher::default()
            .with(
                "https://taxonomy.example.org/2024/core.xsd",
                &schema(
                    "urn:core",
                    r#"<xs:include schemaLocation="parts/extra.xsd"/>
  <xs:element name="Assets" substitutionGroup="xbrli:item" xbrli:periodType="instant"/>"#,
                ),
            )
            .with(
                "https://taxonomy.example.org/2024/parts/extra.xsd",
                &schema("urn:core", r#"<xs:element name="Liabilities" substitutionGroup="xbrli:item"/>"#),
            );

        let resolver = TaxonomyResolver::new(SchemaCache::new(&cache_dir), &fetcher);
        let taxonomy = resolver.resolve(dir.path().join("root.xsd"));
        assert!(taxonomy.concept("urn:core", "Assets").is_some());
        assert!(taxonomy.concept("urn:core", "Liabilities").is_some());
        assert_eq!(fetcher.requests.borrow().len(), 3);

        let cached = SchemaCache::new(&cache_dir).path_for("https://taxonomy.example.org/2024/core.xsd");
        assert!(cached.is_file());

        // second run is served from the cache except for the failed download
        fetcher.requests.borrow_mut().clear();
        let again = resolver.resolve(dir.path().join("root.xsd"));
        assert_eq!(again.concepts.len(), 2);
        assert_eq!(
            *fetcher.requests.borrow(),
            vec!["HTTPS://taxonomy.example.org/2024/gone.xsd".to_string()]
        );
    }

    #[test]
    fn test_prepopulated_cache_needs_no_download() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SchemaCache::new(dir.path().join("cache"));
        let url = "https://taxonomy.example.org/2024/core.xsd";
        cache
            .write(
                &cache.path_for(url),
                schema("urn:core", r#"<xs:element name="Equity" substitutionGroup="xbrli:item"/>"#).as_bytes(),
            )
            .unwrap();
        fs::write(
            dir.path().join("root.xsd"),
            schema("urn:r", &format!(r#"<xs:import namespace="urn:core" schemaLocation="{url}"/>"#)),
        )
        .unwrap();

        let fetcher = FakeFetcher::default();
        let resolver = TaxonomyResolver::new(cache, &fetcher);
        let taxonomy = resolver.resolve(dir.path().join("root.xsd"));
        assert!(taxonomy.concept("urn:core", "Equity").is_some());
        assert!(fetcher.requests.borrow().is_empty());
    }

    #[test]
    fn test_local_location_falls_back_to_working_directory() {
        let base = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        fs::create_dir(cwd.path().join("shared")).unwrap();
        fs::write(cwd.path().join("shared/common.xsd"), schema("urn:c", "")).unwrap();

        let found = find_local("shared/common.xsd", base.path(), cwd.path());
        assert_eq!(found, Some(canonical(&cwd.path().join("shared/common.xsd"))));

        // next to the referencing schema wins over the working directory
        fs::create_dir(base.path().join("shared")).unwrap();
        fs::write(base.path().join("shared/common.xsd"), schema("urn:c", "")).unwrap();
        let found = find_local("shared/common.xsd", base.path(), cwd.path());
        assert_eq!(found, Some(canonical(&base.path().join("shared/common.xsd"))));

        assert_eq!(find_local("absent.xsd", base.path(), cwd.path()), None);
    }

    #[test]
    fn test_redeclaration_backfills_only_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.xsd"),
            schema(
                "urn:s",
                r#"<xs:include schemaLocation="b.xsd"/>
  <xs:element name="Cash" substitutionGroup="xbrli:item" xbrli:periodType="instant"/>"#,
            ),
        )
        .unwrap();
        fs::write(
            dir.path().join("b.xsd"),
            schema(
                "urn:s",
                r#"<xs:element name="Cash" type="xbrli:monetaryItemType" xbrli:periodType="duration"
      xbrli:balance="debit"/>"#,
            ),
        )
        .unwrap();

        let taxonomy = resolver(&dir.path().join("cache")).resolve(dir.path().join("a.xsd"));
        let cash = taxonomy.concept("urn:s", "Cash").unwrap();
        assert_eq!(cash.period_type, Some(PeriodType::Instant));
        assert_eq!(cash.balance, Some(Balance::Debit));
        assert_eq!(cash.type_name.as_deref(), Some("xbrli:monetaryItemType"));
        assert_eq!(cash.substitution_group.as_deref(), Some("xbrli:item"));
    }
}
