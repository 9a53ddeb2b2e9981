use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::provider::{ExtractError, ListingItem, ListingPage, ListingRoute, ScrapeProvider};
use crate::validate::{PageValidator, RequireMarker};
use crate::StagingRecord;

/// How the discovery space is split into concurrently crawled partitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Partitions {
    /// One partition; `{partition}` expands to an empty string.
    #[default]
    Single,
    /// Inclusive year range, one partition per year.
    Years { first: i32, last: i32 },
    Named(Vec<String>),
}

impl Partitions {
    pub fn expand(&self) -> Vec<String> {
        match self {
            Partitions::Single => vec![String::new()],
            Partitions::Years { first, last } => (*first..=*last).map(|y| y.to_string()).collect(),
            Partitions::Named(names) => names.clone(),
        }
    }
}

/// Declarative description of a listing site.
///
/// URL templates understand `{partition}`, `{page}`, `{offset}` (page times
/// page size) and, for detail pages, `{key}`. Relative URLs resolve against
/// `site_root`.
#[derive(Debug, Clone)]
pub struct SelectorSpec {
    pub short_name: String,
    pub site_root: String,
    /// Text every genuine page of the site contains.
    pub page_marker: String,
    pub partitions: Partitions,
    pub listing_url: String,
    pub listing_route: ListingRoute,
    /// A listing page with this many item links has a successor.
    pub page_size: Option<usize>,
    pub item_selector: String,
    pub item_attr: String,
    /// Only links starting with this prefix are items; the prefix is stripped.
    pub item_prefix: Option<String>,
    pub detail_urls: Vec<String>,
    /// Tried in order; the first non-empty match across pages is the title.
    pub title_selectors: Vec<String>,
    pub tag_selector: Option<String>,
    pub tag_separator: Option<String>,
    pub artifact_selector: String,
    /// First attribute present on an artifact element wins.
    pub artifact_attrs: Vec<String>,
    pub max_artifacts: Option<usize>,
    /// Extra attributes: name to selector, first non-empty text wins.
    pub fields: BTreeMap<String, String>,
}

impl Default for SelectorSpec {
    fn default() -> Self {
        Self {
            short_name: String::new(),
            site_root: String::new(),
            page_marker: String::new(),
            partitions: Partitions::Single,
            listing_url: String::new(),
            listing_route: ListingRoute::Proxied,
            page_size: None,
            item_selector: "a".to_string(),
            item_attr: "href".to_string(),
            item_prefix: None,
            detail_urls: vec!["{key}".to_string()],
            title_selectors: vec!["title".to_string()],
            tag_selector: None,
            tag_separator: None,
            artifact_selector: "img".to_string(),
            artifact_attrs: vec!["href".to_string(), "src".to_string()],
            max_artifacts: None,
            fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("invalid site root {0:?}")]
    SiteRoot(String),
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("provider {0} has no detail pages")]
    NoDetailPages(String),
}

/// A [`ScrapeProvider`] driven entirely by a [`SelectorSpec`].
pub struct SelectorProvider {
    spec: SelectorSpec,
    root: Url,
    validator: Arc<RequireMarker>,
    item: Selector,
    titles: Vec<Selector>,
    tags: Option<Selector>,
    artifacts: Selector,
    fields: Vec<(String, Selector)>,
}

impl SelectorProvider {
    pub fn new(spec: SelectorSpec) -> Result<Self, SpecError> {
        let root = Url::parse(&spec.site_root).map_err(|_| SpecError::SiteRoot(spec.site_root.clone()))?;
        if spec.detail_urls.is_empty() {
            return Err(SpecError::NoDetailPages(spec.short_name.clone()));
        }
        let titles = spec
            .title_selectors
            .iter()
            .map(|s| selector(s))
            .collect::<Result<Vec<_>, _>>()?;
        let fields = spec
            .fields
            .iter()
            .map(|(name, s)| Ok((name.clone(), selector(s)?)))
            .collect::<Result<Vec<_>, SpecError>>()?;
        Ok(Self {
            root,
            validator: Arc::new(RequireMarker::site_page(spec.page_marker.clone())),
            item: selector(&spec.item_selector)?,
            titles,
            tags: spec.tag_selector.as_deref().map(selector).transpose()?,
            artifacts: selector(&spec.artifact_selector)?,
            fields,
            spec,
        })
    }

    fn resolve(&self, href: &str) -> Option<String> {
        self.root.join(href.trim()).ok().map(String::from)
    }

    fn item_key(&self, link: ElementRef<'_>) -> Option<String> {
        let value = link.value().attr(&self.spec.item_attr)?.trim();
        let key = match self.spec.item_prefix.as_deref() {
            Some(prefix) => value.strip_prefix(prefix)?,
            None => value,
        };
        let key = key.trim_end_matches('/');
        (!key.is_empty()).then(|| key.to_string())
    }
}

impl ScrapeProvider for SelectorProvider {
    fn short_name(&self) -> &str {
        &self.spec.short_name
    }

    fn page_validator(&self) -> Arc<dyn PageValidator> {
        self.validator.clone()
    }

    fn discovery_partitions(&self) -> Vec<String> {
        self.spec.partitions.expand()
    }

    fn listing_route(&self) -> ListingRoute {
        self.spec.listing_route
    }

    fn listing_url(&self, partition: &str, page: usize) -> String {
        let offset = page * self.spec.page_size.unwrap_or(0);
        let url = self
            .spec
            .listing_url
            .replace("{partition}", partition)
            .replace("{page}", &page.to_string())
            .replace("{offset}", &offset.to_string());
        self.resolve(&url).unwrap_or(url)
    }

    fn parse_listing(&self, body: &str) -> ListingPage {
        let doc = Html::parse_document(body);
        let items: Vec<ListingItem> = doc
            .select(&self.item)
            .filter_map(|link| self.item_key(link))
            .map(ListingItem::new)
            .collect();
        let full_page = self
            .spec
            .page_size
            .is_some_and(|size| size > 0 && items.len() >= size);
        ListingPage { items, full_page }
    }

    fn detail_urls(&self, item: &ListingItem) -> Vec<String> {
        self.spec
            .detail_urls
            .iter()
            .map(|template| {
                let url = template.replace("{key}", &item.key);
                self.resolve(&url).unwrap_or(url)
            })
            .collect()
    }

    fn extract(&self, item: &ListingItem, pages: &[String]) -> Result<StagingRecord, ExtractError> {
        if pages.len() != self.spec.detail_urls.len() {
            return Err(ExtractError::PageCount {
                expected: self.spec.detail_urls.len(),
                actual: pages.len(),
            });
        }
        let docs: Vec<Html> = pages.iter().map(|page| Html::parse_document(page)).collect();

        let title = self
            .titles
            .iter()
            .find_map(|sel| first_text(&docs, sel))
            .ok_or_else(|| ExtractError::MissingField("title".to_string()))?;

        let mut tags = Vec::new();
        if let Some(sel) = &self.tags {
            let mut seen = HashSet::new();
            for el in docs.iter().flat_map(|doc| doc.select(sel)) {
                let text = el.text().collect::<String>();
                let parts: Vec<&str> = match self.spec.tag_separator.as_deref() {
                    Some(sep) => text.split(sep).collect(),
                    None => vec![text.as_str()],
                };
                for tag in parts.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
                    if seen.insert(tag.to_string()) {
                        tags.push(tag.to_string());
                    }
                }
            }
        }

        let mut artifacts = Vec::new();
        let mut seen = HashSet::new();
        for el in docs.iter().flat_map(|doc| doc.select(&self.artifacts)) {
            let Some(href) = self
                .spec
                .artifact_attrs
                .iter()
                .find_map(|attr| el.value().attr(attr))
            else {
                continue;
            };
            if let Some(url) = self.resolve(href) {
                if seen.insert(url.clone()) {
                    artifacts.push(url);
                }
            }
        }
        if let Some(max) = self.spec.max_artifacts {
            artifacts.truncate(max);
        }

        let attributes = self
            .fields
            .iter()
            .filter_map(|(name, sel)| first_text(&docs, sel).map(|text| (name.clone(), text)))
            .collect();

        Ok(StagingRecord {
            key: item.key.clone(),
            title,
            tags,
            artifacts,
            attributes,
        })
    }
}

fn first_text(docs: &[Html], sel: &Selector) -> Option<String> {
    docs.iter()
        .flat_map(|doc| doc.select(sel))
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty())
}

fn selector(source: &str) -> Result<Selector, SpecError> {
    Selector::parse(source).map_err(|err| SpecError::Selector {
        selector: source.to_string(),
        message: err.to_string(),
    })
}
