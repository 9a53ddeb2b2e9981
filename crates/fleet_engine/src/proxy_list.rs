use scraper::{Html, Selector};

use crate::ProxyCandidate;

/// Anonymity levels accepted from listing pages. Transparent proxies leak the
/// client address and are never used.
pub const DEFAULT_ANONYMITY_LEVELS: [&str; 2] = ["elite proxy", "anonymous"];

const ADDRESS_CELL: usize = 0;
const PORT_CELL: usize = 1;
const ANONYMITY_CELL: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid proxy list selector {selector:?}: {message}")]
pub struct SelectorError {
    pub selector: String,
    pub message: String,
}

/// Extracts proxy candidates from a public proxy-list table.
#[derive(Debug, Clone)]
pub struct ProxyListParser {
    rows: Selector,
    cells: Selector,
    accepted_levels: Vec<String>,
}

impl ProxyListParser {
    pub fn new(row_selector: &str, accepted_levels: &[String]) -> Result<Self, SelectorError> {
        Ok(Self {
            rows: parse_selector(row_selector)?,
            cells: parse_selector("td")?,
            accepted_levels: accepted_levels.to_vec(),
        })
    }

    /// Rows need address, port and anonymity cells; anything else is skipped.
    pub fn parse(&self, html: &str) -> Vec<ProxyCandidate> {
        let doc = Html::parse_document(html);
        doc.select(&self.rows)
            .filter_map(|row| {
                let cells: Vec<String> = row
                    .select(&self.cells)
                    .map(|cell| cell.text().collect::<String>().trim().to_string())
                    .collect();
                if cells.len() <= ANONYMITY_CELL {
                    return None;
                }
                let anonymity = &cells[ANONYMITY_CELL];
                if !self
                    .accepted_levels
                    .iter()
                    .any(|level| level.eq_ignore_ascii_case(anonymity))
                {
                    return None;
                }
                let address = &cells[ADDRESS_CELL];
                let port = cells[PORT_CELL].parse::<u16>().ok()?;
                if address.is_empty() {
                    return None;
                }
                Some(ProxyCandidate::new(address.clone(), port))
            })
            .collect()
    }
}

fn parse_selector(selector: &str) -> Result<Selector, SelectorError> {
    Selector::parse(selector).map_err(|err| SelectorError {
        selector: selector.to_string(),
        message: err.to_string(),
    })
}
