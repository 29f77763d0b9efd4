//! Operator dashboard adapter: session handling and table extraction

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::config::DashboardConfig;
use crate::io::{HttpClient, HttpResponse};
use crate::snapshot::{PaymentMethod, SaleRow, Snapshot, SnapshotSource, TerminalAlert};

/// Index of the payment icon cell in a sales row
const PAYMENT_CELL: usize = 5;
/// Index of the terminal name cell in a terminals row
const TERMINAL_NAME_CELL: usize = 1;

/// Regexes for pulling rows and cells out of the rendered tables
#[derive(Debug)]
pub struct TableParser {
    tbody: Regex,
    row: Regex,
    cell: Regex,
    tag: Regex,
    svg: Regex,
    class_attr: Regex,
    error_span: Regex,
    whitespace: Regex,
}

impl TableParser {
    pub fn new() -> crate::Result<Self> {
        let re = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                crate::VendwatchError::Config(format!("Invalid pattern {}: {}", pattern, e))
            })
        };
        Ok(Self {
            tbody: re(r"(?is)<tbody[^>]*>(.*?)</tbody>")?,
            row: re(r"(?is)<tr([^>]*)>(.*?)</tr>")?,
            cell: re(r"(?is)<td[^>]*>(.*?)</td>")?,
            tag: re(r"(?s)<[^>]*>")?,
            svg: re(r"(?is)<svg.*?</svg>")?,
            class_attr: re(r#"(?i)class\s*=\s*"([^"]*)""#)?,
            error_span: re(r#"(?i)<span[^>]*class\s*=\s*"[^"]*_error_[^"]*""#)?,
            whitespace: re(r"\s+")?,
        })
    }

    /// Rows of the first table body in `html` (the whole document if there is none)
    fn rows<'a>(&self, html: &'a str) -> Vec<(&'a str, &'a str)> {
        let body = self
            .tbody
            .captures(html)
            .and_then(|c| c.get(1))
            .map_or(html, |m| m.as_str());

        self.row
            .captures_iter(body)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect()
    }

    fn cells<'a>(&self, row: &'a str) -> Vec<&'a str> {
        self.cell
            .captures_iter(row)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect()
    }

    fn text(&self, fragment: &str) -> String {
        let stripped = self.tag.replace_all(fragment, " ");
        let decoded = decode_entities(&stripped);
        self.whitespace.replace_all(&decoded, " ").trim().to_string()
    }

    /// Sales rows, newest first as the table lists them
    pub fn parse_sales_table(&self, html: &str) -> Vec<SaleRow> {
        self.rows(html)
            .into_iter()
            .map(|(_, inner)| {
                let cells = self.cells(inner);
                let payment = PaymentMethod::from_icon(
                    cells
                        .get(PAYMENT_CELL)
                        .and_then(|cell| self.svg.find(cell))
                        .map(|m| m.as_str()),
                );
                SaleRow {
                    cells: cells.iter().map(|c| self.text(c)).collect(),
                    payment,
                }
            })
            .collect()
    }

    /// Terminals flagged with a problem and how many error markers each shows
    pub fn parse_terminal_table(&self, html: &str) -> Vec<TerminalAlert> {
        let mut alerts = Vec::new();
        for (attrs, inner) in self.rows(html) {
            let has_problem = self
                .class_attr
                .captures(attrs)
                .and_then(|c| c.get(1))
                .is_some_and(|m| m.as_str().contains("hasProblem"));
            if !has_problem {
                continue;
            }

            let cells = self.cells(inner);
            let name = cells
                .get(TERMINAL_NAME_CELL)
                .map(|c| self.text(c))
                .unwrap_or_default();
            if name.is_empty() {
                tracing::warn!("Skipping problem terminal row without a name");
                continue;
            }

            let error_count = self.error_span.find_iter(inner).count() as u32;
            alerts.push(TerminalAlert {
                terminal_name: name,
                error_count,
            });
        }
        alerts
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// A page that asks for a password means the session is gone
fn looks_like_login_page(body: &str) -> bool {
    body.contains(r#"name="password""#)
}

/// Dashboard snapshot source over HTTP
pub struct DashboardSource {
    base_url: String,
    login: String,
    password: String,
    http: Arc<dyn HttpClient>,
    parser: TableParser,
    session: AtomicBool,
}

impl std::fmt::Debug for DashboardSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardSource")
            .field("base_url", &self.base_url)
            .field("login", &self.login)
            .finish()
    }
}

impl DashboardSource {
    pub fn new(config: &DashboardConfig, http: Arc<dyn HttpClient>) -> crate::Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        tracing::debug!("Created DashboardSource for {}", base_url);
        Ok(Self {
            base_url,
            login: config.login.clone(),
            password: config.password.clone(),
            http,
            parser: TableParser::new()?,
            session: AtomicBool::new(false),
        })
    }

    pub fn has_session(&self) -> bool {
        self.session.load(Ordering::SeqCst)
    }

    async fn fetch_page(&self, page: &str) -> crate::Result<HttpResponse> {
        let url = format!("{}/{}", self.base_url, page);
        let response = self
            .http
            .get(&url)
            .await
            .map_err(|e| crate::VendwatchError::Fetch(format!("{}: {}", page, e)))?;

        if matches!(response.status, 401 | 403) || looks_like_login_page(&response.body) {
            self.session.store(false, Ordering::SeqCst);
            return Err(crate::VendwatchError::Fetch(format!(
                "{}: session expired (status {})",
                page, response.status
            )));
        }
        if !response.is_success() {
            return Err(crate::VendwatchError::Fetch(format!(
                "{}: status {}",
                page, response.status
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SnapshotSource for DashboardSource {
    async fn ensure_session(&self) -> crate::Result<()> {
        if self.has_session() {
            return Ok(());
        }

        let url = format!("{}/login", self.base_url);
        tracing::debug!("Logging in to {} as {}", self.base_url, self.login);
        let response = self
            .http
            .post_form(
                &url,
                &[("login", self.login.as_str()), ("password", self.password.as_str())],
            )
            .await
            .map_err(|e| crate::VendwatchError::Session(e.to_string()))?;

        if !response.is_success() || looks_like_login_page(&response.body) {
            return Err(crate::VendwatchError::Session(format!(
                "login rejected with status {}",
                response.status
            )));
        }

        self.session.store(true, Ordering::SeqCst);
        tracing::info!("Logged in to dashboard");
        Ok(())
    }

    async fn fetch_snapshot(&self) -> crate::Result<Snapshot> {
        let sales_page = self.fetch_page("sales").await?;
        let terminals_page = self.fetch_page("terminals").await?;

        let snapshot = Snapshot {
            sales: self.parser.parse_sales_table(&sales_page.body),
            terminals: self.parser.parse_terminal_table(&terminals_page.body),
        };
        tracing::debug!(
            "Fetched snapshot: {} sale rows, {} problem terminals",
            snapshot.sales.len(),
            snapshot.terminals.len()
        );
        Ok(snapshot)
    }
}
