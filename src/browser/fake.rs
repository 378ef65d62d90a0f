//! In-memory stand-in for the registry's search pages, used by tests.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use super::{Locator, Session};
use crate::fetch::TableExtractor;
use crate::process::RawTableSet;
use crate::site::{
    self, CATEGORY_SELECT, COMPANY_FIELD, DOWNLOAD_PDF_BUTTON, LICENCE_NAME_FIELD, NEXT_PAGE,
    SEARCH_BUTTON,
};

pub(crate) const LIST_HEADERS: [&str; 8] = [
    "Authorization Number",
    "Former Authorization Number",
    "Company Name",
    "Account Number",
    "Licence Category",
    "Area Code (Tier)",
    "Area Name",
    "Subservice",
];

#[derive(Debug, Clone)]
pub(crate) struct FakeLicence {
    pub auth: String,
    pub company: String,
    pub category: String,
    /// Text of the population cell; `None` never renders it.
    pub population: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum View {
    Blank,
    Search,
    Results { matches: Vec<usize>, page: usize },
    Rejected,
    NoResults,
    Detail { licence: usize, population: bool },
    DocumentSearch,
    DocumentResult(String),
}

/// Registry state machine: page views, a history stack and form fields.
pub(crate) struct FakeRegistry {
    download_dir: PathBuf,
    page_size: usize,
    categories: Vec<String>,
    licences: Vec<FakeLicence>,
    rejected: HashSet<String>,
    documents: HashSet<String>,
    no_download: HashSet<String>,
    flaky_population: HashMap<String, u32>,

    view: View,
    history: Vec<View>,
    category: String,
    company: String,
    licence_name: String,

    searches: Vec<(String, String)>,
    next_clicks: u32,
    detail_visits: HashMap<String, u32>,
}

impl FakeRegistry {
    pub fn new(download_dir: &Path) -> Self {
        Self {
            download_dir: download_dir.to_path_buf(),
            page_size: 20,
            categories: Vec::new(),
            licences: Vec::new(),
            rejected: HashSet::new(),
            documents: HashSet::new(),
            no_download: HashSet::new(),
            flaky_population: HashMap::new(),
            view: View::Blank,
            history: Vec::new(),
            category: String::new(),
            company: String::new(),
            licence_name: String::new(),
            searches: Vec::new(),
            next_clicks: 0,
            detail_visits: HashMap::new(),
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for c in categories {
            let c = c.into();
            if !self.categories.contains(&c) {
                self.categories.push(c);
            }
        }
        self
    }

    /// Add `count` licences named `<prefix>-<n>` (n from 1) held by `company`.
    pub fn with_licences(mut self, category: &str, company: &str, prefix: &str, count: usize) -> Self {
        self = self.with_categories([category]);
        for n in 1..=count {
            self.licences.push(FakeLicence {
                auth: format!("{prefix}-{n}"),
                company: company.to_string(),
                category: category.to_string(),
                population: Some(format!("{} (2016 Census)", 1000 + n)),
            });
        }
        self
    }

    /// Bulk searches of `category` (no company filter) show the error banner.
    pub fn rejecting(mut self, category: &str) -> Self {
        self.rejected.insert(category.to_string());
        self
    }

    pub fn with_documents<I, S>(mut self, auths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.documents.extend(auths.into_iter().map(Into::into));
        self
    }

    /// The download button shows but clicking it never produces a file.
    pub fn without_download(mut self, auth: &str) -> Self {
        self.no_download.insert(auth.to_string());
        self
    }

    pub fn with_population(mut self, auth: &str, text: Option<&str>) -> Self {
        if let Some(l) = self.licences.iter_mut().find(|l| l.auth == auth) {
            l.population = text.map(str::to_string);
        }
        self
    }

    /// The first `failures` visits of `auth`'s detail view lack the population.
    pub fn with_flaky_population(mut self, auth: &str, failures: u32) -> Self {
        self.flaky_population.insert(auth.to_string(), failures);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// `(category, company)` of every list search submitted.
    pub fn searches(&self) -> &[(String, String)] {
        &self.searches
    }

    pub fn next_clicks(&self) -> u32 {
        self.next_clicks
    }

    pub fn detail_visits(&self, auth: &str) -> u32 {
        self.detail_visits.get(auth).copied().unwrap_or(0)
    }

    pub fn licence_name_field(&self) -> &str {
        &self.licence_name
    }

    fn navigate(&mut self, view: View) {
        let previous = std::mem::replace(&mut self.view, view);
        self.history.push(previous);
    }

    fn submit_list_search(&mut self) {
        self.searches.push((self.category.clone(), self.company.clone()));
        let company = self.company.trim().to_lowercase();
        if company.is_empty() && self.rejected.contains(&self.category) {
            self.navigate(View::Rejected);
            return;
        }
        let matches: Vec<usize> = self
            .licences
            .iter()
            .enumerate()
            .filter(|(_, l)| l.category == self.category)
            .filter(|(_, l)| company.is_empty() || l.company.to_lowercase().contains(&company))
            .map(|(i, _)| i)
            .collect();
        if matches.is_empty() {
            self.navigate(View::NoResults);
        } else {
            self.navigate(View::Results { matches, page: 0 });
        }
    }

    fn open_detail(&mut self, auth: &str) -> Result<()> {
        let licence = self
            .licences
            .iter()
            .position(|l| l.auth == auth)
            .with_context(|| format!("no licence {auth}"))?;
        *self.detail_visits.entry(auth.to_string()).or_default() += 1;
        let population = match self.flaky_population.get_mut(auth) {
            Some(left) if *left > 0 => {
                *left -= 1;
                false
            }
            _ => self.licences[licence].population.is_some(),
        };
        self.navigate(View::Detail { licence, population });
        Ok(())
    }

    fn download(&self, auth: &str) -> Result<()> {
        if self.no_download.contains(auth) {
            return Ok(());
        }
        let path = site::document_path(&self.download_dir, auth);
        std::fs::write(&path, format!("%PDF-1.4 certificate {auth}"))
            .with_context(|| format!("writing {}", path.display()))
    }

    fn perform(&mut self, locator: &Locator) -> Result<()> {
        if self.matches(locator)?.is_empty() {
            bail!("no element matches {locator}");
        }
        let current = self.view.clone();
        match (current, locator) {
            (View::DocumentSearch, l) if l == &*SEARCH_BUTTON => {
                let auth = self.licence_name.trim().to_string();
                self.navigate(View::DocumentResult(auth));
            }
            (_, l) if l == &*SEARCH_BUTTON => self.submit_list_search(),
            (View::Results { matches, page }, l) if l == &*NEXT_PAGE => {
                self.next_clicks += 1;
                self.navigate(View::Results {
                    matches,
                    page: page + 1,
                });
            }
            (View::DocumentResult(auth), l) if l == &*DOWNLOAD_PDF_BUTTON => self.download(&auth)?,
            (View::Results { .. }, Locator::LinkText(auth)) => self.open_detail(auth)?,
            (view, l) => bail!("fake registry cannot click {l} on {view:?}"),
        }
        Ok(())
    }

    /// Text of every element matching `locator` on the current page.
    fn matches(&self, locator: &Locator) -> Result<Vec<String>> {
        let doc = Html::parse_document(&self.render());
        let texts = match locator {
            Locator::Css(sel) => {
                let selector = Selector::parse(sel)
                    .map_err(|e| anyhow::anyhow!("bad selector {sel}: {e:?}"))?;
                doc.select(&selector)
                    .map(|el| el.text().collect::<String>())
                    .collect()
            }
            Locator::LinkText(t) | Locator::PartialLinkText(t) => {
                let anchors = Selector::parse("a").map_err(|e| anyhow::anyhow!("{e:?}"))?;
                doc.select(&anchors)
                    .map(|el| el.text().collect::<Vec<_>>().join(" "))
                    .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
                    .filter(|text| match locator {
                        Locator::LinkText(_) => text == t,
                        _ => text.contains(t.as_str()),
                    })
                    .collect()
            }
        };
        Ok(texts)
    }

    fn render(&self) -> String {
        let body = match &self.view {
            View::Blank => String::new(),
            View::Search => self.list_form(),
            View::Rejected => format!(
                "{}<div id=\"errorMessageSpectumLicense\">The search returned too many results. Refine the criteria.</div>",
                self.list_form()
            ),
            View::NoResults => format!(
                "{}<div class=\"span-8\">No licences match the search criteria.</div>",
                self.list_form()
            ),
            View::Results { matches, page } => self.results(matches, *page),
            View::Detail { licence, population } => self.detail(*licence, *population),
            View::DocumentSearch => format!(
                "<form><div class=\"form-group\"><input id=\"licenseName\" name=\"licenseName\" value=\"{}\"></div>\
                 <input type=\"submit\" value=\"Search\"></form>",
                esc(&self.licence_name)
            ),
            View::DocumentResult(auth) => {
                let button = if self.documents.contains(auth) {
                    "<button id=\"downloadLicenceAsPDFButton\">Download licence as PDF</button>"
                } else {
                    ""
                };
                format!("<h1>Licence {}</h1>{button}", esc(auth))
            }
        };
        format!("<html><head><title>Spectrum Management System</title></head><body>{body}</body></html>")
    }

    fn list_form(&self) -> String {
        let options: String = self
            .categories
            .iter()
            .map(|c| {
                let selected = if *c == self.category { " selected" } else { "" };
                format!("<option value=\"{0}\"{selected}>{0}</option>", esc(c))
            })
            .collect();
        format!(
            "<form>\
             <div class=\"form-group\"><label for=\"licenceCategory\">Licence Category</label>\
             <select id=\"licenceCategory\">{options}</select></div>\
             <div class=\"form-group\"><label for=\"companyName\">Company Name</label>\
             <input id=\"companyName\" value=\"{}\"></div>\
             <input type=\"submit\" value=\"Search\">\
             </form>",
            esc(&self.company)
        )
    }

    fn results(&self, matches: &[usize], page: usize) -> String {
        let pages = matches.len().div_ceil(self.page_size);
        let head: String = LIST_HEADERS.iter().map(|h| format!("<th>{h}</th>")).collect();
        let rows: String = matches
            .iter()
            .skip(page * self.page_size)
            .take(self.page_size)
            .map(|&i| {
                let l = &self.licences[i];
                format!(
                    "<tr><td><a href=\"#\">{}</a></td><td></td><td>{}</td><td>100{i}</td>\
                     <td>{}</td><td>T{i}</td><td>Area {i}</td><td>Fixed</td></tr>",
                    esc(&l.auth),
                    esc(&l.company),
                    esc(&l.category)
                )
            })
            .collect();
        let next = if page + 1 < pages {
            "<a href=\"#\">Next &gt;</a>"
        } else {
            ""
        };
        format!(
            "{}<div class=\"form-group\">Number of results found: {}</div>\
             <table id=\"spectrumLicenceSearchResultTable\"><thead><tr>{head}</tr></thead>\
             <tbody>{rows}</tbody></table>{next}",
            self.list_form(),
            matches.len()
        )
    }

    fn detail(&self, licence: usize, population: bool) -> String {
        let l = &self.licences[licence];
        let mut rows = vec![
            ("Authorization Number", l.auth.clone()),
            ("Company", l.company.clone()),
            ("Category", l.category.clone()),
            ("Status", "Active".to_string()),
            ("Area", format!("Area {licence}")),
        ];
        if population {
            rows.push(("Population", l.population.clone().unwrap_or_default()));
        }
        let rows: String = rows
            .into_iter()
            .map(|(k, v)| format!("<tr><td>{k}</td><td>{}</td></tr>", esc(&v)))
            .collect();
        format!("<table id=\"licenceInformationTable\"><tbody>{rows}</tbody></table>")
    }
}

fn esc(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl Session for FakeRegistry {
    async fn goto(&mut self, url: &str) -> Result<()> {
        let view = if url.contains("searchSpectrumLicense") {
            View::Search
        } else if url.contains("searchVirtualLicense") {
            View::DocumentSearch
        } else {
            View::Blank
        };
        self.navigate(view);
        Ok(())
    }

    async fn back(&mut self) -> Result<()> {
        self.view = self.history.pop().context("no history to go back to")?;
        Ok(())
    }

    async fn html(&self) -> Result<String> {
        Ok(self.render())
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        Ok(self.matches(locator)?.len())
    }

    async fn text(&self, locator: &Locator) -> Result<Option<String>> {
        Ok(self.matches(locator)?.into_iter().next())
    }

    async fn click(&mut self, locator: &Locator) -> Result<()> {
        self.perform(locator)
    }

    async fn click_and_wait(&mut self, locator: &Locator) -> Result<()> {
        self.perform(locator)
    }

    async fn set_value(&mut self, locator: &Locator, value: &str) -> Result<()> {
        if self.matches(locator)?.is_empty() {
            bail!("no element matches {locator}");
        }
        let field = if locator == &*CATEGORY_SELECT {
            &mut self.category
        } else if locator == &*COMPANY_FIELD {
            &mut self.company
        } else if locator == &*LICENCE_NAME_FIELD {
            &mut self.licence_name
        } else {
            bail!("fake registry has no field {locator}");
        };
        *field = value.to_string();
        Ok(())
    }
}

/// Canned table sets keyed by authorization number.
#[derive(Default)]
pub(crate) struct FakeExtractor {
    tables: HashMap<String, RawTableSet>,
}

impl FakeExtractor {
    pub fn with(mut self, auth: &str, tables: RawTableSet) -> Self {
        self.tables.insert(auth.to_string(), tables);
        self
    }
}

#[async_trait]
impl TableExtractor for FakeExtractor {
    async fn extract(&self, document: &Path) -> Result<RawTableSet> {
        anyhow::ensure!(document.is_file(), "{} does not exist", document.display());
        let auth = site::authorization_from_document(document)
            .with_context(|| format!("unexpected document name {}", document.display()))?;
        self.tables
            .get(&auth)
            .cloned()
            .with_context(|| format!("no tables for {auth}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{NO_RESULTS, POPULATION_CELL, RESULTS_TABLE, SEARCH_ERROR};

    #[tokio::test]
    async fn fake_pages_answer_the_real_selectors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut reg = FakeRegistry::new(dir.path())
            .with_licences("X", "Acme", "X", 21)
            .rejecting("Y")
            .with_categories(["Y"]);
        reg.goto("https://example/searchSpectrumLicense").await?;
        reg.set_value(&CATEGORY_SELECT, "X").await?;
        reg.click_and_wait(&SEARCH_BUTTON).await?;
        assert_eq!(reg.count(&RESULTS_TABLE).await?, 1);
        assert_eq!(reg.count(&NEXT_PAGE).await?, 1);
        assert_eq!(reg.count(&Locator::link_text("X-21")).await?, 0);

        reg.click_and_wait(&Locator::link_text("X-2")).await?;
        assert_eq!(
            reg.text(&POPULATION_CELL).await?.as_deref(),
            Some("1002 (2016 Census)")
        );
        reg.back().await?;
        reg.click_and_wait(&NEXT_PAGE).await?;
        assert_eq!(reg.count(&Locator::link_text("X-21")).await?, 1);
        assert_eq!(reg.count(&NEXT_PAGE).await?, 0);

        reg.set_value(&CATEGORY_SELECT, "Y").await?;
        reg.click_and_wait(&SEARCH_BUTTON).await?;
        assert_eq!(reg.count(&SEARCH_ERROR).await?, 1);
        reg.set_value(&COMPANY_FIELD, "Nobody").await?;
        reg.click_and_wait(&SEARCH_BUTTON).await?;
        assert_eq!(reg.count(&NO_RESULTS).await?, 1);
        assert_eq!(reg.count(&SEARCH_ERROR).await?, 0);
        Ok(())
    }
}
