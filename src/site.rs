// src/site.rs
//
// Element locators for the ISED Spectrum Management System search pages.

use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};

use crate::browser::Locator;

// ─── licence browser (list pipeline) ────────────────────────────────
pub static CATEGORY_SELECT: Lazy<Locator> = Lazy::new(|| Locator::css("#licenceCategory"));
pub static COMPANY_FIELD: Lazy<Locator> = Lazy::new(|| Locator::css("#companyName"));
pub static SEARCH_BUTTON: Lazy<Locator> =
    Lazy::new(|| Locator::css("input[type='submit'][value='Search']"));
/// Shown when the registry refuses a search, e.g. too many matches.
pub static SEARCH_ERROR: Lazy<Locator> =
    Lazy::new(|| Locator::css("#errorMessageSpectumLicense"));
pub static RESULTS_TABLE: Lazy<Locator> =
    Lazy::new(|| Locator::css("#spectrumLicenceSearchResultTable"));
/// Notice rendered in place of the table when nothing matched.
pub static NO_RESULTS: Lazy<Locator> = Lazy::new(|| Locator::css("div[class='span-8']"));
pub static NEXT_PAGE: Lazy<Locator> = Lazy::new(|| Locator::partial_link_text("Next"));
/// Population cell of the licence information table on a detail view.
pub static POPULATION_CELL: Lazy<Locator> = Lazy::new(|| {
    Locator::css("#licenceInformationTable > tbody > tr:nth-child(6) > td:nth-child(2)")
});

pub const RESULTS_TABLE_ID: &str = "spectrumLicenceSearchResultTable";
pub const CATEGORY_OPTIONS_SELECTOR: &str = "#licenceCategory option";
/// The last `.form-group` on a result page ends with the total match count.
pub const RESULTS_SUMMARY_SELECTOR: &str = ".form-group";

// ─── virtual licence search (detail pipeline) ───────────────────────
pub static LICENCE_NAME_FIELD: Lazy<Locator> = Lazy::new(|| Locator::css("#licenseName"));
pub static DOWNLOAD_PDF_BUTTON: Lazy<Locator> =
    Lazy::new(|| Locator::css("#downloadLicenceAsPDFButton"));

/// Where the registry's certificate for `authorization_number` lands.
pub fn document_path(download_dir: &Path, authorization_number: &str) -> PathBuf {
    download_dir.join(format!("ISED-{authorization_number}.pdf"))
}

/// Inverse of [`document_path`] on the file name.
pub fn authorization_from_document(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let auth = name.strip_prefix("ISED-")?.strip_suffix(".pdf")?;
    (!auth.is_empty()).then(|| auth.to_string())
}

/// Link to a licence's detail view from its row in the result table.
pub fn licence_link(authorization_number: &str) -> Locator {
    Locator::link_text(authorization_number)
}
