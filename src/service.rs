//! Inline report import as exposed to uploaders.
//!
//! Input is validated here, the uploaded archive is copied into the storage
//! directory under a name derived from ticker and period, facts are extracted
//! and the report is written in one transaction. Messages meant for the
//! uploader are in Indonesian.

use crate::inline::FactExtractor;
use crate::store::{Company, Report, ReportRecord, ReportSummary, SqliteStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const MIN_YEAR: i32 = 1990;
pub const MAX_YEAR: i32 = 2100;

pub mod messages {
    pub const TICKER_REQUIRED: &str = "Ticker wajib diisi.";
    pub const TICKER_INVALID: &str = "Ticker hanya boleh berisi huruf, angka, titik, atau strip.";
    pub const YEAR_NOT_NUMBER: &str = "Tahun harus berupa angka.";
    pub const YEAR_OUT_OF_RANGE: &str = "Tahun berada di luar rentang yang diizinkan.";
    pub const QUARTER_NOT_NUMBER: &str = "Kuartal harus berupa angka antara 1 hingga 4.";
    pub const QUARTER_OUT_OF_RANGE: &str = "Kuartal harus bernilai 1 sampai 4.";
    pub const COMPANY_REQUIRED: &str = "Nama perusahaan wajib diisi.";
    pub const UPLOAD_MISSING: &str = "Berkas unggahan tidak ditemukan.";
    pub const UPLOAD_NOT_ZIP: &str = "Berkas yang diunggah harus berformat ZIP.";
    pub const NO_FACTS: &str = "Tidak ditemukan fakta keuangan pada arsip yang diunggah.";
    pub const REPORT_NOT_FOUND: &str = "Data laporan tidak ditemukan untuk parameter yang diberikan.";
    pub const IMPORTED: &str = "Laporan berhasil diunggah dan diproses.";
    pub const SERVER_ERROR: &str = "Terjadi kesalahan pada server.";
}

/// An upload as received from the caller; numbers are still text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportRequest {
    pub ticker: String,
    pub company_name: String,
    pub year: String,
    pub quarter: String,
    pub archive: PathBuf,
    /// Name the file had on the uploader's side, if different from `archive`
    pub original_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedReport {
    pub company: Company,
    pub fiscal_year: i32,
    pub fiscal_quarter: u8,
    pub line_count: usize,
    pub source_file: String,
}

pub struct ReportService<'s> {
    store: &'s SqliteStore,
    storage_dir: PathBuf,
    extractor: FactExtractor,
}

impl<'s> ReportService<'s> {
    pub fn new(store: &'s SqliteStore, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            storage_dir: storage_dir.into(),
            extractor: FactExtractor::new(),
        }
    }

    pub fn import_report(&self, request: &ReportRequest) -> Result<ImportedReport> {
        let (ticker, year, quarter) = validate_period(&request.ticker, &request.year, &request.quarter)?;

        let company_name = request.company_name.trim();
        if company_name.is_empty() {
            return Err(Error::Validation(messages::COMPANY_REQUIRED.to_string()));
        }
        if !request.archive.is_file() {
            return Err(Error::Validation(messages::UPLOAD_MISSING.to_string()));
        }

        let stored = self.store_archive(&ticker, year, quarter, request)?;
        let facts = match self.extractor.extract_file(&stored) {
            Ok(facts) => facts,
            Err(e) => {
                if let Err(remove) = std::fs::remove_file(&stored) {
                    warn!("Unable to remove {}: {}", stored.display(), remove);
                }
                return Err(e);
            }
        };

        let source_file = stored
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.store.persist_report(&ReportRecord {
            ticker: &ticker,
            company_name,
            fiscal_year: year,
            fiscal_quarter: quarter,
            source_file: &source_file,
            lines: &facts,
        })?;

        info!(
            "Imported {} lines for {} {} Q{} from {}",
            facts.len(),
            ticker,
            year,
            quarter,
            source_file
        );

        Ok(ImportedReport {
            company: Company {
                ticker,
                name: company_name.to_string(),
            },
            fiscal_year: year,
            fiscal_quarter: quarter,
            line_count: facts.len(),
            source_file,
        })
    }

    pub fn get_report(&self, ticker: &str, year: &str, quarter: &str) -> Result<Report> {
        let (ticker, year, quarter) = validate_period(ticker, year, quarter)?;
        self.store
            .find_report(&ticker, year, quarter)?
            .ok_or_else(|| Error::NotFound(messages::REPORT_NOT_FOUND.to_string()))
    }

    pub fn list_reports(&self) -> Result<Vec<ReportSummary>> {
        self.store.list_reports()
    }

    fn store_archive(&self, ticker: &str, year: i32, quarter: u8, request: &ReportRequest) -> Result<PathBuf> {
        let original = request
            .original_filename
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .map(Path::new)
            .unwrap_or(&request.archive);
        let is_zip = original
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        if !is_zip {
            return Err(Error::Validation(messages::UPLOAD_NOT_ZIP.to_string()));
        }

        std::fs::create_dir_all(&self.storage_dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let target = self
            .storage_dir
            .join(format!("{}_{}_Q{}_{}.zip", safe_ticker(ticker), year, quarter, timestamp));
        std::fs::copy(&request.archive, &target)?;
        Ok(target)
    }
}

/// Validate and normalize ticker, year and quarter.
pub fn validate_period(ticker: &str, year: &str, quarter: &str) -> Result<(String, i32, u8)> {
    let invalid = |message: &str| Error::Validation(message.to_string());

    let ticker = ticker.trim().to_uppercase();
    if ticker.is_empty() {
        return Err(invalid(messages::TICKER_REQUIRED));
    }
    let ticker_ok = (3..=10).contains(&ticker.len())
        && ticker
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'.' || b == b'-');
    if !ticker_ok {
        return Err(invalid(messages::TICKER_INVALID));
    }

    let year = year.trim();
    if !is_digits(year) {
        return Err(invalid(messages::YEAR_NOT_NUMBER));
    }
    let year: i32 = year.parse().map_err(|_| invalid(messages::YEAR_OUT_OF_RANGE))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(invalid(messages::YEAR_OUT_OF_RANGE));
    }

    let quarter = quarter.trim();
    if !is_digits(quarter) {
        return Err(invalid(messages::QUARTER_NOT_NUMBER));
    }
    let quarter: u8 = quarter.parse().map_err(|_| invalid(messages::QUARTER_OUT_OF_RANGE))?;
    if !(1..=4).contains(&quarter) {
        return Err(invalid(messages::QUARTER_OUT_OF_RANGE));
    }

    Ok((ticker, year, quarter))
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

// File names only keep letters and digits of the ticker
fn safe_ticker(ticker: &str) -> String {
    let safe: String = ticker.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if safe.is_empty() {
        ticker.to_string()
    } else {
        safe
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Response envelope handed back to callers
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    /// HTTP-style status code; not part of the body
    #[serde(skip)]
    pub code: u16,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, message: Option<&str>) -> Self {
        Self {
            code: 200,
            status: Status::Success,
            message: message.map(str::to_string),
            data: Some(data),
        }
    }

    /// User errors come back as 422 with their message; anything else is
    /// logged and reported as a generic 500.
    pub fn from_result(result: Result<T>, message: Option<&str>) -> Self {
        match result {
            Ok(data) => Self::success(data, message),
            Err(e) if e.is_user_error() => Self {
                code: 422,
                status: Status::Error,
                message: Some(user_message(&e)),
                data: None,
            },
            Err(e) => {
                error!("Request failed: {:?}", e);
                Self {
                    code: 500,
                    status: Status::Error,
                    message: Some(messages::SERVER_ERROR.to_string()),
                    data: None,
                }
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn user_message(error: &Error) -> String {
    match error {
        Error::NoFacts => messages::NO_FACTS.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::zip_bytes;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"<html xmlns:ix="http://www.xbrl.org/2013/inlineXBRL"><body>
<ix:nonFraction name="Revenue" unitRef="IDR" decimals="0">1,500</ix:nonFraction>
<ix:nonFraction name="ProfitLoss" unitRef="IDR" decimals="0">(200)</ix:nonFraction>
</body></html>"#;

    struct Fixture {
        dir: tempfile::TempDir,
        store: SqliteStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                store: SqliteStore::open_in_memory().unwrap(),
            }
        }

        fn service(&self) -> ReportService<'_> {
            ReportService::new(&self.store, self.dir.path().join("instance_files"))
        }

        fn upload(&self, name: &str, members: &[(&str, &str)]) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, zip_bytes(members)).unwrap();
            path
        }

        fn stored_files(&self) -> usize {
            std::fs::read_dir(self.dir.path().join("instance_files"))
                .map(|entries| entries.count())
                .unwrap_or(0)
        }
    }

    fn request(archive: PathBuf) -> ReportRequest {
        ReportRequest {
            ticker: " aali ".to_string(),
            company_name: "Astra Agro Lestari Tbk".to_string(),
            year: "2024".to_string(),
            quarter: "2".to_string(),
            archive,
            original_filename: None,
        }
    }

    fn validation_message(result: Result<(String, i32, u8)>) -> String {
        match result {
            Err(Error::Validation(message)) => message,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_period() {
        assert_eq!(validate_period(" bbca ", "2023", "4").unwrap(), ("BBCA".to_string(), 2023, 4));
        assert_eq!(validate_period("BRK.B", "1990", "1").unwrap().0, "BRK.B");

        assert_eq!(validation_message(validate_period("  ", "2023", "1")), messages::TICKER_REQUIRED);
        assert_eq!(validation_message(validate_period("AB", "2023", "1")), messages::TICKER_INVALID);
        assert_eq!(validation_message(validate_period("ABCDEFGHIJK", "2023", "1")), messages::TICKER_INVALID);
        assert_eq!(validation_message(validate_period("AA_LI", "2023", "1")), messages::TICKER_INVALID);
        assert_eq!(validation_message(validate_period("AALI", "20x3", "1")), messages::YEAR_NOT_NUMBER);
        assert_eq!(validation_message(validate_period("AALI", "-2023", "1")), messages::YEAR_NOT_NUMBER);
        assert_eq!(validation_message(validate_period("AALI", "1989", "1")), messages::YEAR_OUT_OF_RANGE);
        assert_eq!(validation_message(validate_period("AALI", "2101", "1")), messages::YEAR_OUT_OF_RANGE);
        assert_eq!(
            validation_message(validate_period("AALI", "99999999999", "1")),
            messages::YEAR_OUT_OF_RANGE
        );
        assert_eq!(validation_message(validate_period("AALI", "2023", "Q1")), messages::QUARTER_NOT_NUMBER);
        assert_eq!(validation_message(validate_period("AALI", "2023", "0")), messages::QUARTER_OUT_OF_RANGE);
        assert_eq!(validation_message(validate_period("AALI", "2023", "5")), messages::QUARTER_OUT_OF_RANGE);
    }

    #[test]
    fn test_import_report() {
        let fixture = Fixture::new();
        let archive = fixture.upload("upload.zip", &[("report.xhtml", PAGE)]);

        let imported = fixture.service().import_report(&request(archive)).unwrap();
        assert_eq!(imported.company.ticker, "AALI");
        assert_eq!(imported.fiscal_year, 2024);
        assert_eq!(imported.fiscal_quarter, 2);
        assert_eq!(imported.line_count, 2);
        assert!(imported.source_file.starts_with("AALI_2024_Q2_"));
        assert!(imported.source_file.ends_with(".zip"));
        // AALI_2024_Q2_YYYYMMDD_HHMMSS.zip
        assert_eq!(imported.source_file.len(), "AALI_2024_Q2_".len() + 15 + 4);
        assert!(fixture.dir.path().join("instance_files").join(&imported.source_file).is_file());

        let report = fixture.service().get_report("aali", "2024", "2").unwrap();
        assert_eq!(report.lines.len(), 2);
        assert_eq!(report.lines[0].value, 1500.0);
        assert_eq!(report.lines[1].value, -200.0);
        assert_eq!(report.source_file.as_deref(), Some(imported.source_file.as_str()));
    }

    #[test]
    fn test_archive_without_facts_is_removed() {
        let fixture = Fixture::new();
        let archive = fixture.upload("empty.zip", &[("report.html", "<html><body>kosong</body></html>")]);

        let err = fixture.service().import_report(&request(archive)).unwrap_err();
        assert!(matches!(err, Error::NoFacts));
        assert_eq!(fixture.stored_files(), 0);
        assert!(fixture.store.list_reports().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_zip_upload() {
        let fixture = Fixture::new();
        let archive = fixture.upload("upload.zip", &[("report.xhtml", PAGE)]);

        let mut req = request(archive);
        req.original_filename = Some("laporan.pdf".to_string());
        let err = fixture.service().import_report(&req).unwrap_err();
        assert_eq!(err.to_string(), messages::UPLOAD_NOT_ZIP);

        // the original name wins over the temporary upload path
        let renamed = fixture.dir.path().join("php12AB.tmp");
        std::fs::copy(&req.archive, &renamed).unwrap();
        let mut req = request(renamed);
        req.original_filename = Some("LAPORAN.ZIP".to_string());
        assert!(fixture.service().import_report(&req).is_ok());
    }

    #[test]
    fn test_rejects_missing_fields() {
        let fixture = Fixture::new();
        let archive = fixture.upload("upload.zip", &[("report.xhtml", PAGE)]);

        let mut req = request(archive.clone());
        req.company_name = "   ".to_string();
        let err = fixture.service().import_report(&req).unwrap_err();
        assert_eq!(err.to_string(), messages::COMPANY_REQUIRED);

        let req = request(fixture.dir.path().join("missing.zip"));
        let err = fixture.service().import_report(&req).unwrap_err();
        assert_eq!(err.to_string(), messages::UPLOAD_MISSING);
        assert_eq!(fixture.stored_files(), 0);
    }

    #[test]
    fn test_report_not_found() {
        let fixture = Fixture::new();
        let err = fixture.service().get_report("AALI", "2024", "1").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.to_string(), messages::REPORT_NOT_FOUND);
    }

    #[test]
    fn test_envelope() {
        let ok = ApiResponse::from_result(Ok(vec![1, 2]), Some(messages::IMPORTED));
        assert_eq!(ok.code, 200);
        assert_eq!(
            ok.to_json().unwrap(),
            r#"{"status":"success","message":"Laporan berhasil diunggah dan diproses.","data":[1,2]}"#
        );

        let user: ApiResponse<()> = ApiResponse::from_result(Err(Error::NoFacts), None);
        assert_eq!(user.code, 422);
        assert_eq!(user.message.as_deref(), Some(messages::NO_FACTS));

        let internal: ApiResponse<()> =
            ApiResponse::from_result(Err(Error::Parse("disk on fire".to_string())), None);
        assert_eq!(internal.code, 500);
        assert!(!internal.is_success());
        assert_eq!(
            internal.to_json().unwrap(),
            r#"{"status":"error","message":"Terjadi kesalahan pada server."}"#
        );
    }
}
