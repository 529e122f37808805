//! SQLite-backed store
//!
//! Raw records live in `HospitalRecord`, `PharmaSale` and `SocialPost`.
//! Each publish writes a new `AssessmentSet` row plus its `AggregatedSummary`
//! rows, flips the published flag to the new set and drops older sets, all in
//! one transaction.

use super::{AssessmentSink, ObservationSource};
use crate::error::StorageError;
use crate::records::{HospitalVisit, Observations, PharmacySale, Sentiment, Severity, SocialPost};
use crate::scoring::{AlertLevel, RiskAssessment};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS HospitalRecord (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    patientId   TEXT NOT NULL,
    district    TEXT NOT NULL,
    severity    TEXT NOT NULL,
    visitDate   TEXT
);

CREATE TABLE IF NOT EXISTS PharmaSale (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    pharmacyId  TEXT NOT NULL,
    district    TEXT NOT NULL,
    qtySold     INTEGER NOT NULL,
    saleDate    TEXT
);

CREATE TABLE IF NOT EXISTS SocialPost (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    postId      TEXT NOT NULL,
    district    TEXT NOT NULL,
    sentiment   TEXT NOT NULL,
    timeStamp   TEXT
);

CREATE TABLE IF NOT EXISTS AssessmentSet (
    version     INTEGER PRIMARY KEY AUTOINCREMENT,
    createdAt   TEXT NOT NULL,
    published   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS AggregatedSummary (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    setVersion          INTEGER NOT NULL REFERENCES AssessmentSet(version) ON DELETE CASCADE,
    district            TEXT NOT NULL,
    date                TEXT NOT NULL,
    hospitalCaseCount   INTEGER NOT NULL,
    severeCaseCount     INTEGER NOT NULL,
    pharmaSalesCount    INTEGER NOT NULL,
    socialPostsCount    INTEGER NOT NULL,
    negativePostsCount  INTEGER NOT NULL,
    outbreakRiskScore   REAL NOT NULL,
    alertLevel          TEXT NOT NULL,
    explanation         TEXT NOT NULL,
    anomalous           INTEGER NOT NULL,
    forecastCases       REAL NOT NULL,
    UNIQUE (setVersion, district)
);

CREATE INDEX IF NOT EXISTS idx_summary_score ON AggregatedSummary(setVersion, outbreakRiskScore);
"#;

const SUMMARY_COLUMNS: &str = "s.district, s.date, s.hospitalCaseCount, s.severeCaseCount, \
     s.pharmaSalesCount, s.socialPostsCount, s.negativePostsCount, s.outbreakRiskScore, \
     s.alertLevel, s.explanation, s.anomalous, s.forecastCases";

const PUBLISHED_JOIN: &str =
    "FROM AggregatedSummary s JOIN AssessmentSet a ON a.version = s.setVersion WHERE a.published = 1";

/// Where a connection string points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Memory,
    File(PathBuf),
}

impl ConnectionTarget {
    /// Accepts `sqlite://<path>`, `sqlite:<path>`, `sqlite::memory:` or a bare
    /// path. Any other URL scheme is rejected.
    pub fn parse(url: &str) -> Result<Self, StorageError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StorageError::UnsupportedConnection("empty connection string".into()));
        }
        if matches!(url, ":memory:" | "sqlite::memory:" | "sqlite://:memory:") {
            return Ok(ConnectionTarget::Memory);
        }

        let path = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if url.contains("://") {
            return Err(StorageError::UnsupportedConnection(url.to_string()));
        } else {
            url
        };

        // sqlx-style options such as ?mode=rwc are not meaningful here
        let path = path.split('?').next().unwrap_or_default();
        if path.is_empty() {
            return Err(StorageError::UnsupportedConnection(url.to_string()));
        }
        Ok(ConnectionTarget::File(PathBuf::from(path)))
    }
}

/// Raw `AggregatedSummary` row before validation
struct SummaryRow {
    district: String,
    date: String,
    counts: [i64; 5],
    score: f64,
    alert_level: String,
    explanation: String,
    anomalous: bool,
    forecast_cases: f64,
}

impl SummaryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SummaryRow {
            district: row.get(0)?,
            date: row.get(1)?,
            counts: [row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?],
            score: row.get(7)?,
            alert_level: row.get(8)?,
            explanation: row.get(9)?,
            anomalous: row.get(10)?,
            forecast_cases: row.get(11)?,
        })
    }

    fn into_assessment(self) -> Result<RiskAssessment, StorageError> {
        let invalid = |column: &'static str, value: String| StorageError::InvalidColumn {
            table: "AggregatedSummary",
            column,
            value,
        };

        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|_| invalid("date", self.date.clone()))?;
        let alert_level: AlertLevel = self.alert_level.parse().map_err(|v| invalid("alertLevel", v))?;
        let mut counts = [0u64; 5];
        for (slot, raw) in counts.iter_mut().zip(self.counts) {
            *slot = u64::try_from(raw).map_err(|_| invalid("count", raw.to_string()))?;
        }

        Ok(RiskAssessment {
            district: self.district,
            date,
            hospital_case_count: counts[0],
            severe_case_count: counts[1],
            pharma_sales_count: counts[2],
            social_posts_count: counts[3],
            negative_posts_count: counts[4],
            outbreak_risk_score: self.score,
            alert_level,
            explanation: self.explanation,
            anomalous: self.anomalous,
            forecast_cases: self.forecast_cases,
        })
    }
}

/// Observation and assessment store on a single SQLite connection
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database a connection string points at and apply the schema
    pub fn open(url: &str) -> Result<Self, StorageError> {
        let conn = match ConnectionTarget::parse(url)? {
            ConnectionTarget::Memory => Connection::open_in_memory()?,
            ConnectionTarget::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| StorageError::Unavailable(format!("{}: {}", parent.display(), e)))?;
                    }
                }
                let conn = Connection::open(&path)?;
                conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                conn
            }
        };

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn })
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::open("sqlite::memory:")
    }

    /// Borrow the underlying connection for ad-hoc queries
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    pub fn insert_hospital_visits(&self, visits: &[HospitalVisit]) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO HospitalRecord (patientId, district, severity, visitDate) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for v in visits {
                stmt.execute(params![v.patient_id, v.district, v.severity.as_str(), v.visit_date])?;
            }
        }
        tx.commit()?;
        Ok(visits.len())
    }

    pub fn insert_pharmacy_sales(&self, sales: &[PharmacySale]) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO PharmaSale (pharmacyId, district, qtySold, saleDate) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for s in sales {
                stmt.execute(params![s.pharmacy_id, s.district, s.qty_sold, s.sale_date])?;
            }
        }
        tx.commit()?;
        Ok(sales.len())
    }

    pub fn insert_social_posts(&self, posts: &[SocialPost]) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO SocialPost (postId, district, sentiment, timeStamp) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for p in posts {
                stmt.execute(params![p.post_id, p.district, p.sentiment.as_str(), p.time_stamp])?;
            }
        }
        tx.commit()?;
        Ok(posts.len())
    }

    /// Insert all three streams
    pub fn insert_observations(&self, observations: &Observations) -> Result<usize, StorageError> {
        Ok(self.insert_hospital_visits(&observations.hospital)?
            + self.insert_pharmacy_sales(&observations.pharma)?
            + self.insert_social_posts(&observations.social)?)
    }

    fn load_hospital(&self) -> Result<Vec<HospitalVisit>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT patientId, district, severity, visitDate FROM HospitalRecord ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut visits = Vec::new();
        for row in rows {
            let (patient_id, district, severity, visit_date) = row?;
            match severity.parse::<Severity>() {
                Ok(severity) => visits.push(HospitalVisit {
                    patient_id,
                    district,
                    severity,
                    visit_date: visit_date.unwrap_or_default(),
                }),
                Err(value) => tracing::warn!(%patient_id, %value, "skipping hospital record with unknown severity"),
            }
        }
        Ok(visits)
    }

    fn load_pharma(&self) -> Result<Vec<PharmacySale>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT pharmacyId, district, qtySold, saleDate FROM PharmaSale ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut sales = Vec::new();
        for row in rows {
            let (pharmacy_id, district, qty, sale_date) = row?;
            match u32::try_from(qty) {
                Ok(qty_sold) => sales.push(PharmacySale {
                    pharmacy_id,
                    district,
                    qty_sold,
                    sale_date: sale_date.unwrap_or_default(),
                }),
                Err(_) => tracing::warn!(%pharmacy_id, qty, "skipping pharmacy sale with invalid quantity"),
            }
        }
        Ok(sales)
    }

    fn load_social(&self) -> Result<Vec<SocialPost>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT postId, district, sentiment, timeStamp FROM SocialPost ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut posts = Vec::new();
        for row in rows {
            let (post_id, district, sentiment, time_stamp) = row?;
            match sentiment.parse::<Sentiment>() {
                Ok(sentiment) => posts.push(SocialPost {
                    post_id,
                    district,
                    sentiment,
                    time_stamp: time_stamp.unwrap_or_default(),
                }),
                Err(value) => tracing::warn!(%post_id, %value, "skipping social post with unknown sentiment"),
            }
        }
        Ok(posts)
    }

    fn query_published(&self, filter: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<RiskAssessment>, StorageError> {
        let sql = format!("SELECT {} {} {}", SUMMARY_COLUMNS, PUBLISHED_JOIN, filter);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, SummaryRow::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_assessment()?);
        }
        Ok(out)
    }
}

impl ObservationSource for SqliteStore {
    fn load_observations(&self) -> Result<Observations, StorageError> {
        Ok(Observations {
            hospital: self.load_hospital()?,
            pharma: self.load_pharma()?,
            social: self.load_social()?,
        })
    }
}

impl AssessmentSink for SqliteStore {
    fn publish(&self, assessments: &[RiskAssessment]) -> Result<u64, StorageError> {
        // Dropped without commit on any error, which rolls back
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO AssessmentSet (createdAt, published) VALUES (?1, 0)",
            params![Utc::now().to_rfc3339()],
        )?;
        let version = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO AggregatedSummary (setVersion, district, date, hospitalCaseCount, severeCaseCount, \
                 pharmaSalesCount, socialPostsCount, negativePostsCount, outbreakRiskScore, alertLevel, \
                 explanation, anomalous, forecastCases) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for a in assessments {
                stmt.execute(params![
                    version,
                    a.district,
                    a.date.format("%Y-%m-%d").to_string(),
                    a.hospital_case_count as i64,
                    a.severe_case_count as i64,
                    a.pharma_sales_count as i64,
                    a.social_posts_count as i64,
                    a.negative_posts_count as i64,
                    a.outbreak_risk_score,
                    a.alert_level.as_str(),
                    a.explanation,
                    a.anomalous,
                    a.forecast_cases,
                ])?;
            }
        }

        tx.execute(
            "UPDATE AssessmentSet SET published = CASE WHEN version = ?1 THEN 1 ELSE 0 END",
            params![version],
        )?;
        tx.execute("DELETE FROM AggregatedSummary WHERE setVersion <> ?1", params![version])?;
        tx.execute("DELETE FROM AssessmentSet WHERE version <> ?1", params![version])?;
        tx.commit()?;

        tracing::debug!(version, rows = assessments.len(), "assessment set published");
        Ok(version as u64)
    }

    fn published_version(&self) -> Result<Option<u64>, StorageError> {
        let version: Option<i64> = self
            .conn
            .query_row("SELECT version FROM AssessmentSet WHERE published = 1", [], |row| row.get(0))
            .optional()?;
        Ok(version.map(|v| v as u64))
    }

    fn published(&self) -> Result<Vec<RiskAssessment>, StorageError> {
        self.query_published("ORDER BY s.district", &[])
    }

    fn alerts_above(&self, threshold: f64, limit: usize) -> Result<Vec<RiskAssessment>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_published(
            "AND s.outbreakRiskScore >= ?1 ORDER BY s.outbreakRiskScore DESC, s.district LIMIT ?2",
            &[&threshold, &limit],
        )
    }

    fn for_district(&self, district: &str) -> Result<Option<RiskAssessment>, StorageError> {
        Ok(self.query_published("AND s.district = ?1", &[&district])?.pop())
    }
}
