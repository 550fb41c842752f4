use anyhow::{anyhow, Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::geo::normalize_query;
use crate::models::{
    BlocklistKind, DismissalRecord, GeoCacheEntry, GeoCandidate, RunRecord, RunStats,
};

/// Store operations the decision pipeline depends on.
pub trait DismissalStore: Send + Sync {
    /// Which of `ids` already have a Dismissal Record. One query per call.
    fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>>;
    /// Earliest-listed recorded listing with the same title and company.
    fn earliest_duplicate(&self, title: &str, company: &str) -> Result<Option<String>>;
    /// Inserts all records in one transaction; existing ids are left untouched.
    fn save_dismissals(&self, records: &[DismissalRecord]) -> Result<usize>;
    fn save_dismissal(&self, record: &DismissalRecord) -> Result<bool>;
}

/// Store operations the location resolver depends on.
pub trait GeoStore: Send + Sync {
    fn geo_cache(&self, query: &str) -> Result<Option<GeoCacheEntry>>;
    fn save_geo_cache(&self, entry: &GeoCacheEntry) -> Result<()>;
    fn candidates_for_region(&self, region_id: &str) -> Result<Vec<GeoCandidate>>;
    /// Upserts candidates, merging region id sets with any stored copy.
    fn save_candidates(&self, region_id: &str, candidates: &[GeoCandidate]) -> Result<()>;
    fn candidate_by_corrected_name(&self, name: &str) -> Result<Option<GeoCandidate>>;
}

pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Database {
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => Self::default_path()?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "listing-sweep") {
            Ok(proj_dirs.data_dir().join("sweep.db"))
        } else {
            Ok(PathBuf::from("sweep.db"))
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dismissed_jobs (
                listing_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                reason TEXT NOT NULL,
                job_url TEXT NOT NULL,
                company_url TEXT,
                is_reposted INTEGER NOT NULL DEFAULT 0,
                listed_at TEXT,
                dismissed_at TEXT NOT NULL DEFAULT (datetime('now')),
                user_id TEXT,
                run_id INTEGER REFERENCES runs(id)
            );

            CREATE TABLE IF NOT EXISTS geo_cache (
                query TEXT PRIMARY KEY,
                region_id TEXT NOT NULL,
                sub_region_id TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS geo_candidates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                corrected_name TEXT,
                region_ids TEXT NOT NULL DEFAULT '[]',
                position INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS blocklists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                blocklist_type TEXT NOT NULL CHECK (blocklist_type IN ('job_title', 'company_linkedin')),
                item TEXT NOT NULL,
                user_id TEXT
            );

            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                params TEXT NOT NULL,
                user_id TEXT,
                status TEXT NOT NULL DEFAULT 'running' CHECK (status IN ('running', 'completed', 'cancelled')),
                processed INTEGER NOT NULL DEFAULT 0,
                suppressed INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL DEFAULT (datetime('now')),
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_dismissed_title_company
                ON dismissed_jobs(LOWER(TRIM(title)), LOWER(TRIM(company)));
            CREATE INDEX IF NOT EXISTS idx_dismissed_at ON dismissed_jobs(dismissed_at);
            CREATE INDEX IF NOT EXISTS idx_blocklists_type ON blocklists(blocklist_type);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='dismissed_jobs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'sweep init' first."));
        }
        Ok(())
    }

    // --- Dismissal records ---

    pub fn delete_dismissal(&self, listing_id: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM dismissed_jobs WHERE listing_id = ?1", [listing_id])?;
        Ok(removed > 0)
    }

    pub fn find_dismissals_by_title(&self, fragment: &str) -> Result<Vec<DismissalRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE title LIKE '%' || ?1 || '%' ORDER BY dismissed_at DESC",
            SELECT_DISMISSAL
        ))?;
        let rows = stmt.query_map([fragment], Self::row_to_dismissal)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to search dismissals")
    }

    pub fn get_dismissal(&self, listing_id: &str) -> Result<Option<DismissalRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{} WHERE listing_id = ?1", SELECT_DISMISSAL),
            [listing_id],
            Self::row_to_dismissal,
        )
        .optional()
        .context("Failed to load dismissal")
    }

    pub fn history(&self, limit: usize, offset: usize) -> Result<Vec<DismissalRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY dismissed_at DESC, listing_id DESC LIMIT ?1 OFFSET ?2",
            SELECT_DISMISSAL
        ))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], Self::row_to_dismissal)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list history")
    }

    pub fn history_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM dismissed_jobs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_dismissal(row: &rusqlite::Row) -> rusqlite::Result<DismissalRecord> {
        Ok(DismissalRecord {
            listing_id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            location: row.get(3)?,
            reason: row.get(4)?,
            job_url: row.get(5)?,
            company_url: row.get(6)?,
            is_reposted: row.get(7)?,
            listed_at: row.get(8)?,
            dismissed_at: row.get(9)?,
            user_id: row.get(10)?,
            run_id: row.get(11)?,
        })
    }

    fn insert_dismissal(conn: &Connection, record: &DismissalRecord) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT OR IGNORE INTO dismissed_jobs
             (listing_id, title, company, location, reason, job_url, company_url,
              is_reposted, listed_at, dismissed_at, user_id, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.listing_id,
                record.title,
                record.company,
                record.location,
                record.reason,
                record.job_url,
                record.company_url,
                record.is_reposted,
                record.listed_at,
                record.dismissed_at,
                record.user_id,
                record.run_id,
            ],
        )
    }

    // --- Geo cache management ---

    pub fn list_geo_cache(&self) -> Result<Vec<(GeoCacheEntry, usize)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT g.query, g.region_id, g.sub_region_id,
                    (SELECT COUNT(*) FROM geo_candidates c, json_each(c.region_ids) r
                     WHERE r.value = g.region_id)
             FROM geo_cache g ORDER BY g.query",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                GeoCacheEntry::new(row.get(0)?, row.get(1)?, row.get(2)?),
                row.get::<_, i64>(3)? as usize,
            ))
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list geo cache")
    }

    pub fn delete_geo_cache(&self, query: &str) -> Result<bool> {
        let removed = self.conn()?.execute(
            "DELETE FROM geo_cache WHERE query = ?1",
            [normalize_query(query)],
        )?;
        Ok(removed > 0)
    }

    /// Pins the refined id of an existing entry. Returns false if no entry exists.
    pub fn override_geo_cache(&self, query: &str, sub_region_id: Option<&str>) -> Result<bool> {
        let Some(entry) = self.geo_cache(query)? else {
            return Ok(false);
        };
        let healed = GeoCacheEntry::new(
            entry.query,
            entry.region_id,
            sub_region_id.map(str::to_string),
        );
        self.save_geo_cache(&healed)?;
        Ok(true)
    }

    pub fn update_candidate_name(&self, id: &str, corrected_name: &str) -> Result<bool> {
        let updated = self.conn()?.execute(
            "UPDATE geo_candidates SET corrected_name = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![corrected_name.trim(), id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_candidate(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM geo_candidates WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<GeoCandidate> {
        let region_json: String = row.get(3)?;
        Ok(GeoCandidate {
            id: row.get(0)?,
            name: row.get(1)?,
            corrected_name: row.get(2)?,
            region_ids: serde_json::from_str(&region_json).unwrap_or_default(),
        })
    }

    // --- Blocklists ---

    /// Global entries plus those scoped to `user`.
    pub fn blocklist(&self, kind: BlocklistKind, user: Option<&str>) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT item FROM blocklists
             WHERE blocklist_type = ?1 AND (user_id IS NULL OR user_id = ?2)
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), user], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>()
            .context("Failed to load blocklist")
    }

    pub fn replace_blocklist(
        &self,
        kind: BlocklistKind,
        user: Option<&str>,
        items: &[String],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM blocklists WHERE blocklist_type = ?1 AND user_id IS ?2",
            params![kind.as_str(), user],
        )?;
        let mut inserted = 0;
        for item in items.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
            inserted += tx.execute(
                "INSERT INTO blocklists (blocklist_type, item, user_id) VALUES (?1, ?2, ?3)",
                params![kind.as_str(), item, user],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn add_blocklist_item(&self, kind: BlocklistKind, user: Option<&str>, item: &str) -> Result<bool> {
        let item = item.trim();
        if item.is_empty() {
            return Ok(false);
        }
        let conn = self.conn()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocklists
             WHERE blocklist_type = ?1 AND user_id IS ?2 AND LOWER(item) = LOWER(?3)",
            params![kind.as_str(), user, item],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO blocklists (blocklist_type, item, user_id) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), item, user],
        )?;
        Ok(true)
    }

    pub fn remove_blocklist_item(&self, kind: BlocklistKind, user: Option<&str>, item: &str) -> Result<bool> {
        let removed = self.conn()?.execute(
            "DELETE FROM blocklists
             WHERE blocklist_type = ?1 AND user_id IS ?2 AND LOWER(item) = LOWER(?3)",
            params![kind.as_str(), user, item.trim()],
        )?;
        Ok(removed > 0)
    }

    // --- Run history ---

    pub fn start_run(&self, params_json: &str, user: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs (params, user_id) VALUES (?1, ?2)",
            params![params_json, user],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_run(&self, run_id: i64, status: &str, stats: &RunStats) -> Result<()> {
        self.conn()?.execute(
            "UPDATE runs SET status = ?1, processed = ?2, suppressed = ?3, skipped = ?4,
                    finished_at = datetime('now')
             WHERE id = ?5",
            params![
                status,
                stats.processed as i64,
                (stats.suppressed + stats.synced) as i64,
                stats.skipped as i64,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, params, status, processed, suppressed, skipped, started_at, finished_at
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(RunRecord {
                id: row.get(0)?,
                params: row.get(1)?,
                status: row.get(2)?,
                processed: row.get(3)?,
                suppressed: row.get(4)?,
                skipped: row.get(5)?,
                started_at: row.get(6)?,
                finished_at: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list runs")
    }
}

const SELECT_DISMISSAL: &str = "SELECT listing_id, title, company, location, reason, job_url,
        company_url, is_reposted, listed_at, dismissed_at, user_id, run_id
 FROM dismissed_jobs";

impl DismissalStore for Database {
    fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT listing_id FROM dismissed_jobs WHERE listing_id IN ({})",
            placeholders
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get(0))?;
        rows.collect::<Result<HashSet<String>, _>>()
            .context("Failed to check existing dismissals")
    }

    fn earliest_duplicate(&self, title: &str, company: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT listing_id FROM dismissed_jobs
                 WHERE LOWER(TRIM(title)) = LOWER(TRIM(?1))
                   AND LOWER(TRIM(company)) = LOWER(TRIM(?2))
                 ORDER BY listed_at IS NULL, listed_at ASC, listing_id ASC
                 LIMIT 1",
                params![title, company],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up duplicate")
    }

    fn save_dismissals(&self, records: &[DismissalRecord]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for record in records {
            inserted += Self::insert_dismissal(&tx, record)?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn save_dismissal(&self, record: &DismissalRecord) -> Result<bool> {
        let conn = self.conn()?;
        Ok(Self::insert_dismissal(&conn, record)? > 0)
    }
}

impl GeoStore for Database {
    fn geo_cache(&self, query: &str) -> Result<Option<GeoCacheEntry>> {
        self.conn()?
            .query_row(
                "SELECT query, region_id, sub_region_id FROM geo_cache WHERE query = ?1",
                [normalize_query(query)],
                |row| Ok(GeoCacheEntry::new(row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("Failed to read geo cache")
    }

    fn save_geo_cache(&self, entry: &GeoCacheEntry) -> Result<()> {
        // Re-heal in case the caller built the entry by hand.
        let sub = entry
            .sub_region_id
            .as_deref()
            .filter(|sub| *sub != entry.region_id);
        self.conn()?.execute(
            "INSERT INTO geo_cache (query, region_id, sub_region_id, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(query) DO UPDATE SET
                region_id = excluded.region_id,
                sub_region_id = excluded.sub_region_id,
                updated_at = excluded.updated_at",
            params![normalize_query(&entry.query), entry.region_id, sub],
        )?;
        Ok(())
    }

    fn candidates_for_region(&self, region_id: &str) -> Result<Vec<GeoCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, corrected_name, region_ids FROM geo_candidates c
             WHERE EXISTS (SELECT 1 FROM json_each(c.region_ids) r WHERE r.value = ?1)
             ORDER BY position, name",
        )?;
        let rows = stmt.query_map([region_id], Self::row_to_candidate)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to load geo candidates")
    }

    fn save_candidates(&self, region_id: &str, candidates: &[GeoCandidate]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (position, candidate) in candidates.iter().enumerate() {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT region_ids FROM geo_candidates WHERE id = ?1",
                    [&candidate.id],
                    |row| row.get(0),
                )
                .optional()?;
            let mut regions: BTreeSet<String> = existing
                .and_then(|json| serde_json::from_str::<Vec<String>>(&json).ok())
                .unwrap_or_default()
                .into_iter()
                .collect();
            regions.extend(candidate.region_ids.iter().cloned());
            regions.insert(region_id.to_string());
            let region_json = serde_json::to_string(&regions.into_iter().collect::<Vec<_>>())?;

            tx.execute(
                "INSERT INTO geo_candidates (id, name, corrected_name, region_ids, position, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    corrected_name = COALESCE(excluded.corrected_name, geo_candidates.corrected_name),
                    region_ids = excluded.region_ids,
                    position = excluded.position,
                    updated_at = excluded.updated_at",
                params![
                    candidate.id,
                    candidate.name,
                    candidate.corrected_name,
                    region_json,
                    position as i64
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn candidate_by_corrected_name(&self, name: &str) -> Result<Option<GeoCandidate>> {
        self.conn()?
            .query_row(
                "SELECT id, name, corrected_name, region_ids FROM geo_candidates
                 WHERE LOWER(COALESCE(corrected_name, name)) = LOWER(?1)
                 ORDER BY position
                 LIMIT 1",
                [name.trim()],
                Self::row_to_candidate,
            )
            .optional()
            .context("Failed to look up candidate by name")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, title: &str, company: &str, listed_at: Option<&str>) -> DismissalRecord {
        DismissalRecord {
            listing_id: id.to_string(),
            title: title.to_string(),
            company: company.to_string(),
            location: "Toronto, ON".to_string(),
            reason: "job_title".to_string(),
            job_url: format!("https://www.linkedin.com/jobs/view/{}", id),
            company_url: None,
            is_reposted: false,
            listed_at: listed_at.map(str::to_string),
            dismissed_at: "2026-01-01 00:00:00".to_string(),
            user_id: None,
            run_id: None,
        }
    }

    fn candidate(id: &str, name: &str) -> GeoCandidate {
        GeoCandidate {
            id: id.to_string(),
            name: name.to_string(),
            corrected_name: None,
            region_ids: vec![],
        }
    }

    #[test]
    fn test_ensure_initialized() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.ensure_initialized().is_ok());
    }

    #[test]
    fn test_existing_ids_returns_only_recorded() {
        let db = Database::open_in_memory().unwrap();
        db.save_dismissals(&[record("1", "A", "X", None), record("2", "B", "Y", None)])
            .unwrap();

        let ids = vec!["1".to_string(), "3".to_string()];
        let existing = db.existing_ids(&ids).unwrap();
        assert!(existing.contains("1"));
        assert!(!existing.contains("3"));
        assert_eq!(existing.len(), 1);

        assert!(db.existing_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_save_is_idempotent_and_never_overwrites() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.save_dismissal(&record("1", "Original", "X", None)).unwrap());

        let mut again = record("1", "Changed", "X", None);
        again.reason = "company".to_string();
        assert!(!db.save_dismissal(&again).unwrap());
        assert_eq!(db.save_dismissals(&[again]).unwrap(), 0);

        let stored = db.get_dismissal("1").unwrap().unwrap();
        assert_eq!(stored.title, "Original");
        assert_eq!(stored.reason, "job_title");
        assert_eq!(db.history_count().unwrap(), 1);
    }

    #[test]
    fn test_earliest_duplicate_orders_by_listed_at() {
        let db = Database::open_in_memory().unwrap();
        db.save_dismissals(&[
            record("late", "Engineer", "Acme", Some("2026-03-01 00:00:00")),
            record("early", "Engineer", "Acme", Some("2026-01-01 00:00:00")),
            record("unknown", "Engineer", "Acme", None),
            record("other", "Engineer", "Globex", Some("2025-01-01 00:00:00")),
        ])
        .unwrap();

        let found = db.earliest_duplicate("  engineer ", "ACME").unwrap();
        assert_eq!(found.as_deref(), Some("early"));
        assert_eq!(db.earliest_duplicate("Manager", "Acme").unwrap(), None);
    }

    #[test]
    fn test_delete_and_find_by_title() {
        let db = Database::open_in_memory().unwrap();
        db.save_dismissals(&[
            record("1", "Senior Engineer", "A", None),
            record("2", "Staff Engineer", "B", None),
            record("3", "Designer", "C", None),
        ])
        .unwrap();

        let matches = db.find_dismissals_by_title("Engineer").unwrap();
        assert_eq!(matches.len(), 2);

        assert!(db.delete_dismissal("1").unwrap());
        assert!(!db.delete_dismissal("1").unwrap());
        assert_eq!(db.history_count().unwrap(), 2);
    }

    #[test]
    fn test_history_pagination() {
        let db = Database::open_in_memory().unwrap();
        let records: Vec<_> = (0..5)
            .map(|i| record(&i.to_string(), "T", "C", None))
            .collect();
        db.save_dismissals(&records).unwrap();

        assert_eq!(db.history(2, 0).unwrap().len(), 2);
        assert_eq!(db.history(10, 4).unwrap().len(), 1);
    }

    #[test]
    fn test_geo_cache_self_heals_on_write() {
        let db = Database::open_in_memory().unwrap();
        let entry = GeoCacheEntry {
            query: "toronto".to_string(),
            region_id: "100".to_string(),
            sub_region_id: Some("100".to_string()),
        };
        db.save_geo_cache(&entry).unwrap();

        let stored = db.geo_cache("  TORONTO ").unwrap().unwrap();
        assert_eq!(stored.query, "Toronto");
        assert_eq!(stored.sub_region_id, None);
    }

    #[test]
    fn test_override_geo_cache() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.override_geo_cache("Paris", Some("9")).unwrap());

        db.save_geo_cache(&GeoCacheEntry::new("Paris".into(), "1".into(), None))
            .unwrap();
        assert!(db.override_geo_cache("paris", Some("9")).unwrap());
        assert_eq!(
            db.geo_cache("Paris").unwrap().unwrap().sub_region_id.as_deref(),
            Some("9")
        );

        assert!(db.override_geo_cache("paris", Some("1")).unwrap());
        assert_eq!(db.geo_cache("Paris").unwrap().unwrap().sub_region_id, None);

        assert!(db.delete_geo_cache("PARIS").unwrap());
        assert!(db.geo_cache("Paris").unwrap().is_none());
    }

    #[test]
    fn test_save_candidates_merges_region_sets() {
        let db = Database::open_in_memory().unwrap();
        db.save_candidates("100", &[candidate("7", "Toronto, ON"), candidate("8", "North York, ON")])
            .unwrap();
        db.save_candidates("200", &[candidate("7", "Toronto, ON")]).unwrap();

        let for_100 = db.candidates_for_region("100").unwrap();
        assert_eq!(for_100.len(), 2);
        assert_eq!(for_100[0].id, "7");

        let for_200 = db.candidates_for_region("200").unwrap();
        assert_eq!(for_200.len(), 1);
        assert_eq!(for_200[0].region_ids, vec!["100".to_string(), "200".to_string()]);

        let listed = db.list_geo_cache().unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_candidate_by_corrected_name() {
        let db = Database::open_in_memory().unwrap();
        db.save_candidates("100", &[candidate("7", "Toronto, ON")]).unwrap();

        let hit = db.candidate_by_corrected_name("toronto, on").unwrap().unwrap();
        assert_eq!(hit.id, "7");

        assert!(db.update_candidate_name("7", "Toronto").unwrap());
        assert!(db.candidate_by_corrected_name("Toronto, ON").unwrap().is_none());
        assert_eq!(
            db.candidate_by_corrected_name("TORONTO").unwrap().unwrap().region_ids,
            vec!["100".to_string()]
        );

        // A later refresh keeps the manual correction.
        db.save_candidates("100", &[candidate("7", "Toronto, ON")]).unwrap();
        assert!(db.candidate_by_corrected_name("toronto").unwrap().is_some());
    }

    #[test]
    fn test_blocklist_scoping_and_replace() {
        let db = Database::open_in_memory().unwrap();
        db.replace_blocklist(BlocklistKind::JobTitle, None, &["senior".into(), "  ".into()])
            .unwrap();
        db.replace_blocklist(BlocklistKind::JobTitle, Some("u1"), &["intern".into()])
            .unwrap();

        assert_eq!(db.blocklist(BlocklistKind::JobTitle, None).unwrap(), vec!["senior"]);
        assert_eq!(
            db.blocklist(BlocklistKind::JobTitle, Some("u1")).unwrap(),
            vec!["senior", "intern"]
        );
        assert!(db.blocklist(BlocklistKind::Company, None).unwrap().is_empty());

        assert!(db.add_blocklist_item(BlocklistKind::Company, None, "acme").unwrap());
        assert!(!db.add_blocklist_item(BlocklistKind::Company, None, "ACME").unwrap());
        assert!(db.remove_blocklist_item(BlocklistKind::Company, None, "Acme").unwrap());
        assert!(db.blocklist(BlocklistKind::Company, None).unwrap().is_empty());
    }

    #[test]
    fn test_run_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.start_run("{}", None).unwrap();
        let stats = RunStats {
            processed: 10,
            suppressed: 3,
            synced: 1,
            skipped: 2,
            ..Default::default()
        };
        db.finish_run(run_id, "completed", &stats).unwrap();

        let runs = db.list_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].suppressed, 4);
        assert!(runs[0].finished_at.is_some());
    }
}
