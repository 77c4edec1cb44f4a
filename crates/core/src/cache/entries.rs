//! Stored response CRUD within a generation.

use super::connection::CacheDb;
use super::hash::RequestKey;
use crate::Error;
use crate::http::{AcceptFamily, Headers, ResponseDescriptor};
use chrono::{DateTime, Utc};
use tokio_rusqlite::{params, rusqlite};

/// Response headers worth replaying from the cache.
pub const PRESERVED_HEADERS: &[&str] =
    &["content-type", "etag", "last-modified", "content-language", "cache-control", "location"];

/// Redirect statuses that may be stored alongside 2xx responses.
pub const STORABLE_REDIRECTS: &[u16] = &[301, 308];

/// Whether a response with this status may enter the cache.
pub fn is_storable_status(status: u16) -> bool {
    (200..300).contains(&status) || STORABLE_REDIRECTS.contains(&status)
}

/// An immutable snapshot of a response, keyed by request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub key_hash: String,
    pub url: String,
    pub method: String,
    pub accept_family: Option<AcceptFamily>,
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
    /// Snapshot a response, keeping only replayable headers.
    pub fn new(key: &RequestKey, status: u16, headers: Headers, body: Vec<u8>) -> Self {
        let headers = headers
            .into_iter()
            .filter(|(name, _)| PRESERVED_HEADERS.contains(&name.as_str()))
            .collect();
        Self {
            key_hash: key.hash.clone(),
            url: key.url.clone(),
            method: key.method.clone(),
            accept_family: key.accept_family,
            status,
            headers,
            body,
            stored_at: Utc::now(),
        }
    }

    pub fn from_response(key: &RequestKey, response: &ResponseDescriptor) -> Self {
        Self::new(key, response.status, response.headers.clone(), response.body.clone())
    }

    pub fn to_response(&self) -> ResponseDescriptor {
        ResponseDescriptor { status: self.status, headers: self.headers.clone(), body: self.body.clone() }
    }
}

/// Insert or overwrite an entry. Last writer wins.
pub(crate) fn insert_entry(
    conn: &rusqlite::Connection, generation_id: &str, entry: &StoredResponse,
) -> Result<(), Error> {
    let headers_json = serde_json::to_string(&entry.headers)?;
    conn.execute(
        "INSERT INTO entries (
            generation_id, key_hash, url, method, accept_family, status, headers_json, body, stored_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(generation_id, key_hash) DO UPDATE SET
            url = excluded.url,
            method = excluded.method,
            accept_family = excluded.accept_family,
            status = excluded.status,
            headers_json = excluded.headers_json,
            body = excluded.body,
            stored_at = excluded.stored_at",
        params![
            generation_id,
            &entry.key_hash,
            &entry.url,
            &entry.method,
            entry.accept_family.map(|f| f.as_str()),
            entry.status as i64,
            headers_json,
            &entry.body,
            entry.stored_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

type EntryRow = (String, String, String, Option<String>, i64, String, Vec<u8>, String);

fn decode_entry(row: EntryRow) -> Result<StoredResponse, Error> {
    let (key_hash, url, method, accept_family, status, headers_json, body, stored_at) = row;
    let status = u16::try_from(status).map_err(|_| Error::CorruptEntry(format!("status {status} for {url}")))?;
    let headers: Headers = serde_json::from_str(&headers_json)?;
    let stored_at = DateTime::parse_from_rfc3339(&stored_at)
        .map_err(|e| Error::CorruptEntry(format!("stored_at for {url}: {e}")))?
        .with_timezone(&Utc);
    Ok(StoredResponse {
        key_hash,
        url,
        method,
        accept_family: accept_family.as_deref().and_then(AcceptFamily::parse),
        status,
        headers,
        body,
        stored_at,
    })
}

impl CacheDb {
    /// Look up an entry in a generation.
    pub async fn get_entry(&self, generation_id: &str, key_hash: &str) -> Result<Option<StoredResponse>, Error> {
        let generation_id = generation_id.to_string();
        let key_hash = key_hash.to_string();
        self.conn
            .call(move |conn| -> Result<Option<StoredResponse>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key_hash, url, method, accept_family, status, headers_json, body, stored_at
                     FROM entries WHERE generation_id = ?1 AND key_hash = ?2",
                )?;

                let result = stmt.query_row(params![generation_id, key_hash], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                });

                match result {
                    Ok(row) => decode_entry(row).map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Upsert an entry into a generation, but only while it is active.
    ///
    /// Returns false when the generation is not (or no longer) active, e.g.
    /// when a cutover deleted it between the caller's lookup and this write.
    pub async fn upsert_active_entry(&self, generation_id: &str, entry: &StoredResponse) -> Result<bool, Error> {
        let generation_id = generation_id.to_string();
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                let active: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM generations WHERE id = ?1 AND state = 'active')",
                    params![generation_id],
                    |row| row.get(0),
                )?;
                if !active {
                    return Ok(false);
                }
                insert_entry(&tx, &generation_id, &entry)?;
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries in a generation.
    pub async fn count_entries(&self, generation_id: &str) -> Result<u64, Error> {
        let generation_id = generation_id.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entries WHERE generation_id = ?1",
                    params![generation_id],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Canonical URLs stored in a generation, sorted.
    pub async fn list_entry_urls(&self, generation_id: &str) -> Result<Vec<String>, Error> {
        let generation_id = generation_id.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT url FROM entries WHERE generation_id = ?1 ORDER BY url")?;
                let rows = stmt.query_map(params![generation_id], |row| row.get::<_, String>(0))?;
                let urls = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(urls)
            })
            .await
            .map_err(Error::from)
    }
}
