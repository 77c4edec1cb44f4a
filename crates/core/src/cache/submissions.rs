//! Durable queue of form submissions that failed while offline.
//!
//! Lives in its own table, outside any generation, so activation cutovers
//! never delete undelivered submissions.

use super::connection::CacheDb;
use crate::Error;
use crate::http::{Headers, RequestDescriptor};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

/// A submission to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubmission {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl NewSubmission {
    /// Capture an outbound request for later replay.
    pub fn from_request(url: &str, request: &RequestDescriptor) -> Self {
        Self {
            url: url.to_string(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        }
    }
}

/// A queued submission awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: i64,
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    pub created_at: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl PendingSubmission {
    pub fn to_request(&self) -> RequestDescriptor {
        RequestDescriptor {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            mode: Default::default(),
            body: self.body.clone(),
        }
    }
}

impl CacheDb {
    /// Append a submission to the queue. Returns its id.
    pub async fn enqueue_submission(&self, submission: &NewSubmission) -> Result<i64, Error> {
        let submission = submission.clone();
        let headers_json = serde_json::to_string(&submission.headers)?;
        let created_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO pending_submissions (url, method, headers_json, body, created_at, attempts)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                    params![submission.url, submission.method, headers_json, submission.body, created_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }

    /// All queued submissions, oldest first.
    pub async fn pending_submissions(&self) -> Result<Vec<PendingSubmission>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<PendingSubmission>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, url, method, headers_json, body, created_at, attempts, last_error
                     FROM pending_submissions ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<Vec<u8>>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                })?;

                let mut pending = Vec::new();
                for row in rows {
                    let (id, url, method, headers_json, body, created_at, attempts, last_error) = row?;
                    let headers: Headers = serde_json::from_str(&headers_json)?;
                    pending.push(PendingSubmission { id, url, method, headers, body, created_at, attempts, last_error });
                }
                Ok(pending)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a delivered submission. Returns false if it was already gone.
    pub async fn remove_submission(&self, id: i64) -> Result<bool, Error> {
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM pending_submissions WHERE id = ?1", params![id])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Record a failed replay attempt; the submission stays queued.
    pub async fn record_submission_failure(&self, id: i64, error: &str) -> Result<(), Error> {
        let error = error.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "UPDATE pending_submissions SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
                    params![id, error],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Number of queued submissions.
    pub async fn count_pending_submissions(&self) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_submissions", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(message: &str) -> NewSubmission {
        let request = RequestDescriptor::new("POST", "/api/contact")
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"name":"Ana","email":"ana@example.com","message":"{message}"}}"#));
        NewSubmission::from_request("http://localhost:8080/api/contact", &request)
    }

    #[tokio::test]
    async fn test_enqueue_and_list_in_order() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let first = db.enqueue_submission(&contact("one")).await.unwrap();
        let second = db.enqueue_submission(&contact("two")).await.unwrap();
        assert!(second > first);

        let pending = db.pending_submissions().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[0].method, "POST");
        assert_eq!(pending[0].headers.get("content-type").map(String::as_str), Some("application/json"));
        assert!(String::from_utf8_lossy(pending[1].body.as_deref().unwrap()).contains("two"));
    }

    #[tokio::test]
    async fn test_failure_then_remove() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let id = db.enqueue_submission(&contact("hi")).await.unwrap();

        db.record_submission_failure(id, "NETWORK_UNAVAILABLE: offline").await.unwrap();
        let pending = db.pending_submissions().await.unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("NETWORK_UNAVAILABLE: offline"));

        assert!(db.remove_submission(id).await.unwrap());
        assert!(!db.remove_submission(id).await.unwrap());
        assert_eq!(db.count_pending_submissions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_survives_activation() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.enqueue_submission(&contact("keep me")).await.unwrap();

        db.create_generation("g1").await.unwrap();
        db.commit_install("g1", vec![]).await.unwrap();
        db.activate_generation("g1").await.unwrap();

        assert_eq!(db.count_pending_submissions().await.unwrap(), 1);
    }

    #[test]
    fn test_to_request_round_trip() {
        let submission = PendingSubmission {
            id: 1,
            url: "http://localhost:8080/api/contact".into(),
            method: "POST".into(),
            headers: Headers::from([("content-type".to_string(), "application/json".to_string())]),
            body: Some(b"{}".to_vec()),
            created_at: Utc::now().to_rfc3339(),
            attempts: 0,
            last_error: None,
        };
        let request = submission.to_request();
        assert_eq!(request.method, "POST");
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(&b"{}"[..]));
    }
}
