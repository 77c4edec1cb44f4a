//! Generation lifecycle persistence.
//!
//! A generation is created in `installing`, committed to `installed` together
//! with all of its entries, and promoted to `active` by `activate_generation`,
//! which deletes every other generation in the same transaction.

use std::fmt;
use std::str::FromStr;

use super::connection::CacheDb;
use super::entries::{StoredResponse, insert_entry};
use crate::Error;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::{params, rusqlite};

/// Lifecycle state of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    Installing,
    Installed,
    Activating,
    Active,
    Superseded,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Superseded => "superseded",
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installing" => Ok(Self::Installing),
            "installed" => Ok(Self::Installed),
            "activating" => Ok(Self::Activating),
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            other => Err(Error::CorruptEntry(format!("unknown generation state: {other}"))),
        }
    }
}

/// A cache generation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Generation {
    pub id: String,
    pub state: GenerationState,
    pub created_at: String,
    pub activated_at: Option<String>,
}

fn read_generation(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, Option<String>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_generation((id, state, created_at, activated_at): (String, String, String, Option<String>)) -> Result<Generation, Error> {
    Ok(Generation { id, state: state.parse()?, created_at, activated_at })
}

impl CacheDb {
    /// Start a new generation in the `installing` state.
    ///
    /// A leftover `installing` or `installed` row with the same id (from an
    /// interrupted deploy) is replaced along with its entries. An active
    /// generation is never replaced.
    pub async fn create_generation(&self, id: &str) -> Result<Generation, Error> {
        let id = id.to_string();
        let created_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Generation, Error> {
                let tx = conn.transaction()?;
                let existing: Option<String> = match tx.query_row(
                    "SELECT state FROM generations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                ) {
                    Ok(state) => Some(state),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e.into()),
                };

                if let Some(state) = existing {
                    let state: GenerationState = state.parse()?;
                    if state == GenerationState::Active {
                        return Err(Error::GenerationState { id, state: state.to_string() });
                    }
                    tx.execute("DELETE FROM generations WHERE id = ?1", params![id])?;
                }

                tx.execute(
                    "INSERT INTO generations (id, state, created_at, activated_at) VALUES (?1, ?2, ?3, NULL)",
                    params![id, GenerationState::Installing.as_str(), created_at],
                )?;
                tx.commit()?;

                Ok(Generation { id, state: GenerationState::Installing, created_at, activated_at: None })
            })
            .await
            .map_err(Error::from)
    }

    /// Write every entry of an installing generation and mark it `installed`.
    ///
    /// Runs in one transaction: either all entries land, or none do and the
    /// generation stays `installing`.
    pub async fn commit_install(&self, id: &str, entries: Vec<StoredResponse>) -> Result<usize, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                let state: String = match tx.query_row(
                    "SELECT state FROM generations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                ) {
                    Ok(state) => state,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Err(Error::GenerationNotFound(id)),
                    Err(e) => return Err(e.into()),
                };
                if state.parse::<GenerationState>()? != GenerationState::Installing {
                    return Err(Error::GenerationState { id, state });
                }

                for entry in &entries {
                    insert_entry(&tx, &id, entry)?;
                }
                tx.execute(
                    "UPDATE generations SET state = ?2 WHERE id = ?1",
                    params![id, GenerationState::Installed.as_str()],
                )?;
                tx.commit()?;
                Ok(entries.len())
            })
            .await
            .map_err(Error::from)
    }

    /// Make `id` the sole active generation.
    ///
    /// Every other generation (and, by cascade, its entries) is deleted first;
    /// the promotion happens in the same transaction, so no reader ever sees
    /// two active generations or an active generation mid-deletion.
    /// Returns the ids of the deleted generations.
    pub async fn activate_generation(&self, id: &str) -> Result<Vec<String>, Error> {
        let id = id.to_string();
        let activated_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;
                let state: String = match tx.query_row(
                    "SELECT state FROM generations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                ) {
                    Ok(state) => state,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Err(Error::GenerationNotFound(id)),
                    Err(e) => return Err(e.into()),
                };
                match state.parse::<GenerationState>()? {
                    GenerationState::Installed | GenerationState::Active => {}
                    _ => return Err(Error::GenerationState { id, state }),
                }

                tx.execute(
                    "UPDATE generations SET state = ?2 WHERE id = ?1",
                    params![id, GenerationState::Activating.as_str()],
                )?;

                let stale: Vec<String> = {
                    let mut stmt = tx.prepare("SELECT id FROM generations WHERE id != ?1 ORDER BY created_at")?;
                    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
                    rows.collect::<Result<_, _>>()?
                };
                tx.execute(
                    "UPDATE generations SET state = ?2 WHERE id != ?1",
                    params![id, GenerationState::Superseded.as_str()],
                )?;
                tx.execute("DELETE FROM generations WHERE id != ?1", params![id])?;

                tx.execute(
                    "UPDATE generations SET state = ?2, activated_at = COALESCE(activated_at, ?3) WHERE id = ?1",
                    params![id, GenerationState::Active.as_str(), activated_at],
                )?;
                tx.commit()?;
                Ok(stale)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a generation and its entries. Returns false if it didn't exist.
    pub async fn delete_generation(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM generations WHERE id = ?1", params![id])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Get a generation by id.
    pub async fn get_generation(&self, id: &str) -> Result<Option<Generation>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Generation>, Error> {
                let result = conn.query_row(
                    "SELECT id, state, created_at, activated_at FROM generations WHERE id = ?1",
                    params![id],
                    read_generation,
                );
                match result {
                    Ok(row) => into_generation(row).map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// The currently active generation, if any.
    pub async fn active_generation(&self) -> Result<Option<Generation>, Error> {
        self.conn
            .call(move |conn| -> Result<Option<Generation>, Error> {
                let result = conn.query_row(
                    "SELECT id, state, created_at, activated_at FROM generations WHERE state = 'active'
                     ORDER BY activated_at DESC LIMIT 1",
                    [],
                    read_generation,
                );
                match result {
                    Ok(row) => into_generation(row).map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// All generations, oldest first.
    pub async fn list_generations(&self) -> Result<Vec<Generation>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<Generation>, Error> {
                let mut stmt =
                    conn.prepare("SELECT id, state, created_at, activated_at FROM generations ORDER BY created_at, id")?;
                let rows = stmt.query_map([], read_generation)?;
                let mut generations = Vec::new();
                for row in rows {
                    generations.push(into_generation(row?)?);
                }
                Ok(generations)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::RequestKey;

    fn entry(url: &str, body: &str) -> StoredResponse {
        StoredResponse::new(&RequestKey::get(url), 200, Default::default(), body.as_bytes().to_vec())
    }

    async fn installed(db: &CacheDb, id: &str, urls: &[&str]) {
        db.create_generation(id).await.unwrap();
        let entries = urls.iter().map(|u| entry(u, id)).collect();
        db.commit_install(id, entries).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_commit() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let generation = db.create_generation("g1").await.unwrap();
        assert_eq!(generation.state, GenerationState::Installing);

        let count = db
            .commit_install("g1", vec![entry("https://example.com/", "home"), entry("https://example.com/main.css", "css")])
            .await
            .unwrap();
        assert_eq!(count, 2);

        let generation = db.get_generation("g1").await.unwrap().unwrap();
        assert_eq!(generation.state, GenerationState::Installed);
        assert_eq!(db.count_entries("g1").await.unwrap(), 2);
        assert!(db.active_generation().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_twice_rejected() {
        let db = CacheDb::open_in_memory().await.unwrap();
        installed(&db, "g1", &["https://example.com/"]).await;
        let result = db.commit_install("g1", vec![]).await;
        assert!(matches!(result, Err(Error::GenerationState { .. })));
    }

    #[tokio::test]
    async fn test_activate_deletes_other_generations() {
        let db = CacheDb::open_in_memory().await.unwrap();
        installed(&db, "g1", &["https://example.com/a.css"]).await;
        db.activate_generation("g1").await.unwrap();
        installed(&db, "g2", &["https://example.com/b.css"]).await;

        let deleted = db.activate_generation("g2").await.unwrap();
        assert_eq!(deleted, vec!["g1".to_string()]);

        let generations = db.list_generations().await.unwrap();
        assert_eq!(generations.len(), 1);
        assert_eq!(generations[0].id, "g2");
        assert_eq!(generations[0].state, GenerationState::Active);
        assert!(generations[0].activated_at.is_some());
        assert_eq!(db.count_entries("g1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_activate_installing_rejected() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.create_generation("g1").await.unwrap();
        let result = db.activate_generation("g1").await;
        assert!(matches!(result, Err(Error::GenerationState { .. })));
    }

    #[tokio::test]
    async fn test_activate_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let result = db.activate_generation("nope").await;
        assert!(matches!(result, Err(Error::GenerationNotFound(_))));
    }

    #[tokio::test]
    async fn test_create_replaces_abandoned_install() {
        let db = CacheDb::open_in_memory().await.unwrap();
        installed(&db, "g1", &["https://example.com/"]).await;
        db.create_generation("g1").await.unwrap();
        assert_eq!(db.count_entries("g1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_refuses_active() {
        let db = CacheDb::open_in_memory().await.unwrap();
        installed(&db, "g1", &["https://example.com/"]).await;
        db.activate_generation("g1").await.unwrap();
        let result = db.create_generation("g1").await;
        assert!(matches!(result, Err(Error::GenerationState { .. })));
        assert_eq!(db.count_entries("g1").await.unwrap(), 1);
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            GenerationState::Installing,
            GenerationState::Installed,
            GenerationState::Activating,
            GenerationState::Active,
            GenerationState::Superseded,
        ] {
            assert_eq!(state.as_str().parse::<GenerationState>().unwrap(), state);
        }
        assert!("bogus".parse::<GenerationState>().is_err());
    }
}
