//! Snapshot storage inside a named store.
//!
//! A snapshot is an immutable capture of a response taken at the moment it is
//! stored. Writes are whole-value upserts keyed by request identity, so two
//! racing writers for the same key leave exactly one complete snapshot behind.

use super::connection::CacheStorage;
use crate::Error;
use crate::http::{Request, Response, ResponseType};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A stored response, keyed by request identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    key: String,
    method: String,
    url: String,
    status: u16,
    status_text: String,
    response_type: ResponseType,
    headers: Vec<(String, String)>,
    body: Bytes,
    stored_at: String,
}

impl Snapshot {
    /// Capture a response for `request`. Takes ownership, so callers that still
    /// need the response must hand in a [`Response::duplicate`].
    pub fn capture(request: &Request, response: Response) -> Self {
        Self {
            key: request.cache_key(),
            method: request.method.as_str().to_string(),
            url: request.url.to_string(),
            status: response.status,
            status_text: response.status_text,
            response_type: response.response_type,
            headers: response.headers,
            body: response.body,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Rebuild a fresh, unconsumed response from the snapshot.
    pub fn to_response(&self) -> Response {
        Response {
            status: self.status,
            status_text: self.status_text.clone(),
            response_type: self.response_type,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn stored_at(&self) -> &str {
        &self.stored_at
    }

    fn check_storable(&self) -> Result<(), Error> {
        if self.method != "GET" {
            return Err(Error::Store(format!("only GET requests can be cached, got {}", self.method)));
        }
        if self.status == 206 {
            return Err(Error::Store("partial responses cannot be cached".into()));
        }
        Ok(())
    }
}

/// Listing row for a stored entry, without the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInfo {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub response_type: String,
    pub size: u64,
    pub stored_at: String,
}

fn insert(conn: &rusqlite::Connection, store: &str, snapshot: &Snapshot) -> Result<(), Error> {
    let headers_json = serde_json::to_string(&snapshot.headers)
        .map_err(|e| Error::Store(format!("failed to encode headers: {e}")))?;
    conn.execute(
        "INSERT INTO entries (
            store, key, method, url, status, status_text, response_type, headers_json, body, stored_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(store, key) DO UPDATE SET
            method = excluded.method,
            url = excluded.url,
            status = excluded.status,
            status_text = excluded.status_text,
            response_type = excluded.response_type,
            headers_json = excluded.headers_json,
            body = excluded.body,
            stored_at = excluded.stored_at",
        params![
            store,
            &snapshot.key,
            &snapshot.method,
            &snapshot.url,
            snapshot.status,
            &snapshot.status_text,
            snapshot.response_type.as_str(),
            headers_json,
            snapshot.body.as_ref(),
            &snapshot.stored_at,
        ],
    )?;
    Ok(())
}

impl CacheStorage {
    /// Store a snapshot, replacing any previous value for the same key.
    ///
    /// Fails for non-GET requests, partial responses, and stores that do not
    /// exist (e.g. evicted while the write was in flight).
    pub async fn put(&self, store: &str, snapshot: &Snapshot) -> Result<(), Error> {
        snapshot.check_storable()?;
        let store = store.to_string();
        let snapshot = snapshot.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> { insert(conn, &store, &snapshot) })
            .await
            .map_err(Error::from)
    }

    /// Store several snapshots in one transaction: either all land or none do.
    pub async fn put_all(&self, store: &str, snapshots: Vec<Snapshot>) -> Result<(), Error> {
        for snapshot in &snapshots {
            snapshot.check_storable()?;
        }
        let store = store.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                for snapshot in &snapshots {
                    insert(&tx, &store, snapshot)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a snapshot by request key.
    pub async fn get(&self, store: &str, key: &str) -> Result<Option<Snapshot>, Error> {
        let store = store.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Snapshot>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key, method, url, status, status_text, response_type, headers_json, body, stored_at
                    FROM entries WHERE store = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![store, key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u16>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Vec<u8>>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                });

                let (key, method, url, status, status_text, response_type, headers_json, body, stored_at) =
                    match result {
                        Ok(row) => row,
                        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                        Err(e) => return Err(e.into()),
                    };

                let headers = serde_json::from_str(&headers_json)
                    .map_err(|e| Error::Store(format!("corrupt headers for {url}: {e}")))?;

                Ok(Some(Snapshot {
                    key,
                    method,
                    url,
                    status,
                    status_text,
                    response_type: ResponseType::parse(&response_type),
                    headers,
                    body: Bytes::from(body),
                    stored_at,
                }))
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries in a store.
    pub async fn entry_count(&self, store: &str) -> Result<u64, Error> {
        let store = store.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE store = ?1", params![store], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// List the entries of a store, ordered by URL.
    pub async fn entries(&self, store: &str) -> Result<Vec<EntryInfo>, Error> {
        let store = store.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<EntryInfo>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT method, url, status, response_type, LENGTH(body), stored_at
                    FROM entries WHERE store = ?1 ORDER BY url, method",
                )?;
                let rows = stmt
                    .query_map(params![store], |row| {
                        Ok(EntryInfo {
                            method: row.get(0)?,
                            url: row.get(1)?,
                            status: row.get(2)?,
                            response_type: row.get(3)?,
                            size: row.get::<_, i64>(4)? as u64,
                            stored_at: row.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)
    }
}
