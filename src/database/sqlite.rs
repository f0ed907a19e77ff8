use std::{path::Path, sync::Mutex};

use indoc::indoc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{BlobStore, SCHEMA_VERSION};
use crate::{
    result::{Error, Result},
    types::{RequestId, RequestSpec, SegmentId},
    utils::MutexUtils,
};

/// Key of the auth token in the `user` table
const AUTH_KEY: &str = "auth";

const SCHEMA_V1: &str = indoc! {"
    CREATE TABLE IF NOT EXISTS user (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS requests (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        spec        TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS blobs (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        data        BLOB
    );
"};

/// SQLite implementation of [BlobStore].
///
/// One connection is shared by the whole application. Every method holds
/// the connection only for the duration of its own statements.
#[derive(Debug)]
pub struct Sqlite {
    conn: Mutex<Connection>,
}

impl Sqlite {
    /// Open the database at the given path, creating it if needed.
    ///
    /// Any failure here means the application has to run without persistence,
    /// so every error is reported as [Error::StorageUnavailable].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                Error::StorageUnavailable(format!("could not create {}: {err}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|err| Error::StorageUnavailable(format!("{}: {err}", path.display())))?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        Self::upgrade(&mut conn).map_err(|err| match err {
            Error::StorageUnavailable(_) => err,
            err => Error::StorageUnavailable(format!("could not upgrade schema: {err}")),
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema to [SCHEMA_VERSION].
    ///
    /// Safe to run on every open: a database already at the current version is left as is.
    fn upgrade(conn: &mut Connection) -> Result<()> {
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            return Err(Error::StorageUnavailable(format!(
                "database schema version {version} is newer than the supported {SCHEMA_VERSION}"
            )));
        }

        let tx = conn.transaction()?;
        if version < 1 {
            debug!("Creating schema version 1");
        }
        tx.execute_batch(SCHEMA_V1)?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;

        Ok(())
    }
}

impl BlobStore for Sqlite {
    fn put_segment(&self, id: SegmentId, blob: Option<&[u8]>) -> Result<()> {
        self.conn.with_lock(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO blobs (id, data) VALUES (?, ?)",
                params![id, blob],
            )?;
            Ok(())
        })
    }

    fn get_segment(&self, id: SegmentId) -> Result<Option<Vec<u8>>> {
        self.conn.with_lock(|conn| {
            let blob: Option<Option<Vec<u8>>> = conn
                .query_row("SELECT data FROM blobs WHERE id = ?", [id], |row| {
                    row.get(0)
                })
                .optional()?;

            Ok(blob.flatten())
        })
    }

    fn delete_segment(&self, id: SegmentId) -> Result<()> {
        self.conn.with_lock(|conn| {
            conn.execute("DELETE FROM blobs WHERE id = ?", [id])?;
            Ok(())
        })
    }

    fn allocate_segments(&self, count: usize) -> Result<Vec<SegmentId>> {
        self.conn.with_lock(|mut conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(count);
            {
                let mut stmt = tx.prepare("INSERT INTO blobs (data) VALUES (NULL)")?;
                for _ in 0..count {
                    stmt.execute([])?;
                    ids.push(tx.last_insert_rowid());
                }
            }
            tx.commit()?;

            debug!("Allocated {count} segment placeholders");
            Ok(ids)
        })
    }

    fn create_request(&self, spec: &RequestSpec) -> Result<RequestId> {
        let json = serde_json::to_string(spec)?;

        self.conn.with_lock(|conn| {
            conn.execute("INSERT INTO requests (spec) VALUES (?)", [json])?;
            let id = conn.last_insert_rowid();

            debug!("Request {id} persisted");
            Ok(id)
        })
    }

    fn all_requests(&self) -> Result<Vec<RequestSpec>> {
        let rows = self.conn.with_lock(|conn| -> Result<Vec<(RequestId, String)>> {
            let mut stmt = conn.prepare("SELECT id, spec FROM requests ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, json)| match serde_json::from_str::<RequestSpec>(&json) {
                Ok(mut spec) => {
                    spec.id = Some(id);
                    Some(spec)
                }
                Err(err) => {
                    warn!("Skipping unreadable request record {id}: {err}");
                    None
                }
            })
            .collect())
    }

    fn delete_request(&self, id: RequestId, segments: &[SegmentId]) -> Result<()> {
        self.conn.with_lock(|mut conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM blobs WHERE id = ?")?;
                for segment in segments {
                    stmt.execute([segment])?;
                }
            }
            tx.execute("DELETE FROM requests WHERE id = ?", [id])?;
            tx.commit()?;

            debug!("Request {id} and its {} segments deleted", segments.len());
            Ok(())
        })
    }

    fn credential(&self) -> Result<Option<String>> {
        self.conn.with_lock(|conn| {
            Ok(conn
                .query_row("SELECT value FROM user WHERE key = ?", [AUTH_KEY], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    fn set_credential(&self, token: Option<&str>) -> Result<()> {
        self.conn.with_lock(|conn| {
            match token {
                Some(token) => conn.execute(
                    "INSERT OR REPLACE INTO user (key, value) VALUES (?, ?)",
                    params![AUTH_KEY, token],
                )?,
                None => conn.execute("DELETE FROM user WHERE key = ?", [AUTH_KEY])?,
            };
            Ok(())
        })
    }

    #[cfg(test)]
    fn count_segments(&self) -> Result<usize> {
        self.conn.with_lock(|conn| {
            Ok(conn.query_row("SELECT COUNT(id) FROM blobs", [], |row| row.get(0))?)
        })
    }

    #[cfg(test)]
    fn count_requests(&self) -> Result<usize> {
        self.conn.with_lock(|conn| {
            Ok(conn.query_row("SELECT COUNT(id) FROM requests", [], |row| row.get(0))?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EndpointGroup, SegmentSpec};

    fn spec_with(ids: &[SegmentId]) -> RequestSpec {
        let params = ids
            .iter()
            .map(|id| SegmentSpec {
                net: "GE".to_owned(),
                sta: format!("S{id}"),
                loc: String::new(),
                cha: "BHZ".to_owned(),
                start: "2020-01-01T00:00:00".to_owned(),
                end: "2020-01-01T01:00:00".to_owned(),
                id: Some(*id),
            })
            .collect();

        RequestSpec::new(
            "test.mseed".to_owned(),
            vec![EndpointGroup {
                url: "http://geofon/fdsnws/dataselect/1/query".to_owned(),
                params,
            }],
        )
    }

    #[test]
    fn segment_tri_state() {
        let db = Sqlite::open_in_memory().unwrap();
        let ids = db.allocate_segments(3).unwrap();
        assert_eq!(ids.len(), 3);

        db.put_segment(ids[1], Some(&[])).unwrap();
        db.put_segment(ids[2], Some(b"data")).unwrap();

        assert_eq!(db.get_segment(ids[0]).unwrap(), None);
        assert_eq!(db.get_segment(ids[1]).unwrap(), Some(vec![]));
        assert_eq!(db.get_segment(ids[2]).unwrap(), Some(b"data".to_vec()));
        assert_eq!(db.get_segment(1000).unwrap(), None);

        db.delete_segment(ids[2]).unwrap();
        assert_eq!(db.get_segment(ids[2]).unwrap(), None);
        assert_eq!(db.count_segments().unwrap(), 2);
    }

    #[test]
    fn requests_round_trip_with_ids() {
        let db = Sqlite::open_in_memory().unwrap();
        let ids = db.allocate_segments(2).unwrap();
        let spec = spec_with(&ids);

        let first = db.create_request(&spec).unwrap();
        let second = db.create_request(&spec).unwrap();
        assert!(second > first);

        let all = db.all_requests().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, Some(first));
        assert_eq!(all[0].segment_ids(), ids);

        db.delete_request(first, &ids).unwrap();
        assert_eq!(db.count_requests().unwrap(), 1);
        assert_eq!(db.count_segments().unwrap(), 0);
    }

    #[test]
    fn credential_set_and_clear() {
        let db = Sqlite::open_in_memory().unwrap();
        assert_eq!(db.credential().unwrap(), None);

        db.set_credential(Some("token")).unwrap();
        db.set_credential(Some("other")).unwrap();
        assert_eq!(db.credential().unwrap().as_deref(), Some("other"));

        db.set_credential(None).unwrap();
        assert_eq!(db.credential().unwrap(), None);
    }

    #[test]
    fn reopening_keeps_data_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.sqlite");

        {
            let db = Sqlite::open(&path).unwrap();
            let ids = db.allocate_segments(1).unwrap();
            db.put_segment(ids[0], Some(b"abc")).unwrap();
            db.create_request(&spec_with(&ids)).unwrap();
        }

        // Upgrading an up-to-date schema is a no-op
        for _ in 0..2 {
            let db = Sqlite::open(&path).unwrap();
            assert_eq!(db.count_requests().unwrap(), 1);
            assert_eq!(db.count_segments().unwrap(), 1);
        }
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");

        let conn = Connection::open(&path).unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        drop(conn);

        assert!(matches!(
            Sqlite::open(&path),
            Err(Error::StorageUnavailable(_))
        ));
    }
}
