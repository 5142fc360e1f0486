use sha2::{Digest, Sha512_256};
use tracing::instrument;

use crate::db::Db;
use crate::error::{Error, Result};

/// Hash-keyed, refcounted binary content (spec §4.10).
pub struct BlobStore {
    db: Db,
}

impl BlobStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Compute the hex SHA-512/256 of `bytes`, upsert the row, and return
    /// the hash. Saving the same bytes twice is idempotent: one row, same
    /// hash (spec §8 round-trip property).
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn save(&self, bytes: &[u8]) -> Result<String> {
        let hash = hash_bytes(bytes);
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO blobs (hash, bytes, refcount) VALUES (?1, ?2, 0)
             ON CONFLICT(hash) DO NOTHING",
            rusqlite::params![hash, bytes],
        )?;
        Ok(hash)
    }

    #[instrument(skip(self))]
    pub fn get(&self, hash: &str) -> Result<Vec<u8>> {
        let conn = self.db.lock().unwrap();
        conn.query_row(
            "SELECT bytes FROM blobs WHERE hash = ?1",
            rusqlite::params![hash],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound {
                what: "blob",
                id: hash.to_string(),
            },
            other => Error::Database(other),
        })
    }

    /// Adjust the refcount for `hash` by `delta`; deletes the row if the
    /// count reaches zero. Called whenever an attachment JSON referencing
    /// the hash is inserted/deleted/updated in the messages table
    /// (spec §3 invariant, §4.10).
    pub(crate) fn adjust_refcount(
        conn: &rusqlite::Connection,
        hash: &str,
        delta: i64,
    ) -> Result<()> {
        conn.execute(
            "UPDATE blobs SET refcount = refcount + ?1 WHERE hash = ?2",
            rusqlite::params![delta, hash],
        )?;
        conn.execute("DELETE FROM blobs WHERE hash = ?1 AND refcount <= 0", [hash])?;
        Ok(())
    }

    /// Delete every blob with `refcount <= 0`: `save()` inserts at refcount
    /// zero, and a blob never attached to a message (or whose only
    /// attachment was later deleted outside the normal decrement path)
    /// stays at zero indefinitely, since `adjust_refcount`'s sweep only
    /// runs on the hashes it touches. Backs the `/clearblobs` command.
    #[instrument(skip(self))]
    pub fn clear_orphans(&self) -> Result<usize> {
        let conn = self.db.lock().unwrap();
        Ok(conn.execute("DELETE FROM blobs WHERE refcount <= 0", [])?)
    }

    pub fn refcount(&self, hash: &str) -> Result<i64> {
        let conn = self.db.lock().unwrap();
        match conn.query_row(
            "SELECT refcount FROM blobs WHERE hash = ?1",
            rusqlite::params![hash],
            |row| row.get(0),
        ) {
            Ok(n) => Ok(n),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(Error::Database(e)),
        }
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha512_256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn store() -> BlobStore {
        let db = db::open_in_memory().unwrap();
        db::init_db(&db.lock().unwrap()).unwrap();
        BlobStore::new(db)
    }

    #[test]
    fn save_is_idempotent_by_hash() {
        let store = store();
        let h1 = store.save(b"hello").unwrap();
        let h2 = store.save(b"hello").unwrap();
        assert_eq!(h1, h2);
        let conn = store.db.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM blobs WHERE hash = ?1", [&h1], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn get_returns_saved_bytes() {
        let store = store();
        let hash = store.save(b"payload").unwrap();
        assert_eq!(store.get(&hash).unwrap(), b"payload");
    }

    #[test]
    fn get_missing_hash_is_not_found() {
        let store = store();
        let err = store.get("deadbeef").unwrap_err();
        assert_eq!(err.code(), threadline_core::error::kind::NOT_FOUND);
    }

    #[test]
    fn refcount_reaching_zero_deletes_row() {
        let store = store();
        let hash = store.save(b"x").unwrap();
        {
            let conn = store.db.lock().unwrap();
            BlobStore::adjust_refcount(&conn, &hash, 1).unwrap();
        }
        assert_eq!(store.refcount(&hash).unwrap(), 1);
        {
            let conn = store.db.lock().unwrap();
            BlobStore::adjust_refcount(&conn, &hash, -1).unwrap();
        }
        assert_eq!(store.refcount(&hash).unwrap(), 0);
        assert!(store.get(&hash).is_err());
    }
}
