//! Message body storage: either the `message_blob` table or a hex-sharded filesystem tree,
//! chosen once at `Store` construction time by whether a filesystem root was configured.

use std::path::{Path, PathBuf};

use diesel::sql_query;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel::{QueryableByName, RunQueryDsl};

use crate::conn::DbConn;
use crate::error::StoreResult;
use crate::models::{self, MessageBlob};

/// Split an envelope id into a 3-level hex-sharded directory path so no directory ever
/// holds more than 16.7M entries: `AAA/BBB/<rest-of-id-as-hex>`.
fn envelope_id_to_path(root: &Path, envelope_id: &[u8; 32]) -> (PathBuf, PathBuf) {
    let hex_id = hex::encode(envelope_id);
    let dir = root.join(&hex_id[0..3]).join(&hex_id[3..6]);
    let file = dir.join(&hex_id[6..]);
    (dir, file)
}

pub enum BlobBackend {
    Database,
    Filesystem(PathBuf),
}

#[derive(QueryableByName)]
struct BlobRecord {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    envelope_id: String,
    #[diesel(sql_type = Text)]
    signer_pub: String,
    #[diesel(sql_type = Integer)]
    one_time: i32,
    #[diesel(sql_type = diesel::sql_types::Binary)]
    data: Vec<u8>,
}

impl BlobBackend {
    pub fn insert(
        &self,
        conn: &mut DbConn,
        message_row_id: i64,
        envelope_id: &[u8; 32],
        signer_pub: &[u8; 32],
        one_time: bool,
        data: &[u8],
    ) -> StoreResult<()> {
        match self {
            BlobBackend::Filesystem(root) => {
                let (dir, file) = envelope_id_to_path(root, envelope_id);
                std::fs::create_dir_all(&dir)?;
                std::fs::write(&file, data)?;
                Ok(())
            }
            BlobBackend::Database => {
                let hex_id = models::to_hex(envelope_id);
                let hex_signer = models::to_hex(signer_pub);
                let one_time = models::bool_to_int(one_time);
                match conn {
                    #[cfg(feature = "sqlite")]
                    DbConn::Sqlite(c) => {
                        sql_query(
                            "INSERT INTO message_blob (message_id, envelope_id, signer_pub, \
                             one_time, data) VALUES (?, ?, ?, ?, ?)",
                        )
                        .bind::<BigInt, _>(message_row_id)
                        .bind::<Text, _>(hex_id)
                        .bind::<Text, _>(hex_signer)
                        .bind::<Integer, _>(one_time)
                        .bind::<diesel::sql_types::Binary, _>(data.to_vec())
                        .execute(c)?;
                    }
                    #[cfg(feature = "postgres")]
                    DbConn::Postgres(c) => {
                        sql_query(
                            "INSERT INTO message_blob (message_id, envelope_id, signer_pub, \
                             one_time, data) VALUES ($1, $2, $3, $4, $5)",
                        )
                        .bind::<BigInt, _>(message_row_id)
                        .bind::<Text, _>(hex_id)
                        .bind::<Text, _>(hex_signer)
                        .bind::<Integer, _>(one_time)
                        .bind::<diesel::sql_types::Binary, _>(data.to_vec())
                        .execute(c)?;
                    }
                }
                Ok(())
            }
        }
    }

    pub fn get(&self, conn: &mut DbConn, envelope_id: &[u8; 32]) -> StoreResult<Option<MessageBlob>> {
        match self {
            BlobBackend::Filesystem(root) => {
                let (_, file) = envelope_id_to_path(root, envelope_id);
                match std::fs::read(&file) {
                    Ok(data) => Ok(Some(MessageBlob {
                        id: 0,
                        message_id: *envelope_id,
                        signer_pub: [0u8; 32],
                        one_time: false,
                        data,
                    })),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            BlobBackend::Database => {
                let hex_id = models::to_hex(envelope_id);
                let rows: Vec<BlobRecord> = match conn {
                    #[cfg(feature = "sqlite")]
                    DbConn::Sqlite(c) => sql_query(
                        "SELECT id, envelope_id, signer_pub, one_time, data FROM message_blob \
                         WHERE envelope_id = ?",
                    )
                    .bind::<Text, _>(hex_id)
                    .get_results(c)?,
                    #[cfg(feature = "postgres")]
                    DbConn::Postgres(c) => sql_query(
                        "SELECT id, envelope_id, signer_pub, one_time, data FROM message_blob \
                         WHERE envelope_id = $1",
                    )
                    .bind::<Text, _>(hex_id)
                    .get_results(c)?,
                };
                Ok(rows.into_iter().next().map(|r| MessageBlob {
                    id: r.id,
                    message_id: models::from_hex_32(&r.envelope_id),
                    signer_pub: models::from_hex_32(&r.signer_pub),
                    one_time: models::int_to_bool(r.one_time),
                    data: r.data,
                }))
            }
        }
    }

    pub fn delete(&self, conn: &mut DbConn, envelope_id: &[u8; 32]) -> StoreResult<()> {
        match self {
            BlobBackend::Filesystem(root) => {
                let (_, file) = envelope_id_to_path(root, envelope_id);
                match std::fs::remove_file(&file) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            BlobBackend::Database => {
                let hex_id = models::to_hex(envelope_id);
                match conn {
                    #[cfg(feature = "sqlite")]
                    DbConn::Sqlite(c) => {
                        sql_query("DELETE FROM message_blob WHERE envelope_id = ?")
                            .bind::<Text, _>(hex_id)
                            .execute(c)?;
                    }
                    #[cfg(feature = "postgres")]
                    DbConn::Postgres(c) => {
                        sql_query("DELETE FROM message_blob WHERE envelope_id = $1")
                            .bind::<Text, _>(hex_id)
                            .execute(c)?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_id_shards_into_three_levels() {
        let root = Path::new("/tmp/repbin-blobs");
        let id = [0xabu8; 32];
        let (dir, file) = envelope_id_to_path(root, &id);
        assert_eq!(dir, root.join("aba").join("bab"));
        assert!(file.starts_with(&dir));
    }
}
