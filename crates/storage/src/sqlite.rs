use rusqlite::{Connection, OptionalExtension};

use curvesim_core::{CurveKey, MonthlySeries, OverrideId};

use crate::error::StorageError;
use crate::traits::{CurveStore, OverrideMeta, OverrideRecord};

const SELECT_COLUMNS: &str =
    "SELECT override_id, client, category, product, name, curve, year, created_at, updated_at FROM curve_overrides";

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

pub struct SqliteCurveStore {
    conn: Connection,
}

impl SqliteCurveStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn schema_version(&self) -> Result<i32, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?)
    }
}

/// Raw column values of one `curve_overrides` row, decoded outside of rusqlite's closure.
struct RawRecord {
    override_id: Vec<u8>,
    client: String,
    category: String,
    product: String,
    name: String,
    curve: Vec<u8>,
    year: Option<i32>,
    created_at: i64,
    updated_at: i64,
}

fn read_raw(row: &rusqlite::Row) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        override_id: row.get(0)?,
        client: row.get(1)?,
        category: row.get(2)?,
        product: row.get(3)?,
        name: row.get(4)?,
        curve: row.get(5)?,
        year: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn decode(raw: RawRecord) -> Result<OverrideRecord, StorageError> {
    let override_id = OverrideId::from_bytes(to_array::<16>(raw.override_id, "override_id")?);
    let curve: MonthlySeries = rmp_serde::from_slice(&raw.curve)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(OverrideRecord {
        key: CurveKey::new(raw.client, raw.category, raw.product),
        curve,
        meta: OverrideMeta {
            override_id,
            name: raw.name,
            year: raw.year,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        },
    })
}

impl CurveStore for SqliteCurveStore {
    fn get(&self, key: &CurveKey) -> Result<Option<OverrideRecord>, StorageError> {
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE storage_key = ?1"),
                rusqlite::params![key.storage_key()],
                read_raw,
            )
            .optional()?;
        raw.map(decode).transpose()
    }

    fn put(&mut self, record: &OverrideRecord) -> Result<(), StorageError> {
        let curve_bytes = rmp_serde::to_vec(&record.curve)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO curve_overrides (storage_key, override_id, client, category, product, name, curve, year, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(storage_key) DO UPDATE SET
                override_id = excluded.override_id,
                client = excluded.client,
                category = excluded.category,
                product = excluded.product,
                name = excluded.name,
                curve = excluded.curve,
                year = excluded.year,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            rusqlite::params![
                record.key.storage_key(),
                record.meta.override_id.as_bytes().as_slice(),
                record.key.client(),
                record.key.category(),
                record.key.product(),
                record.meta.name,
                curve_bytes,
                record.meta.year,
                record.meta.created_at,
                record.meta.updated_at,
            ],
        )?;
        Ok(())
    }

    fn exists(&self, key: &CurveKey) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM curve_overrides WHERE storage_key = ?1",
                rusqlite::params![key.storage_key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn records(&self) -> Result<Vec<OverrideRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY storage_key"))?;
        let rows = stmt.query_map([], read_raw)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(decode(row?)?);
        }
        Ok(result)
    }

    fn remove(&mut self, key: &CurveKey) -> Result<bool, StorageError> {
        let n = self.conn.execute(
            "DELETE FROM curve_overrides WHERE storage_key = ?1",
            rusqlite::params![key.storage_key()],
        )?;
        Ok(n > 0)
    }

    fn clear(&mut self) -> Result<usize, StorageError> {
        Ok(self.conn.execute("DELETE FROM curve_overrides", [])?)
    }

    fn count(&self) -> Result<usize, StorageError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM curve_overrides", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
