//! SQLite-backed entity store. The reference panel only ever reads from it
//! through the [`EntitySource`] trait; writes exist for the editor screens and
//! for tests.

use anyhow::Context;
use lorepin_protocol::{Entity, EntityType};

use crate::{append_event_tx, now_rfc3339, Engine};

/// Where the entity cache gets its data from.
pub trait EntitySource {
    fn load_entities(&self, book_id: &str, kind: EntityType) -> anyhow::Result<Vec<Entity>>;
}

impl Engine {
    pub fn list_entities(&self, book_id: &str, kind: EntityType) -> anyhow::Result<Vec<Entity>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, image, fields_json FROM entities
             WHERE book_id = ?1 AND kind = ?2 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map((book_id, kind.as_str()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, name, image, fields_json) = row?;
            let fields = serde_json::from_str(&fields_json)
                .with_context(|| format!("decode fields for {kind} {id}"))?;
            out.push(Entity {
                id,
                name,
                image,
                fields,
            });
        }
        Ok(out)
    }

    /// Insert or update. Updates keep the entity's original position.
    pub fn upsert_entity(
        &self,
        book_id: &str,
        kind: EntityType,
        entity: &Entity,
    ) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let ts = now_rfc3339();
        let fields_json = serde_json::to_string(&entity.fields)?;
        let position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM entities WHERE book_id = ?1 AND kind = ?2",
            (book_id, kind.as_str()),
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO entities (book_id, kind, id, name, image, fields_json, position, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(book_id, kind, id) DO UPDATE SET
               name = excluded.name,
               image = excluded.image,
               fields_json = excluded.fields_json,
               updated_at = excluded.updated_at",
            (
                book_id,
                kind.as_str(),
                &entity.id,
                &entity.name,
                &entity.image,
                &fields_json,
                position,
                &ts,
            ),
        )
        .with_context(|| format!("upsert {kind} {}", entity.id))?;
        append_event_tx(
            &tx,
            "entity.upserted",
            Some(&entity.id),
            serde_json::json!({ "book_id": book_id, "kind": kind, "id": entity.id }),
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_entity(&self, book_id: &str, kind: EntityType, id: &str) -> anyhow::Result<bool> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let n = tx.execute(
            "DELETE FROM entities WHERE book_id = ?1 AND kind = ?2 AND id = ?3",
            (book_id, kind.as_str(), id),
        )?;
        if n > 0 {
            append_event_tx(
                &tx,
                "entity.deleted",
                Some(id),
                serde_json::json!({ "book_id": book_id, "kind": kind, "id": id }),
            )?;
        }
        tx.commit()?;
        Ok(n > 0)
    }
}

impl EntitySource for Engine {
    fn load_entities(&self, book_id: &str, kind: EntityType) -> anyhow::Result<Vec<Entity>> {
        self.list_entities(book_id, kind)
    }
}
