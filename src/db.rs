use crate::errors::BooruErrors;
use crate::importer::RecordSink;
use crate::record::{ImageRecord, TagGroup};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumString};

const COLUMNS: &[&str] = &[
    "id",
    "created_at",
    "updated_at",
    "up_score",
    "down_score",
    "score",
    "source",
    "md5",
    "rating",
    "is_pending",
    "is_flagged",
    "is_deleted",
    "uploader_id",
    "approver_id",
    "last_noted_at",
    "last_comment_bumped_at",
    "fav_count",
    "tag_string",
    "tag_count",
    "tag_count_general",
    "tag_count_artist",
    "tag_count_character",
    "tag_count_copyright",
    "file_ext",
    "file_size",
    "image_width",
    "image_height",
    "parent_id",
    "has_children",
    "is_banned",
    "pixiv_id",
    "last_commented_at",
    "has_active_children",
    "bit_flags",
    "tag_count_meta",
    "has_large",
    "has_visible_children",
    "tags_general",
    "tags_artist",
    "tags_character",
    "tags_copyright",
    "tags_meta",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SortField {
    Id,
    CreatedAt,
    UpdatedAt,
    Score,
    UpScore,
    DownScore,
    FavCount,
    FileSize,
    ImageWidth,
    ImageHeight,
    TagCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Sort {
    fn order_by(&self) -> String {
        let direction = match self.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        format!(
            "ORDER BY {} {direction}, id {direction}",
            self.field.as_ref()
        )
    }
}

/// Visibility rules applied to listing queries. The default filters nothing.
/// Ratings are never filtered on, so unrated records stay visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFilter {
    pub exclude_deleted: bool,
    pub exclude_banned: bool,
}

impl RecordFilter {
    fn conditions(&self, terms: &[String]) -> (String, Vec<SqlValue>) {
        let mut conditions = vec![];
        let mut values = vec![];
        if self.exclude_deleted {
            conditions.push("is_deleted = 0".to_owned());
        }
        if self.exclude_banned {
            conditions.push("is_banned = 0".to_owned());
        }
        for term in terms {
            let pattern = format!("%{}%", escape_like(term));
            let any_group = TagGroup::iter()
                .map(|group| format!("{} LIKE ? ESCAPE '\\'", group.column()))
                .collect::<Vec<_>>()
                .join(" OR ");
            conditions.push(format!("({any_group})"));
            values.extend(TagGroup::iter().map(|_| SqlValue::Text(pattern.clone())));
        }
        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A page request already clamped into the valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub number: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl Page {
    /// Clamps `requested` to `1..=total_pages`. An empty result set still has
    /// page 1.
    pub fn clamp(requested: i64, per_page: u32, total: u64) -> Page {
        let per_page = u64::from(per_page.max(1));
        let total_pages = (total + per_page - 1) / per_page;
        let number = u64::try_from(requested.max(1))
            .unwrap_or(1)
            .min(total_pages.max(1));
        Page {
            number,
            per_page,
            total,
            total_pages,
        }
    }

    fn offset(&self) -> u64 {
        (self.number - 1) * self.per_page
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Store, BooruErrors> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let store = Store {
            conn: Connection::open(path)?,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Store, BooruErrors> {
        let store = Store {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), BooruErrors> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id                      INTEGER PRIMARY KEY,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL,
                up_score                INTEGER NOT NULL DEFAULT 0,
                down_score              INTEGER NOT NULL DEFAULT 0,
                score                   INTEGER NOT NULL DEFAULT 0,
                source                  TEXT NOT NULL DEFAULT '',
                md5                     TEXT NOT NULL DEFAULT '',
                rating                  TEXT NOT NULL DEFAULT '',
                is_pending              INTEGER NOT NULL DEFAULT 0,
                is_flagged              INTEGER NOT NULL DEFAULT 0,
                is_deleted              INTEGER NOT NULL DEFAULT 0,
                uploader_id             INTEGER,
                approver_id             INTEGER,
                last_noted_at           TEXT,
                last_comment_bumped_at  TEXT,
                fav_count               INTEGER NOT NULL DEFAULT 0,
                tag_string              TEXT NOT NULL DEFAULT '',
                tag_count               INTEGER NOT NULL DEFAULT 0,
                tag_count_general       INTEGER NOT NULL DEFAULT 0,
                tag_count_artist        INTEGER NOT NULL DEFAULT 0,
                tag_count_character     INTEGER NOT NULL DEFAULT 0,
                tag_count_copyright     INTEGER NOT NULL DEFAULT 0,
                file_ext                TEXT NOT NULL DEFAULT '',
                file_size               INTEGER NOT NULL DEFAULT 0,
                image_width             INTEGER NOT NULL DEFAULT 0,
                image_height            INTEGER NOT NULL DEFAULT 0,
                parent_id               INTEGER,
                has_children            INTEGER NOT NULL DEFAULT 0,
                is_banned               INTEGER NOT NULL DEFAULT 0,
                pixiv_id                TEXT NOT NULL DEFAULT '',
                last_commented_at       TEXT,
                has_active_children     INTEGER NOT NULL DEFAULT 0,
                bit_flags               INTEGER NOT NULL DEFAULT 0,
                tag_count_meta          INTEGER NOT NULL DEFAULT 0,
                has_large               INTEGER NOT NULL DEFAULT 0,
                has_visible_children    INTEGER NOT NULL DEFAULT 0,
                tags_general            TEXT NOT NULL DEFAULT '',
                tags_artist             TEXT NOT NULL DEFAULT '',
                tags_character          TEXT NOT NULL DEFAULT '',
                tags_copyright          TEXT NOT NULL DEFAULT '',
                tags_meta               TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_images_is_deleted ON images(is_deleted);
            CREATE INDEX IF NOT EXISTS idx_images_is_banned ON images(is_banned);
            CREATE INDEX IF NOT EXISTS idx_images_created_at ON images(created_at);
            CREATE INDEX IF NOT EXISTS idx_images_score ON images(score);
            "#,
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64, BooruErrors> {
        self.count_filtered(&RecordFilter::default(), &[])
    }

    pub fn first(&self) -> Result<Option<ImageRecord>, BooruErrors> {
        Ok(self.sample(1)?.into_iter().next())
    }

    pub fn sample(&self, limit: u64) -> Result<Vec<ImageRecord>, BooruErrors> {
        let sql = format!("SELECT {} FROM images LIMIT ?1", COLUMNS.join(", "));
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([limit as i64], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn get(&self, id: i64) -> Result<Option<ImageRecord>, BooruErrors> {
        let sql = format!("SELECT {} FROM images WHERE id = ?1", COLUMNS.join(", "));
        let record = self
            .conn
            .query_row(&sql, [id], record_from_row)
            .optional()?;
        Ok(record)
    }

    /// Closest visible ids before and after `id`, ignoring deleted and banned
    /// images.
    pub fn neighbors(&self, id: i64) -> Result<(Option<i64>, Option<i64>), BooruErrors> {
        let previous = self
            .conn
            .query_row(
                "SELECT id FROM images WHERE id < ?1 AND is_deleted = 0 AND is_banned = 0 \
                 ORDER BY id DESC LIMIT 1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let next = self
            .conn
            .query_row(
                "SELECT id FROM images WHERE id > ?1 AND is_deleted = 0 AND is_banned = 0 \
                 ORDER BY id ASC LIMIT 1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok((previous, next))
    }

    /// Counts records passing `filter` whose tags contain every term.
    pub fn count_filtered(
        &self,
        filter: &RecordFilter,
        terms: &[String],
    ) -> Result<u64, BooruErrors> {
        let (conditions, values) = filter.conditions(terms);
        let sql = format!("SELECT COUNT(*) FROM images {conditions}");
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// One page of records passing `filter` whose tags contain every term.
    pub fn page(
        &self,
        filter: &RecordFilter,
        terms: &[String],
        sort: &Sort,
        page: &Page,
    ) -> Result<Vec<ImageRecord>, BooruErrors> {
        let (conditions, mut values) = filter.conditions(terms);
        let sql = format!(
            "SELECT {} FROM images {conditions} {} LIMIT ? OFFSET ?",
            COLUMNS.join(", "),
            sort.order_by()
        );
        values.push(SqlValue::Integer(page.per_page as i64));
        values.push(SqlValue::Integer(page.offset() as i64));
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Every non-empty tag group string of the records passing `filter`,
    /// optionally looking at only the first `limit` records.
    pub fn tag_strings(
        &self,
        filter: &RecordFilter,
        limit: Option<u64>,
    ) -> Result<Vec<String>, BooruErrors> {
        let (conditions, mut values) = filter.conditions(&[]);
        let columns = TagGroup::iter()
            .map(TagGroup::column)
            .collect::<Vec<_>>()
            .join(", ");
        let limit_clause = match limit {
            Some(limit) => {
                values.push(SqlValue::Integer(limit as i64));
                "LIMIT ?"
            }
            None => "",
        };
        let sql = format!("SELECT {columns} FROM images {conditions} {limit_clause}");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut tags = vec![];
        while let Some(row) = rows.next()? {
            for idx in 0..TagGroup::iter().len() {
                let joined: String = row.get(idx)?;
                if !joined.is_empty() {
                    tags.push(joined);
                }
            }
        }
        Ok(tags)
    }
}

impl RecordSink for Store {
    /// Inserts the whole batch inside one transaction. Any failure rolls the
    /// transaction back, so either every record lands or none does.
    fn insert_batch(&mut self, records: &[ImageRecord]) -> Result<usize, BooruErrors> {
        let tx = self.conn.transaction()?;
        match insert_records(&tx, records) {
            Ok(()) => {
                tx.commit()?;
                Ok(records.len())
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }
}

fn insert_records(tx: &Transaction, records: &[ImageRecord]) -> Result<(), BooruErrors> {
    let placeholders = (1..=COLUMNS.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO images ({}) VALUES ({placeholders})",
        COLUMNS.join(", ")
    );
    let mut stmt = tx.prepare(&sql)?;
    for r in records {
        stmt.execute(params![
            r.id,
            r.created_at,
            r.updated_at,
            r.up_score,
            r.down_score,
            r.score,
            r.source,
            r.md5,
            r.rating,
            r.is_pending,
            r.is_flagged,
            r.is_deleted,
            r.uploader_id,
            r.approver_id,
            r.last_noted_at,
            r.last_comment_bumped_at,
            r.fav_count,
            r.tag_string,
            r.tag_count,
            r.tag_count_general,
            r.tag_count_artist,
            r.tag_count_character,
            r.tag_count_copyright,
            r.file_ext,
            r.file_size,
            r.image_width,
            r.image_height,
            r.parent_id,
            r.has_children,
            r.is_banned,
            r.pixiv_id,
            r.last_commented_at,
            r.has_active_children,
            r.bit_flags,
            r.tag_count_meta,
            r.has_large,
            r.has_visible_children,
            r.tags_general,
            r.tags_artist,
            r.tags_character,
            r.tags_copyright,
            r.tags_meta,
        ])?;
    }
    Ok(())
}

fn record_from_row(row: &Row) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get("id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        up_score: row.get("up_score")?,
        down_score: row.get("down_score")?,
        score: row.get("score")?,
        source: row.get("source")?,
        md5: row.get("md5")?,
        rating: row.get("rating")?,
        is_pending: row.get("is_pending")?,
        is_flagged: row.get("is_flagged")?,
        is_deleted: row.get("is_deleted")?,
        uploader_id: row.get("uploader_id")?,
        approver_id: row.get("approver_id")?,
        last_noted_at: row.get("last_noted_at")?,
        last_comment_bumped_at: row.get("last_comment_bumped_at")?,
        fav_count: row.get("fav_count")?,
        tag_string: row.get("tag_string")?,
        tag_count: row.get("tag_count")?,
        tag_count_general: row.get("tag_count_general")?,
        tag_count_artist: row.get("tag_count_artist")?,
        tag_count_character: row.get("tag_count_character")?,
        tag_count_copyright: row.get("tag_count_copyright")?,
        file_ext: row.get("file_ext")?,
        file_size: row.get("file_size")?,
        image_width: row.get("image_width")?,
        image_height: row.get("image_height")?,
        parent_id: row.get("parent_id")?,
        has_children: row.get("has_children")?,
        is_banned: row.get("is_banned")?,
        pixiv_id: row.get("pixiv_id")?,
        last_commented_at: row.get("last_commented_at")?,
        has_active_children: row.get("has_active_children")?,
        bit_flags: row.get("bit_flags")?,
        tag_count_meta: row.get("tag_count_meta")?,
        has_large: row.get("has_large")?,
        has_visible_children: row.get("has_visible_children")?,
        tags_general: row.get("tags_general")?,
        tags_artist: row.get("tags_artist")?,
        tags_character: row.get("tags_character")?,
        tags_copyright: row.get("tags_copyright")?,
        tags_meta: row.get("tags_meta")?,
    })
}
