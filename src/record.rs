use crate::errors::BooruErrors;
use crate::time::timestamp_floor;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{EnumIter, IntoStaticStr};

/// Separator used to store each tag group as a single string.
pub const TAG_DELIMITER: char = ',';

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum TagGroup {
    #[strum(serialize = "tags_general")]
    General,
    #[strum(serialize = "tags_artist")]
    Artist,
    #[strum(serialize = "tags_character")]
    Character,
    #[strum(serialize = "tags_copyright")]
    Copyright,
    #[strum(serialize = "tags_meta")]
    Meta,
}

impl TagGroup {
    pub fn column(self) -> &'static str {
        self.into()
    }
}

/// One image's metadata, as read from its JSON file and stored in the `images`
/// table.
///
/// Deserialization is lenient: absent or `null` fields take their defaults,
/// numbers and booleans are coerced from strings, and tag groups accept either
/// a list or an already joined string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(deserialize_with = "lenient::id")]
    pub id: i64,
    #[serde(default = "timestamp_floor", deserialize_with = "lenient::timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(default = "timestamp_floor", deserialize_with = "lenient::timestamp")]
    pub updated_at: NaiveDateTime,
    #[serde(default, deserialize_with = "lenient::int")]
    pub up_score: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub down_score: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub score: i64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub source: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub md5: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub rating: String,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub is_pending: bool,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub is_flagged: bool,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub is_deleted: bool,
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub uploader_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub approver_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub last_noted_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub last_comment_bumped_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "lenient::int")]
    pub fav_count: i64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub tag_string: String,
    #[serde(default, deserialize_with = "lenient::int")]
    pub tag_count: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub tag_count_general: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub tag_count_artist: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub tag_count_character: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub tag_count_copyright: i64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub file_ext: String,
    #[serde(default, deserialize_with = "lenient::int")]
    pub file_size: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub image_width: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub image_height: i64,
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub parent_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub has_children: bool,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub is_banned: bool,
    #[serde(default, deserialize_with = "lenient::text")]
    pub pixiv_id: String,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub last_commented_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub has_active_children: bool,
    #[serde(default, deserialize_with = "lenient::int")]
    pub bit_flags: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub tag_count_meta: i64,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub has_large: bool,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub has_visible_children: bool,
    #[serde(default, deserialize_with = "lenient::tags")]
    pub tags_general: String,
    #[serde(default, deserialize_with = "lenient::tags")]
    pub tags_artist: String,
    #[serde(default, deserialize_with = "lenient::tags")]
    pub tags_character: String,
    #[serde(default, deserialize_with = "lenient::tags")]
    pub tags_copyright: String,
    #[serde(default, deserialize_with = "lenient::tags")]
    pub tags_meta: String,
}

impl ImageRecord {
    pub fn from_json_slice(bytes: &[u8]) -> Result<ImageRecord, BooruErrors> {
        serde_json::from_slice(bytes).map_err(|e| {
            if e.is_data() {
                BooruErrors::Validation(e.to_string())
            } else {
                BooruErrors::Json(e.to_string())
            }
        })
    }

    /// Filename the image is served under.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.md5, self.file_ext)
    }
}

/// Splits a stored tag group back into its individual, non-empty tags.
pub fn split_tags(joined: &str) -> impl Iterator<Item = &str> {
    joined
        .split(TAG_DELIMITER)
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
}

mod lenient {
    use super::TAG_DELIMITER;
    use crate::time::{parse_timestamp, timestamp_floor};
    use chrono::NaiveDateTime;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_int(value: &Value) -> Result<Option<i64>, String> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(i64::from(*b))),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .map(Some)
                .ok_or_else(|| format!("{n} is not an integer")),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(None);
                }
                s.parse::<i64>()
                    .map(Some)
                    .map_err(|_| format!("{s:?} is not an integer"))
            }
            other => Err(format!("{other} is not an integer")),
        }
    }

    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(d)?;
        as_int(&value)
            .map_err(D::Error::custom)?
            .ok_or_else(|| D::Error::custom("id must not be null"))
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(as_int(&value).map_err(D::Error::custom)?.unwrap_or(0))
    }

    pub fn opt_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let value = Value::deserialize(d)?;
        as_int(&value).map_err(D::Error::custom)
    }

    pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_f64().map_or(false, |f| f != 0.0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" | "" => Ok(false),
                other => Err(D::Error::custom(format!("{other:?} is not a boolean"))),
            },
            other => Err(D::Error::custom(format!("{other} is not a boolean"))),
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(D::Error::custom(format!("{other} is not a string"))),
        }
    }

    pub fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        Ok(opt_timestamp(d)?.unwrap_or_else(timestamp_floor))
    }

    pub fn opt_timestamp<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Value::deserialize(d)? {
            Value::String(s) => Ok(parse_timestamp(&s)),
            _ => Ok(None),
        }
    }

    pub fn tags<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(String::new()),
            Value::String(joined) => Ok(joined),
            Value::Array(items) => {
                let mut tags = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(tag) if tag.contains(TAG_DELIMITER) => {
                            return Err(D::Error::custom(format!(
                                "tag {tag:?} contains the delimiter {TAG_DELIMITER:?}"
                            )))
                        }
                        Value::String(tag) => tags.push(tag),
                        other => {
                            return Err(D::Error::custom(format!("tag {other} is not a string")))
                        }
                    }
                }
                Ok(tags.join(&TAG_DELIMITER.to_string()))
            }
            other => Err(D::Error::custom(format!(
                "{other} is neither a tag list nor a string"
            ))),
        }
    }
}
