//! Conversion between spreadsheet rows and typed story/user records.
//!
//! Every cell travels as a string. Stories are decoded by header name, users by
//! fixed column position.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StoreError;

/// Story columns A-L, in sheet order. The last one is rewritten on every write.
pub const STORY_COLUMNS: [&str; 12] = [
    "title",
    "excerpt",
    "author",
    "location",
    "publishDate",
    "image",
    "category",
    "readTime",
    "content",
    "tags",
    "featured",
    "createdAt",
];

/// User columns A-M, in sheet order.
pub const USER_COLUMNS: [&str; 13] = [
    "id",
    "username",
    "email",
    "password",
    "fullName",
    "role",
    "status",
    "createdAt",
    "lastLogin",
    "permissions",
    "phone",
    "department",
    "notes",
];

/// A published or draft article.
///
/// `id` is the story's position among the data rows plus one; it is not
/// stored and shifts whenever an earlier story is deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: u64,
    pub title: String,
    pub excerpt: String,
    pub author: String,
    pub location: String,
    pub publish_date: String,
    pub image: String,
    pub category: String,
    pub read_time: String,
    pub content: String,
    pub tags: String,
    pub featured: String,
    pub created_at: String,
    /// Columns present in the header that are not part of the story schema
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Story {
    pub fn is_featured(&self) -> bool {
        self.featured == "true"
    }

    /// Tags split back into a list.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Tags as sent by a client: either a list or an already-joined string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Tags {
    List(Vec<String>),
    Text(String),
}

/// A boolean flag that clients send either as `true` or as `"true"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    pub fn as_bool(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Text(s) => s.trim().eq_ignore_ascii_case("true"),
        }
    }
}

/// Story fields accepted on create and update. Absent fields are written as
/// empty cells.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryInput {
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub author: Option<String>,
    pub location: Option<String>,
    pub publish_date: Option<String>,
    pub image: Option<String>,
    pub category: Option<String>,
    pub read_time: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Tags>,
    pub featured: Option<Flag>,
}

impl From<&Story> for StoryInput {
    fn from(story: &Story) -> Self {
        StoryInput {
            title: Some(story.title.clone()),
            excerpt: Some(story.excerpt.clone()),
            author: Some(story.author.clone()),
            location: Some(story.location.clone()),
            publish_date: Some(story.publish_date.clone()),
            image: Some(story.image.clone()),
            category: Some(story.category.clone()),
            read_time: Some(story.read_time.clone()),
            content: Some(story.content.clone()),
            tags: Some(Tags::Text(story.tags.clone())),
            featured: Some(Flag::Text(story.featured.clone())),
        }
    }
}

/// An operator account.
///
/// `password` holds the password hash and is never serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub full_name: String,
    pub role: String,
    pub status: String,
    pub created_at: String,
    pub last_login: String,
    pub permissions: String,
    pub phone: String,
    pub department: String,
    pub notes: String,
}

/// Render a timestamp the way the sheet stores it: `2024-05-01T09:30:00.000Z`.
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn story_header() -> Vec<String> {
    STORY_COLUMNS.iter().map(|c| c.to_string()).collect()
}

pub fn user_header() -> Vec<String> {
    USER_COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Decode a story by zipping `header` names with `row` cells.
///
/// Cells missing from the end of the row decode as empty strings. The
/// returned story has `id` 0; the repository assigns it from the row position.
pub fn decode_story_row(header: &[String], row: &[String]) -> Story {
    let mut story = Story::default();

    for (i, name) in header.iter().enumerate() {
        let value = row.get(i).cloned().unwrap_or_default();
        let name = name.trim();

        match name {
            "" | "id" => {}
            "title" => story.title = value,
            "excerpt" => story.excerpt = value,
            "author" => story.author = value,
            "location" => story.location = value,
            "publishDate" => story.publish_date = value,
            "image" => story.image = value,
            "category" => story.category = value,
            "readTime" => story.read_time = value,
            "content" => story.content = value,
            "tags" => story.tags = value,
            "featured" => story.featured = value,
            "createdAt" => story.created_at = value,
            other => {
                story.extra.insert(other.to_string(), value);
            }
        }
    }

    story
}

/// Encode a story into columns A-L. `now` becomes the trailing audit cell.
pub fn encode_story_row(input: &StoryInput, now: DateTime<Utc>) -> Vec<String> {
    let text = |v: &Option<String>| v.clone().unwrap_or_default();

    let tags = match &input.tags {
        Some(Tags::List(list)) => list.join(", "),
        Some(Tags::Text(s)) => s.clone(),
        None => String::new(),
    };
    let featured = input.featured.as_ref().is_some_and(Flag::as_bool);

    vec![
        text(&input.title),
        text(&input.excerpt),
        text(&input.author),
        text(&input.location),
        text(&input.publish_date),
        text(&input.image),
        text(&input.category),
        text(&input.read_time),
        text(&input.content),
        tags,
        featured.to_string(),
        iso_timestamp(now),
    ]
}

/// Decode a user from its fixed column positions.
///
/// # Errors
/// * `StoreError::RowShape` if the row has more cells than the user schema,
///   which means the columns no longer line up
pub fn decode_user_row(row: &[String]) -> Result<User, StoreError> {
    if row.len() > USER_COLUMNS.len() {
        return Err(StoreError::RowShape {
            expected: USER_COLUMNS.len(),
            found: row.len(),
        });
    }

    let cell = |i: usize| row.get(i).cloned().unwrap_or_default();

    Ok(User {
        id: cell(0),
        username: cell(1),
        email: cell(2),
        password: cell(3),
        full_name: cell(4),
        role: cell(5),
        status: cell(6),
        created_at: cell(7),
        last_login: cell(8),
        permissions: cell(9),
        phone: cell(10),
        department: cell(11),
        notes: cell(12),
    })
}

/// Encode a user into columns A-M.
pub fn encode_user_row(user: &User) -> Vec<String> {
    vec![
        user.id.clone(),
        user.username.clone(),
        user.email.clone(),
        user.password.clone(),
        user.full_name.clone(),
        user.role.clone(),
        user.status.clone(),
        user.created_at.clone(),
        user.last_login.clone(),
        user.permissions.clone(),
        user.phone.clone(),
        user.department.clone(),
        user.notes.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn sample_story() -> Story {
        Story {
            id: 0,
            title: "Clean water for Kibera".into(),
            excerpt: "A new borehole".into(),
            author: "Grace".into(),
            location: "Nairobi".into(),
            publish_date: "2024-03-01".into(),
            image: "/uploads/image-1-2.png".into(),
            category: "Water".into(),
            read_time: "4 min".into(),
            content: "<p>Hello, world</p>".into(),
            tags: "water, health".into(),
            featured: "true".into(),
            created_at: "2024-03-01T00:00:00.000Z".into(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn story_round_trip_keeps_every_field_but_the_timestamp() {
        let story = sample_story();
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let row = encode_story_row(&StoryInput::from(&story), now);
        assert_eq!(row.len(), STORY_COLUMNS.len());

        let decoded = decode_story_row(&story_header(), &row);
        assert_eq!(decoded.created_at, "2025-01-02T03:04:05.000Z");
        assert_eq!(
            decoded,
            Story {
                created_at: decoded.created_at.clone(),
                ..story
            }
        );
    }

    #[test]
    fn tags_list_is_joined_and_featured_is_a_string() {
        let input: StoryInput =
            serde_json::from_str(r#"{"title":"A","tags":["x","y"],"featured":true}"#).unwrap();
        let row = encode_story_row(&input, Utc::now());

        assert_eq!(row[0], "A");
        assert_eq!(row[9], "x, y");
        assert_eq!(row[10], "true");
        assert_eq!(row[1], "");

        let story = decode_story_row(&story_header(), &row);
        assert!(story.is_featured());
        assert_eq!(story.tag_list(), vec!["x", "y"]);
    }

    #[test]
    fn featured_accepts_strings_and_defaults_to_false() {
        let input: StoryInput = serde_json::from_str(r#"{"featured":"TRUE"}"#).unwrap();
        assert_eq!(encode_story_row(&input, Utc::now())[10], "true");

        let input: StoryInput = serde_json::from_str(r#"{"featured":"no"}"#).unwrap();
        assert_eq!(encode_story_row(&input, Utc::now())[10], "false");

        assert_eq!(encode_story_row(&StoryInput::default(), Utc::now())[10], "false");
    }

    #[test]
    fn short_story_rows_default_to_empty() {
        let story = decode_story_row(&story_header(), &strings(&["Only title"]));
        assert_eq!(story.title, "Only title");
        assert_eq!(story.content, "");
        assert_eq!(story.featured, "");
        assert!(!story.is_featured());
    }

    #[test]
    fn unknown_headers_are_kept_as_extra_fields() {
        let header = strings(&["title", "donationGoal"]);
        let story = decode_story_row(&header, &strings(&["Wells", "5000"]));
        assert_eq!(story.extra.get("donationGoal").map(String::as_str), Some("5000"));

        let json = serde_json::to_value(&story).unwrap();
        assert_eq!(json["donationGoal"], "5000");
        assert_eq!(json["publishDate"], "");
    }

    #[test]
    fn user_row_round_trip_and_short_rows() {
        let user = User {
            id: "user_1_abc".into(),
            username: "amina".into(),
            email: "amina@example.org".into(),
            password: "$argon2id$hash".into(),
            role: "editor".into(),
            status: "active".into(),
            ..User::default()
        };
        assert_eq!(decode_user_row(&encode_user_row(&user)).unwrap(), user);

        let short = decode_user_row(&strings(&["user_2", "bob"])).unwrap();
        assert_eq!(short.username, "bob");
        assert_eq!(short.notes, "");
    }

    #[test]
    fn oversized_user_row_is_rejected() {
        let row = vec![String::from("x"); 14];
        assert!(matches!(
            decode_user_row(&row),
            Err(StoreError::RowShape { expected: 13, found: 14 })
        ));
    }

    #[test]
    fn user_password_is_never_serialized() {
        let user = User {
            password: "secret-hash".into(),
            ..User::default()
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("password"));
    }
}
