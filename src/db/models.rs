use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
    User,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "moderator" => Ok(Role::Moderator),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Post category. `memes` and `quicknews` are legacy spellings that
/// normalize to `meme` and `quick_news`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    General,
    News,
    Tutorial,
    Discussion,
    #[serde(alias = "memes")]
    Meme,
    #[serde(alias = "quicknews")]
    QuickNews,
    Trending,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::News => "news",
            Category::Tutorial => "tutorial",
            Category::Discussion => "discussion",
            Category::Meme => "meme",
            Category::QuickNews => "quick_news",
            Category::Trending => "trending",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Category::General),
            "news" => Ok(Category::News),
            "tutorial" => Ok(Category::Tutorial),
            "discussion" => Ok(Category::Discussion),
            "meme" | "memes" => Ok(Category::Meme),
            "quick_news" | "quicknews" => Ok(Category::QuickNews),
            "trending" => Ok(Category::Trending),
            other => Err(format!("Invalid category: {}", other)),
        }
    }
}

impl FromSql for Category {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for Category {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// A user as returned to clients. The password hash is never part of it.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub website_url: Option<String>,
    pub location: Option<String>,
    pub twitter_handle: Option<String>,
    pub github_handle: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Column list matching [`User::from_row`].
    pub const COLUMNS: &'static str = "id, username, email, display_name, role, bio, avatar_url, \
         website_url, location, twitter_handle, github_handle, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            display_name: row.get(3)?,
            role: row.get(4)?,
            bio: row.get(5)?,
            avatar_url: row.get(6)?,
            website_url: row.get(7)?,
            location: row.get(8)?,
            twitter_handle: row.get(9)?,
            github_handle: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    pub fn find(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        use rusqlite::OptionalExtension;

        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", Self::COLUMNS),
            [id],
            Self::from_row,
        )
        .optional()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorSummary {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunitySummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub category: Category,
    pub author: AuthorSummary,
    pub community: Option<CommunitySummary>,
    pub likes_count: i64,
    pub view_count: i64,
    pub liked: bool,
    pub is_published: bool,
    pub is_featured: bool,
    pub featured_image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatorSummary {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Community {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub creator: CreatorSummary,
    pub member_count: i64,
    pub post_count: i64,
    pub joined: bool,
    pub created_at: String,
    pub updated_at: String,
}
