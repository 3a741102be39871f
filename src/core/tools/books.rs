//! Book catalogue search.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Tool, ToolError, ToolResult, parse_args};

const BUILTIN_BOOKS: &str = include_str!("../../../data/books_database.json");

/// Maximum books returned per query.
const MAX_BOOKS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub category: String,
    pub year: i32,
    /// 0-10 scale
    pub rating: f64,
    pub pages: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Book {
    fn matches_query(&self, query: &str) -> bool {
        self.title.to_lowercase().contains(query)
            || self.author.to_lowercase().contains(query)
            || self.description.to_lowercase().contains(query)
            || self.keywords.iter().any(|k| k.to_lowercase().contains(query))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookCatalog {
    pub books: Vec<Book>,
}

impl BookCatalog {
    pub fn builtin() -> ToolResult<Self> {
        Self::from_json(BUILTIN_BOOKS)
    }

    pub fn from_json(json: &str) -> ToolResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ToolError::DataUnavailable(format!("invalid book data: {e}")))
    }

    pub fn from_path(path: &Path) -> ToolResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ToolError::DataUnavailable(format!("book database {} not readable: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BookQuery {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    min_rating: Option<f64>,
}

pub struct SearchBooksTool {
    catalog: BookCatalog,
}

impl SearchBooksTool {
    pub fn new(catalog: BookCatalog) -> Self {
        Self { catalog }
    }
}

impl Tool for SearchBooksTool {
    fn name(&self) -> &'static str {
        "search_books"
    }

    fn description(&self) -> &'static str {
        "Search the book database by keyword, category, author or minimum rating. Categories include science_fiction, literary_fiction, history, popular_science and programming."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keyword matched against title, author, description and tags"
                },
                "category": {
                    "type": "string",
                    "description": "Book category, e.g. science_fiction, literary_fiction, history, programming"
                },
                "author": {
                    "type": "string",
                    "description": "Author name"
                },
                "min_rating": {
                    "type": "number",
                    "description": "Minimum rating (0-10)"
                }
            },
            "required": []
        })
    }

    fn call(&self, arguments: Value) -> ToolResult<Value> {
        let q: BookQuery = parse_args(arguments)?;
        if let Some(rating) = q.min_rating
            && !(0.0..=10.0).contains(&rating)
        {
            return Err(ToolError::InvalidArguments(format!(
                "min_rating must be between 0 and 10, got {rating}"
            )));
        }
        let query = q
            .query
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut matches: Vec<&Book> = self
            .catalog
            .books
            .iter()
            .filter(|b| q.category.as_deref().is_none_or(|c| b.category == c))
            .filter(|b| q.author.as_deref().is_none_or(|a| b.author.contains(a)))
            .filter(|b| q.min_rating.is_none_or(|r| b.rating >= r))
            .filter(|b| query.as_deref().is_none_or(|s| b.matches_query(s)))
            .collect();

        matches.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        let result_count = matches.len();
        matches.truncate(MAX_BOOKS);

        Ok(json!({
            "result_count": result_count,
            "books": matches
        }))
    }
}
