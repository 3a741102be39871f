//! Restaurant menu lookup.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Tool, ToolError, ToolResult, parse_args};

const BUILTIN_MENU: &str = include_str!("../../../data/restaurant_menu.json");

/// Maximum dishes returned per query.
const MAX_DISHES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuCategory {
    ColdDishes,
    HotDishes,
    Staples,
    Soups,
    Drinks,
}

impl MenuCategory {
    pub const ALL: [MenuCategory; 5] = [
        MenuCategory::ColdDishes,
        MenuCategory::HotDishes,
        MenuCategory::Staples,
        MenuCategory::Soups,
        MenuCategory::Drinks,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpicyLevel {
    #[default]
    None,
    Mild,
    Medium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dish {
    pub name: String,
    pub price: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub spicy_level: SpicyLevel,
    #[serde(default)]
    pub recommended: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MenuSections {
    #[serde(default)]
    cold_dishes: Vec<Dish>,
    #[serde(default)]
    hot_dishes: Vec<Dish>,
    #[serde(default)]
    staples: Vec<Dish>,
    #[serde(default)]
    soups: Vec<Dish>,
    #[serde(default)]
    drinks: Vec<Dish>,
}

/// The restaurant and its dishes by category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuCatalog {
    pub restaurant: String,
    menu: MenuSections,
}

impl MenuCatalog {
    pub fn builtin() -> ToolResult<Self> {
        Self::from_json(BUILTIN_MENU)
    }

    pub fn from_json(json: &str) -> ToolResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ToolError::DataUnavailable(format!("invalid menu data: {e}")))
    }

    pub fn from_path(path: &Path) -> ToolResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ToolError::DataUnavailable(format!("menu file {} not readable: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn section(&self, category: MenuCategory) -> &[Dish] {
        match category {
            MenuCategory::ColdDishes => &self.menu.cold_dishes,
            MenuCategory::HotDishes => &self.menu.hot_dishes,
            MenuCategory::Staples => &self.menu.staples,
            MenuCategory::Soups => &self.menu.soups,
            MenuCategory::Drinks => &self.menu.drinks,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MenuQuery {
    #[serde(default)]
    category: Option<MenuCategory>,
    #[serde(default)]
    keyword: Option<String>,
    #[serde(default)]
    spicy_level: Option<SpicyLevel>,
    #[serde(default)]
    recommend_only: Option<bool>,
}

#[derive(Debug, Serialize)]
struct DishMatch<'a> {
    category: MenuCategory,
    #[serde(flatten)]
    dish: &'a Dish,
}

pub struct QueryMenuTool {
    catalog: MenuCatalog,
}

impl QueryMenuTool {
    pub fn new(catalog: MenuCatalog) -> Self {
        Self { catalog }
    }
}

impl Tool for QueryMenuTool {
    fn name(&self) -> &'static str {
        "query_menu"
    }

    fn description(&self) -> &'static str {
        "Look up the restaurant menu. Filter by category, keyword or spice level, or list only recommended dishes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "description": "Dish category",
                    "enum": ["cold_dishes", "hot_dishes", "staples", "soups", "drinks"]
                },
                "keyword": {
                    "type": "string",
                    "description": "Word to look for in the dish name or description"
                },
                "spicy_level": {
                    "type": "string",
                    "description": "Spice level",
                    "enum": ["none", "mild", "medium"]
                },
                "recommend_only": {
                    "type": "boolean",
                    "description": "Only list recommended dishes"
                }
            },
            "required": []
        })
    }

    fn call(&self, arguments: Value) -> ToolResult<Value> {
        let query: MenuQuery = parse_args(arguments)?;
        let keyword = query
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase);
        let recommend_only = query.recommend_only.unwrap_or(false);

        let categories: &[MenuCategory] = match &query.category {
            Some(category) => std::slice::from_ref(category),
            None => &MenuCategory::ALL,
        };

        let matches: Vec<DishMatch<'_>> = categories
            .iter()
            .flat_map(|&category| {
                self.catalog
                    .section(category)
                    .iter()
                    .map(move |dish| DishMatch { category, dish })
            })
            .filter(|m| !recommend_only || m.dish.recommended)
            .filter(|m| query.spicy_level.is_none_or(|level| m.dish.spicy_level == level))
            .filter(|m| {
                keyword.as_deref().is_none_or(|k| {
                    m.dish.name.to_lowercase().contains(k)
                        || m.dish.description.to_lowercase().contains(k)
                })
            })
            .collect();

        let result_count = matches.len();
        let dishes: Vec<&DishMatch<'_>> = matches.iter().take(MAX_DISHES).collect();

        Ok(json!({
            "restaurant": self.catalog.restaurant,
            "result_count": result_count,
            "dishes": dishes
        }))
    }
}
