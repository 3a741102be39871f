//! Integration tests for the tool dispatcher
//!
//! These tests verify:
//! - Result contracts of the standard tools through `dispatch`
//! - Loading custom menu and book catalogues from disk
//! - Structured errors for unknown tools and bad arguments

use std::fs;

use serde_json::json;
use tempfile::TempDir;

use waav_duplex::core::tools::{END_CONVERSATION, ToolDispatcher};

#[test]
fn test_weather_contract_for_beijing() {
    let dispatcher = ToolDispatcher::standard().unwrap();
    for _ in 0..50 {
        let outcome = dispatcher.dispatch("get_weather", r#"{"location":"Beijing"}"#);
        assert!(!outcome.is_error);
        assert!(!outcome.terminates);

        let out = &outcome.output;
        assert_eq!(out["location"], "Beijing");
        assert_eq!(out["date"], "today");
        let high = out["temperature"].as_i64().unwrap();
        let low = out["temperature_low"].as_i64().unwrap();
        let humidity = out["humidity"].as_i64().unwrap();
        let aqi = out["aqi"].as_i64().unwrap();
        assert!((15..=30).contains(&high));
        assert!((10..=20).contains(&low));
        assert!((40..=80).contains(&humidity));
        assert!((30..=150).contains(&aqi));
        let condition = out["condition"].as_str().unwrap();
        assert!(["sunny", "cloudy", "overcast", "light_rain"].contains(&condition));
    }
}

#[test]
fn test_menu_query_builtin_catalog() {
    let dispatcher = ToolDispatcher::standard().unwrap();
    let outcome = dispatcher.dispatch("query_menu", r#"{"recommend_only":true}"#);
    assert!(!outcome.is_error);
    assert_eq!(outcome.output["restaurant"], "Dragon Phoenix House");
    let dishes = outcome.output["dishes"].as_array().unwrap();
    assert!(!dishes.is_empty());
    assert!(dishes.iter().all(|d| d["recommended"] == true));
}

#[test]
fn test_custom_catalogs_from_disk() {
    let dir = TempDir::new().unwrap();
    let menu_path = dir.path().join("menu.json");
    let books_path = dir.path().join("books.json");
    fs::write(
        &menu_path,
        json!({
            "restaurant": "Test Kitchen",
            "menu": {
                "soups": [
                    {"name": "Tomato Egg Soup", "price": 12, "spicy_level": "none", "recommended": true}
                ]
            }
        })
        .to_string(),
    )
    .unwrap();
    fs::write(
        &books_path,
        json!({
            "books": [
                {"title": "Rust in Action", "author": "Tim McNamara", "category": "programming",
                 "year": 2021, "rating": 8.1, "pages": 456, "keywords": ["systems"]},
                {"title": "Old Book", "author": "Someone", "category": "history",
                 "year": 1901, "rating": 5.0, "pages": 100}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let dispatcher =
        ToolDispatcher::with_catalogs(Some(&menu_path), Some(&books_path)).unwrap();

    let menu = dispatcher.dispatch("query_menu", r#"{"category":"soups"}"#);
    assert_eq!(menu.output["restaurant"], "Test Kitchen");
    assert_eq!(menu.output["result_count"], 1);
    assert_eq!(menu.output["dishes"][0]["name"], "Tomato Egg Soup");
    assert_eq!(menu.output["dishes"][0]["category"], "soups");

    let books = dispatcher.dispatch("search_books", r#"{"query":"systems"}"#);
    assert_eq!(books.output["result_count"], 1);
    assert_eq!(books.output["books"][0]["title"], "Rust in Action");

    let rated = dispatcher.dispatch("search_books", r#"{"min_rating":8.0}"#);
    assert_eq!(rated.output["result_count"], 1);
}

#[test]
fn test_malformed_catalog_is_rejected() {
    let dir = TempDir::new().unwrap();
    let books_path = dir.path().join("books.json");
    fs::write(&books_path, "{\"books\": [ {\"title\": 1} ]}").unwrap();
    assert!(ToolDispatcher::with_catalogs(None, Some(&books_path)).is_err());
}

#[test]
fn test_end_conversation_terminates() {
    let dispatcher = ToolDispatcher::standard().unwrap();
    let outcome = dispatcher.dispatch(END_CONVERSATION, "{}");
    assert!(outcome.terminates);
    assert!(!outcome.is_error);
    assert_eq!(outcome.output["status"], "conversation_ended");
}

#[test]
fn test_errors_are_json_objects() {
    let dispatcher = ToolDispatcher::standard().unwrap();

    let unknown = dispatcher.dispatch("order_pizza", "{}");
    assert!(unknown.is_error);
    let parsed: serde_json::Value = serde_json::from_str(&unknown.output_json()).unwrap();
    assert_eq!(parsed["error"], "unknown function: order_pizza");

    let bad = dispatcher.dispatch("search_books", r#"{"min_rating": 42}"#);
    assert!(bad.is_error);
    assert!(!bad.terminates);
}
