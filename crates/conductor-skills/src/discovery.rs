use crate::catalog::TableCatalog;
use async_trait::async_trait;
use conductor_a2a::{skill_ids, SkillDescriptor, SkillHandler, SkillOutcome};
use conductor_core::{ConductorError, ConductorResult, ParamType, Params, Schema};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

/// `discover-tables`: pick the catalog tables relevant to a question.
pub struct DiscoverTables {
    catalog: Arc<TableCatalog>,
}

impl DiscoverTables {
    /// Search `catalog` for relevant tables.
    pub fn new(catalog: Arc<TableCatalog>) -> Self {
        Self { catalog }
    }

    /// Card entry for `discover-tables`.
    pub fn descriptor() -> SkillDescriptor {
        SkillDescriptor::new(
            skill_ids::DISCOVER_TABLES,
            Schema::new()
                .field("question", ParamType::String, true, "The analytical question")
                .field("context", ParamType::Object, false, "Optional additional context"),
            Schema::new()
                .required("tables", ParamType::Array)
                .optional("explanation", ParamType::String)
                .optional("join_hints", ParamType::Array)
                .optional("schema_details", ParamType::Object),
        )
        .with_name("Discover Relevant Tables")
        .with_description("Find tables relevant to an analytical question")
        .with_examples(&[
            "What tables contain sales data?",
            "Where can I find customer information?",
            "Which tables have regional data?",
        ])
    }
}

#[async_trait]
impl SkillHandler for DiscoverTables {
    async fn handle(&self, input: Params) -> ConductorResult<SkillOutcome> {
        let question = input
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        if question.is_empty() {
            return Err(ConductorError::HandlerFailure("question is empty".to_string()));
        }

        let matched = self.catalog.matched_tables(question);
        let explanation = if matched.is_empty() {
            "No keyword matched; using the default table set"
        } else {
            "Tables identified by keyword match"
        };
        let tables = if matched.is_empty() {
            self.catalog.default_tables.clone()
        } else {
            matched
        };

        let names: Vec<&str> = tables.iter().map(String::as_str).collect();
        let schema_details: Map<String, Value> = names
            .iter()
            .filter_map(|name| self.catalog.table(name))
            .map(|table| (table.name.clone(), table.to_json()))
            .collect();
        info!(question = %question, tables = ?names, "Tables discovered");

        SkillOutcome::completed(json!({
            "tables": names,
            "explanation": explanation,
            "join_hints": self.catalog.join_hints(&names),
            "schema_details": schema_details,
        }))
    }
}

/// `get-table-schema`: schema details for named tables.
pub struct GetTableSchema {
    catalog: Arc<TableCatalog>,
}

impl GetTableSchema {
    /// Serve schemas from `catalog`.
    pub fn new(catalog: Arc<TableCatalog>) -> Self {
        Self { catalog }
    }

    /// Card entry for `get-table-schema`.
    pub fn descriptor() -> SkillDescriptor {
        SkillDescriptor::new(
            skill_ids::GET_TABLE_SCHEMA,
            Schema::new().field("tables", ParamType::Array, true, "Table names"),
            Schema::new().required("schemas", ParamType::Object),
        )
        .with_name("Get Table Schema")
        .with_description("Get detailed schema information for specific tables")
        .with_examples(&["Get schema for sales_transactions", "Show columns in products_catalog"])
    }
}

#[async_trait]
impl SkillHandler for GetTableSchema {
    async fn handle(&self, input: Params) -> ConductorResult<SkillOutcome> {
        let requested = input
            .get("tables")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut schemas = Map::new();
        for name in requested.iter().filter_map(Value::as_str) {
            let entry = match self.catalog.table(name) {
                Some(table) => {
                    let mut details = table.to_json();
                    details["ddl"] = Value::String(table.ddl());
                    details
                }
                None => json!({"error": format!("table {name} not found")}),
            };
            schemas.insert(name.to_string(), entry);
        }

        SkillOutcome::completed(json!({"schemas": schemas}))
    }
}
