use crate::catalog::{Column, TableCatalog, TableInfo};
use crate::store::DataStore;
use async_trait::async_trait;
use conductor_a2a::{skill_ids, SkillDescriptor, SkillHandler, SkillOutcome};
use conductor_core::{ConductorError, ConductorResult, ParamType, Params, Schema};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

static GROUP_BY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:by|per|for each)\s+([a-z_]+)").ok());

const DEFAULT_ROW_LIMIT: usize = 100;

/// A generated query plus a short account of how it was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSql {
    /// Read-only query text.
    pub sql: String,
    /// How the query was built.
    pub explanation: String,
}

/// Turns a natural-language requirement into SQL over known tables.
///
/// `tables` is never empty and every entry exists in `catalog`.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(
        &self,
        requirement: &str,
        tables: &[&TableInfo],
        catalog: &TableCatalog,
    ) -> ConductorResult<GeneratedSql>;
}

/// Read-only guard: a single `SELECT` or `WITH` statement.
pub fn is_read_only(sql: &str) -> bool {
    let statement = sql.trim().trim_end_matches(';').trim();
    if statement.contains(';') {
        return false;
    }
    let upper = statement.to_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH")
}

/// Deterministic generator built from a few query shapes.
///
/// The first table drives the query; other tables are joined in when the
/// catalog relates them. A `by <column>` phrase becomes a `GROUP BY`, and a
/// numeric column named in the requirement is summed.
#[derive(Debug, Clone)]
pub struct TemplateSqlGenerator {
    row_limit: usize,
}

impl Default for TemplateSqlGenerator {
    fn default() -> Self {
        Self {
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }
}

impl TemplateSqlGenerator {
    /// Generator with the default row limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on rows for unaggregated queries.
    pub fn with_row_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = row_limit.max(1);
        self
    }

    fn group_column<'a>(requirement: &str, tables: &[&'a TableInfo]) -> Option<(&'a str, &'a Column)> {
        let word = GROUP_BY.as_ref()?.captures(requirement)?.get(1)?.as_str();
        let word = word.strip_suffix('s').unwrap_or(word);
        let named = format!("{word}_name");
        let prefixed = format!("{word}_");

        // Exact name, then `<word>_name`, then any text column prefixed by the word.
        let matches = |c: &Column, pass: u8| match pass {
            0 => c.name == word,
            1 => c.name == named,
            _ => c.name.starts_with(&prefixed) && !c.is_numeric(),
        };
        for pass in 0..3 {
            for table in tables {
                if let Some(col) = table.columns.iter().find(|c| matches(c, pass)) {
                    return Some((table.name.as_str(), col));
                }
            }
        }
        None
    }

    fn measure_column<'a>(requirement: &str, tables: &[&'a TableInfo]) -> Option<(&'a str, &'a Column)> {
        let mentions = |name: &str| {
            requirement.contains(name) || requirement.contains(&name.replace('_', " "))
        };
        let synonym = if requirement.contains("sales") {
            Some("revenue")
        } else if requirement.contains("units") {
            Some("quantity")
        } else {
            None
        };

        tables.iter().find_map(|table| {
            table
                .columns
                .iter()
                .filter(|c| c.is_numeric() && !c.primary_key && !c.name.ends_with("_id"))
                .find(|c| mentions(&c.name) || synonym == Some(c.name.as_str()))
                .map(|c| (table.name.as_str(), c))
        })
    }
}

#[async_trait]
impl SqlGenerator for TemplateSqlGenerator {
    async fn generate(
        &self,
        requirement: &str,
        tables: &[&TableInfo],
        catalog: &TableCatalog,
    ) -> ConductorResult<GeneratedSql> {
        let Some(&base) = tables.first() else {
            return Err(ConductorError::Validation("no tables to query".to_string()));
        };
        let requirement = requirement.to_lowercase();

        let mut joined: Vec<&TableInfo> = vec![base];
        let mut from = base.name.clone();
        for &table in &tables[1..] {
            let link = joined.iter().find_map(|j| {
                catalog
                    .relationships_between(&[j.name.as_str(), table.name.as_str()])
                    .into_iter()
                    .next()
            });
            if let Some(rel) = link {
                from.push_str(&format!(" JOIN {} ON {} = {}", table.name, rel.from, rel.to));
                joined.push(table);
            } else {
                debug!(table = %table.name, "No relationship to joined tables, left out");
            }
        }

        let group = Self::group_column(&requirement, &joined);
        let measure = Self::measure_column(&requirement, &joined);
        let limit = self.row_limit;

        let (sql, shape) = match (group, measure) {
            (Some((gt, g)), Some((mt, m))) => (
                format!(
                    "SELECT {gt}.{g}, SUM({mt}.{m}) AS total_{m} FROM {from} GROUP BY {gt}.{g} ORDER BY total_{m} DESC LIMIT {limit}",
                    g = g.name,
                    m = m.name
                ),
                format!("sum of {} per {}", m.name, g.name),
            ),
            (Some((gt, g)), None) => (
                format!(
                    "SELECT {gt}.{g}, COUNT(*) AS row_count FROM {from} GROUP BY {gt}.{g} ORDER BY row_count DESC LIMIT {limit}",
                    g = g.name
                ),
                format!("row count per {}", g.name),
            ),
            (None, Some((mt, m))) => (
                format!(
                    "SELECT SUM({mt}.{m}) AS total_{m}, COUNT(*) AS row_count FROM {from}",
                    m = m.name
                ),
                format!("total {}", m.name),
            ),
            (None, None) => (
                format!("SELECT * FROM {} LIMIT {limit}", base.name),
                "sample rows".to_string(),
            ),
        };

        let names: Vec<&str> = joined.iter().map(|t| t.name.as_str()).collect();
        Ok(GeneratedSql {
            sql,
            explanation: format!("{shape} over {}", names.join(", ")),
        })
    }
}

/// `text-to-sql`: generate SQL for a requirement, optionally running it.
pub struct TextToSql {
    catalog: Arc<TableCatalog>,
    generator: Arc<dyn SqlGenerator>,
    store: Option<Arc<dyn DataStore>>,
}

impl TextToSql {
    /// Generate over `catalog` with `generator`, without executing.
    pub fn new(catalog: Arc<TableCatalog>, generator: Arc<dyn SqlGenerator>) -> Self {
        Self {
            catalog,
            generator,
            store: None,
        }
    }

    /// Enable `execute: true` requests.
    pub fn with_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Card entry for `text-to-sql`.
    pub fn descriptor() -> SkillDescriptor {
        SkillDescriptor::new(
            skill_ids::TEXT_TO_SQL,
            Schema::new()
                .field("requirement", ParamType::String, true, "What the query should answer")
                .field("tables", ParamType::Array, false, "Tables to query")
                .field("execute", ParamType::Boolean, false, "Run the query and return rows"),
            Schema::new()
                .required("sql", ParamType::String)
                .required("tables", ParamType::Array)
                .optional("explanation", ParamType::String)
                .optional("rows", ParamType::Array),
        )
        .with_name("Text to SQL")
        .with_description("Generate a read-only SQL query for a requirement and optionally run it")
        .with_examples(&["Total revenue by region", "Top products by units sold"])
    }

    fn known_tables(&self, input: &Params) -> Vec<String> {
        input
            .get("tables")
            .and_then(Value::as_array)
            .map(|tables| {
                tables
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|t| self.catalog.contains(t))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SkillHandler for TextToSql {
    async fn handle(&self, input: Params) -> ConductorResult<SkillOutcome> {
        let requirement = input
            .get("requirement")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if requirement.is_empty() {
            return Err(ConductorError::HandlerFailure("requirement is empty".to_string()));
        }

        let mut table_names = self.known_tables(&input);
        if table_names.is_empty() {
            table_names = self.catalog.matched_tables(&requirement);
        }
        if table_names.is_empty() {
            return Ok(SkillOutcome::input_required(
                format!(
                    "Which tables should the query use? Known tables: {}",
                    self.catalog.names().join(", ")
                ),
                &["tables"],
            ));
        }

        let tables: Vec<&TableInfo> = table_names
            .iter()
            .filter_map(|t| self.catalog.table(t))
            .collect();
        let generated = self
            .generator
            .generate(&requirement, &tables, &self.catalog)
            .await?;
        if !is_read_only(&generated.sql) {
            return Err(ConductorError::HandlerFailure(format!(
                "generated query is not read-only: {}",
                generated.sql
            )));
        }
        info!(sql = %generated.sql, "SQL generated");

        let mut output = json!({
            "sql": generated.sql,
            "explanation": generated.explanation,
            "tables": table_names,
        });

        if input.get("execute").and_then(Value::as_bool).unwrap_or(false) {
            let store = self.store.as_ref().ok_or_else(|| {
                ConductorError::HandlerFailure("execution requested but no data store is configured".to_string())
            })?;
            let rows = store.execute(&generated.sql).await?;
            output["row_count"] = json!(rows.len());
            output["rows"] = json!(rows);
        }

        SkillOutcome::completed(output)
    }
}

/// `validate-sql`: read-only guard plus, with a store, an `EXPLAIN` dry run.
pub struct ValidateSql {
    store: Option<Arc<dyn DataStore>>,
}

impl ValidateSql {
    /// Validate against `store` when one is given.
    pub fn new(store: Option<Arc<dyn DataStore>>) -> Self {
        Self { store }
    }

    /// Card entry for `validate-sql`.
    pub fn descriptor() -> SkillDescriptor {
        SkillDescriptor::new(
            skill_ids::VALIDATE_SQL,
            Schema::new().required("sql", ParamType::String),
            Schema::new()
                .required("valid", ParamType::Boolean)
                .optional("error", ParamType::String),
        )
        .with_name("Validate SQL")
        .with_description("Check that a query is read-only and compiles against the data store")
        .with_examples(&["SELECT * FROM sales_transactions", "SELECT revenue FROM invalid_table"])
    }
}

#[async_trait]
impl SkillHandler for ValidateSql {
    async fn handle(&self, input: Params) -> ConductorResult<SkillOutcome> {
        let sql = input.get("sql").and_then(Value::as_str).unwrap_or_default();

        if !is_read_only(sql) {
            return SkillOutcome::completed(json!({
                "valid": false,
                "error": "Query must be a single SELECT or WITH statement",
            }));
        }

        let Some(store) = &self.store else {
            return SkillOutcome::completed(json!({"valid": true, "checked_against_store": false}));
        };
        match store.explain(sql).await {
            Ok(()) => SkillOutcome::completed(json!({"valid": true, "checked_against_store": true})),
            Err(e) => SkillOutcome::completed(json!({
                "valid": false,
                "error": e.to_string(),
                "checked_against_store": true,
            })),
        }
    }
}
