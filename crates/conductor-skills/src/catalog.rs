use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const RETAIL_CATALOG: &str = include_str!("../catalog/retail.toml");

/// One column of a catalog table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared SQL type, e.g. `INTEGER`.
    #[serde(rename = "type")]
    pub sql_type: String,
    /// What the column holds.
    #[serde(default)]
    pub description: String,
    /// Part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
}

impl Column {
    /// Whether aggregates like `SUM` make sense on this column.
    pub fn is_numeric(&self) -> bool {
        matches!(self.sql_type.as_str(), "INTEGER" | "REAL")
    }
}

/// A table described in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name as used in SQL.
    pub name: String,
    /// What the table holds.
    #[serde(default)]
    pub description: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Approximate size, as documented.
    #[serde(default)]
    pub row_count: Option<String>,
    /// How often the table is refreshed.
    #[serde(default)]
    pub update_frequency: Option<String>,
}

impl TableInfo {
    /// Column `name`, if the table has it.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// `CREATE TABLE` statement for this table.
    pub fn ddl(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.primary_key {
                    format!("  {} {} PRIMARY KEY", c.name, c.sql_type)
                } else {
                    format!("  {} {}", c.name, c.sql_type)
                }
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.name,
            columns.join(",\n")
        )
    }

    /// Schema details as returned by the discovery skills.
    pub fn to_json(&self) -> Value {
        json!({
            "description": self.description,
            "columns": self.columns,
            "row_count": self.row_count,
            "update_frequency": self.update_frequency,
        })
    }
}

/// Keywords that pull a set of tables into a question's table list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    /// Words that select the rule, matched case-insensitively.
    pub keywords: Vec<String>,
    /// Tables the rule contributes.
    pub tables: Vec<String>,
}

/// A foreign-key style link, `table.column` on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// `table.column` on the referencing side.
    pub from: String,
    /// `table.column` on the referenced side.
    pub to: String,
    /// Join cardinality, e.g. `many-to-one`.
    #[serde(default)]
    pub kind: String,
}

impl Relationship {
    fn split(end: &str) -> (&str, &str) {
        end.split_once('.').unwrap_or((end, ""))
    }

    /// Table half of `from`.
    pub fn from_table(&self) -> &str {
        Self::split(&self.from).0
    }

    /// Table half of `to`.
    pub fn to_table(&self) -> &str {
        Self::split(&self.to).0
    }

    /// Both tables belong to `tables`.
    pub fn connects(&self, tables: &[&str]) -> bool {
        tables.contains(&self.from_table()) && tables.contains(&self.to_table())
    }
}

/// Static description of the tables a data store exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCatalog {
    /// Catalog name.
    pub catalog: String,
    /// Schema name.
    pub schema: String,
    /// Fallback when no keyword matches a question.
    #[serde(default)]
    pub default_tables: Vec<String>,
    /// Keyword rules for table discovery.
    #[serde(default)]
    pub rules: Vec<KeywordRule>,
    /// Known join paths.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Every table the store exposes.
    pub tables: Vec<TableInfo>,
}

impl TableCatalog {
    /// Parse a catalog from TOML and check that every referenced table exists.
    pub fn from_toml(content: &str) -> ConductorResult<Self> {
        let catalog: Self = toml::from_str(content)
            .map_err(|e| ConductorError::Config(format!("Invalid table catalog: {e}")))?;
        catalog.check_references()?;
        Ok(catalog)
    }

    /// The retail analytics catalog compiled into the crate.
    pub fn retail() -> ConductorResult<Self> {
        Self::from_toml(RETAIL_CATALOG)
    }

    fn check_references(&self) -> ConductorResult<()> {
        let referenced = self
            .default_tables
            .iter()
            .map(String::as_str)
            .chain(self.rules.iter().flat_map(|r| r.tables.iter().map(String::as_str)))
            .chain(
                self.relationships
                    .iter()
                    .flat_map(|r| [r.from_table(), r.to_table()]),
            );
        for name in referenced {
            if !self.contains(name) {
                return Err(ConductorError::Config(format!(
                    "catalog references unknown table '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Table `name`, if catalogued.
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Whether table `name` is catalogued.
    pub fn contains(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Table names in catalog order.
    pub fn names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Tables whose keywords appear in `question`, in rule order, deduplicated.
    /// Empty when nothing matches.
    pub fn matched_tables(&self, question: &str) -> Vec<String> {
        let lower = question.to_lowercase();
        let mut tables: Vec<String> = Vec::new();
        for rule in &self.rules {
            if rule.keywords.iter().any(|k| lower.contains(k.as_str())) {
                for table in &rule.tables {
                    if !tables.contains(table) {
                        tables.push(table.clone());
                    }
                }
            }
        }
        tables
    }

    /// Like [`matched_tables`](Self::matched_tables), falling back to the
    /// default table set.
    pub fn tables_for(&self, question: &str) -> Vec<String> {
        let matched = self.matched_tables(question);
        if matched.is_empty() {
            self.default_tables.clone()
        } else {
            matched
        }
    }

    /// Relationships linking two tables of `tables`.
    pub fn relationships_between(&self, tables: &[&str]) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|r| r.connects(tables))
            .collect()
    }

    /// Human-readable join hints, e.g. `sales_transactions.store_id = stores_locations.store_id`.
    pub fn join_hints(&self, tables: &[&str]) -> Vec<String> {
        self.relationships_between(tables)
            .iter()
            .map(|r| format!("{} = {}", r.from, r.to))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retail_catalog_loads() {
        let catalog = TableCatalog::retail().unwrap();
        assert_eq!(catalog.catalog, "retail");
        assert_eq!(catalog.tables.len(), 8);
        assert_eq!(catalog.relationships.len(), 6);
        let sales = catalog.table("sales_transactions").unwrap();
        assert!(sales.column("revenue").unwrap().is_numeric());
        assert!(sales.column("transaction_id").unwrap().primary_key);
    }

    #[test]
    fn test_keyword_match_dedupes_in_rule_order() {
        let catalog = TableCatalog::retail().unwrap();
        let tables = catalog.matched_tables("Outdoor product revenue by region");
        assert_eq!(
            tables,
            vec!["sales_transactions", "stores_locations", "products_catalog"]
        );
    }

    #[test]
    fn test_unmatched_question_falls_back_to_defaults() {
        let catalog = TableCatalog::retail().unwrap();
        assert!(catalog.matched_tables("how are we doing").is_empty());
        assert_eq!(
            catalog.tables_for("how are we doing"),
            vec!["sales_transactions", "products_catalog", "stores_locations"]
        );
    }

    #[test]
    fn test_join_hints_only_cover_selected_tables() {
        let catalog = TableCatalog::retail().unwrap();
        let hints = catalog.join_hints(&["sales_transactions", "stores_locations"]);
        assert_eq!(
            hints,
            vec!["sales_transactions.store_id = stores_locations.store_id"]
        );
    }

    #[test]
    fn test_ddl_marks_primary_key() {
        let catalog = TableCatalog::retail().unwrap();
        let ddl = catalog.table("weather_data").unwrap().ddl();
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS weather_data"));
        assert!(ddl.contains("weather_id INTEGER PRIMARY KEY"));
    }

    #[test]
    fn test_unknown_table_reference_rejected() {
        let content = r#"
            catalog = "c"
            schema = "s"
            default_tables = ["missing"]
            tables = []
        "#;
        let err = TableCatalog::from_toml(content).unwrap_err();
        assert!(matches!(err, ConductorError::Config(_)));
    }
}
