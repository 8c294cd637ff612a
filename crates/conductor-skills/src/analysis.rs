use async_trait::async_trait;
use conductor_a2a::{skill_ids, SkillDescriptor, SkillHandler, SkillOutcome};
use conductor_core::{ConductorResult, ParamType, Params, Schema};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Summary statistics of one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    /// Numeric values seen.
    pub count: usize,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Sum of all values.
    pub sum: f64,
    /// Arithmetic mean.
    pub mean: f64,
}

/// Column names in first-seen order across all rows.
pub fn column_names(rows: &[Value]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows.iter().filter_map(Value::as_object) {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Stats for `column` if every non-null value in it is a number.
pub fn summarize_column(rows: &[Value], column: &str) -> Option<NumericSummary> {
    let mut values = Vec::new();
    for value in rows.iter().filter_map(|r| r.get(column)) {
        match value {
            Value::Null => {}
            Value::Number(n) => values.push(n.as_f64()?),
            _ => return None,
        }
    }
    if values.is_empty() {
        return None;
    }

    let sum: f64 = values.iter().sum();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(NumericSummary {
        count: values.len(),
        min,
        max,
        sum,
        mean: sum / values.len() as f64,
    })
}

/// `analyze-results`: descriptive statistics over query rows.
#[derive(Debug, Default)]
pub struct AnalyzeResults;

impl AnalyzeResults {
    /// Stateless handler.
    pub fn new() -> Self {
        Self
    }

    /// Card entry for `analyze-results`.
    pub fn descriptor() -> SkillDescriptor {
        SkillDescriptor::new(
            skill_ids::ANALYZE_RESULTS,
            Schema::new()
                .field("rows", ParamType::Array, true, "Result rows, one object per row")
                .field("question", ParamType::String, false, "Question the rows answer"),
            Schema::new()
                .required("row_count", ParamType::Integer)
                .required("columns", ParamType::Array)
                .required("numeric", ParamType::Object)
                .optional("summary", ParamType::String),
        )
        .with_name("Analyze Results")
        .with_description("Row count, columns and numeric statistics for a result set")
    }
}

#[async_trait]
impl SkillHandler for AnalyzeResults {
    async fn handle(&self, input: Params) -> ConductorResult<SkillOutcome> {
        let rows = input
            .get("rows")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let columns = column_names(rows);

        let numeric: Map<String, Value> = columns
            .iter()
            .filter_map(|c| summarize_column(rows, c).map(|s| (c.clone(), json!(s))))
            .collect();

        let mut summary = format!("{} rows, {} columns", rows.len(), columns.len());
        if let Some(question) = input.get("question").and_then(Value::as_str) {
            summary = format!("{summary} for \"{question}\"");
        }
        for (column, stats) in &numeric {
            summary.push_str(&format!(
                "; {column}: total {}, mean {:.2}",
                stats["sum"], stats["mean"].as_f64().unwrap_or_default()
            ));
        }

        SkillOutcome::completed(json!({
            "row_count": rows.len(),
            "columns": columns,
            "numeric": numeric,
            "summary": summary,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn rows() -> Vec<Value> {
        vec![
            json!({"region": "Northeast", "total_revenue": 120.0, "stores": 2}),
            json!({"region": "West", "total_revenue": 300.5, "stores": 3}),
            json!({"region": "Midwest", "total_revenue": null, "stores": 1}),
        ]
    }

    #[test]
    fn test_columns_in_first_seen_order() {
        let mut rows = rows();
        rows.push(json!({"extra": 1}));
        let columns = column_names(&rows);
        assert_eq!(columns.last().unwrap(), "extra");
        assert_eq!(columns.len(), 4);
    }

    #[test]
    fn test_numeric_summary_skips_nulls() {
        let stats = summarize_column(&rows(), "total_revenue").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 120.0);
        assert_eq!(stats.max, 300.5);
        assert_eq!(stats.sum, 420.5);
        assert_eq!(stats.mean, 210.25);
    }

    #[test]
    fn test_text_column_has_no_summary() {
        assert!(summarize_column(&rows(), "region").is_none());
        assert!(summarize_column(&rows(), "missing").is_none());
    }

    #[tokio::test]
    async fn test_handler_reports_counts_and_stats() {
        let mut input = Params::new();
        input.insert("rows".into(), Value::Array(rows()));
        input.insert("question".into(), json!("Which region sells most?"));

        let SkillOutcome::Completed(out) = AnalyzeResults::new().handle(input).await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(out["row_count"], json!(3));
        assert_eq!(out["numeric"]["stores"]["sum"], json!(6.0));
        assert!(out["numeric"].get("region").is_none());
        assert!(out["summary"].as_str().unwrap().contains("Which region sells most?"));
    }

    #[tokio::test]
    async fn test_empty_rows_are_fine() {
        let mut input = Params::new();
        input.insert("rows".into(), json!([]));
        let SkillOutcome::Completed(out) = AnalyzeResults::new().handle(input).await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(out["row_count"], json!(0));
        assert_eq!(out["numeric"], json!({}));
    }
}
