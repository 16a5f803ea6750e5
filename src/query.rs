// Typed row filters for the managed backend.
// A Query renders to PostgREST query-string parameters for the REST backend and
// can be evaluated directly against JSON rows by the in-memory backend.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, Value),
    Lte(String, Value),
    // Case-insensitive match; `%` is the wildcard
    ILike(String, String),
    // Array column holds every listed value
    Contains(String, Vec<String>),
    In(String, Vec<Value>),
    // Any of the nested filters holds
    Or(Vec<Filter>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.columns = Some(columns.to_string());
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(column.to_string(), value.into()));
        self
    }

    pub fn ilike(mut self, column: &str, pattern: &str) -> Self {
        self.filters
            .push(Filter::ILike(column.to_string(), pattern.to_string()));
        self
    }

    pub fn contains(mut self, column: &str, values: &[String]) -> Self {
        self.filters
            .push(Filter::Contains(column.to_string(), values.to_vec()));
        self
    }

    pub fn in_list<V: Into<Value>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters.push(Filter::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn or(mut self, filters: Vec<Filter>) -> Self {
        self.filters.push(Filter::Or(filters));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    // Render as PostgREST query parameters, e.g. `price_per_night=gte.50`
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![(
            "select".to_string(),
            self.columns.clone().unwrap_or_else(|| "*".to_string()),
        )];

        for filter in &self.filters {
            match filter {
                Filter::Or(inner) => {
                    let parts: Vec<String> = inner.iter().filter_map(render_nested).collect();
                    params.push(("or".to_string(), format!("({})", parts.join(","))));
                }
                other => {
                    if let Some((column, expr)) = render_filter(other) {
                        params.push((column, expr));
                    }
                }
            }
        }

        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|filter| filter_matches(filter, row))
    }

    // Filter, order and limit a set of rows the way the backend would
    pub fn apply(&self, rows: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut selected: Vec<Value> = rows.into_iter().filter(|row| self.matches(row)).collect();

        if let Some(order) = &self.order {
            selected.sort_by(|a, b| {
                let ordering = compare_values(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn render_filter(filter: &Filter) -> Option<(String, String)> {
    let rendered = match filter {
        Filter::Eq(column, value) => (column.clone(), format!("eq.{}", render_value(value))),
        Filter::Gte(column, value) => (column.clone(), format!("gte.{}", render_value(value))),
        Filter::Lte(column, value) => (column.clone(), format!("lte.{}", render_value(value))),
        Filter::ILike(column, pattern) => {
            (column.clone(), format!("ilike.{}", pattern.replace('%', "*")))
        }
        Filter::Contains(column, values) => {
            (column.clone(), format!("cs.{{{}}}", values.join(",")))
        }
        Filter::In(column, values) => {
            let values: Vec<String> = values.iter().map(render_value).collect();
            (column.clone(), format!("in.({})", values.join(",")))
        }
        Filter::Or(_) => return None,
    };
    Some(rendered)
}

// Inside `or=(...)` filters are written as `column.op.value`
fn render_nested(filter: &Filter) -> Option<String> {
    render_filter(filter).map(|(column, expr)| format!("{column}.{expr}"))
}

fn filter_matches(filter: &Filter, row: &Value) -> bool {
    let field = |column: &str| row.get(column).unwrap_or(&Value::Null);
    match filter {
        Filter::Eq(column, value) => compare_values(field(column), value) == Ordering::Equal,
        Filter::Gte(column, value) => {
            !field(column).is_null() && compare_values(field(column), value) != Ordering::Less
        }
        Filter::Lte(column, value) => {
            !field(column).is_null() && compare_values(field(column), value) != Ordering::Greater
        }
        Filter::ILike(column, pattern) => field(column)
            .as_str()
            .map_or(false, |text| like_match(&pattern.to_lowercase(), &text.to_lowercase())),
        Filter::Contains(column, values) => match field(column).as_array() {
            Some(items) => values
                .iter()
                .all(|wanted| items.iter().any(|item| item.as_str() == Some(wanted.as_str()))),
            None => values.is_empty(),
        },
        Filter::In(column, values) => values
            .iter()
            .any(|value| compare_values(field(column), value) == Ordering::Equal),
        Filter::Or(inner) => inner.iter().any(|f| filter_matches(f, row)),
    }
}

// `%` matches any run of characters; everything else is literal
fn like_match(pattern: &str, text: &str) -> bool {
    let pieces: Vec<&str> = pattern.split('%').collect();
    if pieces.len() == 1 {
        return pattern == text;
    }

    let first = pieces[0];
    let last = pieces[pieces.len() - 1];
    if !text.starts_with(first) || text.len() < first.len() + last.len() {
        return false;
    }

    let mut rest = &text[first.len()..];
    for piece in &pieces[1..pieces.len() - 1] {
        match rest.find(piece) {
            Some(idx) => rest = &rest[idx + piece.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

fn parse_instant(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

// Total order over JSON scalars: numbers numerically, timestamps by instant,
// other strings lexicographically, nulls last.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => match (parse_instant(x), parse_instant(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_params_rendering() {
        let query = Query::new()
            .ilike("location", "%lisbon%")
            .gte("price_per_night", 50)
            .lte("price_per_night", 200)
            .contains("amenities", &["wifi".to_string(), "pool".to_string()])
            .order("created_at", false)
            .limit(5);

        let params = query.to_params();
        assert_eq!(params[0], ("select".to_string(), "*".to_string()));
        assert!(params.contains(&("location".to_string(), "ilike.*lisbon*".to_string())));
        assert!(params.contains(&("price_per_night".to_string(), "gte.50".to_string())));
        assert!(params.contains(&("price_per_night".to_string(), "lte.200".to_string())));
        assert!(params.contains(&("amenities".to_string(), "cs.{wifi,pool}".to_string())));
        assert!(params.contains(&("order".to_string(), "created_at.desc".to_string())));
        assert!(params.contains(&("limit".to_string(), "5".to_string())));
    }

    #[test]
    fn test_or_and_in_rendering() {
        let query = Query::new()
            .or(vec![
                Filter::Eq("guest_id".to_string(), json!("p1")),
                Filter::Eq("host_id".to_string(), json!("p1")),
            ])
            .in_list("property_id", ["h1", "a2"]);

        let params = query.to_params();
        assert!(params.contains(&("or".to_string(), "(guest_id.eq.p1,host_id.eq.p1)".to_string())));
        assert!(params.contains(&("property_id".to_string(), "in.(h1,a2)".to_string())));
    }

    #[test_case("%lis%", "Lisbon, Portugal", true; "substring")]
    #[test_case("%LISBON%", "lisbon", true; "case insensitive")]
    #[test_case("lis%", "Old Lisbon", false; "anchored start")]
    #[test_case("%bon", "Lisbon", true; "anchored end")]
    #[test_case("%a%c%", "abc", true; "several pieces")]
    #[test_case("%porto%", "Lisbon", false; "no match")]
    fn test_ilike_matching(pattern: &str, location: &str, expected: bool) {
        let query = Query::new().ilike("location", pattern);
        assert_eq!(query.matches(&json!({ "location": location })), expected);
    }

    #[test]
    fn test_apply_filters_orders_and_limits() {
        let rows = vec![
            json!({"id": "a", "rating": 4.5, "amenities": ["wifi", "pool"]}),
            json!({"id": "b", "rating": 3.0, "amenities": ["wifi"]}),
            json!({"id": "c", "rating": 4.9, "amenities": ["wifi", "pool", "spa"]}),
            json!({"id": "d", "amenities": ["pool"]}),
        ];

        let query = Query::new()
            .gte("rating", 4)
            .contains("amenities", &["pool".to_string()])
            .order("rating", false)
            .limit(1);

        let result = query.apply(rows);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["id"], "c");
    }

    #[test]
    fn test_timestamps_compare_by_instant() {
        let a = json!("2024-06-01T10:00:00Z");
        let b = json!("2024-06-01T12:00:00+02:00");
        assert_eq!(compare_values(&a, &b), Ordering::Equal);
    }
}
