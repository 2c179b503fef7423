//! Typed query DSL (spec.md §4.7): callers build a `Query` tree instead of
//! hand-assembling the store's JSON query language, so a handler can't
//! produce a malformed query body.

use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub enum Query {
    Term { field: String, value: Value },
    Range { field: String, gte: Option<Value>, lte: Option<Value> },
    Prefix { field: String, prefix: String },
    Exists { field: String },
    Bool { must: Vec<Query>, filter: Vec<Query>, must_not: Vec<Query>, should: Vec<Query> },
    MatchAll,
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Term { field: field.into(), value: value.into() }
    }

    pub fn range(field: impl Into<String>, gte: Option<Value>, lte: Option<Value>) -> Self {
        Query::Range { field: field.into(), gte, lte }
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Query::Prefix { field: field.into(), prefix: prefix.into() }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Query::Exists { field: field.into() }
    }

    pub fn bool_query() -> BoolQueryBuilder {
        BoolQueryBuilder::default()
    }

    /// Serialize to the store's JSON query-language shape, as documented by
    /// the Query DSL (spec.md §4.7: bool/filter/term/range/prefix/exists).
    pub fn to_json(&self) -> Value {
        match self {
            Query::Term { field, value } => json!({ "term": { field: value } }),
            Query::Range { field, gte, lte } => {
                let mut bounds = serde_json::Map::new();
                if let Some(gte) = gte {
                    bounds.insert("gte".to_string(), gte.clone());
                }
                if let Some(lte) = lte {
                    bounds.insert("lte".to_string(), lte.clone());
                }
                json!({ "range": { field: Value::Object(bounds) } })
            }
            Query::Prefix { field, prefix } => json!({ "prefix": { field: prefix } }),
            Query::Exists { field } => json!({ "exists": { "field": field } }),
            Query::Bool { must, filter, must_not, should } => json!({
                "bool": {
                    "must": must.iter().map(Query::to_json).collect::<Vec<_>>(),
                    "filter": filter.iter().map(Query::to_json).collect::<Vec<_>>(),
                    "must_not": must_not.iter().map(Query::to_json).collect::<Vec<_>>(),
                    "should": should.iter().map(Query::to_json).collect::<Vec<_>>(),
                }
            }),
            Query::MatchAll => json!({ "match_all": {} }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoolQueryBuilder {
    must: Vec<Query>,
    filter: Vec<Query>,
    must_not: Vec<Query>,
    should: Vec<Query>,
}

impl BoolQueryBuilder {
    pub fn must(mut self, q: Query) -> Self {
        self.must.push(q);
        self
    }

    pub fn filter(mut self, q: Query) -> Self {
        self.filter.push(q);
        self
    }

    pub fn must_not(mut self, q: Query) -> Self {
        self.must_not.push(q);
        self
    }

    pub fn should(mut self, q: Query) -> Self {
        self.should.push(q);
        self
    }

    pub fn build(self) -> Query {
        Query::Bool {
            must: self.must,
            filter: self.filter,
            must_not: self.must_not,
            should: self.should,
        }
    }
}

/// An aggregation spec (spec.md §4.7 `aggregate`): a named terms/date
/// histogram aggregation, the only two shapes the engine's optimizer
/// currently converts queries into (spec.md §4.8 step 2).
#[derive(Debug, Clone)]
pub enum AggSpec {
    Terms { name: String, field: String, size: u32 },
    DateHistogram { name: String, field: String, calendar_interval: String },
}

impl AggSpec {
    pub fn to_json(&self) -> Value {
        match self {
            AggSpec::Terms { name, field, size } => json!({
                name: { "terms": { "field": field, "size": size } }
            }),
            AggSpec::DateHistogram { name, field, calendar_interval } => json!({
                name: { "date_histogram": { "field": field, "calendar_interval": calendar_interval } }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_query_serializes_to_store_shape() {
        let q = Query::term("category", "bruteforce");
        assert_eq!(q.to_json(), json!({ "term": { "category": "bruteforce" } }));
    }

    #[test]
    fn range_query_omits_absent_bound() {
        let q = Query::range("timestamp", Some(json!("2026-01-01")), None);
        assert_eq!(q.to_json(), json!({ "range": { "timestamp": { "gte": "2026-01-01" } } }));
    }

    #[test]
    fn bool_query_nests_each_clause_list() {
        let q = Query::bool_query()
            .filter(Query::exists("source_ip"))
            .must_not(Query::term("category", "benign"))
            .build();
        let json = q.to_json();
        assert_eq!(json["bool"]["filter"].as_array().unwrap().len(), 1);
        assert_eq!(json["bool"]["must_not"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn terms_agg_serializes_with_name_as_key() {
        let agg = AggSpec::Terms { name: "top_attackers".into(), field: "source_ip".into(), size: 10 };
        assert_eq!(
            agg.to_json(),
            json!({ "top_attackers": { "terms": { "field": "source_ip", "size": 10 } } })
        );
    }
}
