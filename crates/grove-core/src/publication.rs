//! # Record Filters (Publications)
//!
//! A `RecordFilter` is a build-once read-side pipeline applied to a live
//! stream of record snapshots. Stages run in a fixed order:
//!
//! 1. filter predicate (sees each record and the subscription params)
//! 2. sort
//! 3. limit
//! 4. projection (`recordId` and `version` are always kept)
//!
//! Once built, a filter can be subscribed any number of times against
//! different sources. Children can be declared before `build` and are built
//! with their parent, but they do not contribute to `subscribe` output.

use crate::GroveError;
use crate::primitives::{RECORD_ID_FIELD, VERSION_FIELD};
use futures::stream::{BoxStream, StreamExt};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Record predicate of a filter.
pub type FilterFn = Arc<dyn Fn(&Value, &FilterArgs) -> bool + Send + Sync>;

/// Arguments passed to the filter predicate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterArgs {
    pub params: Value,
}

/// Sort key of a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// The frozen stages of a built filter.
#[derive(Clone, Default)]
struct Pipeline {
    filter: Option<FilterFn>,
    sort: Option<SortKey>,
    limit: Option<usize>,
    fields: Option<Vec<String>>,
}

/// Build-once filter/sort/limit/project pipeline.
pub struct RecordFilter {
    name: String,
    source: String,
    pipeline: Pipeline,
    children: Vec<RecordFilter>,
    built: bool,
}

impl fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordFilter")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("filter", &self.pipeline.filter.is_some())
            .field("sort", &self.pipeline.sort)
            .field("limit", &self.pipeline.limit)
            .field("fields", &self.pipeline.fields)
            .field("children", &self.children)
            .field("built", &self.built)
            .finish()
    }
}

/// Total order over JSON values: null < bool < number < string < array <
/// object. Arrays and objects compare equal among themselves.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

enum Numeric {
    Int(i128),
    Float(f64),
}

impl From<&Number> for Numeric {
    fn from(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            Self::Int(i.into())
        } else if let Some(u) = n.as_u64() {
            Self::Int(u.into())
        } else {
            Self::Float(n.as_f64().unwrap_or_default())
        }
    }
}

/// Exact numeric order: integers are never rounded through `f64`.
fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    match (Numeric::from(a), Numeric::from(b)) {
        (Numeric::Int(x), Numeric::Int(y)) => x.cmp(&y),
        (Numeric::Int(x), Numeric::Float(y)) => compare_int_float(x, y),
        (Numeric::Float(x), Numeric::Int(y)) => compare_int_float(y, x).reverse(),
        (Numeric::Float(x), Numeric::Float(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

fn compare_int_float(int: i128, float: f64) -> Ordering {
    // i128::MAX rounds up to 2^127; i128::MIN is exactly -2^127.
    if float >= i128::MAX as f64 {
        return Ordering::Less;
    }
    if float < i128::MIN as f64 {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    match int.cmp(&(whole as i128)) {
        Ordering::Equal => whole.partial_cmp(&float).unwrap_or(Ordering::Equal),
        unequal => unequal,
    }
}

impl Pipeline {
    fn apply(&self, items: Vec<Value>, args: &FilterArgs) -> Vec<Value> {
        let mut items: Vec<Value> = match &self.filter {
            Some(filter) => items.into_iter().filter(|item| filter(item, args)).collect(),
            None => items,
        };

        if let Some(key) = &self.sort {
            items.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&key.field).unwrap_or(&Value::Null),
                    b.get(&key.field).unwrap_or(&Value::Null),
                );
                if key.descending { ord.reverse() } else { ord }
            });
        }

        if let Some(limit) = self.limit {
            items.truncate(limit);
        }

        match &self.fields {
            Some(fields) => items.into_iter().map(|item| project(item, fields)).collect(),
            None => items,
        }
    }
}

fn project(item: Value, fields: &[String]) -> Value {
    let Value::Object(mut source) = item else {
        return item;
    };
    let mut out = Map::new();
    for key in [RECORD_ID_FIELD, VERSION_FIELD]
        .into_iter()
        .chain(fields.iter().map(String::as_str))
    {
        if let Some(value) = source.remove(key) {
            out.insert(key.to_string(), value);
        }
    }
    Value::Object(out)
}

impl RecordFilter {
    /// A filter over the named source. The filter is named after its source
    /// until `named` says otherwise.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            name: source.clone(),
            source,
            pipeline: Pipeline::default(),
            children: Vec::new(),
            built: false,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if self.frozen("named") {
            return self;
        }
        self.name = name.into();
        self
    }

    /// Whether the filter is built. Setters on a built filter are ignored
    /// with a warning.
    fn frozen(&self, setter: &str) -> bool {
        if self.built {
            tracing::warn!(filter = %self.name, setter, "record filter is built, setter ignored");
        }
        self.built
    }

    /// Keep records for which `predicate` holds.
    #[must_use]
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value, &FilterArgs) -> bool + Send + Sync + 'static,
    {
        if self.frozen("filter") {
            return self;
        }
        self.pipeline.filter = Some(Arc::new(predicate));
        self
    }

    /// Sort records by a field. Missing fields sort as null.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        if self.frozen("sort_by") {
            return self;
        }
        self.pipeline.sort = Some(SortKey {
            field: field.into(),
            descending,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        if self.frozen("limit") {
            return self;
        }
        self.pipeline.limit = Some(limit);
        self
    }

    /// Project records onto these fields (plus `recordId` and `version`).
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.frozen("fields") {
            return self;
        }
        self.pipeline.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_built(&self) -> bool {
        self.built
    }

    #[must_use]
    pub fn children(&self) -> &[RecordFilter] {
        &self.children
    }

    /// Declare a child publication. Fails once the filter is built.
    pub fn add_child(&mut self, child: RecordFilter) -> Result<(), GroveError> {
        if self.built {
            return Err(GroveError::FilterAlreadyBuilt(self.name.clone()));
        }
        self.children.push(child);
        Ok(())
    }

    /// Freeze the filter and its children. A second call fails.
    pub fn build(&mut self) -> Result<(), GroveError> {
        if self.built {
            return Err(GroveError::FilterAlreadyBuilt(self.name.clone()));
        }
        for child in &mut self.children {
            if !child.built {
                child.build()?;
            }
        }
        self.built = true;
        Ok(())
    }

    /// Run the pipeline once over a batch of records.
    pub fn apply(&self, items: Vec<Value>, params: Value) -> Result<Vec<Value>, GroveError> {
        if !self.built {
            return Err(GroveError::FilterNotBuilt(self.name.clone()));
        }
        Ok(self.pipeline.apply(items, &FilterArgs { params }))
    }

    /// Derive a live stream from the stream `source` returns for this
    /// filter's source name.
    pub fn subscribe<S>(&self, source: S, params: Value) -> Result<BoxStream<'static, Vec<Value>>, GroveError>
    where
        S: FnOnce(&str) -> BoxStream<'static, Vec<Value>>,
    {
        if !self.built {
            return Err(GroveError::FilterNotBuilt(self.name.clone()));
        }
        let pipeline = self.pipeline.clone();
        let args = FilterArgs { params };
        Ok(source(&self.source)
            .map(move |items| pipeline.apply(items, &args))
            .boxed())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    fn users() -> Vec<Value> {
        vec![
            json!({ "recordId": "u1", "version": 1, "name": "ann", "age": 41, "team": "a" }),
            json!({ "recordId": "u2", "version": 1, "name": "bob", "age": 23, "team": "b" }),
            json!({ "recordId": "u3", "version": 1, "name": "cy", "age": 35, "team": "a" }),
            json!({ "recordId": "u4", "version": 1, "name": "di" }),
        ]
    }

    #[test]
    fn build_twice_fails() {
        let mut filter = RecordFilter::new("users");
        filter.build().expect("first build");
        assert!(matches!(filter.build(), Err(GroveError::FilterAlreadyBuilt(_))));
    }

    #[test]
    fn add_child_after_build_fails() {
        let mut filter = RecordFilter::new("users");
        filter.add_child(RecordFilter::new("posts")).expect("before build");
        filter.build().expect("build");
        assert!(filter.children()[0].is_built());
        assert!(matches!(
            filter.add_child(RecordFilter::new("likes")),
            Err(GroveError::FilterAlreadyBuilt(_))
        ));
    }

    #[test]
    fn unbuilt_filter_cannot_subscribe() {
        let filter = RecordFilter::new("users");
        let result = filter.subscribe(|_| stream::empty().boxed(), Value::Null);
        assert!(matches!(result, Err(GroveError::FilterNotBuilt(_))));
    }

    #[test]
    fn setters_after_build_are_ignored() {
        let mut filter = RecordFilter::new("users").limit(2);
        filter.build().expect("build");
        let filter = filter.limit(10);
        let out = filter.apply(users(), Value::Null).expect("apply");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn stages_run_in_order() {
        let mut filter = RecordFilter::new("users")
            .filter(|item, args| item["team"] == args.params["team"])
            .sort_by("age", true)
            .limit(1)
            .fields(["name"]);
        filter.build().expect("build");

        let out = filter.apply(users(), json!({ "team": "a" })).expect("apply");
        assert_eq!(out, vec![json!({ "recordId": "u1", "version": 1, "name": "ann" })]);
    }

    #[test]
    fn missing_sort_fields_sort_first_ascending() {
        let mut filter = RecordFilter::new("users").sort_by("age", false).fields(["age"]);
        filter.build().expect("build");
        let out = filter.apply(users(), Value::Null).expect("apply");
        let ids: Vec<&str> = out.iter().map(|v| v["recordId"].as_str().expect("id")).collect();
        assert_eq!(ids, vec!["u4", "u2", "u3", "u1"]);
        assert!(out[0].get("age").is_none());
    }

    #[tokio::test]
    async fn subscribe_transforms_each_snapshot() {
        let mut filter = RecordFilter::new("users").filter(|item, _| item["age"].is_number());
        filter.build().expect("build");

        let mut requested = String::new();
        let mut live = filter
            .subscribe(
                |source| {
                    requested = source.to_string();
                    stream::iter(vec![users(), Vec::new()]).boxed()
                },
                Value::Null,
            )
            .expect("subscribe");
        assert_eq!(requested, "users");
        assert_eq!(live.next().await.expect("first").len(), 3);
        assert!(live.next().await.expect("second").is_empty());
        assert!(live.next().await.is_none());
    }

    #[test]
    fn mixed_numbers_compare_without_arithmetic() {
        assert_eq!(compare_values(&json!(1), &json!(1.5)), Ordering::Less);
        assert_eq!(compare_values(&json!(-2), &json!(3)), Ordering::Less);
        assert_eq!(compare_values(&json!("a"), &json!(1)), Ordering::Greater);
    }

    #[test]
    fn large_integers_are_not_rounded_against_floats() {
        let below = json!(9_007_199_254_740_992_i64);
        let float = json!(9_007_199_254_740_992.0_f64);
        let above = json!(9_007_199_254_740_993_i64);
        assert_eq!(compare_values(&below, &float), Ordering::Equal);
        assert_eq!(compare_values(&float, &above), Ordering::Less);
        assert_eq!(compare_values(&below, &above), Ordering::Less);
        assert_eq!(compare_values(&json!(u64::MAX), &json!(1e19)), Ordering::Greater);
        assert_eq!(compare_values(&json!(-3), &json!(-2.5)), Ordering::Less);
        assert_eq!(compare_values(&json!(-2), &json!(-2.5)), Ordering::Greater);
    }
}
