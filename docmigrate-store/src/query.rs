use serde_json::{Map, Value};

/// Primary key field of every document.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    In(Vec<Value>),
}

impl Condition {
    fn matches(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Condition::Eq(expected), Some(value)) => contains(value, expected),
            (Condition::In(candidates), Some(value)) => {
                candidates.iter().any(|candidate| contains(value, candidate))
            }
            _ => false,
        }
    }
}

/// JSONB containment (`@>`) of a field value: numbers compare by value,
/// objects match on a subset of keys and arrays on a subset of elements.
fn contains(value: &Value, expected: &Value) -> bool {
    match (value, expected) {
        (Value::Number(value), Value::Number(expected)) => {
            match (value.as_i64(), expected.as_i64()) {
                (Some(value), Some(expected)) => value == expected,
                _ => match (value.as_u64(), expected.as_u64()) {
                    (Some(value), Some(expected)) => value == expected,
                    _ => value.as_f64() == expected.as_f64(),
                },
            }
        }
        (Value::Object(value), Value::Object(expected)) => expected
            .iter()
            .all(|(field, expected)| value.get(field).is_some_and(|value| contains(value, expected))),
        (Value::Array(values), Value::Array(expected)) => expected
            .iter()
            .all(|expected| values.iter().any(|value| contains(value, expected))),
        (value, expected) => value == expected,
    }
}

/// Conjunction of top-level field conditions. An empty filter matches every
/// document of a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Vec<(String, Condition)>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        let id: String = id.into();
        Self::new().eq(ID_FIELD, id)
    }

    /// Matches documents whose `field` contains `value`: equal scalars (`1`
    /// and `1.0` are equal), objects with at least the given keys, arrays
    /// with at least the given elements.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((field.into(), Condition::Eq(value.into())));
        self
    }

    pub fn is_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.0.push((field.into(), Condition::In(values)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.0.iter().map(|(field, condition)| (field.as_str(), condition))
    }

    pub fn matches(&self, document: &Value) -> bool {
        let Some(document) = document.as_object() else {
            return false;
        };

        self.0
            .iter()
            .all(|(field, condition)| condition.matches(document.get(field)))
    }

    /// Expands the filter into JSON objects; a document matches when it
    /// contains any one of them. `$in` conditions multiply the alternatives.
    pub fn containments(&self) -> Vec<Value> {
        let mut alternatives = vec![Map::new()];

        for (field, condition) in self.0.iter() {
            let values = match condition {
                Condition::Eq(value) => vec![value.clone()],
                Condition::In(values) => values.clone(),
            };

            alternatives = alternatives
                .into_iter()
                .flat_map(|alternative| {
                    values.iter().map(move |value| {
                        let mut alternative = alternative.clone();
                        alternative.insert(field.to_owned(), value.clone());
                        alternative
                    })
                })
                .collect();
        }

        alternatives.into_iter().map(Value::Object).collect()
    }
}

/// Field-level modification applied by [`crate::Store::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Map<String, Value>,
    unset: Vec<String>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    pub fn fields_to_set(&self) -> &Map<String, Value> {
        &self.set
    }

    pub fn fields_to_unset(&self) -> &[String] {
        &self.unset
    }

    pub fn apply(&self, document: &mut Map<String, Value>) {
        for field in self.unset.iter() {
            if field != ID_FIELD {
                document.remove(field);
            }
        }

        for (field, value) in self.set.iter() {
            if field != ID_FIELD {
                document.insert(field.to_owned(), value.clone());
            }
        }
    }
}
