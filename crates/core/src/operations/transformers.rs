// Transformers - lazy row-stream stages
//
// A stage is applied inside a step named after it. Only building the stream
// happens in that step; rows are pulled later by whoever consumes it.

use std::rc::Rc;

use crate::context::step;
use crate::domain::{Row, RowStream, Tuple, TupleStream, Value};
use crate::error::{AppError, Result};
use crate::operations::casters::Caster;

/// Computes a column from the row as it was before the update
pub type DynamicValue = Rc<dyn Fn(&Row) -> Value>;

/// A named, reusable row-stream stage
#[derive(Clone)]
pub struct Transform {
    name: &'static str,
    apply: Rc<dyn Fn(RowStream) -> RowStream>,
}

impl Transform {
    pub fn new(name: &'static str, apply: impl Fn(RowStream) -> RowStream + 'static) -> Self {
        Self {
            name,
            apply: Rc::new(apply),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, rows: RowStream) -> Result<RowStream> {
        step(self.name, || Ok((self.apply)(rows)))
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Transform").field(&self.name).finish()
    }
}

fn map_rows(name: &'static str, f: impl Fn(Row) -> Result<Row> + 'static) -> Transform {
    let f = Rc::new(f);
    Transform::new(name, move |rows| {
        let f = Rc::clone(&f);
        Box::new(rows.map(move |row| row.and_then(|r| f(r))))
    })
}

/// Keep only the listed columns that are present
pub fn keep_keys(keys: &[&str]) -> Transform {
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    map_rows("keep_keys", move |mut row| {
        row.retain(|key, _| keys.contains(key));
        Ok(row)
    })
}

/// Convert the listed columns; other columns pass through
pub fn cast_values(casts: Vec<(&str, Caster)>) -> Transform {
    let casts: Vec<(String, Caster)> = casts
        .into_iter()
        .map(|(key, caster)| (key.to_string(), caster))
        .collect();
    map_rows("cast_values", move |mut row| {
        for (key, caster) in &casts {
            if let Some(value) = row.get_mut(key) {
                *value = caster(&*value).map_err(|e| match e {
                    AppError::Data(message) => AppError::Data(format!("column '{}': {}", key, message)),
                    other => other,
                })?;
            }
        }
        Ok(row)
    })
}

pub fn generic_map(f: impl Fn(Row) -> Result<Row> + 'static) -> Transform {
    map_rows("generic_map", f)
}

/// Overwrite or add columns with fixed values
pub fn update_with_static_values(values: Row) -> Transform {
    map_rows("update_with_static_values", move |mut row| {
        row.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(row)
    })
}

/// Overwrite or add columns computed from the incoming row
pub fn update_with_dynamic_values(values: Vec<(&str, DynamicValue)>) -> Transform {
    let values: Vec<(String, DynamicValue)> = values
        .into_iter()
        .map(|(key, f)| (key.to_string(), f))
        .collect();
    map_rows("update_with_dynamic_values", move |row| {
        let computed: Vec<(String, Value)> = values
            .iter()
            .map(|(key, f)| (key.clone(), f(&row)))
            .collect();
        let mut row = row;
        row.extend(computed);
        Ok(row)
    })
}

/// Drop rows matching every given column value
pub fn exclude_if_matching_static_values(values: Row) -> Transform {
    let values = Rc::new(values);
    Transform::new("exclude_if_matching_static_values", move |rows| {
        let values = Rc::clone(&values);
        Box::new(rows.filter(move |row| match row {
            Ok(row) => !values.iter().all(|(k, v)| row.get(k) == Some(v)),
            Err(_) => true,
        }))
    })
}

/// Reshape rows into tuples with a fixed column order
#[derive(Debug, Clone)]
pub struct TupleShape {
    columns: Rc<Vec<String>>,
}

pub fn dicts_to_tuples(columns: &[&str]) -> TupleShape {
    TupleShape {
        columns: Rc::new(columns.iter().map(|c| c.to_string()).collect()),
    }
}

impl TupleShape {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// A missing column is a `MissingKey` error
    pub fn to_tuple(&self, row: &Row) -> Result<Tuple> {
        self.columns
            .iter()
            .map(|column| {
                row.get(column)
                    .cloned()
                    .ok_or_else(|| AppError::MissingKey(column.clone()))
            })
            .collect()
    }

    pub fn apply(&self, rows: RowStream) -> Result<TupleStream> {
        step("dicts_to_tuples", || {
            let shape = self.clone();
            let tuples: TupleStream =
                Box::new(rows.map(move |row| row.and_then(|r| shape.to_tuple(&r))));
            Ok(tuples)
        })
    }
}

/// Pull the whole stream into memory
pub fn materialize(rows: RowStream) -> Result<Vec<Row>> {
    step("materialize", || rows.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{row, stream_rows};
    use crate::operations::casters::to_integer;

    fn sample() -> Vec<Row> {
        vec![
            row([("a", "1"), ("b", "x"), ("c", "keep")]),
            row([("a", "2"), ("b", "y"), ("c", "drop")]),
        ]
    }

    fn run(transform: &Transform, rows: Vec<Row>) -> Vec<Row> {
        materialize(transform.apply(stream_rows(rows)).unwrap()).unwrap()
    }

    #[test]
    fn test_keep_keys() {
        let out = run(&keep_keys(&["a", "missing"]), sample());
        assert_eq!(out, vec![row([("a", "1")]), row([("a", "2")])]);
    }

    #[test]
    fn test_cast_values_reports_column() {
        let out = run(&cast_values(vec![("a", to_integer())]), sample());
        assert_eq!(out[1]["a"], Value::Integer(2));
        assert_eq!(out[1]["b"], Value::text("y"));

        let bad = stream_rows(vec![row([("a", "one")])]);
        let err = materialize(cast_values(vec![("a", to_integer())]).apply(bad).unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("column 'a'"));
    }

    #[test]
    fn test_static_and_dynamic_updates() {
        let out = run(&update_with_static_values(row([("b", "z"), ("d", "new")])), sample());
        assert_eq!(out[0]["b"], Value::text("z"));
        assert_eq!(out[0]["d"], Value::text("new"));

        let doubled: DynamicValue = Rc::new(|r: &Row| {
            Value::text(format!("{}{}", r["a"], r["a"]))
        });
        let out = run(&update_with_dynamic_values(vec![("a", doubled)]), sample());
        assert_eq!(out[1]["a"], Value::text("22"));
    }

    #[test]
    fn test_exclude_if_matching_static_values() {
        let out = run(
            &exclude_if_matching_static_values(row([("a", "2"), ("c", "drop")])),
            sample(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["a"], Value::text("1"));

        let out = run(
            &exclude_if_matching_static_values(row([("a", "2"), ("c", "keep")])),
            sample(),
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_dicts_to_tuples() {
        let shape = dicts_to_tuples(&["c", "a"]);
        let tuples: Vec<Tuple> = shape
            .apply(stream_rows(sample()))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(tuples[0], vec![Value::text("keep"), Value::text("1")]);

        let err = dicts_to_tuples(&["zzz"]).to_tuple(&sample()[0]).unwrap_err();
        assert!(matches!(err, AppError::MissingKey(k) if k == "zzz"));
    }

    #[test]
    fn test_transforms_are_idempotent() {
        let transform = generic_map(|mut r| {
            r.insert("seen".to_string(), Value::Boolean(true));
            Ok(r)
        });
        let first = run(&transform, sample());
        let second = run(&transform, sample());
        assert_eq!(first, second);
    }
}
