#![forbid(unsafe_code)]

use crate::error::QueryError;
use crate::schema::Table;

/// A stored field value. The schema only ever holds integers and text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Int(_) => None,
            Value::Text(v) => Some(v),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// A partially-filled row of one table.
///
/// Unset fields mean "engine default" on insertion and "no constraint" when
/// used as a match query; an all-unset template matches every row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    table: Table,
    values: Vec<Option<Value>>,
}

impl Template {
    pub fn empty(table: Table) -> Self {
        Self {
            values: vec![None; table.fields().len()],
            table,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), QueryError> {
        let index = self.table.field_index(field)?;
        self.values[index] = Some(value.into());
        Ok(())
    }

    /// Builder-style `set`, convenient for literal construction.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        self.set(field, value)?;
        Ok(self)
    }

    pub fn get(&self, field: &str) -> Result<Option<&Value>, QueryError> {
        let index = self.table.field_index(field)?;
        Ok(self.values[index].as_ref())
    }

    /// Set fields in schema order, paired with their names.
    pub fn set_fields(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.table
            .fields()
            .iter()
            .zip(self.values.iter())
            .filter_map(|(field, value)| value.as_ref().map(|v| (*field, v)))
    }

    pub fn is_all_unset(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

/// A fully-materialized row read back from the store.
///
/// Every column is present; `None` marks an SQL NULL. Records are immutable;
/// turning one back into a constraint set is an explicit conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    table: Table,
    values: Vec<Option<Value>>,
}

impl Record {
    pub fn from_values(table: Table, values: Vec<Option<Value>>) -> Result<Self, QueryError> {
        let expected = table.fields().len();
        if values.len() != expected {
            return Err(QueryError::FieldCount {
                table: table.name(),
                expected,
                got: values.len(),
            });
        }
        Ok(Self { table, values })
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn get(&self, field: &str) -> Result<Option<&Value>, QueryError> {
        let index = self.table.field_index(field)?;
        Ok(self.values[index].as_ref())
    }

    /// Surrogate id of an entity row, if the table has one and it is non-NULL.
    pub fn id(&self) -> Option<i64> {
        if !self.table.has_id() {
            return None;
        }
        self.values[0].as_ref().and_then(Value::as_int)
    }

    /// All columns in schema order, paired with their names.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, Option<&Value>)> {
        self.table
            .fields()
            .iter()
            .zip(self.values.iter())
            .map(|(field, value)| (*field, value.as_ref()))
    }

    /// Explicit conversion back into a match template over the non-NULL fields.
    pub fn to_template(&self) -> Template {
        Template {
            table: self.table,
            values: self.values.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_template_has_every_field_unset() {
        for table in Table::ALL {
            let template = Template::empty(table);
            assert!(template.is_all_unset());
            assert_eq!(template.set_fields().count(), 0);
        }
    }

    #[test]
    fn set_fields_come_back_in_schema_order() {
        let template = Template::empty(Table::ExpExps)
            .with("input_data", "abc")
            .expect("input_data is a field")
            .with("prog_id", 7)
            .expect("prog_id is a field");

        let pairs: Vec<_> = template.set_fields().collect();
        assert_eq!(
            pairs,
            vec![
                ("prog_id", &Value::Int(7)),
                ("input_data", &Value::Text("abc".to_string())),
            ]
        );
    }

    #[test]
    fn setting_an_unknown_field_fails() {
        let err = Template::empty(Table::ExpProgs)
            .with("prog_id", 1)
            .expect_err("exp_progs has no prog_id");
        assert!(matches!(err, QueryError::UnknownField { .. }));
    }

    #[test]
    fn record_rejects_wrong_arity() {
        let err = Record::from_values(Table::ExpRuns, vec![Some(Value::Int(1))])
            .expect_err("exp_runs has two fields");
        assert!(matches!(
            err,
            QueryError::FieldCount {
                table: "exp_runs",
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn record_to_template_sets_only_the_non_null_fields() {
        let record = Record::from_values(
            Table::ExpProgs,
            vec![Some(Value::Int(5)), None, Some(Value::Text("ret".to_string()))],
        )
        .expect("well-formed record");

        let template = record.to_template();
        let pairs: Vec<_> = template.set_fields().collect();
        assert_eq!(
            pairs,
            vec![
                ("id", &Value::Int(5)),
                ("code", &Value::Text("ret".to_string())),
            ]
        );
    }

    #[test]
    fn record_id_is_read_from_the_id_column() {
        let record = Record::from_values(
            Table::ExpRuns,
            vec![Some(Value::Int(42)), Some(Value::Text("run".to_string()))],
        )
        .expect("well-formed record");
        assert_eq!(record.id(), Some(42));

        let no_id = Record::from_values(
            Table::ExpRunsMeta,
            vec![Some(Value::Int(42)), None, None, None],
        )
        .expect("well-formed meta record");
        assert_eq!(no_id.id(), None);
    }
}
