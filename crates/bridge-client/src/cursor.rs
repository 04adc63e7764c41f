//! Typed view over a `ResponseEnvelope`, re-coercing the server's
//! textual-precision-preserving cells back into native Rust types.

use bridge_proto::{BridgeError, CellValue, ResponseEnvelope};

/// Read-only cursor over one response's rows, addressed by column name or
/// index.
pub struct ResultCursor<'a> {
    envelope: &'a ResponseEnvelope,
}

impl<'a> ResultCursor<'a> {
    /// Wraps a response, surfacing its `error` field as `Err` up front so
    /// callers never index into an error response's (empty) rows.
    pub fn new(envelope: &'a ResponseEnvelope) -> Result<Self, BridgeError> {
        if envelope.is_error() {
            return Err(BridgeError::DbError(envelope.error.clone()));
        }
        Ok(Self { envelope })
    }

    pub fn columns(&self) -> &[String] {
        &self.envelope.columns
    }

    pub fn row_count(&self) -> usize {
        self.envelope.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelope.rows.is_empty()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.envelope.columns.iter().position(|c| c == name)
    }

    fn cell(&self, row: usize, column: usize) -> Option<&CellValue> {
        self.envelope.rows.get(row)?.get(column)
    }

    pub fn cell_at(&self, row: usize, column: &str) -> Option<&CellValue> {
        self.cell(row, self.column_index(column)?)
    }

    pub fn get_i64(&self, row: usize, column: &str) -> Option<i64> {
        match self.cell_at(row, column)? {
            CellValue::Integer(i) => Some(*i),
            CellValue::String(s) => s.parse().ok(),
            CellValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn get_f64(&self, row: usize, column: &str) -> Option<f64> {
        match self.cell_at(row, column)? {
            CellValue::Float(f) => Some(*f),
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, row: usize, column: &str) -> Option<bool> {
        match self.cell_at(row, column)? {
            CellValue::Bool(b) => Some(*b),
            CellValue::Integer(i) => Some(*i != 0),
            CellValue::String(s) => match s.as_str() {
                "1" | "true" | "TRUE" => Some(true),
                "0" | "false" | "FALSE" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_str(&self, row: usize, column: &str) -> Option<&str> {
        match self.cell_at(row, column)? {
            CellValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self, row: usize, column: &str) -> bool {
        matches!(self.cell_at(row, column), Some(CellValue::Null) | None)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[CellValue]> {
        self.envelope.rows.iter().map(|row| row.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResponseEnvelope {
        ResponseEnvelope::ok(
            vec!["id".into(), "name".into(), "active".into()],
            vec![
                vec![CellValue::Integer(1), CellValue::String("Alice".into()), CellValue::Bool(true)],
                vec![CellValue::Integer(2), CellValue::String("Bob".into()), CellValue::Null],
            ],
        )
    }

    #[test]
    fn reads_typed_cells_by_column_name() {
        let envelope = sample();
        let cursor = ResultCursor::new(&envelope).unwrap();
        assert_eq!(cursor.row_count(), 2);
        assert_eq!(cursor.get_i64(0, "id"), Some(1));
        assert_eq!(cursor.get_str(0, "name"), Some("Alice"));
        assert_eq!(cursor.get_bool(0, "active"), Some(true));
        assert!(cursor.is_null(1, "active"));
    }

    #[test]
    fn textual_cells_coerce_to_numeric_and_bool() {
        let envelope = ResponseEnvelope::ok(
            vec!["n".into(), "flag".into()],
            vec![vec![CellValue::String("42".into()), CellValue::String("true".into())]],
        );
        let cursor = ResultCursor::new(&envelope).unwrap();
        assert_eq!(cursor.get_i64(0, "n"), Some(42));
        assert_eq!(cursor.get_bool(0, "flag"), Some(true));
    }

    #[test]
    fn error_envelope_cannot_be_wrapped() {
        let envelope = ResponseEnvelope::err("boom");
        assert!(ResultCursor::new(&envelope).is_err());
    }

    #[test]
    fn unknown_column_is_none() {
        let envelope = sample();
        let cursor = ResultCursor::new(&envelope).unwrap();
        assert_eq!(cursor.get_i64(0, "missing"), None);
    }
}
