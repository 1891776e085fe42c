//! Result-set schema.
use std::ops::Index;

use crate::{
    error::{Error, Result},
    protocol::{ColumnDesc, ProtocolVersion},
    types::ColumnType,
};

/// Name, optional comment and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    name: String,
    comment: Option<String>,
    column_type: ColumnType,
    default_qualifiers: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType, comment: Option<String>) -> Self {
        Self {
            name: name.into(),
            comment,
            column_type,
            default_qualifiers: false,
        }
    }

    /// Marks the type's qualifiers as defaults filled in by the client,
    /// because the session's protocol predates them.
    pub(crate) fn with_default_qualifiers(mut self) -> Self {
        self.default_qualifiers = true;
        self
    }

    /// True when precision, scale or length were not sent by the server.
    /// Decimal values then keep the scale they arrive with.
    pub fn has_default_qualifiers(&self) -> bool {
        self.default_qualifiers
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }
}

/// Ordered column metadata of an operation's result set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<ColumnDescriptor>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    /// Builds a schema from GetResultSetMetadata output.
    ///
    /// Columns are ordered by their reported position, which must be a
    /// permutation of `1..=n`.
    pub fn from_wire(mut columns: Vec<ColumnDesc>, version: ProtocolVersion) -> Result<Self> {
        columns.sort_by_key(|c| c.position);
        for (index, column) in columns.iter().enumerate() {
            if column.position as usize != index + 1 {
                return Err(Error::Protocol(format!(
                    "column '{}' reported position {}, expected {}",
                    column.name,
                    column.position,
                    index + 1
                )));
            }
        }

        let columns = columns
            .into_iter()
            .map(|c| {
                let column_type = ColumnType::from_type_desc(&c.type_desc, version)?;
                let descriptor = ColumnDescriptor::new(c.name, column_type, c.comment);
                Ok(if version.has_type_qualifiers() {
                    descriptor
                } else {
                    descriptor.with_default_qualifiers()
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }

    pub fn ncolumns(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(index)
    }

    /// Position of the first column called `name`, compared case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnDescriptor> {
        self.columns.iter()
    }
}

impl Index<usize> for Schema {
    type Output = ColumnDescriptor;

    fn index(&self, index: usize) -> &Self::Output {
        &self.columns[index]
    }
}

impl<'a> IntoIterator for &'a Schema {
    type Item = &'a ColumnDescriptor;
    type IntoIter = std::slice::Iter<'a, ColumnDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::{TypeDesc, TypeId};

    use super::*;

    fn desc(name: &str, position: u32, column_type: &str) -> ColumnDesc {
        let column_type: ColumnType = column_type.parse().unwrap();
        ColumnDesc {
            name: name.into(),
            type_desc: column_type.to_type_desc(ProtocolVersion::LATEST),
            position,
            comment: None,
        }
    }

    #[test]
    fn from_wire_orders_by_position() {
        let columns = vec![
            desc("b", 2, "decimal(12,2)"),
            desc("a", 1, "int"),
            desc("c", 3, "char(10)"),
        ];
        let schema = Schema::from_wire(columns, ProtocolVersion::LATEST).unwrap();

        assert_eq!(schema.ncolumns(), 3);
        assert_eq!(schema[0].name(), "a");
        assert_eq!(schema[1].column_type().precision(), Some(12));
        assert_eq!(schema[1].column_type().scale(), Some(2));
        assert_eq!(schema[2].column_type().max_length(), Some(10));
        assert_eq!(schema.index_of("C"), Some(2));
        assert_eq!(schema.index_of("missing"), None);
    }

    #[test]
    fn from_wire_rejects_gaps() {
        let columns = vec![desc("a", 1, "int"), desc("b", 3, "int")];
        let err = Schema::from_wire(columns, ProtocolVersion::LATEST).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn comments_are_kept() {
        let mut column = desc("f0", 1, "tinyint");
        column.comment = Some("f0".into());
        let schema = Schema::from_wire(vec![column], ProtocolVersion::LATEST).unwrap();
        assert_eq!(schema[0].comment(), Some("f0"));
    }

    #[test]
    fn empty_schema() {
        let schema = Schema::from_wire(Vec::new(), ProtocolVersion::V1).unwrap();
        assert!(schema.is_empty());
        assert_eq!(schema.column(0), None);
    }

    #[test]
    fn old_version_missing_qualifiers() {
        let column = ColumnDesc {
            name: "d".into(),
            type_desc: TypeDesc::new(TypeId::Decimal),
            position: 1,
            comment: None,
        };
        let schema = Schema::from_wire(vec![column], ProtocolVersion::V2).unwrap();
        assert_eq!(schema[0].column_type().name(), "DECIMAL");
    }
}
