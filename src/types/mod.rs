//! Column type model.
//!
//! [`ColumnType`] is the closed set of result column types the client can
//! decode. It is built from a wire [`TypeDesc`] at a given protocol version and
//! dictates which wire column tag a result column must carry.
mod decimal;
mod timestamp;

use std::{collections::BTreeMap, fmt, str::FromStr};

use thiserror::Error;

use crate::{
    error::{Error, Result},
    protocol::{CHARACTER_MAXIMUM_LENGTH, PRECISION, ProtocolVersion, SCALE, TypeDesc, TypeId, WireTag},
};

pub use decimal::{Decimal, DecimalError};
pub use timestamp::{Timestamp, TimestampError};

/// Applied to DECIMAL columns when the session predates type qualifiers.
pub const DEFAULT_DECIMAL_PRECISION: u32 = 10;
pub const DEFAULT_DECIMAL_SCALE: u32 = 0;
/// Applied to CHAR columns when the session predates type qualifiers.
pub const DEFAULT_CHAR_LENGTH: u32 = 255;
/// Applied to VARCHAR columns when the session predates type qualifiers.
pub const DEFAULT_VARCHAR_LENGTH: u32 = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Boolean,
    String,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Primitive(PrimitiveType),
    Char { max_length: u32 },
    Varchar { max_length: u32 },
    Decimal { precision: u32, scale: u32 },
}

impl ColumnType {
    /// Uppercase canonical name, independent of type parameters.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Primitive(p) => match p {
                PrimitiveType::TinyInt => "TINYINT",
                PrimitiveType::SmallInt => "SMALLINT",
                PrimitiveType::Int => "INT",
                PrimitiveType::BigInt => "BIGINT",
                PrimitiveType::Float => "FLOAT",
                PrimitiveType::Double => "DOUBLE",
                PrimitiveType::Boolean => "BOOLEAN",
                PrimitiveType::String => "STRING",
                PrimitiveType::Timestamp => "TIMESTAMP",
            },
            ColumnType::Char { .. } => "CHAR",
            ColumnType::Varchar { .. } => "VARCHAR",
            ColumnType::Decimal { .. } => "DECIMAL",
        }
    }

    pub fn precision(&self) -> Option<u32> {
        match self {
            ColumnType::Decimal { precision, .. } => Some(*precision),
            _ => None,
        }
    }

    pub fn scale(&self) -> Option<u32> {
        match self {
            ColumnType::Decimal { scale, .. } => Some(*scale),
            _ => None,
        }
    }

    pub fn max_length(&self) -> Option<u32> {
        match self {
            ColumnType::Char { max_length } | ColumnType::Varchar { max_length } => {
                Some(*max_length)
            }
            _ => None,
        }
    }

    /// Wire column tag this type is transported as.
    pub fn wire_tag(&self) -> WireTag {
        match self {
            ColumnType::Primitive(PrimitiveType::Boolean) => WireTag::Bool,
            ColumnType::Primitive(PrimitiveType::TinyInt) => WireTag::Byte,
            ColumnType::Primitive(PrimitiveType::SmallInt) => WireTag::I16,
            ColumnType::Primitive(PrimitiveType::Int) => WireTag::I32,
            ColumnType::Primitive(PrimitiveType::BigInt) => WireTag::I64,
            ColumnType::Primitive(PrimitiveType::Float | PrimitiveType::Double) => WireTag::Double,
            ColumnType::Primitive(PrimitiveType::String | PrimitiveType::Timestamp)
            | ColumnType::Char { .. }
            | ColumnType::Varchar { .. }
            | ColumnType::Decimal { .. } => WireTag::String,
        }
    }

    /// Builds a column type from its wire descriptor.
    ///
    /// Qualifiers are required from the version that introduced them and
    /// ignored before it, where the defaults apply.
    pub fn from_type_desc(desc: &TypeDesc, version: ProtocolVersion) -> Result<Self> {
        let qualifier = |key: &str, default: u32| -> Result<u32> {
            if !version.has_type_qualifiers() {
                return Ok(default);
            }
            desc.qualifier(key).ok_or_else(|| {
                Error::Protocol(format!(
                    "{:?} descriptor is missing qualifier '{key}' at {version}",
                    desc.type_id
                ))
            })
        };

        let column_type = match desc.type_id {
            TypeId::Boolean => ColumnType::Primitive(PrimitiveType::Boolean),
            TypeId::TinyInt => ColumnType::Primitive(PrimitiveType::TinyInt),
            TypeId::SmallInt => ColumnType::Primitive(PrimitiveType::SmallInt),
            TypeId::Int => ColumnType::Primitive(PrimitiveType::Int),
            TypeId::BigInt => ColumnType::Primitive(PrimitiveType::BigInt),
            TypeId::Float => ColumnType::Primitive(PrimitiveType::Float),
            TypeId::Double => ColumnType::Primitive(PrimitiveType::Double),
            TypeId::String => ColumnType::Primitive(PrimitiveType::String),
            TypeId::Timestamp => ColumnType::Primitive(PrimitiveType::Timestamp),
            TypeId::Char => ColumnType::Char {
                max_length: qualifier(CHARACTER_MAXIMUM_LENGTH, DEFAULT_CHAR_LENGTH)?,
            },
            TypeId::Varchar => ColumnType::Varchar {
                max_length: qualifier(CHARACTER_MAXIMUM_LENGTH, DEFAULT_VARCHAR_LENGTH)?,
            },
            TypeId::Decimal => ColumnType::Decimal {
                precision: qualifier(PRECISION, DEFAULT_DECIMAL_PRECISION)?,
                scale: qualifier(SCALE, DEFAULT_DECIMAL_SCALE)?,
            },
        };

        column_type.validate().map_err(|e| Error::Protocol(e.to_string()))?;
        Ok(column_type)
    }

    /// Wire descriptor for this type as sent at `version`.
    pub fn to_type_desc(&self, version: ProtocolVersion) -> TypeDesc {
        let type_id = match self {
            ColumnType::Primitive(p) => match p {
                PrimitiveType::TinyInt => TypeId::TinyInt,
                PrimitiveType::SmallInt => TypeId::SmallInt,
                PrimitiveType::Int => TypeId::Int,
                PrimitiveType::BigInt => TypeId::BigInt,
                PrimitiveType::Float => TypeId::Float,
                PrimitiveType::Double => TypeId::Double,
                PrimitiveType::Boolean => TypeId::Boolean,
                PrimitiveType::String => TypeId::String,
                PrimitiveType::Timestamp => TypeId::Timestamp,
            },
            ColumnType::Char { .. } => TypeId::Char,
            ColumnType::Varchar { .. } => TypeId::Varchar,
            ColumnType::Decimal { .. } => TypeId::Decimal,
        };

        let qualifiers = match self {
            _ if !version.has_type_qualifiers() => None,
            ColumnType::Char { max_length } | ColumnType::Varchar { max_length } => Some(
                BTreeMap::from([(CHARACTER_MAXIMUM_LENGTH.to_string(), *max_length)]),
            ),
            ColumnType::Decimal { precision, scale } => Some(BTreeMap::from([
                (PRECISION.to_string(), *precision),
                (SCALE.to_string(), *scale),
            ])),
            ColumnType::Primitive(_) => None,
        };

        TypeDesc {
            type_id,
            qualifiers,
        }
    }

    fn validate(&self) -> Result<(), ParseTypeError> {
        match *self {
            ColumnType::Decimal { precision, scale }
                if precision == 0 || precision > Decimal::MAX_PRECISION || scale > precision =>
            {
                Err(ParseTypeError::Parameters(self.to_string()))
            }
            ColumnType::Char { max_length } | ColumnType::Varchar { max_length }
                if max_length == 0 =>
            {
                Err(ParseTypeError::Parameters(self.to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Primitive(_) => f.write_str(self.name()),
            ColumnType::Char { max_length } | ColumnType::Varchar { max_length } => {
                write!(f, "{}({max_length})", self.name())
            }
            ColumnType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseTypeError {
    #[error("unknown type '{0}'")]
    Unknown(String),
    #[error("invalid type parameters for {0}")]
    Parameters(String),
}

impl FromStr for ColumnType {
    type Err = ParseTypeError;

    /// Parses SQL type syntax such as `int`, `varchar(20)` or `decimal(12, 2)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let compact = compact.to_lowercase();
        let (base, params) = match compact.split_once('(') {
            Some((base, rest)) => {
                let params = rest
                    .strip_suffix(')')
                    .ok_or_else(|| ParseTypeError::Unknown(s.to_string()))?;
                let params = params
                    .split(',')
                    .map(|p| p.parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| ParseTypeError::Parameters(s.to_string()))?;
                (base.to_string(), Some(params))
            }
            None => (compact, None),
        };

        let has_params = params.is_some();
        let primitive = |p| {
            if has_params {
                Err(ParseTypeError::Parameters(s.to_string()))
            } else {
                Ok(ColumnType::Primitive(p))
            }
        };
        let column_type = match (base.as_str(), params.as_deref()) {
            ("tinyint", _) => primitive(PrimitiveType::TinyInt)?,
            ("smallint", _) => primitive(PrimitiveType::SmallInt)?,
            ("int" | "integer", _) => primitive(PrimitiveType::Int)?,
            ("bigint", _) => primitive(PrimitiveType::BigInt)?,
            ("float", _) => primitive(PrimitiveType::Float)?,
            ("double", _) => primitive(PrimitiveType::Double)?,
            ("boolean", _) => primitive(PrimitiveType::Boolean)?,
            ("string", _) => primitive(PrimitiveType::String)?,
            ("timestamp", _) => primitive(PrimitiveType::Timestamp)?,
            ("char", None) => ColumnType::Char {
                max_length: DEFAULT_CHAR_LENGTH,
            },
            ("char", Some([n])) => ColumnType::Char { max_length: *n },
            ("varchar", Some([n])) => ColumnType::Varchar { max_length: *n },
            ("decimal", None) => ColumnType::Decimal {
                precision: DEFAULT_DECIMAL_PRECISION,
                scale: DEFAULT_DECIMAL_SCALE,
            },
            ("decimal", Some([p])) => ColumnType::Decimal {
                precision: *p,
                scale: DEFAULT_DECIMAL_SCALE,
            },
            ("decimal", Some([p, s])) => ColumnType::Decimal {
                precision: *p,
                scale: *s,
            },
            ("char" | "varchar" | "decimal", _) => {
                return Err(ParseTypeError::Parameters(s.to_string()));
            }
            _ => return Err(ParseTypeError::Unknown(s.to_string())),
        };

        column_type.validate()?;
        Ok(column_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_ignore_parameters() {
        let cases = [
            ("tinyint", "TINYINT"),
            ("smallint", "SMALLINT"),
            ("int", "INT"),
            ("bigint", "BIGINT"),
            ("float", "FLOAT"),
            ("double", "DOUBLE"),
            ("char(10)", "CHAR"),
            ("varchar(20)", "VARCHAR"),
            ("string", "STRING"),
            ("decimal(12, 2)", "DECIMAL"),
            ("timestamp", "TIMESTAMP"),
            ("boolean", "BOOLEAN"),
        ];
        for (sql, name) in cases {
            let column_type: ColumnType = sql.parse().unwrap();
            assert_eq!(column_type.name(), name, "{sql}");
        }
    }

    #[test]
    fn parameters_are_exposed() {
        let decimal: ColumnType = "DECIMAL(12,2)".parse().unwrap();
        assert_eq!(decimal.precision(), Some(12));
        assert_eq!(decimal.scale(), Some(2));
        assert_eq!(decimal.max_length(), None);

        let char_type: ColumnType = "char(10)".parse().unwrap();
        assert_eq!(char_type.max_length(), Some(10));
        assert_eq!(char_type.precision(), None);

        let int: ColumnType = "int".parse().unwrap();
        assert_eq!(int.max_length(), None);
        assert_eq!(int.scale(), None);
    }

    #[test]
    fn parse_rejects_bad_types() {
        assert!(matches!(
            "blob".parse::<ColumnType>(),
            Err(ParseTypeError::Unknown(_))
        ));
        for sql in ["varchar", "int(3)", "decimal(2,3)", "decimal(39,0)", "char(0)", "decimal(a)"] {
            assert!(
                matches!(sql.parse::<ColumnType>(), Err(ParseTypeError::Parameters(_))),
                "{sql}"
            );
        }
    }

    #[test]
    fn display_includes_parameters() {
        let decimal: ColumnType = "decimal(12,2)".parse().unwrap();
        assert_eq!(decimal.to_string(), "DECIMAL(12,2)");
        let varchar: ColumnType = "varchar(20)".parse().unwrap();
        assert_eq!(varchar.to_string(), "VARCHAR(20)");
    }

    #[test]
    fn wire_tags() {
        let tag = |sql: &str| sql.parse::<ColumnType>().unwrap().wire_tag();
        assert_eq!(tag("float"), WireTag::Double);
        assert_eq!(tag("tinyint"), WireTag::Byte);
        assert_eq!(tag("decimal(5,1)"), WireTag::String);
        assert_eq!(tag("timestamp"), WireTag::String);
        assert_eq!(tag("boolean"), WireTag::Bool);
    }

    #[test]
    fn descriptor_round_trip_with_qualifiers() {
        for sql in ["decimal(12,2)", "char(10)", "varchar(20)", "bigint"] {
            let column_type: ColumnType = sql.parse().unwrap();
            let desc = column_type.to_type_desc(ProtocolVersion::V7);
            let decoded = ColumnType::from_type_desc(&desc, ProtocolVersion::V7).unwrap();
            assert_eq!(decoded, column_type, "{sql}");
        }
    }

    #[test]
    fn old_versions_apply_defaults() {
        let decimal: ColumnType = "decimal(12,2)".parse().unwrap();
        let desc = decimal.to_type_desc(ProtocolVersion::V3);
        assert_eq!(desc.qualifiers, None);

        let decoded = ColumnType::from_type_desc(&desc, ProtocolVersion::V3).unwrap();
        assert_eq!(
            decoded,
            ColumnType::Decimal {
                precision: DEFAULT_DECIMAL_PRECISION,
                scale: DEFAULT_DECIMAL_SCALE
            }
        );

        let varchar = TypeDesc::new(TypeId::Varchar);
        let decoded = ColumnType::from_type_desc(&varchar, ProtocolVersion::V1).unwrap();
        assert_eq!(decoded.max_length(), Some(DEFAULT_VARCHAR_LENGTH));
    }

    #[test]
    fn missing_qualifier_is_protocol_error() {
        let desc = TypeDesc::new(TypeId::Char);
        let err = ColumnType::from_type_desc(&desc, ProtocolVersion::V6).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn invalid_qualifier_is_protocol_error() {
        let desc = TypeDesc {
            type_id: TypeId::Decimal,
            qualifiers: Some(BTreeMap::from([
                (PRECISION.to_string(), 4),
                (SCALE.to_string(), 9),
            ])),
        };
        let err = ColumnType::from_type_desc(&desc, ProtocolVersion::V7).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
