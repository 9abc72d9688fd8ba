use crate::utils::error::{IngestError, Result};

/// Strongly-typed column type, parsed once from the textual descriptor
/// carried by dataset configuration (`VARCHAR(20)`, `NUMERIC(10,2)`,
/// `GEOMETRY(MULTIPOLYGON, 4326)`, ...). DDL generation and value
/// coercion only ever see this enum, never the raw descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer surrogate key.
    Serial,
    Integer,
    Text { max_len: Option<u32> },
    Decimal { precision: Option<(u8, u8)> },
    Timestamp,
    Geometry { subtype: String, srid: i32 },
}

impl ColumnType {
    /// Parse a compact textual type descriptor.
    ///
    /// Unknown base types and malformed parameter lists are configuration
    /// errors; they must surface before any network or storage activity.
    pub fn parse(column: &str, descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        let (base, args) = match descriptor.split_once('(') {
            Some((base, rest)) => {
                let args = rest.strip_suffix(')').ok_or_else(|| malformed(
                    column,
                    descriptor,
                    "missing closing parenthesis",
                ))?;
                (base.trim().to_ascii_uppercase(), Some(args.trim()))
            }
            None => (descriptor.to_ascii_uppercase(), None),
        };

        match (base.as_str(), args) {
            ("SERIAL", None) => Ok(ColumnType::Serial),
            ("INTEGER", None) => Ok(ColumnType::Integer),
            ("TEXT", None) => Ok(ColumnType::Text { max_len: None }),
            ("VARCHAR", Some(len)) => {
                let max_len = len.parse::<u32>().map_err(|_| {
                    malformed(column, descriptor, "VARCHAR length must be an integer")
                })?;
                Ok(ColumnType::Text {
                    max_len: Some(max_len),
                })
            }
            ("VARCHAR", None) => Ok(ColumnType::Text { max_len: None }),
            ("NUMERIC" | "FLOAT", None) => Ok(ColumnType::Decimal { precision: None }),
            ("NUMERIC", Some(args)) => {
                let parts: Vec<&str> = args.split(',').map(str::trim).collect();
                if parts.len() != 2 {
                    return Err(malformed(
                        column,
                        descriptor,
                        "NUMERIC takes precision and scale",
                    ));
                }
                let precision = parts[0].parse::<u8>().map_err(|_| {
                    malformed(column, descriptor, "precision must be an integer")
                })?;
                let scale = parts[1]
                    .parse::<u8>()
                    .map_err(|_| malformed(column, descriptor, "scale must be an integer"))?;
                Ok(ColumnType::Decimal {
                    precision: Some((precision, scale)),
                })
            }
            ("TIMESTAMP" | "DATE", None) => Ok(ColumnType::Timestamp),
            ("GEOMETRY", Some(args)) => {
                let parts: Vec<&str> = args.split(',').map(str::trim).collect();
                if parts.is_empty() || parts[0].is_empty() {
                    return Err(malformed(column, descriptor, "GEOMETRY needs a subtype"));
                }
                let subtype = parts[0].trim_matches(&['\'', '"'][..]).to_ascii_uppercase();
                let srid = match parts.get(1) {
                    Some(raw) => raw
                        .to_ascii_lowercase()
                        .replace("srid=", "")
                        .trim()
                        .parse::<i32>()
                        .map_err(|_| malformed(column, descriptor, "SRID must be an integer"))?,
                    None => 4326,
                };
                Ok(ColumnType::Geometry { subtype, srid })
            }
            _ => Err(malformed(column, descriptor, "unknown type")),
        }
    }

    /// Native SQLite column type. Geometry is stored as WKT text; the
    /// subtype and SRID are only schema metadata on this backend.
    pub fn sql_type(&self) -> String {
        match self {
            ColumnType::Serial | ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Text { .. } => "TEXT".to_string(),
            ColumnType::Decimal {
                precision: Some((p, s)),
            } => format!("NUMERIC({}, {})", p, s),
            ColumnType::Decimal { precision: None } => "NUMERIC".to_string(),
            ColumnType::Timestamp => "TEXT".to_string(),
            ColumnType::Geometry { .. } => "TEXT".to_string(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Serial | ColumnType::Integer | ColumnType::Decimal { .. }
        )
    }
}

fn malformed(column: &str, descriptor: &str, reason: &str) -> IngestError {
    IngestError::TypeDescriptor {
        column: column.to_string(),
        descriptor: descriptor.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<String>,
    /// Validation metadata: a canonical batch missing this column earns a
    /// warning, never a hard failure.
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
}

/// Declarative storage schema for one dataset table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
    /// Uniqueness constraints, each a column list. Used for DDL and as
    /// upsert conflict targets.
    pub uniques: Vec<Vec<String>>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Every column referenced by an index or uniqueness constraint must
    /// exist in the column list.
    pub fn check_references(&self) -> Result<()> {
        for index in &self.indexes {
            for col in &index.columns {
                if self.column(col).is_none() {
                    return Err(IngestError::Schema {
                        table: self.table_name.clone(),
                        message: format!("index {} references unknown column {}", index.name, col),
                    });
                }
            }
        }
        for unique in &self.uniques {
            for col in unique {
                if self.column(col).is_none() {
                    return Err(IngestError::Schema {
                        table: self.table_name.clone(),
                        message: format!("unique constraint references unknown column {}", col),
                    });
                }
            }
        }
        Ok(())
    }

    /// True when `keys` exactly matches one declared uniqueness constraint
    /// (order-insensitive).
    pub fn has_unique_on(&self, keys: &[String]) -> bool {
        self.uniques.iter().any(|unique| {
            unique.len() == keys.len() && keys.iter().all(|k| unique.contains(k))
        })
    }

    /// `CREATE TABLE IF NOT EXISTS` statement, uniques inline.
    pub fn create_table_sql(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(self.columns.len() + self.uniques.len());
        for col in &self.columns {
            let mut part = format!("{} {}", quote_ident(&col.name), col.ty.sql_type());
            if col.primary_key {
                part.push_str(" PRIMARY KEY");
                if col.ty == ColumnType::Serial {
                    part.push_str(" AUTOINCREMENT");
                }
            }
            if !col.nullable && !col.primary_key {
                part.push_str(" NOT NULL");
            }
            if let Some(default) = &col.default {
                if default == "CURRENT_TIMESTAMP" {
                    part.push_str(" DEFAULT CURRENT_TIMESTAMP");
                } else {
                    part.push_str(&format!(" DEFAULT '{}'", default.replace('\'', "''")));
                }
            }
            parts.push(part);
        }
        for unique in &self.uniques {
            let cols: Vec<String> = unique.iter().map(|c| quote_ident(c)).collect();
            parts.push(format!("UNIQUE ({})", cols.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table_name),
            parts.join(", ")
        )
    }

    /// One `CREATE INDEX IF NOT EXISTS` statement per declared index.
    pub fn create_index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|index| {
                let cols: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_ident(&index.name),
                    quote_ident(&self.table_name),
                    cols.join(", ")
                )
            })
            .collect()
    }
}

/// Identifier names come from configuration, so quote them everywhere.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
