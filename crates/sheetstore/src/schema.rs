use crate::codec;
use crate::error::{Result, SheetError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header of the leading column holding each row's 1-based position
pub const POSITION_HEADER: &str = "position";

/// Column layout shared by every tab of one spreadsheet.
///
/// A row is `[position, fields..., chunk groups of chunked_fields...]`.
/// Single-cell fields must fit in one cell; chunked fields may be any length.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub chunked_fields: Vec<String>,
}

impl TableSchema {
    /// Expected header row
    #[must_use]
    pub fn headers(&self) -> Vec<String> {
        std::iter::once(POSITION_HEADER.to_string())
            .chain(self.fields.iter().cloned())
            .chain(self.chunked_fields.iter().cloned())
            .collect()
    }

    /// Number of columns in one chunk group
    #[must_use]
    pub fn chunk_width(&self) -> usize {
        self.chunked_fields.len()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .chain(self.chunked_fields.iter())
            .map(String::as_str)
    }

    /// Reject names the schema doesn't know
    pub fn check_fields(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let unknown: Vec<&str> = values
            .keys()
            .map(String::as_str)
            .filter(|name| !self.field_names().any(|f| f == *name))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SheetError::InvalidRecord(format!(
                "unknown fields [{}], expected one of [{}]",
                unknown.join(", "),
                self.field_names().collect::<Vec<_>>().join(", ")
            )))
        }
    }

    /// Cells following the position column. Absent fields encode as empty.
    pub fn encode_row(&self, values: &BTreeMap<String, String>, max_len: usize) -> Result<Vec<String>> {
        self.check_fields(values)?;

        let mut cells = Vec::with_capacity(self.fields.len() + self.chunk_width());
        for name in &self.fields {
            let value = values.get(name).map(String::as_str).unwrap_or_default();
            let len = value.chars().count();
            if len > max_len {
                return Err(SheetError::Encoding(format!(
                    "field '{name}' holds {len} characters, more than one cell ({max_len}); declare it chunked"
                )));
            }
            cells.push(value.to_string());
        }

        let chunked: Vec<&str> = self
            .chunked_fields
            .iter()
            .map(|name| values.get(name).map(String::as_str).unwrap_or_default())
            .collect();
        cells.extend(codec::encode_group(&chunked, max_len));
        Ok(cells)
    }

    /// Field values in schema order from the cells following the position column
    #[must_use]
    pub fn decode_row<S: AsRef<str>>(&self, cells: &[S]) -> Vec<(String, String)> {
        let split = self.fields.len().min(cells.len());
        let (single, grouped) = cells.split_at(split);

        let mut out: Vec<(String, String)> = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = single.get(i).map(codec::as_str).unwrap_or_default();
                (name.clone(), value.to_string())
            })
            .collect();

        let decoded = codec::decode_group(grouped, self.chunk_width());
        out.extend(self.chunked_fields.iter().cloned().zip(decoded));
        out
    }
}

/// One data row read back from a tab
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 1-based row order
    pub position: usize,
    /// What the position column holds; equals `position` once renumbering completes
    pub stored_position: Option<usize>,
    /// Field values in schema order
    pub fields: Vec<(String, String)>,
}

impl Record {
    pub(crate) fn from_row<S: AsRef<str>>(schema: &TableSchema, position: usize, row: &[S]) -> Self {
        let stored_position = row
            .first()
            .and_then(|cell| codec::as_str(cell).trim().parse::<usize>().ok());
        let data = row.get(1..).unwrap_or_default();
        Self {
            position,
            stored_position,
            fields: schema.decode_row(data),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Fields as a name → value map
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.fields.iter().cloned().collect()
    }
}
