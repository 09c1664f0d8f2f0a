//! A1 notation for tab ranges
//!
//! Columns are bijective base 26 (A..Z, AA..AZ, ...), rows are 1-based.
//! Internally both are 0-based. Tab titles are quoted unless they are plain
//! ASCII letters and underscores (a title like "A1" would read as a cell),
//! with embedded single quotes doubled.

use crate::error::{Result, SheetError};
use std::fmt;

/// Column name for a 0-based column index
#[must_use]
pub fn column_letters(col: usize) -> String {
    let mut n = col + 1;
    let mut out = Vec::<u8>::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// 0-based column index for a column name such as "AB"
pub fn column_index(letters: &str) -> Result<usize> {
    let mut col: usize = 0;
    for b in letters.bytes() {
        if !b.is_ascii_alphabetic() {
            return Err(SheetError::Encoding(format!("invalid column '{letters}'")));
        }
        let v = (b.to_ascii_uppercase() - b'A') as usize + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(v))
            .ok_or_else(|| SheetError::Encoding(format!("column '{letters}' out of range")))?;
    }
    if col == 0 {
        return Err(SheetError::Encoding("empty column".to_string()));
    }
    Ok(col - 1)
}

/// Quote a tab title for use in a range when needed
#[must_use]
pub fn quote_title(title: &str) -> String {
    let plain = !title.is_empty()
        && title.chars().all(|c| c.is_ascii_alphabetic() || c == '_');
    if plain {
        title.to_string()
    } else {
        format!("'{}'", title.replace('\'', "''"))
    }
}

/// One corner of a range. Either part may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellBound {
    pub col: Option<usize>,
    pub row: Option<usize>,
}

/// A rectangular region of one tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A1Range {
    pub title: String,
    pub start: CellBound,
    pub end: Option<CellBound>,
}

impl A1Range {
    /// Columns `first..=last` of rows `first_row..=last_row` (0-based), or open-ended rows
    #[must_use]
    pub fn rows(title: &str, first_col: usize, last_col: usize, first_row: usize, last_row: Option<usize>) -> Self {
        Self {
            title: title.to_string(),
            start: CellBound {
                col: Some(first_col),
                row: Some(first_row),
            },
            end: Some(CellBound {
                col: Some(last_col),
                row: last_row,
            }),
        }
    }

    /// Every cell of a tab
    #[must_use]
    pub fn whole(title: &str) -> Self {
        Self {
            title: title.to_string(),
            start: CellBound { col: None, row: None },
            end: None,
        }
    }

    /// A single cell (0-based)
    #[must_use]
    pub fn cell(title: &str, col: usize, row: usize) -> Self {
        Self {
            title: title.to_string(),
            start: CellBound {
                col: Some(col),
                row: Some(row),
            },
            end: None,
        }
    }

    /// Parse `Title!A1:B2`, `'My Tab'!A2:C`, `Tab!A5`, or a bare title
    pub fn parse(s: &str) -> Result<Self> {
        let (title, cells) = split_title(s)?;
        let Some(cells) = cells else {
            return Ok(Self::whole(&title));
        };
        let (start, end) = match cells.split_once(':') {
            Some((a, b)) => (parse_bound(a)?, Some(parse_bound(b)?)),
            None => (parse_bound(cells)?, None),
        };
        Ok(Self { title, start, end })
    }

    /// 0-based first row covered
    #[must_use]
    pub fn first_row(&self) -> usize {
        self.start.row.unwrap_or(0)
    }

    /// 0-based last row covered, `None` when open-ended
    #[must_use]
    pub fn last_row(&self) -> Option<usize> {
        match self.end {
            Some(end) => end.row,
            None => self.start.row,
        }
    }

    #[must_use]
    pub fn first_col(&self) -> usize {
        self.start.col.unwrap_or(0)
    }

    #[must_use]
    pub fn last_col(&self) -> Option<usize> {
        match self.end {
            Some(end) => end.col,
            None => self.start.col,
        }
    }
}

fn split_title(s: &str) -> Result<(String, Option<&str>)> {
    if let Some(rest) = s.strip_prefix('\'') {
        let mut title = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    title.push('\'');
                    let _ = chars.next();
                    continue;
                }
                let tail = &rest[i + 1..];
                if tail.is_empty() {
                    return Ok((title, None));
                }
                let cells = tail
                    .strip_prefix('!')
                    .ok_or_else(|| SheetError::Encoding(format!("junk after title in range '{s}'")))?;
                return Ok((title, Some(cells)));
            }
            title.push(c);
        }
        Err(SheetError::Encoding(format!("unterminated quote in range '{s}'")))
    } else {
        match s.split_once('!') {
            Some((title, cells)) => Ok((title.to_string(), Some(cells))),
            None if s.is_empty() => Err(SheetError::Encoding("empty range".to_string())),
            None => Ok((s.to_string(), None)),
        }
    }
}

fn parse_bound(s: &str) -> Result<CellBound> {
    let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    let (letters, digits) = s.split_at(split);
    let col = if letters.is_empty() {
        None
    } else {
        Some(column_index(letters)?)
    };
    let row = if digits.is_empty() {
        None
    } else {
        let n: usize = digits
            .parse()
            .map_err(|_| SheetError::Encoding(format!("invalid row in '{s}'")))?;
        if n == 0 {
            return Err(SheetError::Encoding(format!("row 0 in '{s}'")));
        }
        Some(n - 1)
    };
    if col.is_none() && row.is_none() {
        return Err(SheetError::Encoding(format!("empty cell reference '{s}'")));
    }
    Ok(CellBound { col, row })
}

fn fmt_bound(f: &mut fmt::Formatter<'_>, b: &CellBound) -> fmt::Result {
    if let Some(col) = b.col {
        f.write_str(&column_letters(col))?;
    }
    if let Some(row) = b.row {
        write!(f, "{}", row + 1)?;
    }
    Ok(())
}

impl fmt::Display for A1Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_title(&self.title))?;
        if self.start.col.is_none() && self.start.row.is_none() && self.end.is_none() {
            return Ok(());
        }
        f.write_str("!")?;
        fmt_bound(f, &self.start)?;
        if let Some(end) = &self.end {
            f.write_str(":")?;
            fmt_bound(f, end)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(51), "AZ");
        assert_eq!(column_letters(52), "BA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A").unwrap(), 0);
        assert_eq!(column_index("az").unwrap(), 51);
        assert_eq!(column_index("AAA").unwrap(), 702);
        assert!(column_index("A1").is_err());
        assert!(column_index("").is_err());
    }

    #[test]
    fn test_format_ranges() {
        assert_eq!(A1Range::cell("Notes", 0, 4).to_string(), "Notes!A5");
        assert_eq!(
            A1Range::rows("Project List", 0, 25, 1, Some(999)).to_string(),
            "'Project List'!A2:Z1000"
        );
        assert_eq!(
            A1Range::rows("Bob's", 0, 2, 1, None).to_string(),
            "'Bob''s'!A2:C"
        );
    }

    #[test]
    fn test_parse_ranges() {
        let r = A1Range::parse("'Project List'!A2:Z1000").unwrap();
        assert_eq!(r.title, "Project List");
        assert_eq!(r.first_row(), 1);
        assert_eq!(r.last_row(), Some(999));
        assert_eq!(r.first_col(), 0);
        assert_eq!(r.last_col(), Some(25));

        let r = A1Range::parse("'Bob''s'!B3").unwrap();
        assert_eq!(r.title, "Bob's");
        assert_eq!(r.first_row(), 2);
        assert_eq!(r.last_row(), Some(2));
        assert_eq!(r.first_col(), 1);

        let r = A1Range::parse("Notes!A2:C").unwrap();
        assert_eq!(r.last_row(), None);

        assert!(A1Range::parse("Notes!A0").is_err());
        assert!(A1Range::parse("'Notes").is_err());
        assert!(A1Range::parse("").is_err());
    }

    #[test]
    fn test_whole_tab_range() {
        assert_eq!(A1Range::whole("Notes").to_string(), "Notes");
        assert_eq!(A1Range::whole("JAN 25").to_string(), "'JAN 25'");

        let r = A1Range::parse("'JAN 25'").unwrap();
        assert_eq!(r, A1Range::whole("JAN 25"));
        assert_eq!(r.first_row(), 0);
        assert_eq!(r.last_row(), None);
        assert_eq!(r.first_col(), 0);
        assert_eq!(r.last_col(), None);
    }
}
