use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use super::pager::PagerState;

/// One display value. Typed so numeric columns sort numerically while the
/// rendered and filtered form is always the display string.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Cell {
    pub fn from_json(value: &Value) -> Cell {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Int(i)
                } else {
                    Cell::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::Bool(b) => Cell::Bool(*b),
            Value::String(s) => Cell::Str(s.clone()),
            Value::Null => Cell::Str(String::new()),
            other => Cell::Str(other.to_string()),
        }
    }

    pub fn compare(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => a.cmp(b),
            (Cell::Float(a), Cell::Float(b)) => a.total_cmp(b),
            (Cell::Int(a), Cell::Float(b)) => (*a as f64).total_cmp(b),
            (Cell::Float(a), Cell::Int(b)) => a.total_cmp(&(*b as f64)),
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            _ => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Str(s) => f.write_str(s),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(v) => write!(f, "{v:.2}"),
            Cell::Bool(b) => write!(f, "{b}"),
        }
    }
}

pub type Row = Vec<Cell>;

/// Row data published by a view's poller. All rows share the column set and
/// order; the column order is also the sort-cycling order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Row) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Build a table from a JSON array of objects, taking cell values in
    /// the given column order. Missing keys render empty.
    pub fn from_records(columns: &[&str], records: &Value) -> Table {
        let mut table = Table::new(columns.iter().map(|c| c.to_string()).collect());
        if let Some(items) = records.as_array() {
            for item in items {
                let row = columns
                    .iter()
                    .map(|col| {
                        item.get(*col)
                            .map(Cell::from_json)
                            .unwrap_or(Cell::Str(String::new()))
                    })
                    .collect();
                table.push_row(row);
            }
        }
        table
    }

    /// The render pipeline of one pass: filter, then stable sort. Runs
    /// before viewport clamping; the caller clamps against the returned
    /// row count.
    pub fn prepare(&self, state: &PagerState) -> Vec<Row> {
        let mut rows = filter_rows(&self.rows, &state.filter);
        if state.sort_enabled && !self.columns.is_empty() {
            let col = state
                .sort_column
                .as_ref()
                .and_then(|name| self.columns.iter().position(|c| c == name))
                .unwrap_or(0);
            rows.sort_by(|a, b| {
                let ord = a[col].compare(&b[col]);
                if state.sort_descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        rows
    }

    /// Column widths sized to the widest of header and cells.
    pub fn layout_widths(&self, rows: &[Row]) -> Vec<usize> {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.to_string().chars().count());
            }
        }
        widths
    }
}

/// Case-insensitive substring match against the display form of any cell.
/// An empty filter keeps all rows.
pub fn filter_rows(rows: &[Row], filter: &str) -> Vec<Row> {
    if filter.is_empty() {
        return rows.to_vec();
    }
    let needle = filter.to_lowercase();
    rows.iter()
        .filter(|row| {
            row.iter()
                .any(|cell| cell.to_string().to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

/// Header line with the sort direction indicator in front of the sort
/// column, windowed by `hshift` characters.
pub fn header_line(table: &Table, state: &PagerState, widths: &[usize], width: usize) -> String {
    let sort_col = if state.sort_enabled {
        state
            .sort_column
            .clone()
            .or_else(|| table.columns.first().cloned())
    } else {
        None
    };
    let cells: Vec<String> = table
        .columns
        .iter()
        .zip(widths)
        .map(|(name, w)| {
            let text = if sort_col.as_deref() == Some(name.as_str()) {
                let arrow = if state.sort_descending { '↑' } else { '↓' };
                format!("{arrow}{name}")
            } else {
                name.clone()
            };
            pad(&text, w + 1)
        })
        .collect();
    window(&cells.join(" "), state.hshift, width)
}

/// One data line, windowed by `hshift` characters.
pub fn row_line(row: &Row, widths: &[usize], hshift: usize, width: usize) -> String {
    let cells: Vec<String> = row
        .iter()
        .zip(widths)
        .map(|(cell, w)| pad(&cell.to_string(), w + 1))
        .collect();
    window(&cells.join(" "), hshift, width)
}

fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        text.to_string()
    } else {
        let mut out = text.to_string();
        out.extend(std::iter::repeat(' ').take(width - len));
        out
    }
}

fn window(line: &str, hshift: usize, width: usize) -> String {
    line.chars().skip(hshift).take(width).collect()
}
