use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let mut table = Table::default();
        for record in records {
            table.push_record(record);
        }
        table
    }

    pub fn push_record(&mut self, record: Map<String, Value>) {
        for key in record.keys() {
            if !self.has_column(key) {
                self.columns.push(key.clone());
                for row in &mut self.rows {
                    row.push(Value::Null);
                }
            }
        }
        let row = self
            .columns
            .iter()
            .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
            .collect();
        self.rows.push(row);
    }

    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn select(&self, names: &[String]) -> Table {
        let indices: Vec<(usize, &String)> = names
            .iter()
            .filter_map(|name| self.column_index(name).map(|idx| (idx, name)))
            .collect();
        Table {
            columns: indices.iter().map(|(_, name)| (*name).clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|(idx, _)| row[*idx].clone()).collect())
                .collect(),
        }
    }

    /// Renames the columns found in `mapping`; unknown source names are ignored.
    /// Leaves the table untouched when the result would repeat a column name.
    pub fn rename(&mut self, mapping: &BTreeMap<String, String>) -> Result<()> {
        let renamed: Vec<String> = self
            .columns
            .iter()
            .map(|column| mapping.get(column).unwrap_or(column).clone())
            .collect();
        for (idx, column) in renamed.iter().enumerate() {
            if renamed[..idx].contains(column) {
                return Err(PipelineError::DuplicateColumn {
                    column: column.clone(),
                });
            }
        }
        self.columns = renamed;
        Ok(())
    }

    pub fn drop_columns(&mut self, names: &[String]) {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|idx| !names.contains(&self.columns[*idx]))
            .collect();
        if keep.len() == self.columns.len() {
            return;
        }
        self.columns = keep.iter().map(|idx| self.columns[*idx].clone()).collect();
        for row in &mut self.rows {
            *row = keep.iter().map(|idx| row[*idx].clone()).collect();
        }
    }

    pub fn set_column(&mut self, name: &str, value: Value) {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.clone();
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }

    pub fn skip_rows(&mut self, count: usize) {
        let count = count.min(self.rows.len());
        self.rows.drain(..count);
    }

    pub fn concat(tables: Vec<Table>) -> Table {
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        let mut rows = Vec::new();
        for table in tables {
            let mapping: Vec<Option<usize>> = columns
                .iter()
                .map(|column| table.column_index(column))
                .collect();
            for row in table.rows {
                rows.push(
                    mapping
                        .iter()
                        .map(|idx| idx.map(|i| row[i].clone()).unwrap_or(Value::Null))
                        .collect(),
                );
            }
        }
        Table { columns, rows }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableFormat {
    Records,
    Lines,
}

fn table_format(path: &Path) -> Option<TableFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "json" => Some(TableFormat::Records),
        "jsonl" | "ndjson" => Some(TableFormat::Lines),
        _ => None,
    }
}

pub fn read_table(path: &Path) -> Result<Table> {
    let format = table_format(path).ok_or_else(|| PipelineError::InvalidTable {
        path: path.to_path_buf(),
        message: "unsupported table format (expected .json, .jsonl or .ndjson)".into(),
    })?;
    let content = fs::read_to_string(path)
        .map_err(|err| PipelineError::io(format!("Failed to read {}", path.display()), err))?;

    let parse_err = |err: serde_json::Error| PipelineError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    };

    let values = match format {
        TableFormat::Records => match serde_json::from_str::<Value>(&content).map_err(parse_err)? {
            Value::Array(items) => items,
            _ => {
                return Err(PipelineError::InvalidTable {
                    path: path.to_path_buf(),
                    message: "expected an array of records".into(),
                });
            }
        },
        TableFormat::Lines => content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<Value>(line).map_err(parse_err))
            .collect::<Result<Vec<_>>>()?,
    };

    let mut table = Table::default();
    for (idx, value) in values.into_iter().enumerate() {
        match value {
            Value::Object(record) => table.push_record(record),
            other => {
                return Err(PipelineError::InvalidTable {
                    path: path.to_path_buf(),
                    message: format!("record {} is not an object: {other}", idx + 1),
                });
            }
        }
    }
    Ok(table)
}

pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    let format = table_format(path).ok_or_else(|| PipelineError::InvalidTable {
        path: path.to_path_buf(),
        message: "unsupported output format (expected .json, .jsonl or .ndjson)".into(),
    })?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| {
            PipelineError::io(
                format!("Failed to create output directory: {}", parent.display()),
                err,
            )
        })?;
    }
    let write_err =
        |err: std::io::Error| PipelineError::io(format!("Failed to write {}", path.display()), err);
    let file = File::create(path).map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    let records = table.records();

    if format == TableFormat::Lines {
        for record in &records {
            serde_json::to_writer(&mut writer, record).map_err(|err| write_err(err.into()))?;
            writer.write_all(b"\n").map_err(write_err)?;
        }
    } else {
        serde_json::to_writer_pretty(&mut writer, &records).map_err(|err| write_err(err.into()))?;
    }
    writer.flush().map_err(write_err)
}
