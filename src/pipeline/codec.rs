//! Streaming JSON codec
//!
//! A line-delimited, token-compressed record format for large JSON
//! documents. The first line is a meta record; each further line is an
//! item record belonging to one named array field:
//!
//! ```text
//! {"T":"meta","A":["readings"],"device":"probe-1","readings":200}
//! {"T":"readings","D":{...}}     ← one line per array element
//! ```
//!
//! One-letter tokens on disk: `T` (type), `A` (array-field names),
//! `D` (data). Scalar fields ride in the meta record verbatim; array
//! fields appear there as integer lengths. A field whose name collides
//! with the reserved tokens `{type, __arrays, data, meta, T, A, D, M}`
//! is relocated under the `_u` escape sub-map.
//!
//! The decoder also accepts a legacy single-object JSON blob (the
//! save-and-quit fallback), detected by parsing the first non-empty
//! line and checking whether its decoded type is `"meta"`.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde_json::{Map, Value};

/// Field names that clash with the record tokens and get relocated
/// under `_u`
const RESERVED: [&str; 8] = ["type", "__arrays", "data", "meta", "T", "A", "D", "M"];

/// A document decomposed for streaming: the ready meta line plus the
/// array fields still to be emitted as item records
#[derive(Debug, Clone)]
pub struct SplitDocument {
    /// Serialized meta record (no trailing newline)
    pub meta_line: String,
    /// Array fields in declaration order
    pub arrays: Vec<(String, Vec<Value>)>,
}

/// Decompose a document into its meta record and array fields
pub fn split_document(doc: &Map<String, Value>) -> PipelineResult<SplitDocument> {
    let mut meta = Map::new();
    let mut escaped = Map::new();
    let mut names = Vec::new();
    let mut arrays = Vec::new();

    for (key, value) in doc {
        let entry = if let Value::Array(items) = value {
            names.push(key.clone());
            arrays.push((key.clone(), items.clone()));
            Value::from(items.len())
        } else {
            value.clone()
        };
        if RESERVED.contains(&key.as_str()) {
            escaped.insert(key.clone(), entry);
        } else {
            meta.insert(key.clone(), entry);
        }
    }

    meta.insert("T".to_string(), Value::from("meta"));
    meta.insert(
        "A".to_string(),
        Value::Array(names.into_iter().map(Value::from).collect()),
    );
    if !escaped.is_empty() {
        meta.insert("_u".to_string(), Value::Object(escaped));
    }

    Ok(SplitDocument {
        meta_line: serde_json::to_string(&Value::Object(meta))?,
        arrays,
    })
}

/// Serialize one item record (no trailing newline)
pub fn item_line(field: &str, element: &Value) -> PipelineResult<String> {
    let mut record = Map::new();
    record.insert("T".to_string(), Value::from(field));
    record.insert("D".to_string(), element.clone());
    Ok(serde_json::to_string(&Value::Object(record))?)
}

/// A record's type under either spelling
fn record_type(obj: &Map<String, Value>) -> Option<&str> {
    obj.get("T")
        .or_else(|| obj.get("type"))
        .and_then(Value::as_str)
}

/// A record's payload under either spelling
fn record_data(obj: &Map<String, Value>) -> Option<&Value> {
    obj.get("D").or_else(|| obj.get("data"))
}

/// The meta record's declared array-field names
fn declared_arrays(obj: &Map<String, Value>) -> Vec<String> {
    obj.get("A")
        .or_else(|| obj.get("__arrays"))
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Incremental decoder for the line-delimited form
///
/// Feed the meta line first, then item lines in file order; declared
/// arrays are restored as ordered sequences of their items.
#[derive(Debug, Default)]
pub struct DocumentDecoder {
    doc: Map<String, Value>,
    started: bool,
}

impl DocumentDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one record line; the first fed line is the meta record
    pub fn feed_line(&mut self, line: &str) -> PipelineResult<()> {
        let value: Value = serde_json::from_str(line)?;
        let Value::Object(obj) = value else {
            return Err(PipelineError::NotAnObject);
        };

        if !self.started {
            self.started = true;
            let names = declared_arrays(&obj);
            for (key, entry) in &obj {
                match key.as_str() {
                    // The record's own tokens, either spelling
                    "T" | "type" | "A" | "__arrays" => {}
                    "_u" => {
                        if let Value::Object(escaped) = entry {
                            for (name, scalar) in escaped {
                                // Array lengths under _u are rebuilt from
                                // the item records instead
                                if !names.iter().any(|n| n == name) {
                                    self.doc.insert(name.clone(), scalar.clone());
                                }
                            }
                        }
                    }
                    // Array length entry; the items carry the data
                    key if names.iter().any(|n| n == key) => {}
                    _ => {
                        self.doc.insert(key.clone(), entry.clone());
                    }
                }
            }
            for name in names {
                self.doc.insert(name, Value::Array(Vec::new()));
            }
        } else {
            let Some(field) = record_type(&obj) else {
                // Tolerate stray records rather than poisoning the file
                return Ok(());
            };
            let data = record_data(&obj).cloned().unwrap_or(Value::Null);
            if let Some(Value::Array(items)) = self.doc.get_mut(field) {
                items.push(data);
            }
        }
        Ok(())
    }

    /// The reconstructed logical object
    pub fn finish(self) -> Value {
        Value::Object(self.doc)
    }
}

/// Whether a record line decodes to a meta record, marking the
/// line-delimited form (anything else means a legacy blob)
pub fn is_meta_line(line: &str) -> bool {
    serde_json::from_str::<Value>(line)
        .ok()
        .map(|v| {
            v.as_object()
                .map(|o| record_type(o) == Some("meta"))
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Encode a whole document to the line-delimited text form
pub fn encode_document(document: &Value) -> PipelineResult<String> {
    let Value::Object(doc) = document else {
        return Err(PipelineError::NotAnObject);
    };
    let split = split_document(doc)?;

    let mut text = String::with_capacity(split.meta_line.len() + 1);
    text.push_str(&split.meta_line);
    text.push('\n');
    for (field, items) in &split.arrays {
        for element in items {
            text.push_str(&item_line(field, element)?);
            text.push('\n');
        }
    }
    Ok(text)
}

/// Decode either the line-delimited form or a legacy single-object
/// JSON blob, inferred from the first non-empty line
pub fn decode_document(text: &str) -> PipelineResult<Value> {
    let Some(first) = text.lines().find(|l| !l.trim().is_empty()) else {
        return Err(PipelineError::EmptyDocument);
    };

    if !is_meta_line(first) {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(PipelineError::NotAnObject);
        }
        return Ok(value);
    }

    let mut decoder = DocumentDecoder::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        decoder.feed_line(line)?;
    }
    Ok(decoder.finish())
}
