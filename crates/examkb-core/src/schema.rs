//! Source-row schemas and the registry that maps a declared schema id to its
//! projection rule.
//!
//! A schema turns one tabular row into a [`KnowledgeEntry`]: it names the two
//! natural-key columns, a document template with `{column}` placeholders and
//! the ordered metadata fields to keep. New shapes are added by registering a
//! schema, never by matching on file names.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{entry_id, KnowledgeEntry, MetaValue, Metadata};

/// One source row: header -> raw cell text, in column order.
pub type SourceRow = IndexMap<String, String>;

pub const QUESTION_OPTIONS: &str = "question_options";
pub const STEM_OPTIONS: &str = "stem_options";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Bool,
    Int,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataField {
    pub column: String,
    /// Metadata key; defaults to the column name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub kind: FieldKind,
}

impl MetadataField {
    pub fn new(column: &str, kind: FieldKind) -> Self {
        Self { column: column.to_string(), key: None, kind }
    }

    fn key(&self) -> &str { self.key.as_deref().unwrap_or(&self.column) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Column(String),
}

/// Document template such as `题目：{question_text} 选项{option_key}：{option_text}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' { closed = true; break; }
                        name.push(n);
                    }
                    let name = name.trim();
                    if !closed || name.is_empty() {
                        return Err(Error::InvalidConfig(format!("malformed placeholder in template '{source}'")));
                    }
                    if !literal.is_empty() { segments.push(Segment::Literal(std::mem::take(&mut literal))); }
                    segments.push(Segment::Column(name.to_string()));
                }
                '}' => return Err(Error::InvalidConfig(format!("unmatched '}}' in template '{source}'"))),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() { segments.push(Segment::Literal(literal)); }
        Ok(Self { source: source.to_string(), segments })
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s { Segment::Column(c) => Some(c.as_str()), Segment::Literal(_) => None })
    }

    fn render(&self, row: &SourceRow) -> std::result::Result<String, String> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Column(c) => out.push_str(row.get(c).ok_or_else(|| format!("missing column '{c}'"))?.trim()),
            }
        }
        Ok(out)
    }
}

impl TryFrom<String> for Template {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> { Template::parse(&value) }
}

impl From<Template> for String {
    fn from(t: Template) -> Self { t.source }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.source) }
}

/// Projection rule for one source shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSchema {
    pub id: String,
    pub item_column: String,
    pub choice_column: String,
    pub template: Template,
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
}

impl RowSchema {
    /// Question table with one row per option and a correctness flag.
    pub fn question_options() -> Self {
        Self {
            id: QUESTION_OPTIONS.to_string(),
            item_column: "question_id".to_string(),
            choice_column: "option_key".to_string(),
            template: Template::parse("题目：{question_text} 选项{option_key}：{option_text}")
                .unwrap_or_else(|_| unreachable!("built-in template is well formed")),
            metadata: vec![
                MetadataField::new("question_id", FieldKind::Text),
                MetadataField::new("question_text", FieldKind::Text),
                MetadataField::new("option_key", FieldKind::Text),
                MetadataField::new("option_text", FieldKind::Text),
                MetadataField::new("is_correct", FieldKind::Bool),
            ],
        }
    }

    /// Objective-question table keyed by 编号 with stem (题干) and option (选项).
    pub fn stem_options() -> Self {
        Self {
            id: STEM_OPTIONS.to_string(),
            item_column: "编号".to_string(),
            choice_column: "选项".to_string(),
            template: Template::parse("{题干} {选项}")
                .unwrap_or_else(|_| unreachable!("built-in template is well formed")),
            metadata: vec![MetadataField::new("编号", FieldKind::Text)],
        }
    }

    /// Project one row. `row_index` is 0-based and only used for error reporting.
    pub fn project(&self, row_index: usize, row: &SourceRow) -> Result<KnowledgeEntry> {
        let reject = |reason: String| Error::RowValidation { row: row_index, reason };
        let id = entry_id(
            key_cell(row, &self.item_column, row_index)?,
            key_cell(row, &self.choice_column, row_index)?,
        );
        let document_text = self.template.render(row).map_err(reject)?;

        let mut metadata = Metadata::with_capacity(self.metadata.len());
        for field in &self.metadata {
            let raw = row
                .get(&field.column)
                .map(|v| v.trim())
                .ok_or_else(|| reject(format!("missing column '{}'", field.column)))?;
            let value = match field.kind {
                FieldKind::Text => MetaValue::Text(raw.to_string()),
                FieldKind::Bool => MetaValue::Bool(
                    parse_bool(raw).ok_or_else(|| reject(format!("column '{}' is not a boolean: '{raw}'", field.column)))?,
                ),
                FieldKind::Int => MetaValue::Int(
                    raw.parse().map_err(|_| reject(format!("column '{}' is not an integer: '{raw}'", field.column)))?,
                ),
            };
            metadata.insert(field.key().to_string(), value);
        }
        Ok(KnowledgeEntry { id, document_text, metadata })
    }

    fn check(&self) -> Result<()> {
        if self.id.trim().is_empty() { return Err(Error::InvalidConfig("schema id is empty".into())); }
        if self.item_column.trim().is_empty() || self.choice_column.trim().is_empty() {
            return Err(Error::InvalidConfig(format!("schema '{}' has an empty key column", self.id)));
        }
        Ok(())
    }
}

fn key_cell<'r>(row: &'r SourceRow, column: &str, row_index: usize) -> Result<&'r str> {
    let value = row
        .get(column)
        .map(|v| v.trim())
        .ok_or_else(|| Error::RowValidation { row: row_index, reason: format!("missing column '{column}'") })?;
    if value.is_empty() {
        return Err(Error::RowValidation { row: row_index, reason: format!("empty key column '{column}'") });
    }
    Ok(value)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "1.0" | "yes" | "y" | "t" => Some(true),
        "false" | "0" | "0.0" | "no" | "n" | "f" => Some(false),
        _ => None,
    }
}

/// Schema id -> projection rule.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, RowSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for schema in [RowSchema::question_options(), RowSchema::stem_options()] {
            registry.schemas.insert(schema.id.clone(), schema);
        }
        registry
    }

    /// Built-ins plus configured schemas; a configured schema replaces a built-in with the same id.
    pub fn with_extra(extra: &[RowSchema]) -> Result<Self> {
        let mut registry = Self::builtin();
        for schema in extra { registry.register(schema.clone())?; }
        Ok(registry)
    }

    pub fn register(&mut self, schema: RowSchema) -> Result<()> {
        schema.check()?;
        self.schemas.insert(schema.id.clone(), schema);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&RowSchema> {
        self.schemas.get(id).ok_or_else(|| Error::UnknownSchema(id.to_string()))
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
