//! Field selection for the result surface.

use serde_json::{json, Map, Value};

use crate::error::{Result, ViewError};
use crate::query::clockspec::clock_string;
use crate::query::RuleMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Exists,
    New,
    Type,
    Size,
    Mode,
    Mtime,
    Ctime,
    OClock,
    CClock,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "name" => Some(Self::Name),
            "exists" => Some(Self::Exists),
            "new" => Some(Self::New),
            "type" => Some(Self::Type),
            "size" => Some(Self::Size),
            "mode" => Some(Self::Mode),
            "mtime" => Some(Self::Mtime),
            "ctime" => Some(Self::Ctime),
            "oclock" => Some(Self::OClock),
            "cclock" => Some(Self::CClock),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Exists => "exists",
            Self::New => "new",
            Self::Type => "type",
            Self::Size => "size",
            Self::Mode => "mode",
            Self::Mtime => "mtime",
            Self::Ctime => "ctime",
            Self::OClock => "oclock",
            Self::CClock => "cclock",
        }
    }
}

/// The set of fields rendered for each result file.
#[derive(Debug, Clone)]
pub struct FieldList(Vec<Field>);

impl Default for FieldList {
    fn default() -> Self {
        Self(vec![Field::Name, Field::Exists, Field::New])
    }
}

impl FieldList {
    pub fn parse(value: Option<&Value>) -> Result<Self> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let list = value
            .as_array()
            .ok_or_else(|| ViewError::parse("'fields' must be an array of field names"))?;
        let mut fields = Vec::with_capacity(list.len());
        for entry in list {
            let name = entry
                .as_str()
                .ok_or_else(|| ViewError::parse("'fields' entries must be strings"))?;
            let field = Field::parse(name)
                .ok_or_else(|| ViewError::parse(format!("unknown field {name:?}")))?;
            fields.push(field);
        }
        if fields.is_empty() {
            return Err(ViewError::parse("'fields' must not be empty"));
        }
        Ok(Self(fields))
    }

    /// A lone `name` field renders each file as a bare string.
    pub fn is_name_only(&self) -> bool {
        self.0 == [Field::Name]
    }

    pub fn render(&self, rule_match: &RuleMatch, instance_id: u64) -> Value {
        if self.is_name_only() {
            return Value::String(rule_match.relname.to_string());
        }
        let file = &rule_match.file;
        let mut object = Map::new();
        for field in &self.0 {
            let value = match field {
                Field::Name => json!(rule_match.relname.to_string()),
                Field::Exists => json!(file.exists),
                Field::New => json!(rule_match.is_new),
                Field::Type => json!(file.file_type.as_char().to_string()),
                Field::Size => json!(file.size),
                Field::Mode => json!(file.mode),
                Field::Mtime => json!(file.mtime),
                Field::Ctime => json!(file.ctime),
                Field::OClock => json!(clock_string(instance_id, file.oclock.tick)),
                Field::CClock => json!(clock_string(instance_id, file.cclock.tick)),
            };
            object.insert(field.label().to_string(), value);
        }
        Value::Object(object)
    }
}
