//! Presentation-agnostic command schema.
//!
//! A translated tree is plain data: [`Command`] nodes owning their [`Field`]s
//! and child commands. Once built it is never mutated, so it is shared between
//! jobs and remote callers behind an `Arc`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse semantic type of a field, used by callers to pick an input widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Number,
    Text,
}

impl FieldType {
    /// Map a native value-kind label onto the coarse type.
    ///
    /// Unknown kinds fall back to [`FieldType::Text`].
    pub fn from_value_kind(kind: &str) -> Self {
        match kind {
            "bool" => FieldType::Boolean,
            "int" | "int8" | "int16" | "int32" | "int64" | "int128" | "isize" | "uint"
            | "uint8" | "uint16" | "uint32" | "uint64" | "uint128" | "usize" | "float32"
            | "float64" => FieldType::Number,
            "string" | "duration" => FieldType::Text,
            _ => FieldType::Text,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Number => "number",
            FieldType::Text => "text",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One configurable parameter of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Default value in its canonical string form (may be empty).
    pub default: String,
    pub description: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// A translated command node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub description: String,
    /// Discovery order, not alphabetical.
    pub fields: Vec<Field>,
    pub subcommands: Vec<Command>,
}

impl Command {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn subcommand(&self, name: &str) -> Option<&Command> {
        self.subcommands.iter().find(|c| c.name == name)
    }
}

/// Resolve a path of command names against a translated forest.
///
/// Returns `None` for an empty path or when any segment is missing.
pub fn resolve<'a, S: AsRef<str>>(forest: &'a [Command], path: &[S]) -> Option<&'a Command> {
    let (first, rest) = path.split_first()?;
    let mut current = forest.iter().find(|c| c.name == first.as_ref())?;
    for segment in rest {
        current = current.subcommand(segment.as_ref())?;
    }
    Some(current)
}

/// Ordered command names from a root to a selected command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandPath(Vec<String>);

impl CommandPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a space- or slash-separated path (`"run subrun"`, `"run/subrun"`).
    pub fn parse(raw: &str) -> Self {
        Self::new(
            raw.split(|c: char| c.is_whitespace() || c == '/')
                .filter(|s| !s.is_empty()),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }
}

impl fmt::Display for CommandPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str) -> Command {
        Command {
            name: name.into(),
            description: String::new(),
            fields: Vec::new(),
            subcommands: Vec::new(),
        }
    }

    #[test]
    fn value_kinds_map_to_coarse_types() {
        assert_eq!(FieldType::from_value_kind("bool"), FieldType::Boolean);
        for kind in ["int", "int64", "uint", "uint64", "float64", "float32", "usize"] {
            assert_eq!(FieldType::from_value_kind(kind), FieldType::Number, "{kind}");
        }
        for kind in ["string", "duration", "ipNet", ""] {
            assert_eq!(FieldType::from_value_kind(kind), FieldType::Text, "{kind}");
        }
    }

    #[test]
    fn field_serializes_type_key() {
        let field = Field {
            name: "debug".into(),
            default: "false".into(),
            description: "bool".into(),
            field_type: FieldType::Boolean,
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["type"], "boolean");
        assert_eq!(json["default"], "false");
    }

    #[test]
    fn resolve_walks_nested_names() {
        let mut run = leaf("run");
        run.subcommands.push(leaf("subrun"));
        let forest = vec![leaf("version"), run];

        assert_eq!(resolve(&forest, &["run", "subrun"]).unwrap().name, "subrun");
        assert_eq!(resolve(&forest, &["version"]).unwrap().name, "version");
        assert!(resolve(&forest, &["run", "missing"]).is_none());
        assert!(resolve::<&str>(&forest, &[]).is_none());
    }

    #[test]
    fn command_path_parses_and_displays() {
        let path = CommandPath::parse(" run/subrun ");
        assert_eq!(path.segments(), ["run", "subrun"]);
        assert_eq!(path.to_string(), "run subrun");
        assert_eq!(CommandPath::parse("run").child("subrun"), path);
    }
}
