//! Native command tree → [`Command`] schema.
//!
//! The translator only sees [`NativeNode`]s, a framework-neutral snapshot of a
//! command tree. Adapters (see [`clap_tree`]) build that snapshot from a
//! concrete argument-parsing framework.
//!
//! Rules:
//! - hidden nodes disappear together with their subtree
//! - flag scopes are consulted `Local → Effective → Persistent`; the first
//!   scope declaring a name owns the field
//! - missing help text and defaults degrade to empty strings

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{Command, Field, FieldType};

pub mod clap_tree;

pub use clap_tree::{clap_forest, clap_node, translate_clap};

/// Declaration scope of a flag set, ordered most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    /// Declared on this node only.
    Local,
    /// Everything in effect on this node, inherited flags included.
    Effective,
    /// Declared on this node and inherited by its children.
    Persistent,
}

/// A flag as the native framework describes it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NativeFlag {
    pub name: String,
    pub default: String,
    pub usage: String,
    /// Framework value-kind label, e.g. `bool`, `int64`, `duration`.
    pub value_kind: String,
}

impl NativeFlag {
    pub fn new(name: impl Into<String>, value_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_kind: value_kind.into(),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagScope {
    pub kind: ScopeKind,
    pub flags: Vec<NativeFlag>,
}

impl FlagScope {
    pub fn new(kind: ScopeKind, flags: Vec<NativeFlag>) -> Self {
        Self { kind, flags }
    }
}

/// Framework-neutral command node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NativeNode {
    pub name: String,
    pub short_help: Option<String>,
    pub long_help: Option<String>,
    pub hidden: bool,
    pub flag_scopes: Vec<FlagScope>,
    pub children: Vec<NativeNode>,
}

impl NativeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_help(mut self, short: impl Into<String>, long: impl Into<String>) -> Self {
        self.short_help = Some(short.into());
        self.long_help = Some(long.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_scope(mut self, kind: ScopeKind, flags: Vec<NativeFlag>) -> Self {
        self.flag_scopes.push(FlagScope::new(kind, flags));
        self
    }

    pub fn with_child(mut self, child: NativeNode) -> Self {
        self.children.push(child);
        self
    }
}

/// Translate a native forest, dropping hidden roots.
pub fn translate(forest: &[NativeNode]) -> Vec<Command> {
    forest
        .iter()
        .filter(|node| !node.hidden)
        .map(translate_node)
        .collect()
}

fn translate_node(node: &NativeNode) -> Command {
    Command {
        name: node.name.clone(),
        description: join_description(node.short_help.as_deref(), node.long_help.as_deref()),
        fields: collect_fields(&node.flag_scopes),
        subcommands: translate(&node.children),
    }
}

/// Join short and long help with a single newline.
///
/// An empty (or whitespace-only) side is dropped together with the separator.
pub fn join_description(short: Option<&str>, long: Option<&str>) -> String {
    let short = short.map(str::trim).unwrap_or_default();
    let long = long.map(str::trim).unwrap_or_default();
    match (short.is_empty(), long.is_empty()) {
        (false, false) => format!("{short}\n{long}"),
        (false, true) => short.to_string(),
        (true, false) => long.to_string(),
        (true, true) => String::new(),
    }
}

fn collect_fields(scopes: &[FlagScope]) -> Vec<Field> {
    let mut ordered: Vec<&FlagScope> = scopes.iter().collect();
    // stable: scopes of the same kind keep adapter order
    ordered.sort_by_key(|scope| scope.kind);

    let mut seen: HashSet<&str> = HashSet::new();
    let mut fields = Vec::new();
    for scope in ordered {
        for flag in &scope.flags {
            if !seen.insert(flag.name.as_str()) {
                continue;
            }
            fields.push(Field {
                name: flag.name.clone(),
                default: flag.default.clone(),
                description: flag.usage.clone(),
                field_type: FieldType::from_value_kind(&flag.value_kind),
            });
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(name: &str, kind: &str, default: &str, usage: &str) -> NativeFlag {
        NativeFlag::new(name, kind)
            .with_default(default)
            .with_usage(usage)
    }

    fn sample_forest() -> Vec<NativeNode> {
        let subrun = NativeNode::new("subrun")
            .with_help("run subrun command", "")
            .with_scope(
                ScopeKind::Local,
                vec![flag("attempts", "int", "3", "sub attempts")],
            )
            .with_scope(
                ScopeKind::Effective,
                vec![
                    flag("attempts", "int", "3", "sub attempts"),
                    flag("config", "string", "", "config file (optional)"),
                ],
            );
        let secret = NativeNode::new("secret")
            .hidden()
            .with_child(NativeNode::new("inner"));
        let run = NativeNode::new("run")
            .with_help("run command", "runs things")
            .with_scope(
                ScopeKind::Local,
                vec![
                    flag("attempts", "int", "5", "int"),
                    flag("debug", "bool", "false", "bool"),
                    flag("price", "float64", "0", "float64"),
                    flag("max-duration", "duration", "0s", "duration"),
                ],
            )
            .with_scope(
                ScopeKind::Persistent,
                vec![flag("config", "string", "", "config file (optional)")],
            )
            .with_child(subrun)
            .with_child(secret);
        vec![NativeNode::new("version").with_help("print version", ""), run]
    }

    #[test]
    fn translation_is_deterministic() {
        let forest = sample_forest();
        assert_eq!(translate(&forest), translate(&forest));
    }

    #[test]
    fn hidden_nodes_drop_their_subtree() {
        let out = translate(&sample_forest());
        let run = &out[1];
        assert_eq!(run.subcommands.len(), 1);
        assert_eq!(run.subcommands[0].name, "subrun");
        let dump = serde_json::to_string(&out).unwrap();
        assert!(!dump.contains("secret"));
        assert!(!dump.contains("inner"));
    }

    #[test]
    fn hidden_root_is_dropped() {
        let forest = vec![NativeNode::new("a").hidden(), NativeNode::new("b")];
        let out = translate(&forest);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "b");
    }

    #[test]
    fn first_scope_wins_on_duplicate_names() {
        let node = NativeNode::new("cmd")
            .with_scope(
                ScopeKind::Persistent,
                vec![flag("level", "string", "persistent", "from persistent")],
            )
            .with_scope(
                ScopeKind::Effective,
                vec![flag("level", "string", "effective", "from effective")],
            )
            .with_scope(
                ScopeKind::Local,
                vec![flag("level", "int", "7", "from local")],
            );
        let out = translate(&[node]);
        let fields = &out[0].fields;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].default, "7");
        assert_eq!(fields[0].description, "from local");
        assert_eq!(fields[0].field_type, FieldType::Number);
    }

    #[test]
    fn fields_follow_discovery_order() {
        let out = translate(&sample_forest());
        let names: Vec<_> = out[1].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["attempts", "debug", "price", "max-duration", "config"]);

        let subrun = &out[1].subcommands[0];
        let names: Vec<_> = subrun.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["attempts", "config"]);
        assert_eq!(subrun.field("attempts").unwrap().default, "3");
    }

    #[test]
    fn field_types_follow_value_kinds() {
        let out = translate(&sample_forest());
        let run = &out[1];
        assert_eq!(run.field("debug").unwrap().field_type, FieldType::Boolean);
        assert_eq!(run.field("price").unwrap().field_type, FieldType::Number);
        assert_eq!(run.field("max-duration").unwrap().field_type, FieldType::Text);
        assert_eq!(run.field("config").unwrap().field_type, FieldType::Text);
    }

    #[test]
    fn description_joins_without_dangling_separator() {
        assert_eq!(join_description(Some("a"), Some("b")), "a\nb");
        assert_eq!(join_description(Some("a"), None), "a");
        assert_eq!(join_description(Some("a"), Some("  ")), "a");
        assert_eq!(join_description(None, Some("b")), "b");
        assert_eq!(join_description(None, None), "");
    }

    #[test]
    fn empty_nodes_degrade_to_empty_strings() {
        let out = translate(&[NativeNode::new("bare")]);
        assert_eq!(out[0].description, "");
        assert!(out[0].fields.is_empty());
        assert!(out[0].subcommands.is_empty());
    }
}
