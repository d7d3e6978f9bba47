//! `clap::Command` → [`NativeNode`] adapter.
//!
//! Expects an unbuilt command (e.g. from `CommandFactory::command()`), so the
//! auto-generated `help` subcommand and `--help`/`--version` flags are absent;
//! explicitly declared help/version arguments are skipped anyway.
//!
//! Scope mapping:
//! - `Local`: the node's own non-global arguments
//! - `Effective`: own arguments, then globals inherited from ancestors
//!   (nearest ancestor first)
//! - `Persistent`: the node's own global arguments

use std::any::TypeId;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, Command};

use super::{NativeFlag, NativeNode, ScopeKind, translate};
use crate::model;

/// Snapshot a single clap command (and its subtree) with no inherited flags.
pub fn clap_node(cmd: &Command) -> NativeNode {
    node_with_inherited(cmd, &[])
}

/// Snapshot the subcommands of `root`, each inheriting root's global flags.
///
/// This is the forest a server exposes: the root binary itself is not an
/// invocable command.
pub fn clap_forest(root: &Command) -> Vec<NativeNode> {
    let inherited: Vec<&Arg> = parameters(root).filter(|a| a.is_global_set()).collect();
    root.get_subcommands()
        .map(|sub| node_with_inherited(sub, &inherited))
        .collect()
}

/// Translate the subcommands of a clap root in one go.
pub fn translate_clap(root: &Command) -> Vec<model::Command> {
    translate(&clap_forest(root))
}

fn node_with_inherited<'a>(cmd: &'a Command, inherited: &[&'a Arg]) -> NativeNode {
    let own: Vec<&Arg> = parameters(cmd).collect();

    let local = own
        .iter()
        .filter(|a| !a.is_global_set())
        .map(|a| native_flag(a))
        .collect();
    let effective = own
        .iter()
        .chain(inherited.iter())
        .map(|a| native_flag(a))
        .collect();
    let persistent = own
        .iter()
        .filter(|a| a.is_global_set())
        .map(|a| native_flag(a))
        .collect();

    let mut passed: Vec<&Arg> = own.iter().copied().filter(|a| a.is_global_set()).collect();
    passed.extend(inherited.iter().copied());

    NativeNode {
        name: cmd.get_name().to_string(),
        short_help: cmd.get_about().map(|s| s.to_string()),
        long_help: cmd.get_long_about().map(|s| s.to_string()),
        hidden: cmd.is_hide_set(),
        flag_scopes: vec![
            super::FlagScope::new(ScopeKind::Local, local),
            super::FlagScope::new(ScopeKind::Effective, effective),
            super::FlagScope::new(ScopeKind::Persistent, persistent),
        ],
        children: cmd
            .get_subcommands()
            .map(|sub| node_with_inherited(sub, &passed))
            .collect(),
    }
}

/// Arguments that describe a configurable flag.
fn parameters(cmd: &Command) -> impl Iterator<Item = &Arg> {
    cmd.get_arguments().filter(|arg| {
        !arg.is_positional()
            && !arg.is_hide_set()
            && !matches!(
                arg.get_action(),
                ArgAction::Help | ArgAction::HelpShort | ArgAction::HelpLong | ArgAction::Version
            )
    })
}

fn native_flag(arg: &Arg) -> NativeFlag {
    let name = arg
        .get_long()
        .map(str::to_string)
        .unwrap_or_else(|| arg.get_id().as_str().to_string());
    NativeFlag {
        name,
        default: default_string(arg),
        usage: arg
            .get_help()
            .or_else(|| arg.get_long_help())
            .map(|s| s.to_string())
            .unwrap_or_default(),
        value_kind: value_kind(arg).to_string(),
    }
}

fn default_string(arg: &Arg) -> String {
    let values = arg.get_default_values();
    if !values.is_empty() {
        return values
            .iter()
            .map(|v| v.to_string_lossy())
            .collect::<Vec<_>>()
            .join(",");
    }
    // clap fills these in at build time; mirror it for unbuilt commands
    match arg.get_action() {
        ArgAction::SetTrue => "false".to_string(),
        ArgAction::SetFalse => "true".to_string(),
        ArgAction::Count => "0".to_string(),
        _ => String::new(),
    }
}

fn value_kind(arg: &Arg) -> &'static str {
    match arg.get_action() {
        ArgAction::SetTrue | ArgAction::SetFalse => return "bool",
        ArgAction::Count => return "uint8",
        _ => {}
    }
    let produced = arg.get_value_parser().type_id();
    known_kinds()
        .into_iter()
        .find(|(id, _)| produced == *id)
        .map(|(_, kind)| kind)
        .unwrap_or("unknown")
}

fn known_kinds() -> [(TypeId, &'static str); 18] {
    [
        (TypeId::of::<bool>(), "bool"),
        (TypeId::of::<i8>(), "int8"),
        (TypeId::of::<i16>(), "int16"),
        (TypeId::of::<i32>(), "int32"),
        (TypeId::of::<i64>(), "int64"),
        (TypeId::of::<isize>(), "int"),
        (TypeId::of::<u8>(), "uint8"),
        (TypeId::of::<u16>(), "uint16"),
        (TypeId::of::<u32>(), "uint32"),
        (TypeId::of::<u64>(), "uint64"),
        (TypeId::of::<usize>(), "uint"),
        (TypeId::of::<f32>(), "float32"),
        (TypeId::of::<f64>(), "float64"),
        (TypeId::of::<String>(), "string"),
        (TypeId::of::<PathBuf>(), "string"),
        (TypeId::of::<std::ffi::OsString>(), "string"),
        (TypeId::of::<char>(), "string"),
        (TypeId::of::<Duration>(), "duration"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;
    use clap::value_parser;

    fn sample() -> Command {
        Command::new("app")
            .arg(
                Arg::new("verbose")
                    .long("verbose")
                    .global(true)
                    .action(ArgAction::SetTrue)
                    .help("loud output"),
            )
            .subcommand(
                Command::new("run")
                    .about("run command")
                    .long_about("runs the ticking job")
                    .arg(
                        Arg::new("attempts")
                            .long("attempts")
                            .value_parser(value_parser!(i64))
                            .default_value("5")
                            .help("int"),
                    )
                    .arg(
                        Arg::new("price")
                            .long("price")
                            .value_parser(value_parser!(f64))
                            .default_value("0"),
                    )
                    .arg(
                        Arg::new("config")
                            .long("config")
                            .global(true)
                            .help("config file (optional)"),
                    )
                    .arg(Arg::new("target"))
                    .subcommand(
                        Command::new("subrun").about("nested").arg(
                            Arg::new("attempts")
                                .long("attempts")
                                .value_parser(value_parser!(u32))
                                .default_value("3")
                                .help("sub attempts"),
                        ),
                    ),
            )
            .subcommand(
                Command::new("internal")
                    .hide(true)
                    .subcommand(Command::new("deeper")),
            )
    }

    #[test]
    fn forest_marks_hidden_and_translation_drops_it() {
        let forest = clap_forest(&sample());
        assert_eq!(forest.len(), 2);
        assert!(forest[1].hidden);

        let out = translate_clap(&sample());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "run");
    }

    #[test]
    fn run_fields_cover_local_effective_and_inherited() {
        let out = translate_clap(&sample());
        let run = &out[0];
        assert_eq!(run.description, "run command\nruns the ticking job");

        let names: Vec<_> = run.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["attempts", "price", "config", "verbose"]);

        let attempts = run.field("attempts").unwrap();
        assert_eq!(attempts.field_type, FieldType::Number);
        assert_eq!(attempts.default, "5");
        assert_eq!(attempts.description, "int");

        let verbose = run.field("verbose").unwrap();
        assert_eq!(verbose.field_type, FieldType::Boolean);
        assert_eq!(verbose.default, "false");

        assert_eq!(run.field("config").unwrap().field_type, FieldType::Text);
        assert!(run.field("target").is_none());
    }

    #[test]
    fn child_redeclaration_beats_inherited_globals() {
        let out = translate_clap(&sample());
        let subrun = &out[0].subcommands[0];
        assert_eq!(subrun.description, "nested");

        let names: Vec<_> = subrun.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["attempts", "config", "verbose"]);
        let attempts = subrun.field("attempts").unwrap();
        assert_eq!(attempts.default, "3");
        assert_eq!(attempts.description, "sub attempts");
    }

    #[test]
    fn help_and_version_flags_are_not_fields() {
        let cmd = Command::new("root").subcommand(
            Command::new("leaf")
                .disable_help_flag(true)
                .arg(Arg::new("help").long("help").action(ArgAction::Help))
                .arg(Arg::new("count").short('c').action(ArgAction::Count)),
        );
        let out = translate_clap(&cmd);
        let leaf = &out[0];
        assert_eq!(leaf.fields.len(), 1);
        assert_eq!(leaf.fields[0].name, "count");
        assert_eq!(leaf.fields[0].default, "0");
        assert_eq!(leaf.fields[0].field_type, FieldType::Number);
    }
}
