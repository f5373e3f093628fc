//! Command processing
//!
//! Parses operator input into structured commands and dispatches them
//! against the session. Every command reports a distinguishable outcome so
//! one-shot invocations can surface it as a process exit code.

use std::collections::BTreeSet;
use std::path::PathBuf;

use colored::Colorize;

use crate::app::session::Session;
use crate::core::guid::Guid;
use crate::core::monitor::{CoFilter, MethodTarget, Monitor, MonitorNotice};
use crate::debug::EngineTarget;

const MONITOR_NOT_ENABLED: &str = "COM monitor not enabled for the current process.";

/// Operator commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoCommand {
    /// Rebuild the metadata index: `index [source]`
    Index { source: Option<PathBuf> },
    /// Persist the metadata index: `save <path>`
    Save { path: PathBuf },
    /// Replace the metadata index from a saved file: `load <path>`
    Load { path: PathBuf },
    /// Resolve an interface: `showi <iid>`
    ShowInterface { iid: Guid },
    /// Resolve a class: `showc <clsid>`
    ShowClass { clsid: Guid },
    /// Start monitoring: `attach [clsid...] [-i|-e]`
    Attach { filter: CoFilter },
    Pause,
    Resume,
    Detach,
    Status,
    /// Place a COM breakpoint: `bp <clsid> <iid> <method-index|method-name>`
    Break {
        clsid: Guid,
        iid: Guid,
        target: MethodTarget,
    },
    /// List breakpoints: `bl`
    ListBreakpoints,
    /// Delete a breakpoint: `bd <id>`
    DeleteBreakpoint { id: u32 },
    /// Manually register a vtable: `reg <clsid> <iid> <address>`
    Register {
        clsid: Guid,
        iid: Guid,
        address: u64,
    },
    Help,
    Quit,
}

/// Result of executing one command, distinguishable by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    OperationFailed,
    InvalidArguments,
    /// Attached-only command issued while no monitor is active.
    NotEnabled,
    /// REPL exit request.
    Quit,
}

impl CommandOutcome {
    /// Process exit code for one-shot invocations.
    pub fn exit_code(self) -> i32 {
        match self {
            CommandOutcome::Success | CommandOutcome::Quit => 0,
            CommandOutcome::OperationFailed => 1,
            CommandOutcome::InvalidArguments => 2,
            CommandOutcome::NotEnabled => 3,
        }
    }
}

/// Split an input line into tokens. Quotes (single or double) group, and
/// both whitespace and commas separate - GUID lists are usually pasted
/// comma-separated from registry dumps.
pub fn split_args(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    if !token.is_empty() {
                        tokens.push(std::mem::take(&mut token));
                    }
                    quote = None;
                } else {
                    token.push(c);
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                } else if c.is_whitespace() || c == ',' {
                    if !token.is_empty() {
                        tokens.push(std::mem::take(&mut token));
                    }
                } else {
                    token.push(c);
                }
            }
        }
    }
    if !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

/// Parse an address from a hex or decimal token (0x prefix, bare hex for
/// longer strings, decimal otherwise).
fn parse_address(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if s.chars().all(|c| c.is_ascii_hexdigit()) && s.len() > 4 {
        u64::from_str_radix(s, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_guid(token: &str, what: &str) -> Result<Guid, String> {
    token
        .parse()
        .map_err(|_| format!("incorrect format of {}: '{}'", what, token))
}

/// Parse the filter arguments of `attach`: GUIDs plus an optional `-i`/`-e`
/// flag. No flag means Including when GUIDs are present, NoFilter otherwise.
fn parse_filter(tokens: &[String]) -> Result<CoFilter, String> {
    #[derive(Clone, Copy)]
    enum Kind {
        Including,
        Excluding,
    }

    let mut kind = None;
    let mut clsids = BTreeSet::new();
    for token in tokens {
        match token.as_str() {
            "-i" => kind = Some(Kind::Including),
            "-e" => kind = Some(Kind::Excluding),
            other => {
                clsids.insert(parse_guid(other, "CLSID")?);
            }
        }
    }

    Ok(match kind {
        Some(Kind::Including) => CoFilter::Including(clsids),
        Some(Kind::Excluding) => CoFilter::Excluding(clsids),
        None if clsids.is_empty() => CoFilter::NoFilter,
        None => CoFilter::Including(clsids),
    })
}

/// Parse a tokenized input line into a command.
pub fn parse_command(tokens: &[String]) -> Result<CoCommand, String> {
    let Some(name) = tokens.first() else {
        return Err("empty command".into());
    };
    let args = &tokens[1..];

    let expect_args = |n: usize| -> Result<(), String> {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("'{}' expects {} argument(s)", name, n))
        }
    };

    match name.as_str() {
        "index" => match args {
            [] => Ok(CoCommand::Index { source: None }),
            [source] => Ok(CoCommand::Index {
                source: Some(PathBuf::from(source)),
            }),
            _ => Err("'index' expects at most one argument".into()),
        },
        "save" => {
            expect_args(1)?;
            Ok(CoCommand::Save {
                path: PathBuf::from(&args[0]),
            })
        }
        "load" => {
            expect_args(1)?;
            Ok(CoCommand::Load {
                path: PathBuf::from(&args[0]),
            })
        }
        "showi" => {
            expect_args(1)?;
            Ok(CoCommand::ShowInterface {
                iid: parse_guid(&args[0], "IID")?,
            })
        }
        "showc" => {
            expect_args(1)?;
            Ok(CoCommand::ShowClass {
                clsid: parse_guid(&args[0], "CLSID")?,
            })
        }
        "attach" => Ok(CoCommand::Attach {
            filter: parse_filter(args)?,
        }),
        "pause" => {
            expect_args(0)?;
            Ok(CoCommand::Pause)
        }
        "resume" => {
            expect_args(0)?;
            Ok(CoCommand::Resume)
        }
        "detach" => {
            expect_args(0)?;
            Ok(CoCommand::Detach)
        }
        "status" => {
            expect_args(0)?;
            Ok(CoCommand::Status)
        }
        "bp" => {
            expect_args(3)?;
            let clsid = parse_guid(&args[0], "CLSID")?;
            let iid = parse_guid(&args[1], "IID")?;
            // Numeric parse first; anything else is a method name. Both
            // paths end up as a slot ordinal before placement.
            let target = match args[2].parse::<u32>() {
                Ok(index) => MethodTarget::Index(index),
                Err(_) => MethodTarget::Name(args[2].clone()),
            };
            Ok(CoCommand::Break { clsid, iid, target })
        }
        "bl" => {
            expect_args(0)?;
            Ok(CoCommand::ListBreakpoints)
        }
        "bd" => {
            expect_args(1)?;
            let id = args[0]
                .parse::<u32>()
                .map_err(|_| format!("invalid breakpoint id: '{}'", args[0]))?;
            Ok(CoCommand::DeleteBreakpoint { id })
        }
        "reg" => {
            expect_args(3)?;
            let clsid = parse_guid(&args[0], "CLSID")?;
            let iid = parse_guid(&args[1], "IID")?;
            let address = parse_address(&args[2])
                .ok_or_else(|| format!("invalid vtable address: '{}'", args[2]))?;
            Ok(CoCommand::Register {
                clsid,
                iid,
                address,
            })
        }
        "help" | "?" => Ok(CoCommand::Help),
        "quit" | "exit" | "q" => Ok(CoCommand::Quit),
        other => Err(format!("unknown command: '{}'", other)),
    }
}

/// Parse and execute one input line.
pub fn run_line(session: &mut Session, target: EngineTarget, line: &str) -> CommandOutcome {
    let tokens = split_args(line);
    if tokens.is_empty() {
        eprintln!(
            "{} invalid arguments. Run 'help' to check the syntax.",
            "ERROR:".red()
        );
        return CommandOutcome::InvalidArguments;
    }
    match parse_command(&tokens) {
        Ok(command) => execute_command(session, target, command),
        Err(message) => {
            eprintln!(
                "{} {}. Run 'help' to check the syntax.",
                "ERROR:".red(),
                message
            );
            CommandOutcome::InvalidArguments
        }
    }
}

/// Execute a parsed command against the session.
pub fn execute_command(
    session: &mut Session,
    target: EngineTarget,
    command: CoCommand,
) -> CommandOutcome {
    // Fold in whatever the engine observed since the last command.
    pump_monitor(session);

    match command {
        CoCommand::Index { source } => {
            let result = match source {
                Some(path) => session.metadata_mut().index_source(&path),
                None => session.metadata_mut().index(),
            };
            match result {
                Ok(stats) => {
                    println!(
                        "Indexed {} record(s), {} skipped.",
                        stats.indexed, stats.skipped
                    );
                    CommandOutcome::Success
                }
                Err(e) => {
                    eprintln!("{} {}", "ERROR:".red(), e);
                    CommandOutcome::OperationFailed
                }
            }
        }
        CoCommand::Save { path } => match session.metadata().save(&path) {
            Ok(()) => {
                println!("Metadata index saved to {}.", path.display());
                CommandOutcome::Success
            }
            Err(e) => {
                eprintln!("{} {}", "ERROR:".red(), e);
                CommandOutcome::OperationFailed
            }
        },
        CoCommand::Load { path } => match session.metadata_mut().load(&path) {
            Ok(stats) => {
                println!(
                    "Loaded {} record(s), {} skipped.",
                    stats.indexed, stats.skipped
                );
                CommandOutcome::Success
            }
            Err(e) => {
                eprintln!("{} {}", "ERROR:".red(), e);
                CommandOutcome::OperationFailed
            }
        },
        CoCommand::ShowInterface { iid } => {
            show_interface(session, iid);
            CommandOutcome::Success
        }
        CoCommand::ShowClass { clsid } => {
            show_class(session, clsid);
            CommandOutcome::Success
        }
        CoCommand::Attach { filter } => {
            if session.is_attached() {
                eprintln!(
                    "{} COM monitor is already enabled for the current process.",
                    "ERROR:".red()
                );
                return CommandOutcome::OperationFailed;
            }
            let engine = match target.connect() {
                Ok(engine) => engine,
                Err(e) => {
                    eprintln!("{} {}", "ERROR:".red(), e);
                    return CommandOutcome::OperationFailed;
                }
            };
            match session.attach(engine, filter.clone()) {
                Ok(()) => {
                    println!("{}", "COM monitor enabled for the current process.".bold());
                    print_filter(&filter);
                    CommandOutcome::Success
                }
                Err(e) => {
                    eprintln!("{} {}", "ERROR:".red(), e);
                    CommandOutcome::OperationFailed
                }
            }
        }
        CoCommand::Pause => with_monitor(session, |monitor, _| {
            monitor.pause();
            println!("COM monitor paused.");
            CommandOutcome::Success
        }),
        CoCommand::Resume => with_monitor(session, |monitor, _| {
            monitor.resume();
            println!("COM monitor resumed.");
            CommandOutcome::Success
        }),
        CoCommand::Detach => {
            // Idempotent by contract: detaching twice is a quiet no-op.
            if session.is_attached() {
                session.detach();
                println!("COM monitor disabled for the current process.");
            }
            CommandOutcome::Success
        }
        CoCommand::Status => {
            if session.monitor().is_none() {
                eprintln!("{} {}", "ERROR:".red(), MONITOR_NOT_ENABLED);
                return CommandOutcome::NotEnabled;
            }
            show_status(session);
            CommandOutcome::Success
        }
        CoCommand::Break { clsid, iid, target } => with_monitor(session, |monitor, metadata| {
            match monitor.create_cobreakpoint(metadata, clsid, iid, &target) {
                Ok(id) => {
                    let pending = monitor
                        .list_breakpoints()
                        .iter()
                        .any(|bp| bp.id == id && bp.is_pending());
                    if pending {
                        println!("Breakpoint {} recorded (pending: no vtable known yet).", id);
                    } else {
                        println!("Breakpoint {} created.", id);
                    }
                    CommandOutcome::Success
                }
                Err(e) => {
                    eprintln!("{} {}", "ERROR:".red(), e);
                    CommandOutcome::OperationFailed
                }
            }
        }),
        CoCommand::ListBreakpoints => with_monitor(session, |monitor, _| {
            for breakpoint in monitor.list_breakpoints() {
                let addresses = if breakpoint.is_pending() {
                    "(pending)".to_string()
                } else {
                    breakpoint
                        .locations
                        .iter()
                        .map(|location| format!("{:#x}", location.address))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                println!(
                    "{}: {}, address: {}",
                    breakpoint.id, breakpoint.description, addresses
                );
            }
            CommandOutcome::Success
        }),
        CoCommand::DeleteBreakpoint { id } => with_monitor(session, |monitor, _| {
            match monitor.remove_cobreakpoint(id) {
                Ok(()) => {
                    println!("Breakpoint {} removed.", id);
                    CommandOutcome::Success
                }
                Err(e) => {
                    eprintln!("{} {}", "ERROR:".red(), e);
                    CommandOutcome::OperationFailed
                }
            }
        }),
        CoCommand::Register {
            clsid,
            iid,
            address,
        } => with_monitor(session, |monitor, _| {
            if monitor.register_vtable(clsid, iid, address) {
                println!(
                    "VTable at {:#x} registered for CLSID {} / IID {}.",
                    address, clsid, iid
                );
            } else {
                println!("VTable at {:#x} was already registered.", address);
            }
            CommandOutcome::Success
        }),
        CoCommand::Help => {
            print_help();
            CommandOutcome::Success
        }
        CoCommand::Quit => CommandOutcome::Quit,
    }
}

// Runs an attached-only command, or reports the standard precondition
// failure when no monitor is active.
fn with_monitor<F>(session: &mut Session, run: F) -> CommandOutcome
where
    F: FnOnce(&mut Monitor, &crate::core::metadata::MetadataIndex) -> CommandOutcome,
{
    let (metadata, monitor) = session.metadata_and_monitor();
    match monitor {
        Some(monitor) => run(monitor, metadata),
        None => {
            eprintln!("{} {}", "ERROR:".red(), MONITOR_NOT_ENABLED);
            CommandOutcome::NotEnabled
        }
    }
}

fn pump_monitor(session: &mut Session) {
    let Some(monitor) = session.find_active_monitor() else {
        return;
    };
    for notice in monitor.drain_events() {
        match notice {
            MonitorNotice::VTableRegistered(entry) => println!(
                "{}",
                format!(
                    "[*] vtable discovered: CLSID {} IID {} at {:#x} ({})",
                    entry.clsid, entry.iid, entry.address, entry.width
                )
                .dimmed()
            ),
            MonitorNotice::BreakpointHit { address } => {
                println!(
                    "{}",
                    format!("[!] COM breakpoint hit at {:#x}", address).yellow()
                );
            }
        }
    }
}

fn show_interface(session: &Session, iid: Guid) {
    let metadata = session.metadata();
    match metadata.resolve_type(iid) {
        Some(record) => {
            println!("Found: {} ({})", iid, record.name.bold());
            match metadata.get_type_methods(iid) {
                Some(methods) => {
                    println!("\nMethods:");
                    for (index, method) in methods.iter().enumerate() {
                        println!("- [{}] {}", index, method);
                    }
                }
                None => println!("No information about the interface methods."),
            }
        }
        None => println!("Can't find any details on IID: {} in the metadata.", iid),
    }

    println!("\nRegistered VTables for IID:");
    if let Some(monitor) = session.monitor() {
        for entry in monitor.registry().find_vtables_by_iid(iid) {
            let class_name = metadata.resolve_class_name(entry.clsid).unwrap_or("N/A");
            println!(
                "- Module: {} ({}), CLSID: {} ({}), VTable offset: {:#x}",
                entry.module, entry.width, entry.clsid, class_name, entry.address
            );
        }
    }
}

fn show_class(session: &Session, clsid: Guid) {
    let metadata = session.metadata();
    match metadata.resolve_class(clsid) {
        Some(record) => println!("Found: {} ({})", clsid, record.name.bold()),
        None => println!("Can't find any details on CLSID: {} in the metadata.", clsid),
    }

    println!("\nRegistered VTables for CLSID:");
    if let Some(monitor) = session.monitor() {
        for entry in monitor.registry().find_vtables_by_clsid(clsid) {
            let iid_name = metadata.resolve_type_name(entry.iid).unwrap_or("N/A");
            println!(
                "- Module: {} ({}), IID: {} ({}), VTable offset: {:#x}",
                entry.module, entry.width, entry.iid, iid_name, entry.address
            );
        }
    }
}

fn show_status(session: &Session) {
    let Some(monitor) = session.monitor() else {
        return;
    };
    let state = if monitor.is_paused() {
        "PAUSED".yellow()
    } else {
        "RUNNING".green()
    };
    println!("COM monitor is {} (pid {})", state, monitor.process_id());
    print_filter(monitor.filter());

    let metadata = session.metadata();
    println!("\nCOM types recorded for the current process:");
    for (clsid, vtables) in monitor.registry().list_cotypes() {
        let class_name = metadata.resolve_class_name(clsid).unwrap_or("N/A");
        println!("\nCLSID: {} ({})", clsid, class_name.bold());
        for (address, iid) in vtables {
            let iid_name = metadata.resolve_type_name(iid).unwrap_or("N/A");
            println!("  IID: {} ({}), address: {:#x}", iid, iid_name, address);
        }
    }
}

fn print_filter(filter: &CoFilter) {
    match filter {
        CoFilter::NoFilter => {}
        CoFilter::Including(clsids) => {
            println!("\nCLSIDs to monitor:");
            for clsid in clsids {
                println!("- {}", clsid);
            }
        }
        CoFilter::Excluding(clsids) => {
            println!("\nCLSIDs to EXCLUDE while monitoring:");
            for clsid in clsids {
                println!("- {}", clsid);
            }
        }
    }
}

fn print_help() {
    println!("{}", "COM monitor commands".bold().cyan());
    println!("{}", "═".repeat(50).cyan());

    println!("\n{}", "Metadata:".bold().yellow());
    println!("  {}        Rebuild the metadata index", "index [src]".green());
    println!("  {}        Save the metadata index", "save <path>".green());
    println!("  {}        Load a saved metadata index", "load <path>".green());
    println!("  {}        Resolve an interface by IID", "showi <iid>".green());
    println!("  {}      Resolve a class by CLSID", "showc <clsid>".green());

    println!("\n{}", "Monitoring:".bold().yellow());
    println!(
        "  {}  Start monitoring (optional CLSID filter)",
        "attach [clsid...] [-i|-e]".green()
    );
    println!("  {}              Suspend monitor bookkeeping", "pause".green());
    println!("  {}             Resume monitor bookkeeping", "resume".green());
    println!(
        "  {}             Stop monitoring, drop breakpoints",
        "detach".green()
    );
    println!(
        "  {}             Monitor state and recorded types",
        "status".green()
    );

    println!("\n{}", "Breakpoints:".bold().yellow());
    println!(
        "  {}  Break on a virtual method",
        "bp <clsid> <iid> <slot|name>".green()
    );
    println!("  {}                 List COM breakpoints", "bl".green());
    println!("  {}            Delete a COM breakpoint", "bd <id>".green());
    println!(
        "  {}  Manually register a vtable",
        "reg <clsid> <iid> <addr>".green()
    );

    println!("\n{}", "Other:".bold().yellow());
    println!("  {}               Show this help", "help".green());
    println!("  {}               Quit", "quit".green());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::TypeRecord;
    use crate::core::registry::BitWidth;
    use crate::debug::stub::StubEngine;

    const CLSID_A: &str = "{11111111-1111-1111-1111-111111111111}";
    const IID_B: &str = "{22222222-2222-2222-2222-222222222222}";

    fn tokens(line: &str) -> Vec<String> {
        split_args(line)
    }

    fn stub_target() -> EngineTarget {
        EngineTarget::Stub { pid: 0 }
    }

    #[test]
    fn tokenizer_splits_on_whitespace_and_commas() {
        assert_eq!(split_args("a b,c ,, d"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_args("  "), Vec::<String>::new());
    }

    #[test]
    fn tokenizer_honors_quotes() {
        assert_eq!(
            split_args("save \"C:\\some dir\\meta.json\""),
            vec!["save", "C:\\some dir\\meta.json"]
        );
        assert_eq!(split_args("'a b' c"), vec!["a b", "c"]);
    }

    #[test]
    fn parses_bp_index_and_name_targets() {
        let cmd = parse_command(&tokens(&format!("bp {} {} 3", CLSID_A, IID_B))).unwrap();
        assert!(matches!(
            cmd,
            CoCommand::Break {
                target: MethodTarget::Index(3),
                ..
            }
        ));

        let cmd = parse_command(&tokens(&format!("bp {} {} Read", CLSID_A, IID_B))).unwrap();
        assert!(
            matches!(cmd, CoCommand::Break { target: MethodTarget::Name(name), .. } if name == "Read")
        );
    }

    #[test]
    fn parses_attach_filters() {
        let no_filter = parse_command(&tokens("attach")).unwrap();
        assert_eq!(
            no_filter,
            CoCommand::Attach {
                filter: CoFilter::NoFilter
            }
        );

        let implicit = parse_command(&tokens(&format!("attach {}", CLSID_A))).unwrap();
        assert!(matches!(
            implicit,
            CoCommand::Attach {
                filter: CoFilter::Including(_)
            }
        ));

        let excluding = parse_command(&tokens(&format!("attach {} -e", CLSID_A))).unwrap();
        assert!(matches!(
            excluding,
            CoCommand::Attach {
                filter: CoFilter::Excluding(_)
            }
        ));
    }

    #[test]
    fn attach_rejects_malformed_clsids() {
        assert!(parse_command(&tokens("attach not-a-guid -i")).is_err());
    }

    #[test]
    fn rejects_bad_arity_and_unknown_commands() {
        assert!(parse_command(&tokens("save")).is_err());
        assert!(parse_command(&tokens("showi")).is_err());
        assert!(parse_command(&tokens("frobnicate")).is_err());
        assert!(parse_command(&tokens("bd nine")).is_err());
    }

    #[test]
    fn parses_reg_addresses() {
        let cmd = parse_command(&tokens(&format!("reg {} {} 0x7ff01000", CLSID_A, IID_B))).unwrap();
        assert!(matches!(
            cmd,
            CoCommand::Register {
                address: 0x7ff0_1000,
                ..
            }
        ));
    }

    #[test]
    fn attached_only_commands_report_not_enabled() {
        let mut session = Session::new();
        for line in ["pause", "resume", "status", "bl", "bd 0"] {
            assert_eq!(
                run_line(&mut session, stub_target(), line),
                CommandOutcome::NotEnabled,
                "line: {line}"
            );
        }
    }

    #[test]
    fn detach_without_monitor_is_success() {
        let mut session = Session::new();
        assert_eq!(
            run_line(&mut session, stub_target(), "detach"),
            CommandOutcome::Success
        );
    }

    #[test]
    fn attach_twice_fails() {
        let mut session = Session::new();
        assert_eq!(
            run_line(&mut session, stub_target(), "attach"),
            CommandOutcome::Success
        );
        assert_eq!(
            run_line(&mut session, stub_target(), "attach"),
            CommandOutcome::OperationFailed
        );
    }

    #[test]
    fn bad_input_is_invalid_arguments() {
        let mut session = Session::new();
        assert_eq!(
            run_line(&mut session, stub_target(), "showi nope"),
            CommandOutcome::InvalidArguments
        );
        assert_eq!(
            run_line(&mut session, stub_target(), ""),
            CommandOutcome::InvalidArguments
        );
    }

    #[test]
    fn bp_by_unknown_name_fails_without_side_effects() {
        let mut session = Session::new();
        run_line(&mut session, stub_target(), "attach");
        let outcome = run_line(
            &mut session,
            stub_target(),
            &format!("bp {} {} NoSuchMethod", CLSID_A, IID_B),
        );
        assert_eq!(outcome, CommandOutcome::OperationFailed);
        assert!(session.monitor().unwrap().list_breakpoints().is_empty());
    }

    #[test]
    fn reg_then_bp_then_bd_full_cycle() {
        let mut session = Session::new();
        session.metadata_mut().put_type(TypeRecord {
            iid: IID_B.parse().unwrap(),
            name: "IThing".into(),
            methods: Some(vec!["QueryInterface".into(), "AddRef".into()]),
        });
        run_line(&mut session, stub_target(), "attach");
        assert_eq!(
            run_line(
                &mut session,
                stub_target(),
                &format!("reg {} {} 0x1000", CLSID_A, IID_B)
            ),
            CommandOutcome::Success
        );
        assert_eq!(
            run_line(
                &mut session,
                stub_target(),
                &format!("bp {} {} AddRef", CLSID_A, IID_B)
            ),
            CommandOutcome::Success
        );

        let monitor = session.monitor().unwrap();
        let breakpoints = monitor.list_breakpoints();
        assert_eq!(breakpoints.len(), 1);
        assert_eq!(breakpoints[0].locations[0].address, 0x1000 + 8);

        assert_eq!(
            run_line(&mut session, stub_target(), "bd 0"),
            CommandOutcome::Success
        );
        assert!(session.monitor().unwrap().list_breakpoints().is_empty());
        assert_eq!(
            run_line(&mut session, stub_target(), "bd 0"),
            CommandOutcome::OperationFailed
        );
    }

    #[test]
    fn discovery_is_pumped_before_commands() {
        let mut session = Session::new();
        let mut engine = StubEngine::new(3);
        engine.push_vtable(
            "ole32",
            CLSID_A.parse().unwrap(),
            IID_B.parse().unwrap(),
            BitWidth::X64,
            0x4000,
        );
        session
            .attach(Box::new(engine), CoFilter::NoFilter)
            .unwrap();

        assert_eq!(
            run_line(&mut session, stub_target(), "status"),
            CommandOutcome::Success
        );
        let monitor = session.monitor().unwrap();
        assert_eq!(monitor.registry().len(), 1);
    }
}
