// src/cli.rs

//! Command-line interface.
//!
//! Usage: `cvssuck [options] cvsroot (-o dir | -O base | -l dir | -L base)* module ...`
//!
//! The output and lock options are positional: each module uses the most
//! recently specified settings, and setting an output target resets the
//! lock target to match it unless a lock option follows. That grammar is
//! outside what derive-style parsing can express, so the command is built
//! with the builder API and the pairing reconstructed from argument
//! indices.

use crate::config::Config;
use crate::mirror::{ModuleJob, OutputTarget};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// A fully parsed command line.
#[derive(Debug)]
pub struct Invocation {
    pub cvsroot: String,
    pub jobs: Vec<ModuleJob>,
    pub config: Config,
}

pub fn command() -> Command {
    Command::new("cvssuck")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Mirror a remote CVS repository into a local RCS tree")
        .arg(
            Arg::new("breadth")
                .short('b')
                .action(ArgAction::SetTrue)
                .help("Walk the remote module tree breadth-first"),
        )
        .arg(
            Arg::new("skeleton")
                .short('s')
                .action(ArgAction::Count)
                .help("Keep only tags, branch points and extremes (stackable)"),
        )
        .arg(
            Arg::new("introduce")
                .short('1')
                .action(ArgAction::SetTrue)
                .help("Insert a synthetic dead 1.1 when the remote lacks one"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Shorthand for -D command,attic,leavetmp"),
        )
        .arg(
            Arg::new("debug")
                .short('D')
                .value_name("OPT,...")
                .action(ArgAction::Append)
                .help(
                    "Debug toggles: command, attic, protocollog, leavetmp, \
                     mkdir, mkdir_exist",
                ),
        )
        .arg(
            Arg::new("outdir")
                .short('o')
                .value_name("DIR")
                .action(ArgAction::Append)
                .conflicts_with("outbase")
                .help("Output directory for the modules that follow"),
        )
        .arg(
            Arg::new("outbase")
                .short('O')
                .value_name("BASE")
                .action(ArgAction::Append)
                .help("Output base; each following module mirrors to BASE/module"),
        )
        .arg(
            Arg::new("lockdir")
                .short('l')
                .value_name("DIR")
                .action(ArgAction::Append)
                .conflicts_with("lockbase")
                .help("Lock directory for the modules that follow"),
        )
        .arg(
            Arg::new("lockbase")
                .short('L')
                .value_name("BASE")
                .action(ArgAction::Append)
                .help("Lock base; each following module locks under BASE/module"),
        )
        .arg(Arg::new("cvsroot").required(true).help("Remote CVSROOT"))
        .arg(
            Arg::new("modules")
                .required(true)
                .num_args(1..)
                .action(ArgAction::Append)
                .help("Module names to mirror"),
        )
}

/// Positionally significant command-line items, ordered by index.
enum Item {
    OutDir(PathBuf),
    OutBase(PathBuf),
    LockDir(PathBuf),
    LockBase(PathBuf),
    Module(String),
}

fn collect_items(matches: &ArgMatches) -> Vec<(usize, Item)> {
    let mut items: Vec<(usize, Item)> = Vec::new();
    let mut collect = |id: &str, make: fn(String) -> Item| {
        if let (Some(indices), Some(values)) =
            (matches.indices_of(id), matches.get_many::<String>(id))
        {
            for (index, value) in indices.zip(values) {
                items.push((index, make(value.clone())));
            }
        }
    };
    collect("outdir", |v| Item::OutDir(PathBuf::from(v)));
    collect("outbase", |v| Item::OutBase(PathBuf::from(v)));
    collect("lockdir", |v| Item::LockDir(PathBuf::from(v)));
    collect("lockbase", |v| Item::LockBase(PathBuf::from(v)));
    collect("modules", Item::Module);
    items.sort_by_key(|(index, _)| *index);
    items
}

/// Build the module queue and configuration from parsed matches.
///
/// Errors (unknown debug toggles) are usage errors; the caller exits 1.
pub fn invocation_from(matches: &ArgMatches) -> std::result::Result<Invocation, String> {
    let mut config = Config {
        breadth_first: matches.get_flag("breadth"),
        skeleton: matches.get_count("skeleton") as u32,
        introduce_1_1: matches.get_flag("introduce"),
        ..Config::default()
    };
    if matches.get_flag("verbose") {
        config.debug.verbose();
    }
    if let Some(lists) = matches.get_many::<String>("debug") {
        for list in lists {
            config
                .debug
                .set_list(list)
                .map_err(|flag| format!("unknown debug option: {flag}"))?;
        }
    }

    let cvsroot = matches
        .get_one::<String>("cvsroot")
        .expect("cvsroot is required")
        .clone();

    // Modules before any output option mirror under the current directory.
    let mut output = OutputTarget::Base(PathBuf::from("."));
    let mut lock = output.clone();
    let mut jobs = Vec::new();
    for (_, item) in collect_items(matches) {
        match item {
            Item::OutDir(dir) => {
                output = OutputTarget::Dir(dir);
                lock = output.clone();
            }
            Item::OutBase(base) => {
                output = OutputTarget::Base(base);
                lock = output.clone();
            }
            Item::LockDir(dir) => lock = OutputTarget::Dir(dir),
            Item::LockBase(base) => lock = OutputTarget::Base(base),
            Item::Module(module) => jobs.push(ModuleJob {
                module,
                output: output.clone(),
                lock: lock.clone(),
            }),
        }
    }

    Ok(Invocation {
        cvsroot,
        jobs,
        config,
    })
}
