// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

// Kept in sync with src/cli.rs by hand; build scripts cannot import the
// crate they build.
fn build_cli() -> Command {
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
                .help("Debug toggles: command, attic, protocollog, leavetmp, mkdir, mkdir_exist"),
        )
        .arg(
            Arg::new("outdir")
                .short('o')
                .value_name("DIR")
                .action(ArgAction::Append)
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
                .help("Module names to mirror"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("cvssuck.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
