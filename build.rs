// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn policy_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("prefer_newest")
            .long("prefer-newest")
            .action(ArgAction::SetTrue)
            .help("Pick the newest version when the catalog lists several"),
    )
    .arg(
        Arg::new("no_prefer_current")
            .long("no-prefer-current")
            .action(ArgAction::SetTrue)
            .help("Always ask instead of keeping the tracked version"),
    )
}

fn build_cli() -> Command {
    Command::new("kernel-mirror")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Kernel Mirror Contributors")
        .about("Mirror Arch Linux kernels into a local repository, one version per kernel")
        .subcommand_required(false)
        .arg(
            Arg::new("repo_dir")
                .short('r')
                .long("repo-dir")
                .global(true)
                .default_value("/srv/repo/kernels")
                .help("Directory holding the mirrored packages"),
        )
        .arg(
            Arg::new("database")
                .short('d')
                .long("database")
                .global(true)
                .help("Repository database (default: <repo-dir>/kernels.db.tar.gz)"),
        )
        .arg(
            Arg::new("kernels")
                .short('k')
                .long("kernels")
                .global(true)
                .default_value("/etc/kernel-mirror/kernels.conf")
                .help("Kernel list file"),
        )
        .arg(
            Arg::new("catalog_url")
                .long("catalog-url")
                .global(true)
                .default_value("https://geo.mirror.pkgbuild.com/core/os/x86_64/core.db")
                .help("Repository database listing the available kernels"),
        )
        .arg(
            Arg::new("archive_url")
                .long("archive-url")
                .global(true)
                .default_value("https://archive.archlinux.org")
                .help("Archive serving every package version"),
        )
        .subcommand(
            policy_args(Command::new("sync").about("Bring the repository in line with the catalog"))
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Run even if the last check is recent"),
                )
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .default_value("3600")
                        .help("Minimum seconds between checks"),
                ),
        )
        .subcommand(
            policy_args(
                Command::new("plan").about("Show what a sync would do without changing anything"),
            )
            .arg(
                Arg::new("json")
                    .long("json")
                    .action(ArgAction::SetTrue)
                    .help("Print the plan as JSON"),
            ),
        )
        .subcommand(
            Command::new("status").about("Show the tracked kernels and when they were last checked"),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("kernel-mirror.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
