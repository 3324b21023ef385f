//! Man page generator for mboot
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::PathBuf;

#[path = "../backends.rs"]
#[allow(dead_code)]
mod backends;
#[path = "../cli.rs"]
#[allow(dead_code)]
mod cli;

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Default to ./man directory
    let output_dir = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("man")
    };

    fs::create_dir_all(&output_dir)?;

    let mut cmd = cli::Cli::command();
    let mut written = Vec::new();

    let man = clap_mangen::Man::new(cmd.clone());
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    let output_path = output_dir.join("mboot.1");
    fs::write(&output_path, buffer)?;
    written.push(output_path);

    // One page per subcommand, named like git's (mboot-write.1, ...)
    cmd.build();
    for sub in cmd.get_subcommands().filter(|s| s.get_name() != "help") {
        let name = format!("mboot-{}", sub.get_name());
        let man = clap_mangen::Man::new(sub.clone()).title(name.clone());
        let mut buffer = Vec::new();
        man.render(&mut buffer)?;
        let output_path = output_dir.join(format!("{}.1", name));
        fs::write(&output_path, buffer)?;
        written.push(output_path);
    }

    for path in &written {
        println!("Man page generated at: {}", path.display());
    }
    println!("\nTo view the man page:");
    println!("  man -l {}", written[0].display());

    Ok(())
}
