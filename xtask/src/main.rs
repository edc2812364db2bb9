// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

use std::env;
use std::path::PathBuf;
use std::process::Command;

const FIRMWARE_PACKAGE: &str = "coopfeeder-fw";
// Built from its own directory so its .cargo/config.toml (runner, DEFMT_LOG) applies.
const FIRMWARE_DIR: &str = "coopfeeder-fw";
const FIRMWARE_TARGET: &str = "thumbv6m-none-eabi";
const HOST_PACKAGES: [&str; 2] = ["coopfeeder-messages", "coopfeeder-core"];

#[derive(Debug, Default)]
struct FirmwareOptions {
    deep_sleep: bool,
    extra_args: Vec<String>,
}

#[derive(Debug)]
enum Command_ {
    Build(FirmwareOptions),
    Flash(FirmwareOptions),
    Run(FirmwareOptions),
    Attach,
    Test(Vec<String>),
    Help,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let command = match parse_command(&args[1..]) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error parsing command: {}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = execute_command(command) {
        eprintln!("Error executing command: {}", e);
        std::process::exit(1);
    }
}

fn parse_command(args: &[String]) -> Result<Command_, String> {
    let Some(command) = args.first() else {
        return Err("No command provided".to_string());
    };
    let rest = &args[1..];

    match command.as_str() {
        "build" => Ok(Command_::Build(parse_firmware_options(rest)?)),
        "flash" => Ok(Command_::Flash(parse_firmware_options(rest)?)),
        "run" => Ok(Command_::Run(parse_firmware_options(rest)?)),
        "attach" => {
            if rest.is_empty() {
                Ok(Command_::Attach)
            } else {
                Err("attach takes no arguments".to_string())
            }
        }
        "test" => Ok(Command_::Test(rest.to_vec())),
        "help" => Ok(Command_::Help),
        _ => Err(format!("Unknown command: {}", command)),
    }
}

fn parse_firmware_options(args: &[String]) -> Result<FirmwareOptions, String> {
    let mut options = FirmwareOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--deep-sleep" => options.deep_sleep = true,
            "--" => {
                options.extra_args = iter.cloned().collect();
                break;
            }
            other => return Err(format!("Unknown option: {}", other)),
        }
    }
    Ok(options)
}

fn execute_command(cmd: Command_) -> Result<(), String> {
    match cmd {
        Command_::Build(options) => {
            println!("Building firmware...");
            run_firmware_cargo("build", &options)?;
            generate_bin()?;
            println!("✓ Firmware built successfully");
        }
        Command_::Flash(options) => {
            println!("Building and flashing firmware...");
            run_cargo_flash(&options)?;
            println!("✓ Firmware flashed successfully");
        }
        Command_::Run(options) => {
            println!("Building and running firmware...");
            run_firmware_cargo("run", &options)?;
            println!("✓ Firmware run completed");
        }
        Command_::Attach => {
            println!("Attaching to firmware...");
            run_probe_rs_attach()?;
            println!("✓ Firmware attach completed");
        }
        Command_::Test(extra_args) => {
            for package in HOST_PACKAGES {
                println!("Testing {}...", package);
                run_host_tests(package, &extra_args)?;
                println!("✓ {} tests passed", package);
            }
        }
        Command_::Help => print_usage(),
    }
    Ok(())
}

fn firmware_features(options: &FirmwareOptions) -> Vec<&'static str> {
    if options.deep_sleep {
        vec!["--features", "deep-sleep"]
    } else {
        Vec::new()
    }
}

fn run_firmware_cargo(subcommand: &str, options: &FirmwareOptions) -> Result<(), String> {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(FIRMWARE_DIR)
        .args([subcommand, "--release", "--target", FIRMWARE_TARGET]);
    cmd.args(firmware_features(options));

    if !options.extra_args.is_empty() {
        cmd.arg("--");
        cmd.args(&options.extra_args);
    }

    let status = cmd
        .status()
        .map_err(|e| format!("Failed to run cargo {}: {}", subcommand, e))?;

    if !status.success() {
        return Err(format!("cargo {} failed for {}", subcommand, FIRMWARE_PACKAGE));
    }

    Ok(())
}

fn run_cargo_flash(options: &FirmwareOptions) -> Result<(), String> {
    let status = Command::new("cargo")
        .current_dir(FIRMWARE_DIR)
        .args([
            "flash",
            "--release",
            "--target",
            FIRMWARE_TARGET,
            "--chip",
            "RP2040",
        ])
        .args(firmware_features(options))
        .status()
        .map_err(|e| format!("Failed to run cargo flash: {}", e))?;

    if !status.success() {
        return Err(format!("Flash failed for {}", FIRMWARE_PACKAGE));
    }

    Ok(())
}

fn run_host_tests(package: &str, extra_args: &[String]) -> Result<(), String> {
    let mut cmd = Command::new("cargo");
    cmd.args(["test", "--package", package, "--features", "serde"]);
    if package == "coopfeeder-core" {
        // exercise the log backend of the log macros as well
        cmd.args(["--features", "log"]);
    }
    cmd.args(extra_args);

    let status = cmd
        .status()
        .map_err(|e| format!("Failed to run cargo test: {}", e))?;

    if !status.success() {
        return Err(format!("Tests failed for {}", package));
    }

    Ok(())
}

fn firmware_elf() -> PathBuf {
    PathBuf::from(format!(
        "{}/target/{}/release/{}",
        FIRMWARE_DIR, FIRMWARE_TARGET, FIRMWARE_PACKAGE
    ))
}

fn generate_bin() -> Result<(), String> {
    let elf_path = firmware_elf();
    let bin_path = elf_path.with_extension("bin");

    if !elf_path.exists() {
        return Err(format!("ELF binary not found at {}", elf_path.display()));
    }

    println!("Generating .bin file for {}...", FIRMWARE_PACKAGE);

    let output = Command::new("arm-none-eabi-objcopy")
        .arg("-O")
        .arg("binary")
        .arg(&elf_path)
        .arg(&bin_path)
        .output()
        .map_err(|e| {
            format!(
                "Failed to run arm-none-eabi-objcopy: {}. Make sure arm-none-eabi-objcopy is installed.",
                e
            )
        })?;

    if !output.status.success() {
        return Err(format!(
            "Failed to generate .bin file for {}:\n{}",
            FIRMWARE_PACKAGE,
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    println!("✓ Generated {}", bin_path.display());
    Ok(())
}

fn run_probe_rs_attach() -> Result<(), String> {
    let elf_path = firmware_elf();

    if !elf_path.exists() {
        return Err(format!(
            "ELF binary not found at {}. Build the project first using 'cargo xtask build'.",
            elf_path.display()
        ));
    }

    let status = Command::new("probe-rs")
        .args(["attach", "--chip", "RP2040"])
        .arg(&elf_path)
        .status()
        .map_err(|e| format!("Failed to run probe-rs attach: {}", e))?;

    if !status.success() {
        return Err(format!("Attach failed for {}", FIRMWARE_PACKAGE));
    }

    Ok(())
}

fn print_usage() {
    eprintln!(
        "Usage: cargo xtask <COMMAND> [OPTIONS]\n\
         \n\
         Commands:\n\
         \tbuild       Build the firmware (generates a .bin file)\n\
         \tflash       Build and flash the firmware\n\
         \trun         Build and run the firmware with probe-rs\n\
         \tattach      Attach to the running firmware with probe-rs\n\
         \ttest        Run the host test suites of the messages and core crates\n\
         \thelp        Show this help message\n\
         \n\
         Firmware options:\n\
         \t--deep-sleep            Use watchdog sleep between wake windows instead of staying on\n\
         \n\
         Examples:\n\
         \tcargo xtask build                        # Build with .bin generation\n\
         \tcargo xtask flash --deep-sleep           # Flash with deep sleep enabled\n\
         \tcargo xtask run                          # Run with probe-rs\n\
         \tcargo xtask attach                       # Attach to the firmware with probe-rs\n\
         \tcargo xtask test                         # Host tests\n\
         \tcargo xtask test -- --nocapture          # Host tests, extra args passed to cargo test"
    );
}
