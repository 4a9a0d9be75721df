//! VMFC image runner.
//!
//! Loads a binary image, runs it to `HALT` and prints the value left on top
//! of the stack.
//!
//! # Usage
//! ```text
//! vmfc <image.bin> [OPTIONS]
//! ```
//!
//! # Options
//! - `--strict`: Fault on code writes, fetches outside code and out-of-range words
//! - `--max-steps <n>`: Abort after `n` instructions without `HALT`
//! - `--header`: Print the image header before running
//! - `--verbose`: Enable debug logging (`DBG` stack dumps, loader layout)
//!
//! # Examples
//! ```text
//! vmfc program.bin
//! vmfc program.bin --strict --max-steps 100000
//! ```

use std::env;
use std::fs;
use std::process;
use vmfc::utils::log::{Level, set_min_level};
use vmfc::virtual_machine::image::Header;
use vmfc::virtual_machine::vm::{MemoryGuard, VM, VmConfig};
use vmfc::{error, info};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let image_path = &args[1];
    let mut config = VmConfig::default();
    let mut show_header = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--strict" => {
                config.guard = MemoryGuard::Strict;
                i += 1;
            }
            "--max-steps" => {
                i += 1;
                if i >= args.len() {
                    error!("--max-steps requires an argument");
                    process::exit(1);
                }
                let limit = args[i].parse::<u64>().unwrap_or_else(|_| {
                    error!("Invalid step limit: '{}' is not a valid number", args[i]);
                    process::exit(1);
                });
                config.max_steps = Some(limit);
                i += 1;
            }
            "--header" => {
                show_header = true;
                i += 1;
            }
            "--verbose" => {
                set_min_level(Level::Debug);
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let image = fs::read(image_path).unwrap_or_else(|e| {
        error!("Failed to read {}: {}", image_path, e);
        process::exit(1);
    });

    if show_header {
        match Header::parse(&image) {
            Ok(header) => print_header(&header),
            Err(e) => {
                error!("{e}");
                process::exit(1);
            }
        }
    }

    let mut vm = VM::load_with_config(&image, config).unwrap_or_else(|e| {
        error!("Load failed: {e}");
        process::exit(1);
    });

    match vm.run() {
        Ok(result) => {
            info!("{} steps", vm.steps());
            println!("{result}");
        }
        Err(e) => {
            error!("Execution failed: {e}");
            error!("{}", vm.registers());
            process::exit(1);
        }
    }
}

fn print_header(header: &Header) {
    println!("Sections:");
    for (i, s) in header.sections.iter().enumerate() {
        println!(
            "  [{i}] file {:#06x}  load {:#06x}  {} bytes",
            s.file_pointer, s.load_offset, s.byte_length
        );
    }
    println!(
        "Code: file {:#06x}  load {:#06x}  {} bytes",
        header.code_pointer,
        header.base_code_address(),
        header.code_length
    );
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} <image.bin> [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --strict           Fault on code writes and fetches outside code");
    eprintln!("  --max-steps <n>    Abort after n instructions without HALT");
    eprintln!("  --header           Print the image header before running");
    eprintln!("  --verbose          Enable debug logging");
}
