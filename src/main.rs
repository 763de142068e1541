//! Systolic memory mapper CLI
//!
//! Usage:
//!   sysmem kernel.json
//!   sysmem kernel.json --no-private --json
//!   cat kernel.json | sysmem -v

use clap::Parser as ClapParser;
use colored::Colorize;
use env_logger::Env;
use std::fs;
use std::io::{self, Read};

use systolic_memory_mapper::{map_kernel_json, KernelMapping, MappingOptions};

#[derive(ClapParser, Debug)]
#[command(name = "sysmem")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Maps the array references of a systolic kernel onto the memory hierarchy")]
struct Args {
    /// Kernel description (JSON); read from stdin when omitted
    #[arg(value_name = "FILE")]
    input_file: Option<String>,

    /// Do not use memory shared by a block of processing elements
    #[arg(long = "no-shared")]
    no_shared: bool,

    /// Do not use per-element registers
    #[arg(long = "no-private")]
    no_private: bool,

    /// Do not force scalars with in-kernel order dependences into registers
    #[arg(long = "no-live-range-reordering")]
    no_live_range_reordering: bool,

    /// Output as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let source = if let Some(file) = &args.input_file {
        fs::read_to_string(file).unwrap_or_else(|e| {
            eprintln!("{}: Failed to read file '{}': {}", "Error".red(), file, e);
            std::process::exit(1);
        })
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer).unwrap_or_else(|e| {
            eprintln!("{}: Failed to read stdin: {}", "Error".red(), e);
            std::process::exit(1);
        });
        buffer
    };

    let options = MappingOptions {
        use_shared_memory: !args.no_shared,
        use_private_memory: !args.no_private,
        live_range_reordering: !args.no_live_range_reordering,
        verbose: args.verbose,
    };

    if args.verbose {
        println!("{}", "Systolic Memory Mapper".bold().blue());
        println!("{}", "=".repeat(35));
        println!();
        println!(
            "{}: {}",
            "Input".green(),
            args.input_file.as_deref().unwrap_or("<stdin>")
        );
        println!(
            "{}: shared {}, private {}, live-range reordering {}",
            "Memories".green(),
            options.use_shared_memory,
            options.use_private_memory,
            options.live_range_reordering
        );
        println!();
    }

    let mapping = match map_kernel_json(&source, &options) {
        Ok(m) => m,
        Err(e) if e.is_internal() => {
            eprintln!("{}: {}", "Internal error".red(), e);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("{}: {}", "Mapping error".red(), e);
            std::process::exit(1);
        }
    };

    if args.json_output {
        match mapping.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: Failed to serialize to JSON: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
    } else {
        print_mapping(&mapping, args.verbose);
    }
}

fn print_mapping(mapping: &KernelMapping, verbose: bool) {
    println!("{}", "Mapping Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();

    if !mapping.name.is_empty() {
        println!("{}: {}", "Kernel".cyan(), mapping.name);
    }
    println!("{}: {}", "Arrays".cyan(), mapping.arrays.len());
    println!();

    for array in &mapping.arrays {
        let title = format!("Array {}", array.name);
        println!("{}", title.bold().yellow());
        println!("{}", "-".repeat(50));
        if array.force_private {
            println!("  {}", "forced into private memory".magenta());
        }

        for group in &array.groups {
            let placement = match group.placement.as_str() {
                "private" => group.placement.green(),
                "shared" => group.placement.cyan(),
                _ => group.placement.normal(),
            };
            println!(
                "  {} {}: {} at depth {}",
                "Group".bold(),
                group.id,
                placement,
                group.depth
            );
            if let Some(name) = &group.local_name {
                println!("    {}: {} {:?}", "Buffer".cyan(), name, group.sizes);
            }
            if verbose {
                println!("    {}: {:?}", "References".cyan(), group.refs);
                for (k, bound) in group.bounds.iter().enumerate() {
                    match &bound.shift {
                        Some(shift) => println!(
                            "    {} {}: lb {}, stride {}, shift {}, size {}",
                            "Index".cyan(),
                            k,
                            bound.lb,
                            bound.stride,
                            shift,
                            bound.size
                        ),
                        None => println!(
                            "    {} {}: lb {}, size {}",
                            "Index".cyan(),
                            k,
                            bound.lb,
                            bound.size
                        ),
                    }
                }
                if let Some(tiling) = &group.tiling {
                    println!("    {}: {}", "Tiling".cyan(), tiling);
                }
            }
        }
        println!();
    }

    for note in &mapping.diagnostics {
        println!("{}: {}", "note".yellow(), note);
    }
    if !verbose {
        println!();
        println!("{}", mapping.summary);
    }
}
