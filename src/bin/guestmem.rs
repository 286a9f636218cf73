//! guestmem CLI tool
//!
//! Inspect guest address space layouts and host carveouts.

use std::process;

use guestmem::host::{
    find_carveout, parse_mappings, HostReserver, MappingTable, ProcSelfMaps, StaticMaps,
};
use guestmem::memory::layout::DEFAULT_BASE_ADDRESS;
use guestmem::memory::RegionSizes;
use guestmem::{AddressSpaceWidth, MemoryManager};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        return Ok(());
    }

    match args[1].as_str() {
        "layout" => cmd_layout(&args[2..])?,
        "carveout" => cmd_carveout(&args[2..])?,
        "help" | "--help" | "-h" => print_usage(&args[0]),
        "version" | "--version" | "-V" => print_version(),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage(&args[0]);
            process::exit(1);
        }
    }

    Ok(())
}

fn print_usage(program: &str) {
    println!(
        r#"guestmem - guest address space inspector

USAGE:
    {} <COMMAND> [OPTIONS]

COMMANDS:
    layout    Print the region map for a fixed base address
    carveout  Find (and optionally reserve) a host carveout
    help      Show this help message
    version   Show version information

OPTIONS:
    --width <36|39>       Address space width (default: 39)
    --code-size <HEX>     Size of the executable at the code region start
    --base <HEX>          Base address for `layout` (default: 0x8000000)
    --floor <HEX>         Lowest address `carveout` may pick (default: 0x8000000)
    --maps <PATH>         Scan a saved mapping table instead of this process
    --reserve             Reserve the carveout in this process and print the layout

ENVIRONMENT:
    GUESTMEM_DEBUG        Enable debug logs: 1, all, carveout, chunks"#,
        program
    );
}

fn print_version() {
    println!("guestmem {}", env!("CARGO_PKG_VERSION"));
}

#[derive(Debug)]
struct Options {
    width: AddressSpaceWidth,
    code_size: u64,
    base: u64,
    floor: u64,
    maps: Option<String>,
    reserve: bool,
}

fn parse_hex(value: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    Ok(u64::from_str_radix(digits, 16)?)
}

fn parse_options(args: &[String]) -> Result<Options, Box<dyn std::error::Error>> {
    let mut options = Options {
        width: AddressSpaceWidth::Bits39,
        code_size: 0,
        base: DEFAULT_BASE_ADDRESS,
        floor: DEFAULT_BASE_ADDRESS,
        maps: None,
        reserve: false,
    };

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--reserve" {
            options.reserve = true;
            i += 1;
            continue;
        }

        let value = args
            .get(i + 1)
            .ok_or_else(|| format!("{} requires a value", flag))?;
        match flag {
            "--width" => {
                options.width = match value.as_str() {
                    "32" => AddressSpaceWidth::Bits32,
                    "36" => AddressSpaceWidth::Bits36,
                    "39" => AddressSpaceWidth::Bits39,
                    other => return Err(format!("Unknown width: {}", other).into()),
                }
            }
            "--code-size" => options.code_size = parse_hex(value)?,
            "--base" => options.base = parse_hex(value)?,
            "--floor" => options.floor = parse_hex(value)?,
            "--maps" => options.maps = Some(value.clone()),
            _ => return Err(format!("Unknown argument: {}", flag).into()),
        }
        i += 2;
    }

    Ok(options)
}

fn cmd_layout(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_options(args)?;

    let manager = MemoryManager::builder()
        .width(options.width)
        .base_address(options.base)
        .code_size(options.code_size)
        .build()?;

    println!("{}", manager.region_map());
    Ok(())
}

fn cmd_carveout(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_options(args)?;

    let text = match &options.maps {
        Some(path) => std::fs::read_to_string(path)?,
        None => ProcSelfMaps.read_maps()?,
    };

    if options.reserve {
        let manager = MemoryManager::builder()
            .width(options.width)
            .code_size(options.code_size)
            .search_floor(options.floor)
            .discover_with(StaticMaps(text), HostReserver)
            .build()?;
        println!("{}", manager.region_map());
        return Ok(());
    }

    let mappings = parse_mappings(&text)?;
    let required = RegionSizes::for_width(options.width)?
        .base_size(options.code_size)
        .ok_or("code size overflows the address space")?;
    let address = find_carveout(
        &mappings,
        required,
        options.width.address_space_size(),
        options.floor,
    )?;

    println!(
        "{} carveout: 0x{:X} - 0x{:X} (Size: 0x{:X}, {} host mappings)",
        options.width,
        address,
        address + required,
        required,
        mappings.len()
    );
    Ok(())
}
