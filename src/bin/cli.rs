//! varstore CLI
//!
//! Command-line interface for reading and writing efivarfs variables.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use varstore::export::ExportedVariable;
use varstore::{Attributes, Config, VarError, VarStore, VariableKey};

/// varstore CLI
#[derive(Parser, Debug)]
#[command(name = "varstore")]
#[command(about = "Read and write EFI variables through efivarfs")]
#[command(version)]
struct Args {
    /// Mount root (overrides EFIVARFS_PATH)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether efivarfs is usable at the root
    Probe,

    /// List every variable
    List,

    /// Print a variable's attributes and payload
    Get {
        /// Variable as Name-GUID
        #[arg(value_parser = parse_key)]
        variable: VariableKey,

        /// Write the raw payload here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a variable's payload size
    Size {
        #[arg(value_parser = parse_key)]
        variable: VariableKey,
    },

    /// Print a variable's attributes
    Attrs {
        #[arg(value_parser = parse_key)]
        variable: VariableKey,
    },

    /// Create or replace a variable
    Set {
        #[arg(value_parser = parse_key)]
        variable: VariableKey,

        /// Attribute mask (hex with 0x prefix, or decimal)
        #[arg(short, long, value_parser = parse_u32, default_value = "0x7")]
        attributes: u32,

        /// File mode for a newly created variable (octal)
        #[arg(short, long, value_parser = parse_mode, default_value = "644")]
        mode: u32,

        #[command(flatten)]
        payload: Payload,
    },

    /// Append to a variable
    Append {
        #[arg(value_parser = parse_key)]
        variable: VariableKey,

        #[arg(short, long, value_parser = parse_u32, default_value = "0x7")]
        attributes: u32,

        #[command(flatten)]
        payload: Payload,
    },

    /// Delete a variable
    Delete {
        #[arg(value_parser = parse_key)]
        variable: VariableKey,
    },

    /// Change a variable file's permission bits
    Chmod {
        #[arg(value_parser = parse_key)]
        variable: VariableKey,

        /// New mode (octal)
        #[arg(value_parser = parse_mode)]
        mode: u32,
    },

    /// Save a variable to an export file
    Export {
        #[arg(value_parser = parse_key)]
        variable: VariableKey,

        file: PathBuf,
    },

    /// Restore a variable from an export file
    Import {
        file: PathBuf,

        #[arg(short, long, value_parser = parse_mode, default_value = "644")]
        mode: u32,
    },
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct Payload {
    /// Payload from a file
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Payload given inline
    #[arg(short, long)]
    value: Option<String>,
}

impl Payload {
    fn bytes(&self) -> varstore::Result<Vec<u8>> {
        match (&self.data_file, &self.value) {
            (Some(path), _) => fs::read(path).map_err(|e| VarError::io("read", path, e)),
            (None, Some(value)) => Ok(value.clone().into_bytes()),
            (None, None) => Ok(Vec::new()),
        }
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,varstore=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(root) = args.root {
        config.root_override = Some(root);
    }
    let store = VarStore::new(config);

    if let Err(e) = run(&store, args.command) {
        if e.is_fatal() {
            // The ESP file is half written; stop before anything else runs
            tracing::error!("fatal: {}", e);
        } else {
            tracing::error!("{}", e);
        }
        process::exit(1);
    }
}

fn run(store: &VarStore, command: Commands) -> varstore::Result<()> {
    match command {
        Commands::Probe => {
            let available = store.probe();
            println!(
                "{}: {}",
                store.root().display(),
                if available { "available" } else { "unavailable" }
            );
            if !available {
                process::exit(1);
            }
        }
        Commands::List => {
            for key in store.names()? {
                println!("{}", key);
            }
        }
        Commands::Get { variable, output } => {
            let var = store.get(&variable)?;
            match output {
                Some(path) => {
                    fs::write(&path, &var.data).map_err(|e| VarError::io("write", &path, e))?
                }
                None => {
                    println!("GUID: {}", variable.guid);
                    println!("Name: \"{}\"", variable.name);
                    println!(
                        "Attributes: {} [{}]",
                        var.attributes,
                        var.attributes.names().join(" ")
                    );
                    println!("Value:");
                    print_hex(&var.data);
                }
            }
        }
        Commands::Size { variable } => println!("{}", store.get_size(&variable)?),
        Commands::Attrs { variable } => {
            let attributes = store.get_attributes(&variable)?;
            println!("{} [{}]", attributes, attributes.names().join(" "));
        }
        Commands::Set {
            variable,
            attributes,
            mode,
            payload,
        } => {
            let data = payload.bytes()?;
            store.set(&variable, Attributes(attributes), &data, mode)?;
            tracing::info!("wrote {} ({} bytes)", variable, data.len());
        }
        Commands::Append {
            variable,
            attributes,
            payload,
        } => {
            let data = payload.bytes()?;
            store.append(&variable, Attributes(attributes), &data)?;
            tracing::info!("appended {} bytes to {}", data.len(), variable);
        }
        Commands::Delete { variable } => {
            store.delete(&variable)?;
            tracing::info!("deleted {}", variable);
        }
        Commands::Chmod { variable, mode } => store.chmod(&variable, mode)?,
        Commands::Export { variable, file } => {
            ExportedVariable::from_store(store, &variable)?.write_to(&file)?;
            tracing::info!("exported {} to {}", variable, file.display());
        }
        Commands::Import { file, mode } => {
            let exported = ExportedVariable::read_from(&file)?;
            exported.import(store, mode)?;
            tracing::info!("imported {}", exported.key());
        }
    }
    Ok(())
}

/// Offset, hex bytes and printable ASCII, 16 bytes per row
fn print_hex(data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        println!("{:08x}  {:<47}  |{}|", row * 16, hex.join(" "), ascii);
    }
}

fn parse_key(s: &str) -> Result<VariableKey, String> {
    VariableKey::from_file_name(s).ok_or_else(|| format!("expected Name-GUID, got {:?}", s))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_mode(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0o"), 8)
        .map_err(|e| format!("invalid octal mode {:?}: {}", s, e))
}
