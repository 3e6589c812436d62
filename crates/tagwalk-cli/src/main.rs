//! tagwalk CLI - inspect, verify and create files with the built-in formats

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use serde_json::{json, Map, Value as Json};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tagwalk::{Arena, BlockId, Tag, Value, WriteOptions};
use tagwalk_formats::{self as formats, Format};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tagwalk")]
#[command(about = "Parse, inspect and re-serialize binary tag files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in formats
    Formats,
    /// Print the parsed tree of a file
    Dump {
        /// File to parse
        input: PathBuf,
        /// Format name; guessed from the extension when omitted
        #[arg(short, long)]
        format: Option<String>,
        /// Print JSON instead of an indented tree
        #[arg(long)]
        json: bool,
        /// Include hidden fields
        #[arg(short, long)]
        all: bool,
    },
    /// Parse a file and verify that it re-serializes byte for byte
    Check {
        /// File to check
        input: PathBuf,
        /// Format name; guessed from the extension when omitted
        #[arg(short, long)]
        format: Option<String>,
    },
    /// Write a default-constructed file
    New {
        /// Format name
        #[arg(short, long)]
        format: String,
        /// Output path
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Formats => list_formats(),
        Commands::Dump {
            input,
            format,
            json,
            all,
        } => dump(&input, format.as_deref(), json, all),
        Commands::Check { input, format } => check(&input, format.as_deref()),
        Commands::New { format, output } => create(&format, &output),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn resolve_format(input: &Path, name: Option<&str>) -> Result<&'static Format> {
    let format = match name {
        Some(name) => formats::by_name(name)?,
        None => formats::for_path(input)
            .wrap_err("Cannot tell the format from the file name; pass --format")?,
    };
    debug!(format = format.name, input = %input.display(), "selected format");
    Ok(format)
}

fn load(input: &Path, format: &Format) -> Result<Tag> {
    let def = format.def()?;
    Tag::load(def, input)
        .wrap_err_with(|| format!("Failed to parse {} as {}", input.display(), format.name))
}

fn list_formats() -> Result<()> {
    for format in formats::formats() {
        println!("{:<6} .{:<5} {}", format.name, format.ext, format.description);
    }
    Ok(())
}

fn dump(input: &Path, format: Option<&str>, as_json: bool, all: bool) -> Result<()> {
    let format = resolve_format(input, format)?;
    let tag = load(input, format)?;
    if as_json {
        let tree = block_json(tag.arena(), tag.root())?;
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        let mut out = String::new();
        write_block(&mut out, tag.arena(), tag.root(), 0, all)?;
        print!("{}", out);
    }
    Ok(())
}

fn check(input: &Path, format: Option<&str>) -> Result<()> {
    let format = resolve_format(input, format)?;
    let original = std::fs::read(input)
        .wrap_err_with(|| format!("Failed to read {}", input.display()))?;
    let tag = Tag::parse(format.def()?, &original)
        .wrap_err_with(|| format!("Failed to parse {} as {}", input.display(), format.name))?;
    let encoded = tag.serialize().wrap_err("Failed to re-serialize")?;

    if let Some(at) = first_difference(&original, &encoded) {
        return Err(eyre!(
            "Round trip differs at byte {} ({} bytes in, {} bytes out)",
            at,
            original.len(),
            encoded.len()
        ));
    }
    info!(bytes = encoded.len(), "round trip identical");
    println!("✅ {} round-trips ({} bytes)", input.display(), encoded.len());
    Ok(())
}

fn create(name: &str, output: &Path) -> Result<()> {
    let format = formats::by_name(name)?;
    let mut tag = Tag::new(format.def()?)?;
    let bytes = tag
        .serialize_with(&WriteOptions::default().calc_pointers(true))
        .wrap_err("Failed to encode the default file")?;
    std::fs::write(output, &bytes)
        .wrap_err_with(|| format!("Failed to write {}", output.display()))?;
    println!("📄 Created {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    match a.iter().zip(b).position(|(x, y)| x != y) {
        Some(at) => Some(at),
        None if a.len() != b.len() => Some(a.len().min(b.len())),
        None => None,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

fn value_json(arena: &Arena, value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::UInt(n) => json!(n),
        Value::SInt(n) => json!(n),
        Value::Float(f) => json!(f),
        Value::Str(s) => json!(s),
        Value::Bytes(b) => json!(hex(b)),
        Value::Block(id) => block_json(arena, *id)?,
    })
}

fn block_json(arena: &Arena, id: BlockId) -> Result<Json> {
    let block = arena.block(id)?;
    if block.desc().kind.is_array() {
        let items = block
            .attrs()
            .iter()
            .map(|v| value_json(arena, v))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Json::Array(items));
    }
    let mut map = Map::new();
    for (i, value) in block.attrs().iter().enumerate() {
        match block.attr_name(i) {
            Some(name) if !name.is_empty() => {
                map.insert(name.to_string(), value_json(arena, value)?);
            }
            _ => {}
        }
    }
    if let Some(child) = block.child() {
        map.insert("child".to_string(), value_json(arena, child)?);
    }
    Ok(Json::Object(map))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::UInt(n) => n.to_string(),
        Value::SInt(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => format!("{:?}", s),
        Value::Bytes(b) if b.len() > 32 => format!("<{} bytes> {}..", b.len(), hex(&b[..32])),
        Value::Bytes(b) => format!("<{} bytes> {}", b.len(), hex(b)),
        Value::Block(id) => id.to_string(),
    }
}

fn write_block(out: &mut String, arena: &Arena, id: BlockId, depth: usize, all: bool) -> Result<()> {
    let block = arena.block(id)?;
    let indent = "  ".repeat(depth);
    let is_array = block.desc().kind.is_array();
    if is_array {
        writeln!(out, "{}{} [{}]", indent, block.name(), block.len())?;
    } else {
        writeln!(out, "{}{}", indent, block.name())?;
    }

    for (i, value) in block.attrs().iter().enumerate() {
        let desc = arena.member_desc(id, i)?;
        if !all && (!desc.meta.visible || desc.name.is_empty()) {
            continue;
        }
        if let Value::Block(nested) = value {
            write_block(out, arena, *nested, depth + 1, all)?;
            continue;
        }
        let label = if is_array {
            format!("[{}]", i)
        } else {
            desc.name.clone()
        };
        let enum_name = match desc.kind.table() {
            Some(_) => arena.enum_name(id, i)?,
            None => None,
        };
        match enum_name {
            Some(name) => writeln!(out, "{}  {} = {} ({})", indent, label, scalar_text(value), name)?,
            None => writeln!(out, "{}  {} = {}", indent, label, scalar_text(value))?,
        }
    }

    if let Some(child) = block.child() {
        match child {
            Value::Block(nested) => write_block(out, arena, *nested, depth + 1, all)?,
            other => writeln!(out, "{}  <child> = {}", indent, scalar_text(other))?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_difference() {
        assert_eq!(first_difference(b"abc", b"abc"), None);
        assert_eq!(first_difference(b"abc", b"abd"), Some(2));
        assert_eq!(first_difference(b"abc", b"ab"), Some(2));
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0xAB, 0x3B]), "00ab3b");
    }

    #[test]
    fn test_hidden_blocks_need_all() {
        use tagwalk::defs::*;

        let desc = container(
            "root",
            vec![uint8("shown"), structure("secret", vec![uint8("inner")]).hidden()],
        );
        let mut arena = Arena::new();
        let id = arena.create(desc).unwrap();

        let mut out = String::new();
        write_block(&mut out, &arena, id, 0, false).unwrap();
        assert!(out.contains("shown = 0"));
        assert!(!out.contains("secret"));

        out.clear();
        write_block(&mut out, &arena, id, 0, true).unwrap();
        assert!(out.contains("secret"));
        assert!(out.contains("inner = 0"));
    }
}
