//! attrmeta CLI - Tool for inspecting selectors and saved metadata files.

use anyhow::{bail, Context};
use attrmeta::config;
use attrmeta::metadata::Metadata;
use attrmeta::selector::{DomainId, Selector, SelectorTarget};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "ATTRMETA_LOG";

/// Install the fmt subscriber; `ATTRMETA_LOG` wins over verbosity flags.
fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut verbosity = 0u8;
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => verbosity = verbosity.max(1),
            "-vv" | "--trace" => verbosity = 2,
            _ => filtered_args.push(arg),
        }
    }
    init_tracing(verbosity);
    let settings = config::init_global();
    tracing::debug!(?settings, "Settings loaded");

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let result = match filtered_args[0] {
        // Selector command - parse and classify
        "selector" | "sel" => match filtered_args.get(1) {
            Some(text) => cmd_selector(text),
            None => usage("attrmeta selector <text>"),
        },

        // Info command - domains and attributes of a saved container
        "info" | "i" => match filtered_args.get(1) {
            Some(file) => cmd_info(file),
            None => usage("attrmeta info <file>"),
        },

        // Dump command - values per entry
        "dump" | "d" => match filtered_args.get(1) {
            Some(file) => cmd_dump(
                file,
                filtered_args.get(2).copied(),
                filtered_args.get(3).copied(),
            ),
            None => usage("attrmeta dump <file> [domain] [attribute]"),
        },

        "version" | "-V" | "--version" => {
            print_version();
            Ok(())
        }

        // Help
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }

        // Default: if file exists, show info; otherwise error
        other => {
            if Path::new(other).exists() {
                cmd_info(other)
            } else {
                eprintln!("Unknown command: {other}");
                eprintln!();
                print_help();
                std::process::exit(1);
            }
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn usage(text: &str) -> anyhow::Result<()> {
    bail!("missing argument\nUsage: {text}")
}

fn print_version() {
    println!(
        "attrmeta {} (built {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("ATTRMETA_BUILD_DATE"),
        env!("ATTRMETA_BUILD_TIME")
    );
}

fn print_help() {
    println!("attrmeta - typed attribute metadata toolkit");
    println!();
    println!("USAGE:");
    println!("    attrmeta [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    sel, selector <text>                    Parse a selector and show its parts");
    println!("    i, info   <file>                        Show domains, entries and attributes");
    println!("    d, dump   <file> [domain] [attribute]   Dump attribute values per entry");
    println!("    version                                 Show version and build date");
    println!("    h, help                                 Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Debug output");
    println!("    -vv, --trace     Trace output");
    println!();
    println!("ENVIRONMENT:");
    println!("    {LOG_ENV}                   Log filter (overrides -v/-vv), e.g. attrmeta=debug");
    println!("    ATTRMETA_PARALLEL_THRESHOLD    Pairs needed for parallel attribute copies");
    println!("    ATTRMETA_HASH_THRESHOLD        Values needed for hashed partitioning");
    println!("    ATTRMETA_COMPRESSION           zlib level for saved files (0-9)");
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_selector(text: &str) -> anyhow::Result<()> {
    let selector = Selector::parse(text).with_context(|| format!("cannot parse '{text}'"))?;
    let kind = match selector.target() {
        SelectorTarget::Attribute(_) if selector.is_last() => "last attribute",
        SelectorTarget::Attribute(_) if selector.is_source() => "source",
        SelectorTarget::Attribute(_) => "attribute",
        SelectorTarget::Property(_) => "property",
        SelectorTarget::ExtraProperty(_) => "extra property",
    };

    println!("Input:       {text}");
    println!("Canonical:   {selector}");
    println!("Kind:        {kind}");
    println!("Name:        {}", selector.name());
    println!("Domain:      {}", selector.domain_name().unwrap_or("(default)"));
    if !selector.is_basic() {
        println!("Extra names: {}", selector.extra_names().join(", "));
    }
    if let Err(err) = selector.validate() {
        println!("Invalid:     {err}");
    }
    Ok(())
}

fn load(path: &str) -> anyhow::Result<Metadata> {
    Metadata::load_from_file(path).with_context(|| format!("cannot read '{path}'"))
}

fn domain_name(metadata: &Metadata, id: DomainId) -> String {
    metadata
        .layout()
        .info(id)
        .map(|info| info.name())
        .unwrap_or_else(|| id.to_string())
}

fn cmd_info(path: &str) -> anyhow::Result<()> {
    let metadata = load(path)?;
    let layout = metadata.layout();
    println!("File: {path}");
    println!("Default domain: {}", domain_name(&metadata, layout.default_domain));
    println!();

    for id in metadata.domain_ids() {
        let Some(domain) = metadata.const_domain(id) else {
            continue;
        };
        let multi = if domain.supports_multi_entry() { "multi" } else { "single" };
        println!(
            "{} [{}] ({multi}-entry): {} entries, {} attributes",
            domain_name(&metadata, id),
            id,
            domain.item_count(),
            domain.attribute_count()
        );
        for (name, ty) in domain.attribute_names_and_types() {
            println!("    {name:<24} {ty}");
        }
    }
    Ok(())
}

fn cmd_dump(path: &str, domain: Option<&str>, attribute: Option<&str>) -> anyhow::Result<()> {
    let metadata = load(path)?;
    let id = match domain {
        Some(name) => metadata
            .domain_id_from_name(name)
            .with_context(|| format!("no domain named '{name}'"))?,
        None => metadata.layout().default_domain,
    };
    let domain = metadata
        .const_domain(id)
        .with_context(|| format!("domain '{}' holds no data", domain_name(&metadata, id)))?;

    let names: Vec<String> = match attribute {
        Some(name) => vec![name.to_string()],
        None => domain.attribute_names_and_types().into_iter().map(|(n, _)| n).collect(),
    };
    let attributes = names
        .iter()
        .map(|name| {
            domain
                .get_attribute(name)
                .with_context(|| format!("no attribute '{name}' in {}", domain_name(&metadata, id)))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    println!("{}: {} entries", domain_name(&metadata, id), domain.item_count());
    for attr in &attributes {
        println!();
        println!(
            "{} ({}) default = {}",
            attr.name(),
            attr.attribute_type(),
            attr.default_value_erased()
        );
        let count = if domain.supports_multi_entry() { domain.item_count() } else { 1 };
        for entry in 0..count {
            println!("    [{entry}] {}", attr.value_at(entry));
        }
    }
    Ok(())
}
