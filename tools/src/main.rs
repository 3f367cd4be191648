use clap::{Parser, Subcommand, ValueEnum};
use libloc::{Database, Family, Filter};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

/// Default location of the database file on a typical install.
const DEFAULT_DATABASE: &str = "/var/lib/location/database.db";

/// Inspect and query libloc location databases.
#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    /// Path to the database file.
    #[arg(long, global = true, default_value = DEFAULT_DATABASE)]
    database: PathBuf,

    /// Enable verbose (debug-level) logging to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up one or more IP addresses.
    Lookup {
        /// Addresses to resolve. Exit code 2 if any address has no match.
        ip_addrs: Vec<IpAddr>,
    },
    /// Print the database's vendor/description/license/creation time.
    Dump,
    /// Verify the database's signature against a PEM-encoded public key.
    Verify {
        /// Path to a PEM-encoded RSA public key.
        #[arg(long)]
        public_key: PathBuf,
    },
    /// List networks in ascending address order, optionally filtered.
    ListNetworks {
        #[arg(long)]
        family: Option<FamilyArg>,
        #[arg(long)]
        asn: Option<u32>,
        #[arg(long)]
        country: Option<String>,
    },
    /// List networks flagged anonymous proxy, satellite provider, or drop.
    ListBogons,
    /// Export networks as a newline-separated CIDR list.
    ///
    /// Conversion to consumer formats (ipset, nftables, BIND zone files) is
    /// outside this crate's scope; pipe this output into a dedicated tool.
    Export {
        #[arg(long)]
        family: Option<FamilyArg>,
        #[arg(long)]
        asn: Option<u32>,
        #[arg(long)]
        country: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FamilyArg {
    V4,
    V6,
}

impl From<FamilyArg> for Family {
    fn from(f: FamilyArg) -> Family {
        match f {
            FamilyArg::V4 => Family::V4,
            FamilyArg::V6 => Family::V6,
        }
    }
}

fn country_code(code: &str) -> Result<[u8; 2], ExitCode> {
    let bytes = code.as_bytes();
    if bytes.len() != 2 {
        eprintln!("error: country code must be exactly two characters: {code}");
        return Err(ExitCode::from(1));
    }
    Ok([bytes[0], bytes[1]])
}

fn build_filter(family: Option<FamilyArg>, asn: Option<u32>, country: Option<&str>) -> Result<Filter, ExitCode> {
    let mut filter = Filter::new();
    if let Some(family) = family {
        filter = filter.family(family.into());
    }
    if let Some(asn) = asn {
        filter = filter.asn(asn);
    }
    if let Some(country) = country {
        filter = filter.country(country_code(country)?);
    }
    Ok(filter)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Installs a `tracing-subscriber::fmt` subscriber on stderr. Verbosity
/// follows `RUST_LOG` if set, otherwise `-v` bumps the default from `warn`
/// to `debug`.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn run(args: &Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match &args.command {
        Command::Lookup { ip_addrs } => lookup(args, ip_addrs),
        Command::Dump => dump(args),
        Command::Verify { public_key } => verify(args, public_key),
        Command::ListNetworks { family, asn, country } => {
            list_networks(args, *family, *asn, country.as_deref())
        }
        Command::ListBogons => list_bogons(args),
        Command::Export { family, asn, country } => export(args, *family, *asn, country.as_deref()),
    }
}

fn lookup(args: &Args, ip_addrs: &[IpAddr]) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let db = Database::open(&args.database)?;
    let mut any_missing = false;
    for addr in ip_addrs {
        match db.lookup(*addr) {
            Some(network) => {
                let as_name = db.as_(network.asn()).map(|a| a.name().to_string()).unwrap_or_else(|| "unknown".into());
                let country = db.country(network.country_code());
                let country_name = country.map(|c| c.name().to_string()).unwrap_or_else(|| "unknown".into());
                println!(
                    "{addr} ({}): AS{} {}, {} ({})",
                    network.addrs(),
                    network.asn(),
                    as_name,
                    network.country_code(),
                    country_name,
                );
            }
            None => {
                println!("{addr}: no match");
                any_missing = true;
            }
        }
    }
    Ok(if any_missing { ExitCode::from(2) } else { ExitCode::SUCCESS })
}

fn dump(args: &Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let db = Database::open(&args.database)?;
    println!("created_at: {}", db.created_at());
    println!("vendor: {}", db.vendor());
    println!("description: {}", db.description());
    println!("license: {}", db.license());
    Ok(ExitCode::SUCCESS)
}

fn verify(args: &Args, public_key: &PathBuf) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let db = Database::open(&args.database)?;
    let pem = std::fs::read_to_string(public_key)?;
    match db.verify(&pem) {
        Ok(()) => {
            println!("signature OK");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("signature invalid: {e}");
            Ok(ExitCode::from(1))
        }
    }
}

fn list_networks(
    args: &Args,
    family: Option<FamilyArg>,
    asn: Option<u32>,
    country: Option<&str>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let db = Database::open(&args.database)?;
    let filter = match build_filter(family, asn, country) {
        Ok(f) => f,
        Err(code) => return Ok(code),
    };
    for network in db.list_networks(filter) {
        println!("{} {} AS{}", network.addrs(), network.country_code(), network.asn());
    }
    Ok(ExitCode::SUCCESS)
}

fn list_bogons(args: &Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let db = Database::open(&args.database)?;
    for network in db.list_networks(Filter::new()) {
        if network.is_anonymous_proxy() || network.is_satellite_provider() || network.is_drop() {
            println!("{}", network.addrs());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn export(
    args: &Args,
    family: Option<FamilyArg>,
    asn: Option<u32>,
    country: Option<&str>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let db = Database::open(&args.database)?;
    let filter = match build_filter(family, asn, country) {
        Ok(f) => f,
        Err(code) => return Ok(code),
    };
    for network in db.list_networks(filter) {
        println!("{}", network.addrs());
    }
    Ok(ExitCode::SUCCESS)
}
