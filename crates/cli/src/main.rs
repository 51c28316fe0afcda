use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use ocigetter::{DirectTransport, EXPORTS, GetterOptions, OciGetter, PLUGIN_HELM_GETTER, lookup};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "ocigetter")]
#[command(version, about = "Fetch Helm charts from OCI registries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plugin export on a JSON envelope, exiting with its status code
    Run(RunArgs),

    /// Download a chart or provenance file
    Fetch(FetchArgs),

    /// List the plugin exports
    Exports,
}

#[derive(Parser)]
struct RunArgs {
    /// Export to call
    #[arg(long, default_value = PLUGIN_HELM_GETTER)]
    export: String,

    /// Input envelope (default: stdin)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,
}

#[derive(Parser)]
struct FetchArgs {
    /// Chart locator, e.g. oci://ghcr.io/org/charts/app:1.2.3 (append .prov for provenance)
    #[arg(value_name = "HREF")]
    href: String,

    /// Chart version, used when the locator carries no tag
    #[arg(long)]
    version: Option<String>,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    registry: RegistryArgs,
}

#[derive(Args)]
struct RegistryArgs {
    /// Use http:// instead of https://
    #[arg(long)]
    plain_http: bool,

    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Send credentials to a token service on another host
    #[arg(long)]
    pass_credentials: bool,

    /// CA bundle to verify the registry with
    #[arg(long, value_name = "FILE")]
    ca_file: Option<String>,

    /// Client certificate
    #[arg(long, value_name = "FILE", requires = "key_file")]
    cert_file: Option<String>,

    /// Client key
    #[arg(long, value_name = "FILE", requires = "cert_file")]
    key_file: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure_skip_tls_verify: bool,

    /// Give up after this many seconds (0 = no limit)
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    timeout: u64,

    #[arg(long)]
    user_agent: Option<String>,
}

impl RegistryArgs {
    fn into_options(self, version: Option<String>) -> GetterOptions {
        GetterOptions {
            plain_http: self.plain_http,
            username: self.username,
            password: self.password,
            pass_credentials_all: self.pass_credentials.then_some(true),
            ca_file: self.ca_file,
            cert_file: self.cert_file,
            key_file: self.key_file,
            insecure_skip_verify_tls: self.insecure_skip_tls_verify.then_some(true),
            timeout: Duration::from_secs(self.timeout),
            user_agent: self.user_agent,
            version,
            ..GetterOptions::default()
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let status = run(args)?;
            std::process::exit(status);
        }
        Commands::Fetch(args) => fetch(args),
        Commands::Exports => {
            list_exports();
            Ok(())
        }
    }
}

/// Returns the export's status code; `Err` only for problems outside the export.
fn run(args: RunArgs) -> Result<i32> {
    let Some(export) = lookup(&args.export) else {
        bail!(
            "unknown export `{}` (available: {})",
            args.export,
            EXPORTS.iter().map(|e| e.name).collect::<Vec<_>>().join(", ")
        );
    };

    let input = match &args.input {
        Some(path) => fs::read(path)
            .with_context(|| format!("failed to read input file `{}`", path.display()))?,
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read input from stdin")?;
            buf
        }
    };

    match export.call(&input, DirectTransport::factory()) {
        Ok(output) => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&output)?;
            stdout.write_all(b"\n")?;
            stdout.flush()?;
            Ok(0)
        }
        Err(err) => {
            eprintln!("Error: {err}");
            Ok(err.status())
        }
    }
}

fn fetch(args: FetchArgs) -> Result<()> {
    tracing::debug!(href = %args.href, "executing fetch command");

    if args.output.is_none() && io::stdout().is_terminal() {
        bail!("cannot print binary chart data to terminal; use -o to specify output file");
    }

    let opts = args.registry.into_options(args.version);
    let getter = OciGetter::new(opts, DirectTransport::factory());
    let data = getter
        .get(&args.href)
        .with_context(|| format!("failed to fetch {}", args.href))?;

    match &args.output {
        Some(path) => {
            write_output(path, &data)?;
            eprintln!("Wrote {} bytes to {}", data.len(), path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, data)
        .with_context(|| format!("failed to write output file: {}", path.display()))
}

fn list_exports() {
    for export in EXPORTS {
        println!(
            "{:<20} {} -> {}  {}",
            export.name, export.input, export.output, export.summary
        );
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}
