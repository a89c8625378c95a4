//! uapki: operator tool for the OPC UA certificate trust engine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use std::io::Read;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;
use uapki_lib::{
    Certificate, DigestAlgorithm, HandshakeCoordinator, NetworkIdentity, PkiConfig,
    SecurityMode, Thumbprint,
};

#[derive(Parser)]
#[command(
    name = "uapki",
    about = "Validate OPC UA peer certificates and review rejected ones",
    long_about = "uapki runs the same trust decision a secure-channel handshake makes:\n\
                  trust lists, issuer chains, revocation, validity period and\n\
                  identity binding. Rejected certificates are archived by thumbprint\n\
                  so they can be reviewed and approved.\n\n\
                  Certificate input may be PEM or DER (auto-detected). Commands read\n\
                  from stdin when no file is given.",
    after_help = "EXAMPLES:\n\
                  \n  uapki thumbprint server.der\
                  \n  uapki validate --config pki.toml --hostname plc-1.example peer.der\
                  \n  uapki validate --config pki.toml --endpoint opc.tcp://10.0.0.5:4840 peer.der\
                  \n  uapki validate --config pki.toml --no-archive certs/\
                  \n  uapki rejected list --config pki.toml\
                  \n  uapki rejected approve --config pki.toml 4D11B79D8100DCE2B19918A0FDACD24727FE99DE"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the thumbprint (archive storage key) of a certificate
    #[command(after_help = "EXAMPLES:\n\
                      \n  uapki thumbprint cert.der\
                      \n  uapki thumbprint --digest sha256 cert.pem\
                      \n  cat cert.der | uapki thumbprint")]
    Thumbprint {
        /// Certificate file (PEM or DER). Reads from stdin if omitted.
        file: Option<PathBuf>,
        /// Hash algorithm: sha1 (storage key form), sha256, sha384, sha512
        #[arg(long, default_value = "sha1")]
        digest: String,
    },
    /// Validate peer certificates (exit 0 = accepted, 2 = rejected)
    #[command(after_help = "Identity flags are mutually exclusive. --endpoint derives the\n\
                      expected host (DNS name or IP address) from an endpoint URL.\n\
                      \nEXAMPLES:\n\
                      \n  uapki validate --config pki.toml peer.der\
                      \n  uapki validate --config pki.toml --uri urn:example:plc peer.der\
                      \n  uapki validate --config pki.toml --attime 1700000000 peer.der\
                      \n  uapki validate --config pki.toml --json peer.der\
                      \n  uapki validate --config pki.toml -r --failures-only certs/")]
    Validate {
        /// Certificate file or directory. Reads from stdin if omitted.
        file: Option<PathBuf>,
        #[command(flatten)]
        config: ConfigArg,
        /// Expected DNS host name
        #[arg(long, group = "identity")]
        hostname: Option<String>,
        /// Expected IP address
        #[arg(long, group = "identity")]
        ip: Option<IpAddr>,
        /// Expected application URI
        #[arg(long, group = "identity")]
        uri: Option<String>,
        /// Endpoint URL to take the expected host from
        #[arg(long, group = "identity")]
        endpoint: Option<String>,
        /// Validate at a specific Unix timestamp instead of now
        #[arg(long, value_name = "EPOCH")]
        attime: Option<i64>,
        /// Skip certificate validity period checks
        #[arg(long)]
        no_check_time: bool,
        /// Message security mode of the simulated handshake
        #[arg(long, value_enum, default_value_t = Security::SignAndEncrypt)]
        security: Security,
        /// Do not archive rejected certificates
        #[arg(long)]
        no_archive: bool,
        /// Output in JSON format (single file mode)
        #[arg(long)]
        json: bool,
        /// Only print failures (directory mode)
        #[arg(long)]
        failures_only: bool,
        /// Recurse into subdirectories (directory mode)
        #[arg(short, long)]
        recurse: bool,
    },
    /// Review the rejected certificate archive
    Rejected {
        #[command(subcommand)]
        action: RejectedAction,
    },
}

#[derive(Subcommand)]
enum RejectedAction {
    /// List archived thumbprints
    List {
        #[command(flatten)]
        config: ConfigArg,
        /// Also print the subject of each record
        #[arg(short, long)]
        long: bool,
    },
    /// Show one archived certificate
    Show {
        #[command(flatten)]
        config: ConfigArg,
        thumbprint: String,
        /// Print the certificate as PEM
        #[arg(long)]
        pem: bool,
    },
    /// Move an archived certificate into the trusted directory
    Approve {
        #[command(flatten)]
        config: ConfigArg,
        thumbprint: String,
        /// Trusted directory (default: trust.trusted from the configuration)
        #[arg(long, value_name = "DIR")]
        to: Option<PathBuf>,
    },
    /// Delete an archived certificate
    Remove {
        #[command(flatten)]
        config: ConfigArg,
        thumbprint: String,
    },
}

#[derive(clap::Args)]
struct ConfigArg {
    /// Configuration file (TOML)
    #[arg(long, short = 'c', value_name = "FILE")]
    config: PathBuf,
}

impl ConfigArg {
    fn load(&self) -> Result<PkiConfig> {
        PkiConfig::from_file(&self.config)
            .with_context(|| format!("Failed to load config: {}", self.config.display()))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Security {
    None,
    Sign,
    SignAndEncrypt,
}

impl From<Security> for SecurityMode {
    fn from(s: Security) -> Self {
        match s {
            Security::None => SecurityMode::None,
            Security::Sign => SecurityMode::Sign,
            Security::SignAndEncrypt => SecurityMode::SignAndEncrypt,
        }
    }
}

/// Maximum file size for certificate inputs (10 MiB).
const MAX_INPUT_BYTES: u64 = 10 * 1024 * 1024;

fn read_input(file: Option<&PathBuf>) -> Result<Vec<u8>> {
    match file {
        Some(path) => {
            let meta = std::fs::metadata(path)
                .with_context(|| format!("Failed to stat file: {}", path.display()))?;
            if meta.len() > MAX_INPUT_BYTES {
                anyhow::bail!(
                    "File too large ({} bytes, max {} bytes): {}",
                    meta.len(),
                    MAX_INPUT_BYTES,
                    path.display()
                );
            }
            std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .take(MAX_INPUT_BYTES)
                .read_to_end(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

/// The bytes a peer would present: the first PEM certificate, or the input
/// unchanged. Undecodable PEM is passed through so validation reports it.
fn candidate_bytes(input: Vec<u8>) -> Vec<u8> {
    if uapki_lib::is_pem(&input) {
        uapki_lib::pem_to_der(&input).unwrap_or(input)
    } else {
        input
    }
}

fn parse_thumbprint(s: &str) -> Result<Thumbprint> {
    Thumbprint::from_storage_key(s.trim())
        .with_context(|| format!("Invalid thumbprint (expected 40 hex characters): '{s}'"))
}

fn expected_identity(
    hostname: Option<&str>,
    ip: Option<IpAddr>,
    uri: Option<&str>,
    endpoint: Option<&str>,
) -> Result<Option<NetworkIdentity>> {
    if let Some(h) = hostname {
        return Ok(Some(NetworkIdentity::Dns(h.to_string())));
    }
    if let Some(ip) = ip {
        return Ok(Some(NetworkIdentity::Ip(ip)));
    }
    if let Some(u) = uri {
        return Ok(Some(NetworkIdentity::ApplicationUri(u.to_string())));
    }
    if let Some(e) = endpoint {
        return Ok(Some(NetworkIdentity::from_endpoint_url(e)?));
    }
    Ok(None)
}

/// Check if a path has a certificate file extension (.pem, .der, .crt, .cer).
fn is_cert_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("pem") || ext.eq_ignore_ascii_case("der")
            || ext.eq_ignore_ascii_case("crt") || ext.eq_ignore_ascii_case("cer")
    )
}

/// Find all certificate files (.pem, .der, .crt, .cer) in a directory.
fn find_cert_files(dir: &Path, recurse: bool) -> Vec<PathBuf> {
    let walker = if recurse {
        walkdir::WalkDir::new(dir)
    } else {
        walkdir::WalkDir::new(dir).max_depth(1)
    };
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_cert_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// A single result from batch processing.
struct BatchResult {
    path: String,
    pass: bool,
    detail: String,
}

/// Process certificate files in parallel, printing `filename: result`.
///
/// Returns the number of failures.
fn run_batch<F>(files: &[PathBuf], failures_only: bool, op: F) -> usize
where
    F: Fn(&Path) -> BatchResult + Sync,
{
    let results: Vec<BatchResult> = files.par_iter().map(|f| op(f)).collect();

    let mut failures = 0;
    for r in &results {
        if !r.pass {
            failures += 1;
        }
        if failures_only && r.pass {
            continue;
        }
        if r.pass {
            println!("{}: {}", r.path, r.detail);
        } else {
            eprintln!("{}: {}", r.path, r.detail);
        }
    }
    failures
}

/// Run one simulated handshake and describe the outcome.
fn validate_one(
    coordinator: &HandshakeCoordinator,
    mode: SecurityMode,
    identity: Option<&NetworkIdentity>,
    label: String,
    der: &[u8],
) -> (BatchResult, uapki_lib::HandshakeOutcome) {
    let outcome = coordinator.begin(mode, identity.cloned()).submit(der);
    let detail = if outcome.is_accepted() {
        outcome.result.to_string()
    } else {
        format!("{} [{}]", outcome.result, outcome.status)
    };
    (
        BatchResult {
            path: label,
            pass: outcome.is_accepted(),
            detail,
        },
        outcome,
    )
}

fn print_archive_status(status: &uapki_lib::ArchiveStatus) {
    use uapki_lib::ArchiveStatus;
    match status {
        ArchiveStatus::Stored(tp) | ArchiveStatus::Queued(tp) => {
            eprintln!("archived as {}", tp)
        }
        ArchiveStatus::AlreadyPresent(tp) => eprintln!("already archived as {}", tp),
        ArchiveStatus::Failed(e) => eprintln!("warning: archiving failed: {}", e),
        ArchiveStatus::NotRequired | ArchiveStatus::Disabled | ArchiveStatus::Skipped => {}
    }
}

fn print_cert_summary(cert: &Certificate) {
    println!("thumbprint: {}", cert.thumbprint());
    println!("subject:    {}", cert.subject());
    println!("issuer:     {}", cert.issuer());
    println!("serial:     {}", cert.serial_hex());
    println!("not before: {}", cert.not_before());
    println!("not after:  {}", cert.not_after());
    for san in cert.subject_alt_names() {
        println!("san:        {:?}", san);
    }
}

fn main() -> Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::WARN);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")?;

    let cli = Cli::parse();

    match &cli.command {
        Commands::Thumbprint { file, digest } => {
            let input = read_input(file.as_ref())?;
            let der = candidate_bytes(input);
            let algorithm: DigestAlgorithm = digest.parse()?;
            if algorithm == DigestAlgorithm::Sha1 {
                println!("{}", uapki_lib::thumbprint(&der));
            } else {
                println!("{}", uapki_lib::compute_fingerprint(&der, algorithm));
            }
        }
        Commands::Validate {
            file,
            config,
            hostname,
            ip,
            uri,
            endpoint,
            attime,
            no_check_time,
            security,
            no_archive,
            json,
            failures_only,
            recurse,
        } => {
            let mut config = config.load()?;
            if *no_archive {
                config.archive.rejected = None;
            }
            let mut options = config.validator_options();
            options.at_time = *attime;
            if *no_check_time {
                options.check_time = false;
            }
            let coordinator = config
                .coordinator(options)
                .context("Failed to load trust store")?;
            let identity = expected_identity(
                hostname.as_deref(),
                *ip,
                uri.as_deref(),
                endpoint.as_deref(),
            )?;
            let mode = SecurityMode::from(*security);
            debug!(?identity, "validating");

            // Directory mode: validate each file independently in parallel
            if let Some(dir) = file.as_ref().filter(|p| p.is_dir()) {
                let files = find_cert_files(dir, *recurse);
                if files.is_empty() {
                    anyhow::bail!("No certificate files found in {}", dir.display());
                }
                let failures = run_batch(&files, *failures_only, |path| {
                    let label = path.display().to_string();
                    match read_input(Some(&path.to_path_buf())) {
                        Ok(input) => {
                            let der = candidate_bytes(input);
                            validate_one(&coordinator, mode, identity.as_ref(), label, &der).0
                        }
                        Err(e) => BatchResult {
                            path: label,
                            pass: false,
                            detail: format!("FAIL ({:#})", e),
                        },
                    }
                });
                coordinator.flush();
                if failures > 0 {
                    std::process::exit(2);
                }
                return Ok(());
            }

            // Single file mode
            let input = read_input(file.as_ref())?;
            let label = file
                .as_ref()
                .map_or("stdin".to_string(), |f| f.display().to_string());
            let der = candidate_bytes(input);
            let (line, outcome) =
                validate_one(&coordinator, mode, identity.as_ref(), label, &der);
            coordinator.flush();

            if *json {
                println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            } else if line.pass {
                println!("{}: {}", line.path, line.detail);
                if let uapki_lib::ValidationResult::Accept { chain } = &outcome.result {
                    for info in chain {
                        println!(
                            "depth {}: subject = {}, issuer = {}",
                            info.depth, info.subject, info.issuer
                        );
                    }
                }
            } else {
                eprintln!("{}: {}", line.path, line.detail);
            }
            print_archive_status(&outcome.archive);
            if !outcome.is_accepted() {
                std::process::exit(2);
            }
        }
        Commands::Rejected { action } => match action {
            RejectedAction::List { config, long } => {
                let archive = config
                    .load()?
                    .archive()?
                    .context("No [archive] rejected directory configured")?;
                for tp in archive.list()? {
                    if !*long {
                        println!("{}", tp);
                        continue;
                    }
                    match archive.load(&tp).map(|der| Certificate::from_der(&der)) {
                        Ok(Ok(cert)) => println!("{}  {}", tp, cert.subject()),
                        Ok(Err(e)) => println!("{}  (unparseable: {})", tp, e),
                        Err(e) => println!("{}  (unreadable: {})", tp, e),
                    }
                }
            }
            RejectedAction::Show {
                config,
                thumbprint,
                pem,
            } => {
                let archive = config
                    .load()?
                    .archive()?
                    .context("No [archive] rejected directory configured")?;
                let tp = parse_thumbprint(thumbprint)?;
                let der = archive
                    .load(&tp)
                    .with_context(|| format!("No archived certificate {}", tp))?;
                if *pem {
                    print!("{}", uapki_lib::der_to_pem(&der));
                } else {
                    let cert = Certificate::from_der(&der)
                        .with_context(|| format!("Archived record {} is not a certificate", tp))?;
                    print_cert_summary(&cert);
                }
            }
            RejectedAction::Approve {
                config,
                thumbprint,
                to,
            } => {
                let config = config.load()?;
                let archive = config
                    .archive()?
                    .context("No [archive] rejected directory configured")?;
                let trusted_dir = to
                    .clone()
                    .or_else(|| config.trust.trusted.clone())
                    .context("No trusted directory: pass --to or set trust.trusted")?;
                let tp = parse_thumbprint(thumbprint)?;
                let path = archive
                    .approve(&tp, &trusted_dir)
                    .with_context(|| format!("Failed to approve {}", tp))?;
                println!("{}", path.display());
            }
            RejectedAction::Remove { config, thumbprint } => {
                let archive = config
                    .load()?
                    .archive()?
                    .context("No [archive] rejected directory configured")?;
                let tp = parse_thumbprint(thumbprint)?;
                archive
                    .remove(&tp)
                    .with_context(|| format!("Failed to remove {}", tp))?;
            }
        },
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn identity_flags_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "uapki",
            "validate",
            "--config",
            "pki.toml",
            "--hostname",
            "a",
            "--uri",
            "urn:b",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn identity_from_flags() {
        assert_eq!(expected_identity(None, None, None, None).unwrap(), None);
        assert_eq!(
            expected_identity(Some("plc-1"), None, None, None).unwrap(),
            Some(NetworkIdentity::Dns("plc-1".into()))
        );
        assert_eq!(
            expected_identity(None, None, None, Some("opc.tcp://10.0.0.5:4840")).unwrap(),
            Some(NetworkIdentity::Ip("10.0.0.5".parse().unwrap()))
        );
        assert!(expected_identity(None, None, None, Some("nonsense")).is_err());
    }

    #[test]
    fn thumbprint_argument_parsing() {
        let tp = parse_thumbprint("4d11b79d8100dce2b19918a0fdacd24727fe99de").unwrap();
        assert_eq!(tp.to_string(), "4D11B79D8100DCE2B19918A0FDACD24727FE99DE");
        assert!(parse_thumbprint("4D11").is_err());
    }

    #[test]
    fn der_input_passes_through() {
        let raw = vec![0x30, 0x03, 0x02, 0x01, 0x00];
        assert_eq!(candidate_bytes(raw.clone()), raw);
    }

    #[test]
    fn pem_after_blank_lines_is_decoded() {
        let pem = format!("\n\n{}", uapki_lib::der_to_pem(&[0x30, 0x00]));
        assert_eq!(candidate_bytes(pem.into_bytes()), vec![0x30, 0x00]);
    }

    #[test]
    fn broken_pem_passes_through() {
        let raw = b"-----BEGIN CERTIFICATE-----\n!!!\n".to_vec();
        assert_eq!(candidate_bytes(raw.clone()), raw);
    }

    #[test]
    fn is_cert_file_extensions() {
        assert!(is_cert_file(Path::new("peer.der")));
        assert!(is_cert_file(Path::new("peer.PEM")));
        assert!(!is_cert_file(Path::new("notes.txt")));
        assert!(!is_cert_file(Path::new("noext")));
    }

    #[test]
    fn find_cert_files_filters_and_sorts() {
        let tmp = std::env::temp_dir().join(format!("uapki_find_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&tmp);
        std::fs::create_dir_all(tmp.join("sub")).unwrap();
        std::fs::write(tmp.join("b.der"), b"x").unwrap();
        std::fs::write(tmp.join("a.pem"), b"x").unwrap();
        std::fs::write(tmp.join("readme.txt"), b"x").unwrap();
        std::fs::write(tmp.join("sub").join("c.crt"), b"x").unwrap();

        let flat = find_cert_files(&tmp, false);
        assert_eq!(flat, vec![tmp.join("a.pem"), tmp.join("b.der")]);
        let deep = find_cert_files(&tmp, true);
        assert_eq!(deep.len(), 3);

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
