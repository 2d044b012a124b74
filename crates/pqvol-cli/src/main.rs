//! pqvol: post-quantum encrypted volume containers
//!
//! Commands:
//!   create <path> <size>          - create a new container
//!   info <path>                   - show the header of a container
//!   read <path> <offset> <length> - decrypt a byte range to stdout or a file
//!   write <path> <offset>         - encrypt stdin or a file into the volume
//!   passwd <path>                 - change the password (and KDF profile)
//!   profiles                      - list KDF profiles
//!   config show                   - display current configuration
//!
//! Passwords come from `PQVOL_PASSWORD` (and `PQVOL_NEW_PASSWORD` for passwd)
//! or an interactive prompt.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pqvol_core::config::{expand_tilde, PqvolConfig};
use pqvol_crypto::{KdfParams, ProfileCatalog};
use pqvol_volume::{CreateOptions, VolumeManager};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pqvol",
    version,
    about = "Post-quantum encrypted volumes",
    long_about = "pqvol: create, inspect and access ML-KEM-1024 / Argon2id / XChaCha20-Poly1305 volume containers"
)]
struct Cli {
    /// Path to pqvol.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PQVOL_CONFIG",
        default_value = "~/.config/pqvol/pqvol.toml"
    )]
    config: PathBuf,

    /// Log level filter (overrides config log.level)
    #[arg(long, env = "PQVOL_LOG")]
    log: Option<String>,

    /// Log format: text or json (overrides config log.format)
    #[arg(long, env = "PQVOL_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new encrypted container
    Create {
        /// Container path
        path: PathBuf,
        /// Volume size in bytes; K, M, G suffixes are binary (10M = 10 MiB)
        size: String,
        /// KDF profile name (default: config volume.default_profile)
        #[arg(long, short = 'p')]
        profile: Option<String>,
        /// Free-form label stored in the header
        #[arg(long, default_value = "")]
        label: String,
        /// Replace an existing file at the path
        #[arg(long)]
        force: bool,
        /// Personal iterations multiplier: scales the profile's time cost
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        pim: Option<u32>,
    },

    /// Show a container's header (no password needed)
    Info {
        path: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decrypt a byte range of the volume
    Read {
        path: PathBuf,
        offset: u64,
        length: usize,
        /// Write to this file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Encrypt bytes into the volume at an offset
    Write {
        path: PathBuf,
        offset: u64,
        /// Read from this file instead of stdin
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
    },

    /// Change the volume password
    Passwd {
        path: PathBuf,
        /// Re-derive under this KDF profile (default: keep current parameters)
        #[arg(long, short = 'p')]
        profile: Option<String>,
        /// Personal iterations multiplier for the new password
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        pim: Option<u32>,
    },

    /// List available KDF profiles
    Profiles,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = PqvolConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.as_deref().unwrap_or(config.log.level.as_str());
    let format = cli.log_format.as_deref().unwrap_or(config.log.format.as_str());
    init_logging(level, format);
    tracing::debug!(
        config = %config_path.display(),
        keywrap = ?config.keywrap.backend,
        "loaded configuration"
    );

    match cli.command {
        Commands::Create {
            path,
            size,
            profile,
            label,
            force,
            pim,
        } => cmd_create(&config, &path, &size, profile.as_deref(), label, force, pim).await,
        Commands::Info { path, json } => cmd_info(&path, json).await,
        Commands::Read {
            path,
            offset,
            length,
            output,
        } => cmd_read(&config, &path, offset, length, output.as_deref()).await,
        Commands::Write {
            path,
            offset,
            input,
        } => cmd_write(&config, &path, offset, input.as_deref()).await,
        Commands::Passwd { path, profile, pim } => {
            cmd_passwd(&config, &path, profile.as_deref(), pim).await
        }
        Commands::Profiles => cmd_profiles(&config),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries volume data for `read`
    let layer = fmt::layer().with_writer(std::io::stderr);

    match format {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init(),
        _ => tracing_subscriber::registry().with(filter).with(layer).init(),
    }
}

// ── Engine setup ──────────────────────────────────────────────────────────────

fn build_manager(config: &PqvolConfig) -> Result<Arc<VolumeManager>> {
    let keywrap = pqvol_keywrap::from_config(&config.keywrap).with_context(|| {
        format!(
            "opening {:?} key-wrap backend (handle {})",
            config.keywrap.backend, config.keywrap.handle
        )
    })?;
    Ok(Arc::new(VolumeManager::new(Arc::from(keywrap))))
}

/// Built-in profiles plus the `[profiles.*]` tables from the config.
fn build_catalog(config: &PqvolConfig) -> Result<ProfileCatalog> {
    config
        .profiles
        .iter()
        .try_fold(ProfileCatalog::builtin(), |catalog, (name, p)| {
            catalog
                .with_profile(
                    name,
                    KdfParams::new(p.memory_cost_kib, p.time_cost, p.parallelism),
                )
                .with_context(|| format!("registering profile {name:?} from config"))
        })
}

/// Run KDF-heavy engine work on the blocking pool behind a spinner.
async fn run_blocking<T, F>(prefix: &str, msg: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let pb = make_spinner(prefix);
    pb.set_message(msg.to_string());
    let result = tokio::task::spawn_blocking(f)
        .await
        .context("engine task panicked")?;
    pb.finish_and_clear();
    result
}

// ── Password input ────────────────────────────────────────────────────────────

fn read_password(env_var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var(env_var) {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

/// Read a new password, asking twice when interactive.
fn read_new_password(env_var: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var(env_var) {
        return Ok(SecretString::from(pw));
    }
    let first = read_password(env_var, "New password: ")?;
    let second = read_password(env_var, "Repeat password: ")?;
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passwords do not match");
    }
    if first.expose_secret().is_empty() {
        anyhow::bail!("empty password");
    }
    Ok(first)
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `pqvol create` ────────────────────────────────────────────────────────────

async fn cmd_create(
    config: &PqvolConfig,
    path: &Path,
    size: &str,
    profile: Option<&str>,
    label: String,
    force: bool,
    pim: Option<u32>,
) -> Result<()> {
    let size = parse_size(size)?;
    let profile = profile.unwrap_or(config.volume.default_profile.as_str());
    let params = build_catalog(config)?
        .resolve(profile)
        .with_context(|| format!("resolving profile {profile:?}"))?;
    let manager = build_manager(config)?;
    let password = read_new_password("PQVOL_PASSWORD")?;

    println!(
        "Creating {} ({}, profile {}: {})",
        path.display(),
        fmt_bytes(size),
        profile,
        params
    );

    if let Some(pim) = pim {
        println!("  PIM {pim}: time cost x{pim}");
    }

    let options = CreateOptions {
        overwrite: force || config.volume.allow_overwrite,
        label,
        pim,
    };
    let target = path.to_path_buf();
    let volume_id = run_blocking("create", "deriving keys and sealing blocks...", move || {
        manager
            .create(&target, &password, &params, size, &options)
            .with_context(|| format!("creating {}", target.display()))
    })
    .await?;

    println!("  volume id: {volume_id}");
    Ok(())
}

// ── `pqvol info` ──────────────────────────────────────────────────────────────

async fn cmd_info(path: &Path, json: bool) -> Result<()> {
    // inspect never touches key material, so no key-wrap backend is needed
    let manager = VolumeManager::new(Arc::new(pqvol_keywrap::SoftwareKeyWrap::ephemeral(
        pqvol_keywrap::KeyHandle::new("inspect"),
    )));
    let target = path.to_path_buf();
    let info = tokio::task::spawn_blocking(move || manager.inspect(&target))
        .await
        .context("engine task panicked")?
        .with_context(|| format!("reading header of {}", path.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("serializing volume info")?
        );
        return Ok(());
    }

    println!("{}", path.display());
    println!("  volume id:  {}", info.volume_id);
    println!("  version:    {}", info.version);
    println!("  size:       {} ({} bytes)", fmt_bytes(info.volume_size), info.volume_size);
    println!("  block size: {}", info.block_size);
    println!("  kem:        {}", info.kem);
    println!("  kdf:        {} ({})", info.kdf, info.kdf_params);
    println!("  created:    {}", info.created);
    println!("  modified:   {}", info.modified);
    if !info.label.is_empty() {
        println!("  label:      {}", info.label);
    }
    Ok(())
}

// ── `pqvol read` ──────────────────────────────────────────────────────────────

async fn cmd_read(
    config: &PqvolConfig,
    path: &Path,
    offset: u64,
    length: usize,
    output: Option<&Path>,
) -> Result<()> {
    let manager = build_manager(config)?;
    let password = read_password("PQVOL_PASSWORD", "Password: ")?;

    let target = path.to_path_buf();
    let data = run_blocking("read", "unlocking volume...", move || {
        let mut handle = manager
            .mount(&target, &password)
            .with_context(|| format!("mounting {}", target.display()))?;
        let data = manager.read_block(&mut handle, offset, length);
        manager.unmount(&mut handle).context("unmounting")?;
        data.with_context(|| format!("reading {length} bytes at offset {offset}"))
    })
    .await?;

    match output {
        Some(out) => std::fs::write(out, &data)
            .with_context(|| format!("writing {}", out.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data).context("writing to stdout")?;
            stdout.flush().context("flushing stdout")?;
        }
    }
    Ok(())
}

// ── `pqvol write` ─────────────────────────────────────────────────────────────

async fn cmd_write(
    config: &PqvolConfig,
    path: &Path,
    offset: u64,
    input: Option<&Path>,
) -> Result<()> {
    let data = match input {
        Some(file) => std::fs::read(file).with_context(|| format!("reading {}", file.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };
    let manager = build_manager(config)?;
    let password = read_password("PQVOL_PASSWORD", "Password: ")?;

    let target = path.to_path_buf();
    let written = data.len();
    run_blocking("write", "unlocking volume...", move || {
        let mut handle = manager
            .mount(&target, &password)
            .with_context(|| format!("mounting {}", target.display()))?;
        let result = manager.write_block(&mut handle, offset, data.len(), &data);
        manager.unmount(&mut handle).context("unmounting")?;
        result.with_context(|| format!("writing {} bytes at offset {offset}", data.len()))
    })
    .await?;

    eprintln!("wrote {} at offset {offset}", fmt_bytes(written as u64));
    Ok(())
}

// ── `pqvol passwd` ────────────────────────────────────────────────────────────

async fn cmd_passwd(
    config: &PqvolConfig,
    path: &Path,
    profile: Option<&str>,
    pim: Option<u32>,
) -> Result<()> {
    let params = match profile {
        Some(name) => Some(
            build_catalog(config)?
                .resolve(name)
                .with_context(|| format!("resolving profile {name:?}"))?,
        ),
        None => None,
    };
    let manager = build_manager(config)?;
    let old = read_password("PQVOL_PASSWORD", "Current password: ")?;
    let new = read_new_password("PQVOL_NEW_PASSWORD")?;

    let target = path.to_path_buf();
    run_blocking("passwd", "re-deriving password key...", move || {
        manager
            .change_password(&target, &old, &new, params, pim)
            .with_context(|| format!("changing password of {}", target.display()))
    })
    .await?;

    println!("Password changed for {}", path.display());
    Ok(())
}

// ── `pqvol profiles` ──────────────────────────────────────────────────────────

fn cmd_profiles(config: &PqvolConfig) -> Result<()> {
    let catalog = build_catalog(config)?;
    let default = config.volume.default_profile.as_str();
    println!("{:<12} {:>10} {:>6} {:>6}", "PROFILE", "MEMORY", "TIME", "LANES");
    for (name, params) in catalog.iter() {
        let marker = if name == default { " (default)" } else { "" };
        println!(
            "{:<12} {:>10} {:>6} {:>6}{marker}",
            name,
            fmt_bytes(u64::from(params.memory_cost_kib) * 1024),
            params.time_cost,
            params.parallelism,
        );
    }
    println!();
    println!("floor: {}", ProfileCatalog::floor());
    Ok(())
}

// ── `pqvol config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &PqvolConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Formatting helpers ────────────────────────────────────────────────────────

/// Parse a size such as `4096`, `64K`, `10M` or `2G` (binary units).
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, multiplier) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let multiplier: u64 = match c.to_ascii_uppercase() {
                'K' => 1 << 10,
                'M' => 1 << 20,
                'G' => 1 << 30,
                'T' => 1 << 40,
                _ => anyhow::bail!("unknown size suffix {c:?} in {s:?}"),
            };
            (&s[..i], multiplier)
        }
        _ => (s, 1),
    };
    let n: u64 = digits
        .parse()
        .with_context(|| format!("invalid size {s:?}"))?;
    n.checked_mul(multiplier)
        .with_context(|| format!("size {s:?} overflows"))
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
