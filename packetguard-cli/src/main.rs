//! `packetguard` control-plane CLI: attach the XDP program and run as a
//! daemon, or mutate an already-running daemon's tables through its pinned
//! maps. Every mutating subcommand exits 0 on success and 1 with a message
//! on stderr otherwise, the same contract the original whitelist tool used.

mod error;

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use packetguard_common::{Config, PathStatsIndex, WhitelistKey};
use packetguard_loader::{apply_runtime_config, Attachment, Control, PinnedTables, RuntimeConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(author, version, about = "packetguard control-plane CLI")]
struct Cli {
    /// Directory the running daemon pinned its maps under.
    #[arg(long, default_value = "/sys/fs/bpf/packetguard", env = "PACKETGUARD_PIN_DIR")]
    pin_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the XDP program, attach it to an interface, pin its maps, and
    /// block until interrupted.
    Run {
        #[arg(short, long)]
        interface: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Manage the whitelist.
    Wl {
        #[command(subcommand)]
        action: AddrAction,
    },
    /// Manage the blacklist.
    Bl {
        #[command(subcommand)]
        action: AddrAction,
    },
    /// Manage the ACL allow-list (ports 0-63).
    Acl {
        #[command(subcommand)]
        action: PortAction,
    },
    /// Global kill switch: drop everything not on the whitelist.
    Panic {
        #[command(subcommand)]
        action: Switch,
    },
    /// Global bypass: skip stateful inspection for every flow.
    Bypass {
        #[command(subcommand)]
        action: Switch,
    },
    /// Set the UDP token-bucket parameters.
    Cfg {
        #[arg(long)]
        refill_ns: Option<u64>,
        #[arg(long)]
        burst: Option<u32>,
    },
    /// Print fast-path/slow-path/whitelist-miss counters.
    Stats,
}

#[derive(Subcommand, Debug)]
enum AddrAction {
    Add { addr: String },
    Del { addr: String },
}

#[derive(Subcommand, Debug)]
enum PortAction {
    Allow { port: u16 },
    Deny { port: u16 },
}

#[derive(Subcommand, Debug)]
enum Switch {
    On,
    Off,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!(%err, "command failed");
        eprintln!("packetguard: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Run { interface, config } => run_daemon(&interface, config.as_deref(), &cli.pin_dir),
        Command::Wl { action } => whitelist(&cli.pin_dir, action),
        Command::Bl { action } => blacklist(&cli.pin_dir, action),
        Command::Acl { action } => acl(&cli.pin_dir, action),
        Command::Panic { action } => {
            PinnedTables::open(&cli.pin_dir).set_panic(matches!(action, Switch::On))?;
            Ok(())
        }
        Command::Bypass { action } => {
            PinnedTables::open(&cli.pin_dir).set_global_bypass(matches!(action, Switch::On))?;
            Ok(())
        }
        Command::Cfg { refill_ns, burst } => {
            PinnedTables::open(&cli.pin_dir)
                .set_config(Config { ns: refill_ns.unwrap_or(0), burst: burst.unwrap_or(0), _pad: 0 })?;
            Ok(())
        }
        Command::Stats => {
            let tables = PinnedTables::open(&cli.pin_dir);
            let fast = tables.path_stat_total(PathStatsIndex::Fast)?;
            let slow = tables.path_stat_total(PathStatsIndex::Slow)?;
            let wl_miss = tables.whitelist_miss_total()?;
            println!("fast_path={fast} slow_path={slow} whitelist_miss={wl_miss}");
            Ok(())
        }
    }
}

fn run_daemon(interface: &str, config_path: Option<&std::path::Path>, pin_dir: &std::path::Path) -> Result<(), CliError> {
    let mut attachment = Attachment::load_and_attach(interface).map_err(CliError::Attach)?;

    if let Some(path) = config_path {
        let runtime_config = RuntimeConfig::load(path)?;
        let mut control = Control::new(attachment.ebpf_mut());
        apply_runtime_config(&mut control, &runtime_config);
    }

    attachment.pin_maps(pin_dir)?;
    info!(interface = attachment.interface(), pin_dir = %pin_dir.display(), "packetguard running");

    // Block until the process is killed; dropping `attachment` on exit
    // detaches the program and tears down its maps.
    loop {
        std::thread::park();
    }
}

fn whitelist_key(addr: &str) -> Result<WhitelistKey, CliError> {
    match addr.parse::<IpAddr>().map_err(CliError::InvalidAddress)? {
        IpAddr::V4(v4) => Ok(WhitelistKey::v4(v4.octets())),
        IpAddr::V6(v6) => Ok(WhitelistKey::v6(v6.octets())),
    }
}

fn whitelist(pin_dir: &std::path::Path, action: AddrAction) -> Result<(), CliError> {
    let tables = PinnedTables::open(pin_dir);
    match action {
        AddrAction::Add { addr } => tables.whitelist_insert(whitelist_key(&addr)?)?,
        AddrAction::Del { addr } => tables.whitelist_remove(whitelist_key(&addr)?)?,
    }
    Ok(())
}

fn blacklist(pin_dir: &std::path::Path, action: AddrAction) -> Result<(), CliError> {
    let tables = PinnedTables::open(pin_dir);
    let (addr, add) = match action {
        AddrAction::Add { addr } => (addr, true),
        AddrAction::Del { addr } => (addr, false),
    };
    match addr.parse::<IpAddr>().map_err(CliError::InvalidAddress)? {
        IpAddr::V4(v4) => {
            let raw = u32::from_be_bytes(v4.octets());
            if add {
                tables.blacklist_v4_insert(raw)?;
            } else {
                tables.blacklist_v4_remove(raw)?;
            }
        }
        IpAddr::V6(v6) => {
            let raw = v6.octets();
            if add {
                tables.blacklist_v6_insert(raw)?;
            } else {
                tables.blacklist_v6_remove(raw)?;
            }
        }
    }
    Ok(())
}

fn acl(pin_dir: &std::path::Path, action: PortAction) -> Result<(), CliError> {
    let tables = PinnedTables::open(pin_dir);
    match action {
        PortAction::Allow { port } => tables.acl_allow_port(port)?,
        PortAction::Deny { port } => tables.acl_deny_port(port)?,
    }
    Ok(())
}

