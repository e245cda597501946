mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use group_keystore::{
    AesCryptoProvider, EpochKey, FabricIndex, FileStorage, GroupDataProvider, GroupId, GroupInfo, GroupKey, KeySet,
    KeysetId, SecurityPolicy,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "group-keystore")]
#[command(about = "Inspect and edit a fabric-scoped group key store")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Record file, overrides the configured storage path
    #[arg(short, long)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Named groups of a fabric
    #[command(subcommand)]
    Group(GroupCommand),
    /// Endpoint membership
    #[command(subcommand)]
    Endpoint(EndpointCommand),
    /// Group to keyset mappings
    #[command(subcommand)]
    Keymap(KeymapCommand),
    /// Epoch keysets
    #[command(subcommand)]
    Keyset(KeysetCommand),
    /// Registered fabrics
    #[command(subcommand)]
    Fabric(FabricCommand),
    /// Resolve an incoming group session id to the groups it may belong to
    Resolve {
        #[arg(value_parser = parse_u16)]
        session_id: u16,
    },
}

#[derive(Subcommand)]
enum GroupCommand {
    Set {
        fabric: FabricIndex,
        #[arg(value_parser = parse_u16)]
        group: GroupId,
        name: String,
        /// Write at a list position instead of by id
        #[arg(long)]
        index: Option<usize>,
    },
    Get {
        fabric: FabricIndex,
        #[arg(value_parser = parse_u16)]
        group: GroupId,
    },
    List {
        fabric: FabricIndex,
    },
    Remove {
        fabric: FabricIndex,
        #[arg(value_parser = parse_u16)]
        group: GroupId,
    },
}

#[derive(Subcommand)]
enum EndpointCommand {
    Add {
        fabric: FabricIndex,
        #[arg(value_parser = parse_u16)]
        group: GroupId,
        endpoint: u16,
    },
    /// Remove an endpoint from one group, or from every group without --group
    Remove {
        fabric: FabricIndex,
        endpoint: u16,
        #[arg(long, value_parser = parse_u16)]
        group: Option<GroupId>,
    },
    List {
        fabric: FabricIndex,
        #[arg(long, value_parser = parse_u16)]
        group: Option<GroupId>,
    },
}

#[derive(Subcommand)]
enum KeymapCommand {
    Set {
        fabric: FabricIndex,
        index: usize,
        #[arg(value_parser = parse_u16)]
        group: GroupId,
        #[arg(value_parser = parse_u16)]
        keyset: KeysetId,
    },
    List {
        fabric: FabricIndex,
    },
    Remove {
        fabric: FabricIndex,
        index: usize,
    },
    /// Remove every mapping of the fabric
    Clear {
        fabric: FabricIndex,
    },
}

#[derive(Subcommand)]
enum KeysetCommand {
    Set {
        fabric: FabricIndex,
        #[arg(value_parser = parse_u16)]
        keyset: KeysetId,
        /// Compressed fabric id used as the derivation salt
        #[arg(long, value_parser = parse_u64)]
        fabric_id: u64,
        /// Epoch key as START_MICROS:HEX32, oldest first
        #[arg(long = "key", value_parser = parse_epoch_key, required = true)]
        keys: Vec<EpochKey>,
        #[arg(long, value_enum, default_value_t = Policy::TrustFirst)]
        policy: Policy,
    },
    Get {
        fabric: FabricIndex,
        #[arg(value_parser = parse_u16)]
        keyset: KeysetId,
    },
    List {
        fabric: FabricIndex,
    },
    Remove {
        fabric: FabricIndex,
        #[arg(value_parser = parse_u16)]
        keyset: KeysetId,
    },
    /// Show the derived identity protection keys
    Ipk {
        fabric: FabricIndex,
    },
}

#[derive(Subcommand)]
enum FabricCommand {
    List,
    Remove { fabric: FabricIndex },
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    TrustFirst,
    CacheAndSync,
}

impl From<Policy> for SecurityPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::TrustFirst => SecurityPolicy::TrustFirst,
            Policy::CacheAndSync => SecurityPolicy::CacheAndSync,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config from {:?}: {}", cli.config, e);
        eprintln!("Using default configuration");
        config::Config::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    debug!("group-keystore v{}", env!("CARGO_PKG_VERSION"));

    let path = cli.storage.unwrap_or(config.storage.path);
    let storage = FileStorage::open(&path).with_context(|| format!("Failed to open record file {:?}", path))?;
    let mut provider = GroupDataProvider::new(Box::new(storage), Arc::new(AesCryptoProvider::new()), config.limits);
    provider.init();

    let result = run(&mut provider, cli.command);
    provider.finish();
    result
}

fn run(provider: &mut GroupDataProvider, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Group(cmd) => run_group(provider, cmd),
        Command::Endpoint(cmd) => run_endpoint(provider, cmd),
        Command::Keymap(cmd) => run_keymap(provider, cmd),
        Command::Keyset(cmd) => run_keyset(provider, cmd),
        Command::Fabric(cmd) => run_fabric(provider, cmd),
        Command::Resolve { session_id } => {
            let sessions = provider
                .iterate_group_sessions(session_id)
                .context("No iterator available")?;
            let mut found = 0;
            for session in sessions {
                println!(
                    "fabric {} group 0x{:04x} policy {}",
                    session.fabric_index, session.group_id, session.security_policy
                );
                found += 1;
            }
            if found == 0 {
                println!("No group session matches 0x{:04x}", session_id);
            }
            Ok(())
        }
    }
}

fn run_group(provider: &mut GroupDataProvider, command: GroupCommand) -> anyhow::Result<()> {
    match command {
        GroupCommand::Set {
            fabric,
            group,
            name,
            index,
        } => {
            let info = GroupInfo::new(group, &name);
            match index {
                Some(index) => provider.set_group_info_at(fabric, index, &info),
                None => provider.set_group_info(fabric, &info),
            }
            .context("Failed to set group")?;
            info!("Group 0x{:04x} '{}' stored on fabric {}", info.group_id, info.name, fabric);
        }
        GroupCommand::Get { fabric, group } => {
            let info = provider.get_group_info(fabric, group).context("Failed to get group")?;
            println!("0x{:04x}  {}", info.group_id, info.name);
        }
        GroupCommand::List { fabric } => {
            let groups = provider.iterate_group_infos(fabric).context("No iterator available")?;
            println!("{} group(s)", groups.total());
            for info in groups {
                println!("0x{:04x}  {}", info.group_id, info.name);
            }
        }
        GroupCommand::Remove { fabric, group } => {
            provider.remove_group_info(fabric, group).context("Failed to remove group")?;
            info!("Group 0x{:04x} removed from fabric {}", group, fabric);
        }
    }
    Ok(())
}

fn run_endpoint(provider: &mut GroupDataProvider, command: EndpointCommand) -> anyhow::Result<()> {
    match command {
        EndpointCommand::Add {
            fabric,
            group,
            endpoint,
        } => {
            provider
                .add_endpoint(fabric, group, endpoint)
                .context("Failed to add endpoint")?;
        }
        EndpointCommand::Remove {
            fabric,
            endpoint,
            group: Some(group),
        } => {
            provider
                .remove_endpoint(fabric, group, endpoint)
                .context("Failed to remove endpoint")?;
        }
        EndpointCommand::Remove {
            fabric,
            endpoint,
            group: None,
        } => {
            provider
                .remove_endpoint_from_all_groups(fabric, endpoint)
                .context("Failed to remove endpoint")?;
        }
        EndpointCommand::List { fabric, group } => {
            let endpoints = provider
                .iterate_endpoints(fabric, group)
                .context("No iterator available")?;
            println!("{} membership(s)", endpoints.total());
            for member in endpoints {
                println!("0x{:04x}  endpoint {}", member.group_id, member.endpoint_id);
            }
        }
    }
    Ok(())
}

fn run_keymap(provider: &mut GroupDataProvider, command: KeymapCommand) -> anyhow::Result<()> {
    match command {
        KeymapCommand::Set {
            fabric,
            index,
            group,
            keyset,
        } => {
            provider
                .set_group_key_at(fabric, index, &GroupKey::new(group, keyset))
                .context("Failed to set group key")?;
        }
        KeymapCommand::List { fabric } => {
            let keys = provider.iterate_group_keys(fabric).context("No iterator available")?;
            println!("{} mapping(s)", keys.total());
            for (index, key) in keys.enumerate() {
                println!("[{}] group 0x{:04x} -> keyset {}", index, key.group_id, key.keyset_id);
            }
        }
        KeymapCommand::Remove { fabric, index } => {
            provider
                .remove_group_key_at(fabric, index)
                .context("Failed to remove group key")?;
        }
        KeymapCommand::Clear { fabric } => {
            provider.remove_group_keys(fabric).context("Failed to clear group keys")?;
        }
    }
    Ok(())
}

fn run_keyset(provider: &mut GroupDataProvider, command: KeysetCommand) -> anyhow::Result<()> {
    match command {
        KeysetCommand::Set {
            fabric,
            keyset,
            fabric_id,
            keys,
            policy,
        } => {
            let keyset = KeySet::new(keyset, policy.into(), &keys)?;
            provider
                .set_keyset(fabric, fabric_id, &keyset)
                .context("Failed to set keyset")?;
            info!("Keyset {} stored with {} key(s)", keyset.keyset_id, keyset.num_keys_used);
        }
        KeysetCommand::Get { fabric, keyset } => {
            let keyset = provider.get_keyset(fabric, keyset).context("Failed to get keyset")?;
            print_keyset(&keyset, false);
        }
        KeysetCommand::List { fabric } => {
            let keysets = provider.iterate_keysets(fabric).context("No iterator available")?;
            println!("{} keyset(s)", keysets.total());
            for keyset in keysets {
                print_keyset(&keyset, false);
            }
        }
        KeysetCommand::Remove { fabric, keyset } => {
            provider
                .remove_keyset(fabric, keyset)
                .context("Failed to remove keyset")?;
        }
        KeysetCommand::Ipk { fabric } => {
            let keyset = provider.get_ipk_keyset(fabric).context("Failed to get IPK keyset")?;
            print_keyset(&keyset, true);
        }
    }
    Ok(())
}

fn run_fabric(provider: &mut GroupDataProvider, command: FabricCommand) -> anyhow::Result<()> {
    match command {
        FabricCommand::List => {
            for fabric in provider.fabric_indices().context("Failed to list fabrics")? {
                println!("fabric {}", fabric);
            }
        }
        FabricCommand::Remove { fabric } => {
            provider.remove_fabric(fabric).context("Failed to remove fabric")?;
            info!("Fabric {} removed", fabric);
        }
    }
    Ok(())
}

fn print_keyset(keyset: &KeySet, with_keys: bool) {
    println!("keyset {} ({}, {} key(s))", keyset.keyset_id, keyset.policy, keyset.num_keys_used);
    for key in keyset.epoch_keys.iter().take(keyset.num_keys_used as usize) {
        if with_keys {
            println!("  {}  {}", format_start_time(key.start_time), hex::encode(key.key));
        } else {
            println!("  {}", format_start_time(key.start_time));
        }
    }
}

/// Start times are microseconds since the Unix epoch
fn format_start_time(micros: u64) -> String {
    i64::try_from(micros)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| format!("{}us", micros))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_u64(s: &str) -> Result<u64, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_epoch_key(s: &str) -> Result<EpochKey, String> {
    let (start, key) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START_MICROS:HEX32, got '{}'", s))?;
    let start_time = parse_u64(start)?;
    let bytes = hex::decode(key).map_err(|e| format!("invalid key hex: {}", e))?;
    let key: [u8; 16] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("key must be 16 bytes, got {}", b.len()))?;
    Ok(EpochKey::new(start_time, key))
}
