//! Asset manager
//!
//! Materializes everything a network needs on disk and is the single writer of
//! per-node configuration. Layout under `<root>/<network>/`:
//!
//! ```text
//! network.toml                 manifest (settings, chainspec, node descriptors)
//! roster.toml                  fleet membership
//! chainspec/chainspec.toml     current network chainspec
//! chainspec/accounts.toml      genesis accounts
//! nodes/node-N/keys/           secret_key.hex, public_key.hex
//! nodes/node-N/bin/<ver>/node  executable per version
//! nodes/node-N/config/<ver>/   chainspec.toml, config.toml per version
//! nodes/node-N/storage/        runtime state, kept across restarts
//! nodes/node-N/logs/           stdout.log, stderr.log
//! nodes/node-N/run/node.pid    pid of the live process
//! upgrades/<ver>.json          upgrade run records
//! ```
//!
//! All writes go through one lock; readers get cloned descriptors.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use devnet_core::asset::manifest_path;
use devnet_core::chainspec::{CoreSection, NetworkSection, ProtocolSection};
use devnet_core::effects::StagedArtifacts;
use devnet_core::{
    ActivationPoint, Chainspec, ChainspecDelta, DevnetError, GenesisAccount, GenesisAccounts,
    NetworkAsset, NetworkSettings, NodeDescriptor, NodeId, NodeTemplate, ProtocolVersion, Result,
    UpgradeRun,
};
use ed25519_dalek::SigningKey;
use parking_lot::RwLock;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// File name of the node executable inside `bin/<ver>/`
pub const NODE_BINARY: &str = "node";

/// Node configuration file written next to each staged chainspec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity and version
    pub node: NodeSection,
    /// Peer-to-peer listener and bootstrap peers
    pub network: NetworkListener,
    /// JSON-RPC listener
    pub rpc_server: Listener,
    /// Metrics listener
    pub metrics: Listener,
    /// Storage location
    pub storage: StorageSection,
    /// Signing key location
    pub consensus: ConsensusSection,
}

/// `[node]` section of a node config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSection {
    /// Node id
    pub id: NodeId,
    /// Version the config belongs to
    pub version: ProtocolVersion,
    /// Chainspec read at startup
    pub chainspec_path: PathBuf,
}

/// `[network]` section of a node config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkListener {
    /// Bind address
    pub bind_address: String,
    /// Address advertised to peers
    pub public_address: String,
    /// Bootstrap peers
    pub known_addresses: Vec<String>,
}

/// A plain listener section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    /// Bind address
    pub address: String,
}

/// `[storage]` section of a node config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Storage directory
    pub path: PathBuf,
}

/// `[consensus]` section of a node config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusSection {
    /// Secret key file
    pub secret_key_path: PathBuf,
}

/// A network computed from settings but not yet written to disk.
pub struct GeneratedNetwork {
    /// Descriptors, chainspec and settings
    pub asset: NetworkAsset,
    /// Genesis accounts
    pub accounts: GenesisAccounts,
    /// Signing key per node
    pub keys: Vec<(NodeId, SigningKey)>,
}

/// Owner of a network's on-disk assets.
pub struct AssetManager {
    asset: RwLock<NetworkAsset>,
}

impl AssetManager {
    /// Compute a network from settings without touching the filesystem.
    ///
    /// Identical settings, `now` and RNG state yield identical output.
    pub fn plan<R: RngCore + CryptoRng>(
        root_dir: &Path,
        settings: &NetworkSettings,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<GeneratedNetwork> {
        settings.validate()?;
        let root = root_dir.join(&settings.name);
        let genesis_timestamp = settings.genesis_timestamp.unwrap_or_else(|| {
            now + ChronoDuration::seconds(i64::try_from(settings.genesis_delay_secs).unwrap_or(0))
        });

        let chainspec = Chainspec {
            protocol: ProtocolSection {
                version: settings.initial_version,
                activation_point: ActivationPoint::EraId(0),
                hard_reset: false,
                last_emergency_restart: None,
            },
            network: NetworkSection {
                name: settings.name.clone(),
                genesis_timestamp,
            },
            core: CoreSection {
                validator_slots: settings.validator_slots,
                blocks_per_era: settings.blocks_per_era,
                auction_delay: settings.auction_delay,
                unbonding_delay: settings.unbonding_delay,
            },
        };

        let mut nodes = Vec::with_capacity(usize::from(settings.node_count));
        let mut keys = Vec::with_capacity(usize::from(settings.node_count));
        let mut accounts = GenesisAccounts::default();
        for index in 1..=settings.node_count {
            let id = NodeId::new(index);
            let ports = settings.ports_for(id).ok_or_else(|| {
                DevnetError::configuration(format!("no port slot for {id}"))
            })?;
            let key = SigningKey::generate(rng);
            let public_key = public_key_hex(&key);
            accounts.accounts.push(GenesisAccount {
                public_key: public_key.clone(),
                balance: settings.account_balance,
                bonded_amount: settings.validator_stake,
            });
            nodes.push(NodeDescriptor {
                id,
                public_key,
                ports,
                data_dir: root.join("nodes").join(id.dir_name()),
                version: settings.initial_version,
                stake: settings.validator_stake,
            });
            keys.push((id, key));
        }

        Ok(GeneratedNetwork {
            asset: NetworkAsset {
                name: settings.name.clone(),
                root,
                settings: settings.clone(),
                chainspec,
                nodes,
            },
            accounts,
            keys,
        })
    }

    /// Generate a network and write it under `root_dir/<name>`.
    ///
    /// Fails when a network of that name already exists.
    pub fn generate<R: RngCore + CryptoRng>(
        root_dir: &Path,
        settings: &NetworkSettings,
        rng: &mut R,
    ) -> Result<Self> {
        let generated = Self::plan(root_dir, settings, Utc::now(), rng)?;
        let asset = generated.asset;
        if asset.manifest_path().exists() {
            return Err(DevnetError::configuration(format!(
                "network '{}' already exists at {}; tear it down first",
                asset.name,
                asset.root.display()
            )));
        }

        std::fs::create_dir_all(asset.chainspec_dir())?;
        std::fs::create_dir_all(asset.upgrades_dir())?;
        write_toml(&asset.chainspec_dir().join("chainspec.toml"), &asset.chainspec)?;
        write_toml(&asset.chainspec_dir().join("accounts.toml"), &generated.accounts)?;

        let known = asset
            .nodes
            .iter()
            .map(NodeDescriptor::network_address)
            .collect::<Vec<_>>();
        for (descriptor, (_, key)) in asset.nodes.iter().zip(&generated.keys) {
            materialize_node(descriptor, key)?;
            write_version_config(descriptor, &asset.chainspec, &known)?;
        }

        save_manifest(&asset)?;
        info!(
            network = %asset.name,
            nodes = asset.nodes.len(),
            root = %asset.root.display(),
            "generated network assets"
        );
        Ok(Self {
            asset: RwLock::new(asset),
        })
    }

    /// Open an existing network
    pub fn load(root_dir: &Path, name: &str) -> Result<Self> {
        let path = manifest_path(&root_dir.join(name));
        if !path.exists() {
            return Err(DevnetError::configuration(format!(
                "network '{name}' not found under {}; run setup first",
                root_dir.display()
            )));
        }
        let contents = std::fs::read_to_string(&path)?;
        let asset: NetworkAsset = toml::from_str(&contents)?;
        debug!(network = %asset.name, nodes = asset.nodes.len(), "loaded network manifest");
        Ok(Self {
            asset: RwLock::new(asset),
        })
    }

    /// Snapshot of the current assets
    pub fn asset(&self) -> NetworkAsset {
        self.asset.read().clone()
    }

    /// Network name
    pub fn name(&self) -> String {
        self.asset.read().name.clone()
    }

    /// Network directory
    pub fn root(&self) -> PathBuf {
        self.asset.read().root.clone()
    }

    /// Settings the network was generated from
    pub fn settings(&self) -> NetworkSettings {
        self.asset.read().settings.clone()
    }

    /// Current network chainspec
    pub fn chainspec(&self) -> Chainspec {
        self.asset.read().chainspec.clone()
    }

    /// Descriptor for `node`
    pub fn node(&self, node: NodeId) -> Result<NodeDescriptor> {
        self.asset.read().node(node).cloned().ok_or_else(|| {
            DevnetError::configuration(format!("{node} has no generated assets"))
        })
    }

    /// Generate assets for a node joining after genesis.
    ///
    /// The node gets the next unused id, fresh keys, ports from its slot, and
    /// the binary and config of its version copied from a node that already has
    /// them staged.
    pub fn add_node<R: RngCore + CryptoRng>(
        &self,
        template: &NodeTemplate,
        rng: &mut R,
    ) -> Result<NodeDescriptor> {
        let mut asset = self.asset.write();
        let id = asset.next_node_id();
        let ports = asset.settings.ports_for(id).ok_or_else(|| {
            DevnetError::configuration(format!(
                "{id} exceeds the {} reserved port slots",
                asset.settings.max_nodes
            ))
        })?;
        let version = template.version.unwrap_or(asset.chainspec.protocol.version);

        let donor = asset
            .nodes
            .iter()
            .find(|n| binary_path(n, &version).is_file())
            .cloned()
            .ok_or_else(|| {
                DevnetError::configuration(format!("no node has version {version} installed"))
            })?;
        let chainspec = if version == asset.chainspec.protocol.version {
            asset.chainspec.clone()
        } else {
            read_toml(&donor.config_dir(&version).join("chainspec.toml"))?
        };

        let key = SigningKey::generate(rng);
        let descriptor = NodeDescriptor {
            id,
            public_key: public_key_hex(&key),
            ports,
            data_dir: asset.root.join("nodes").join(id.dir_name()),
            version,
            stake: template.stake.unwrap_or(asset.settings.validator_stake),
        };
        let known = asset
            .nodes
            .iter()
            .map(NodeDescriptor::network_address)
            .collect::<Vec<_>>();

        materialize_node(&descriptor, &key)?;
        write_version_config(&descriptor, &chainspec, &known)?;
        install_file(&binary_path(&donor, &version), &descriptor.bin_dir(&version))?;

        asset.nodes.push(descriptor.clone());
        save_manifest(&asset)?;
        info!(node = %id, %version, "generated assets for joining node");
        Ok(descriptor)
    }

    /// Stage the chainspec for `version` on every node, derived from the
    /// current network chainspec
    pub fn regenerate_chainspec(
        &self,
        version: ProtocolVersion,
        delta: &ChainspecDelta,
    ) -> Result<Chainspec> {
        let base = self.chainspec();
        self.regenerate_chainspec_from(&base, version, delta)
    }

    /// Stage the chainspec for `version` on every node, derived from `base`
    pub fn regenerate_chainspec_from(
        &self,
        base: &Chainspec,
        version: ProtocolVersion,
        delta: &ChainspecDelta,
    ) -> Result<Chainspec> {
        let asset = self.asset.write();
        let mut next = base.apply(delta);
        next.protocol.version = version;
        next.network = asset.chainspec.network.clone();

        let known = asset
            .nodes
            .iter()
            .map(NodeDescriptor::network_address)
            .collect::<Vec<_>>();
        for descriptor in &asset.nodes {
            write_version_config(descriptor, &next, &known)?;
        }
        debug!(%version, "staged chainspec on {} nodes", asset.nodes.len());
        Ok(next)
    }

    /// Install a staged build's executable for `node`
    pub fn install_binary(&self, node: NodeId, artifacts: &StagedArtifacts) -> Result<PathBuf> {
        let asset = self.asset.write();
        let descriptor = asset.node(node).cloned().ok_or_else(|| {
            DevnetError::configuration(format!("{node} has no generated assets"))
        })?;
        let installed = install_file(&artifacts.binary, &descriptor.bin_dir(&artifacts.version))?;
        debug!(%node, version = %artifacts.version, "installed node binary");
        Ok(installed)
    }

    /// Whether `node` has both binary and config for `version`
    pub fn is_staged(&self, node: NodeId, version: &ProtocolVersion) -> bool {
        self.asset.read().node(node).is_some_and(|descriptor| {
            binary_path(descriptor, version).is_file()
                && descriptor.config_dir(version).join("config.toml").is_file()
        })
    }

    /// Point `node` at `version`; takes effect on its next start
    pub fn activate_version(&self, node: NodeId, version: ProtocolVersion) -> Result<()> {
        if !self.is_staged(node, &version) {
            return Err(DevnetError::configuration(format!(
                "{version} is not staged on {node}"
            )));
        }
        let mut asset = self.asset.write();
        let descriptor = asset.node_mut(node).ok_or_else(|| {
            DevnetError::configuration(format!("{node} has no generated assets"))
        })?;
        descriptor.version = version;
        save_manifest(&asset)?;
        debug!(%node, %version, "activated version");
        Ok(())
    }

    /// Make `chainspec` the network's current chainspec
    pub fn promote_chainspec(&self, chainspec: Chainspec) -> Result<()> {
        let mut asset = self.asset.write();
        write_toml(&asset.chainspec_dir().join("chainspec.toml"), &chainspec)?;
        asset.chainspec = chainspec;
        save_manifest(&asset)
    }

    /// Persist an upgrade run record under `upgrades/<ver>.json`
    pub fn record_upgrade(&self, run: &UpgradeRun) -> Result<PathBuf> {
        let asset = self.asset.read();
        std::fs::create_dir_all(asset.upgrades_dir())?;
        let path = asset
            .upgrades_dir()
            .join(format!("{}.json", run.plan.target_version.dir_name()));
        write_atomic(&path, &serde_json::to_vec_pretty(run)?)?;
        Ok(path)
    }

    /// Read a persisted upgrade run record
    pub fn upgrade_record(&self, version: &ProtocolVersion) -> Result<Option<UpgradeRun>> {
        let path = self
            .asset
            .read()
            .upgrades_dir()
            .join(format!("{}.json", version.dir_name()));
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Delete every file belonging to the network
    pub fn teardown(&self) -> Result<()> {
        let asset = self.asset.write();
        if asset.root.exists() {
            std::fs::remove_dir_all(&asset.root)?;
        }
        info!(network = %asset.name, "removed network assets");
        Ok(())
    }
}

/// Executable for `version` on `descriptor`
pub fn binary_path(descriptor: &NodeDescriptor, version: &ProtocolVersion) -> PathBuf {
    descriptor.bin_dir(version).join(NODE_BINARY)
}

/// `01`-prefixed hex ed25519 public key
pub fn public_key_hex(key: &SigningKey) -> String {
    format!("01{}", hex::encode(key.verifying_key().to_bytes()))
}

fn materialize_node(descriptor: &NodeDescriptor, key: &SigningKey) -> Result<()> {
    for dir in [
        descriptor.keys_dir(),
        descriptor.storage_dir(),
        descriptor.logs_dir(),
        descriptor.run_dir(),
    ] {
        std::fs::create_dir_all(dir)?;
    }
    write_atomic(
        &descriptor.keys_dir().join("secret_key.hex"),
        hex::encode(key.to_bytes()).as_bytes(),
    )?;
    restrict_permissions(&descriptor.keys_dir().join("secret_key.hex"), 0o600)?;
    write_atomic(
        &descriptor.keys_dir().join("public_key.hex"),
        descriptor.public_key.as_bytes(),
    )
}

fn write_version_config(
    descriptor: &NodeDescriptor,
    chainspec: &Chainspec,
    known_addresses: &[String],
) -> Result<()> {
    let version = chainspec.protocol.version;
    let dir = descriptor.config_dir(&version);
    std::fs::create_dir_all(&dir)?;
    let chainspec_path = dir.join("chainspec.toml");
    write_toml(&chainspec_path, chainspec)?;

    let own = descriptor.network_address();
    let config = NodeConfig {
        node: NodeSection {
            id: descriptor.id,
            version,
            chainspec_path,
        },
        network: NetworkListener {
            bind_address: own.clone(),
            public_address: own.clone(),
            known_addresses: known_addresses
                .iter()
                .filter(|address| **address != own)
                .cloned()
                .collect(),
        },
        rpc_server: Listener {
            address: format!("127.0.0.1:{}", descriptor.ports.rpc),
        },
        metrics: Listener {
            address: format!("127.0.0.1:{}", descriptor.ports.metrics),
        },
        storage: StorageSection {
            path: descriptor.storage_dir(),
        },
        consensus: ConsensusSection {
            secret_key_path: descriptor.keys_dir().join("secret_key.hex"),
        },
    };
    write_toml(&dir.join("config.toml"), &config)
}

fn install_file(source: &Path, dir: &Path) -> Result<PathBuf> {
    if !source.is_file() {
        return Err(DevnetError::configuration(format!(
            "node binary {} does not exist",
            source.display()
        )));
    }
    std::fs::create_dir_all(dir)?;
    let destination = dir.join(NODE_BINARY);
    let staging = dir.join(format!(".{NODE_BINARY}.tmp"));
    std::fs::copy(source, &staging)?;
    restrict_permissions(&staging, 0o755)?;
    std::fs::rename(&staging, &destination)?;
    Ok(destination)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn save_manifest(asset: &NetworkAsset) -> Result<()> {
    write_toml(&asset.manifest_path(), asset)
}

pub(crate) fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| DevnetError::storage(format!("failed to read {}: {e}", path.display())))?;
    Ok(toml::from_str(&contents)?)
}

pub(crate) fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, toml::to_string_pretty(value)?.as_bytes())
}

/// Write through a sibling temp file and rename, so readers never observe a
/// partially written file
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| DevnetError::storage(format!("invalid path {}", path.display())))?;
    let staging = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&staging, contents)
        .map_err(|e| DevnetError::storage(format!("failed to write {}: {e}", path.display())))?;
    std::fs::rename(&staging, path)
        .map_err(|e| DevnetError::storage(format!("failed to replace {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn settings(nodes: u16) -> NetworkSettings {
        NetworkSettings {
            name: "assets-test".into(),
            node_count: nodes,
            genesis_timestamp: Some(DateTime::<Utc>::UNIX_EPOCH),
            ..Default::default()
        }
    }

    fn stage_build(dir: &Path, version: ProtocolVersion) -> StagedArtifacts {
        let binary = dir.join(format!("build-{}", version.dir_name()));
        std::fs::write(&binary, b"#!/bin/sh\nexit 0\n").unwrap();
        StagedArtifacts {
            version,
            binary,
            chainspec: None,
        }
    }

    #[test]
    fn test_plan_is_deterministic_for_seed() {
        let root = Path::new("/nets");
        let now = Utc::now();
        let a = AssetManager::plan(root, &settings(4), now, &mut ChaCha20Rng::seed_from_u64(7)).unwrap();
        let b = AssetManager::plan(root, &settings(4), now, &mut ChaCha20Rng::seed_from_u64(7)).unwrap();
        assert_eq!(a.asset, b.asset);
        assert_eq!(a.accounts, b.accounts);
        let ports = a.asset.nodes.iter().map(|n| n.ports.rpc).collect::<Vec<_>>();
        assert_eq!(ports, vec![11101, 11102, 11103, 11104]);
        assert!(a.asset.nodes.iter().all(|n| n.public_key.starts_with("01") && n.public_key.len() == 66));
    }

    #[test]
    fn test_invalid_settings_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = settings(3);
        bad.minimum_nodes = 4;
        let err = AssetManager::generate(dir.path(), &bad, &mut ChaCha20Rng::seed_from_u64(1));
        assert!(matches!(err, Err(DevnetError::Configuration { .. })));
        assert!(!dir.path().join("assets-test").exists());
    }

    #[test]
    fn test_generate_layout_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            AssetManager::generate(dir.path(), &settings(3), &mut ChaCha20Rng::seed_from_u64(1)).unwrap();
        let asset = manager.asset();
        let node = asset.node(NodeId::new(2)).unwrap();
        assert!(node.keys_dir().join("secret_key.hex").is_file());
        assert!(node.config_path().is_file());
        assert!(asset.chainspec_dir().join("accounts.toml").is_file());

        let config: NodeConfig = read_toml(&node.config_path()).unwrap();
        assert_eq!(config.network.known_addresses.len(), 2);
        assert!(!config.network.known_addresses.contains(&node.network_address()));

        let reloaded = AssetManager::load(dir.path(), "assets-test").unwrap();
        assert_eq!(reloaded.asset(), asset);
        assert!(AssetManager::generate(dir.path(), &settings(3), &mut ChaCha20Rng::seed_from_u64(1)).is_err());
    }

    #[test]
    fn test_add_node_copies_running_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let manager = AssetManager::generate(dir.path(), &settings(2), &mut rng).unwrap();
        let version = ProtocolVersion::default();
        let build = stage_build(dir.path(), version);
        for node in [NodeId::new(1), NodeId::new(2)] {
            manager.install_binary(node, &build).unwrap();
        }

        let joined = manager.add_node(&NodeTemplate::default(), &mut rng).unwrap();
        assert_eq!(joined.id, NodeId::new(3));
        assert_eq!(joined.ports.rpc, 11103);
        assert!(manager.is_staged(joined.id, &version));
        assert_eq!(manager.asset().next_node_id(), NodeId::new(4));
    }

    #[test]
    fn test_activate_requires_staged_version() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            AssetManager::generate(dir.path(), &settings(2), &mut ChaCha20Rng::seed_from_u64(5)).unwrap();
        let next = ProtocolVersion::new(1, 1, 0);
        assert!(manager.activate_version(NodeId::new(1), next).is_err());

        let build = stage_build(dir.path(), next);
        manager.install_binary(NodeId::new(1), &build).unwrap();
        let staged = manager
            .regenerate_chainspec(next, &ChainspecDelta {
                activation_point: Some(ActivationPoint::EraId(3)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(staged.protocol.version, next);

        manager.activate_version(NodeId::new(1), next).unwrap();
        assert_eq!(manager.node(NodeId::new(1)).unwrap().version, next);
        // Node 2 has the config but not the binary
        assert!(manager.activate_version(NodeId::new(2), next).is_err());
        // The running chainspec is untouched until promoted
        assert_eq!(manager.chainspec().protocol.version, ProtocolVersion::default());
    }

    #[test]
    fn test_teardown_removes_network_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            AssetManager::generate(dir.path(), &settings(1), &mut ChaCha20Rng::seed_from_u64(9)).unwrap();
        let root = manager.root();
        manager.teardown().unwrap();
        assert!(!root.exists());
    }
}
