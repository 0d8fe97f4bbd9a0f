use crate::config::NetworkTarget;
use chrono::Utc;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
pub const ABI_PATH: &str = "abi/freight-predictor-abi.json";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Dev,
    Test,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Dev => "dev",
            DeploymentEnv::Test => "test",
            DeploymentEnv::Local => "local",
        }
    }
}

impl From<&NetworkTarget> for DeploymentEnv {
    fn from(network: &NetworkTarget) -> Self {
        match network {
            NetworkTarget::Devnet { .. } => DeploymentEnv::Dev,
            NetworkTarget::Testnet { .. } => DeploymentEnv::Test,
            NetworkTarget::LocalNode { .. } => DeploymentEnv::Local,
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Dev => "Devnet",
            DeploymentEnv::Test => "Testnet",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// One known market contract deployment.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub contract_id: String,
    /// SHA-256 of the ABI the contract was built against.
    pub abi_hash: String,
    pub network_url: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl DeploymentRecord {
    pub fn is_compatible_with_hash(&self, hash: &str) -> bool {
        self.abi_hash == hash
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    env: DeploymentEnv,
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::in_root(Path::new(DEPLOYMENTS_ROOT), env)
    }

    pub fn in_root(root: &Path, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root, env)?;
        Ok(Self { env, path })
    }

    pub fn load(&self) -> Result<Vec<DeploymentRecord>> {
        read_records(&self.path)
    }

    pub fn append(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        write_records(&self.path, &records)
    }

    /// Most recently appended record built against `abi_hash`.
    pub fn latest_compatible(&self, abi_hash: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .rev()
            .find(|record| record.is_compatible_with_hash(abi_hash)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn env(&self) -> DeploymentEnv {
        self.env
    }
}

pub fn new_record(
    contract_id: impl AsRef<str>,
    abi_hash: impl AsRef<str>,
    network_url: impl AsRef<str>,
    chain_id: Option<u64>,
) -> DeploymentRecord {
    DeploymentRecord {
        deployed_at: Utc::now().to_rfc3339(),
        contract_id: contract_id.as_ref().to_string(),
        abi_hash: abi_hash.as_ref().to_string(),
        network_url: network_url.as_ref().to_string(),
        chain_id,
    }
}

pub fn compute_abi_hash(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = fs::read(path).wrap_err_with(|| {
        format!("Failed to read contract ABI for hashing: {}", path.display())
    })?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn ensure_structure(root: &Path) -> Result<()> {
    for env in [
        DeploymentEnv::Dev,
        DeploymentEnv::Test,
        DeploymentEnv::Local,
    ] {
        let _ = ensure_store(root, env)?;
    }
    Ok(())
}

/// Error text shown when no usable record exists for `env`.
pub fn format_deployment_summary(
    store: &DeploymentStore,
    url: &str,
    records: &[DeploymentRecord],
    current_hash: &str,
) -> String {
    let env = store.env();
    let mut message = format!(
        "No compatible market deployment recorded for {env} at {url}.\n\nRecorded deployments for {env}:",
    );
    if records.is_empty() {
        message.push_str("\n  (none recorded)");
    }
    for record in records {
        let compat = if record.is_compatible_with_hash(current_hash) {
            " [compatible]"
        } else {
            ""
        };
        message.push_str(&format!(
            "\n  {} - {} @ {} (abi {}){}",
            record.deployed_at,
            record.contract_id,
            record.network_url,
            hash_preview(&record.abi_hash),
            compat,
        ));
    }
    message.push_str(&format!(
        "\n\nCurrent ABI hash: {}",
        hash_preview(current_hash)
    ));
    message.push_str(&format!(
        "\nDeployment records file: {}",
        store.path().display()
    ));
    message.push_str(
        "\n\nPass --contract-id, or run `freight-market register` to record a deployment.",
    );
    message
}

fn hash_preview(hash: &str) -> String {
    let preview_len = hash.len().min(16);
    let mut preview = hash[..preview_len].to_string();
    if hash.len() > preview_len {
        preview.push_str("...");
    }
    preview
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).wrap_err_with(|| {
            format!("Failed to create deployment directory {}", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).wrap_err_with(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
        file.write_all(b"[]").wrap_err_with(|| {
            format!("Failed to initialize deployment record file for {}", env)
        })?;
    }

    Ok(file_path)
}

fn read_records(path: impl AsRef<Path>) -> Result<Vec<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).wrap_err("Failed to read deployment records")?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let records = serde_json::from_slice::<Vec<DeploymentRecord>>(&data)
        .wrap_err("Failed to parse deployment records JSON")?;
    Ok(records)
}

fn write_records(path: impl AsRef<Path>, records: &[DeploymentRecord]) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)
        .wrap_err("Failed to serialize deployment records")?;
    fs::write(path.as_ref(), json).wrap_err("Failed to write deployment records")?;
    Ok(())
}
