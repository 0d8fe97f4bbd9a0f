//! Live backend: a forc-wallet keystore acting as the wallet extension and the
//! predictor contract reached through `abigen!` bindings.

use super::{
    AccountListeners,
    AccountsSubscription,
    ContractError,
    ExtensionError,
    ListenerId,
    MarketContract,
    RawMarketStats,
    RawPosition,
    TxOutcome,
    WalletExtension,
    lock,
};
use crate::{
    market::{
        Address,
        Side,
    },
    wallets::{
        self,
        WalletDescriptor,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use fuels::{
    accounts::ViewOnlyAccount,
    crypto::SecretKey,
    prelude::{
        AssetId,
        CallParameters,
        ContractId,
        Execution,
        Provider,
        TxPolicies,
        Wallet,
        private_key::PrivateKeySigner,
    },
    types::Bits256,
};
use std::{
    fmt::Display,
    path::PathBuf,
    sync::{
        Arc,
        Mutex,
    },
};
use tracing::info;

pub mod predictor_types {
    use fuels::macros::abigen;

    abigen!(Contract(
        name = "FreightPredictor",
        abi = "abi/freight-predictor-abi.json"
    ));
}

use predictor_types::FreightPredictor;

const DEFAULT_SAFE_SCRIPT_GAS_LIMIT: u64 = 29_000_000;
/// Throwaway key used only to build read-only simulations; never funded.
const READER_KEY: [u8; 32] = [1u8; 32];

/// Unlocked keystores, active account first. Shared between the extension
/// (which unlocks) and the market (which signs).
#[derive(Clone, Default)]
pub struct SignerRegistry {
    inner: Arc<Mutex<Vec<(Address, Wallet)>>>,
}

impl SignerRegistry {
    pub fn insert_active(&self, wallet: Wallet) -> Address {
        let account = Address::from(wallet.address());
        let mut signers = lock(&self.inner);
        signers.retain(|(known, _)| *known != account);
        signers.insert(0, (account, wallet));
        account
    }

    pub fn accounts(&self) -> Vec<Address> {
        lock(&self.inner).iter().map(|(account, _)| *account).collect()
    }

    pub fn get(&self, account: &Address) -> Option<Wallet> {
        lock(&self.inner)
            .iter()
            .find(|(known, _)| known == account)
            .map(|(_, wallet)| wallet.clone())
    }

    pub fn clear(&self) {
        lock(&self.inner).clear();
    }
}

pub struct KeystoreExtension {
    dir: PathBuf,
    active: Mutex<String>,
    provider: Provider,
    signers: SignerRegistry,
    listeners: Mutex<AccountListeners>,
}

impl KeystoreExtension {
    pub fn new(
        dir: PathBuf,
        owner: impl Into<String>,
        provider: Provider,
        signers: SignerRegistry,
    ) -> Self {
        Self {
            dir,
            active: Mutex::new(owner.into()),
            provider,
            signers,
            listeners: Mutex::new(AccountListeners::default()),
        }
    }

    /// Prompts for the keystore password on the controlling terminal.
    async fn unlock(&self, descriptor: WalletDescriptor) -> Result<Wallet, ExtensionError> {
        let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
        let password = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
            .await
            .map_err(|e| ExtensionError::Other(format!("password prompt aborted: {e}")))?
            .map_err(|e| ExtensionError::Unavailable(format!("cannot read password: {e}")))?;
        if password.is_empty() {
            return Err(ExtensionError::Rejected("unlock cancelled".to_string()));
        }
        wallets::decrypt_wallet(&descriptor, &password, &self.provider)
            .map_err(|e| ExtensionError::Rejected(e.to_string()))
    }

    fn descriptor(&self, name: &str) -> Result<WalletDescriptor, ExtensionError> {
        wallets::find_wallet(&self.dir, name)
            .map_err(|e| ExtensionError::Unavailable(e.to_string()))
    }
}

impl WalletExtension for KeystoreExtension {
    async fn request_accounts(&self) -> Result<Vec<Address>, ExtensionError> {
        let existing = self.signers.accounts();
        if !existing.is_empty() {
            return Ok(existing);
        }
        let name = lock(&self.active).clone();
        let descriptor = self.descriptor(&name)?;
        let wallet = self.unlock(descriptor).await?;
        let account = self.signers.insert_active(wallet);
        info!(wallet = %name, %account, "keystore unlocked");
        Ok(self.signers.accounts())
    }

    async fn authorized_accounts(&self) -> Result<Vec<Address>, ExtensionError> {
        Ok(self.signers.accounts())
    }

    async fn switch_network(&self, chain_id: u64) -> Result<(), ExtensionError> {
        let params = self.provider.consensus_parameters().await.map_err(|e| {
            ExtensionError::SwitchFailed(format!("cannot query node chain id: {e}"))
        })?;
        let actual = u64::from(params.chain_id());
        if actual == chain_id {
            return Ok(());
        }
        Err(ExtensionError::SwitchFailed(format!(
            "node {} serves chain {actual}; restart with a matching network flag",
            self.provider.url()
        )))
    }

    fn on_accounts_changed(&self) -> Result<AccountsSubscription, ExtensionError> {
        Ok(lock(&self.listeners).subscribe())
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        lock(&self.listeners).remove(id)
    }

    async fn revoke_accounts(&self) -> Result<(), ExtensionError> {
        self.signers.clear();
        lock(&self.listeners).emit(&[]);
        Ok(())
    }

    async fn switch_account(&self) -> Result<Option<Address>, ExtensionError> {
        let current = lock(&self.active).clone();
        let next = wallets::next_wallet(&self.dir, &current)
            .map_err(|e| ExtensionError::Unavailable(e.to_string()))?;
        let Some(next) = next else {
            return Ok(None);
        };
        let wallet = self.unlock(next.clone()).await?;
        let account = self.signers.insert_active(wallet);
        *lock(&self.active) = next.name;
        let accounts = self.signers.accounts();
        lock(&self.listeners).emit(&accounts);
        Ok(Some(account))
    }
}

pub struct FuelMarket {
    contract_id: ContractId,
    reader: FreightPredictor<Wallet>,
    signers: SignerRegistry,
    base_asset_id: AssetId,
    gas_limit: u64,
}

impl FuelMarket {
    pub async fn connect(
        provider: &Provider,
        contract_id: ContractId,
        signers: SignerRegistry,
    ) -> Result<Self> {
        let consensus_parameters = provider
            .consensus_parameters()
            .await
            .wrap_err("Failed to fetch consensus parameters")?;
        let base_asset_id = *consensus_parameters.base_asset_id();
        let max_gas_per_tx = consensus_parameters.tx_params().max_gas_per_tx();
        let gas_limit = max_gas_per_tx
            .saturating_sub(1)
            .clamp(1, DEFAULT_SAFE_SCRIPT_GAS_LIMIT);
        info!(
            "Using safe script gas limit {} (max_gas_per_tx={})",
            gas_limit, max_gas_per_tx
        );

        let reader_key = SecretKey::try_from(READER_KEY.as_slice())
            .map_err(|e| eyre!("Invalid reader key: {e:?}"))?;
        let reader_wallet = Wallet::new(PrivateKeySigner::new(reader_key), provider.clone());
        let reader = FreightPredictor::new(contract_id, reader_wallet);

        Ok(Self {
            contract_id,
            reader,
            signers,
            base_asset_id,
            gas_limit,
        })
    }

    fn policies(&self) -> TxPolicies {
        TxPolicies::default().with_script_gas_limit(self.gas_limit)
    }

    fn instance_for(
        &self,
        account: &Address,
    ) -> Result<FreightPredictor<Wallet>, ContractError> {
        let wallet = self.signers.get(account).ok_or_else(|| {
            ContractError::Rejected(format!("account {account} is not unlocked"))
        })?;
        Ok(FreightPredictor::new(self.contract_id, wallet))
    }
}

impl MarketContract for FuelMarket {
    async fn market_stats(&self) -> Result<RawMarketStats, ContractError> {
        let stats = self
            .reader
            .methods()
            .get_market_stats()
            .with_tx_policies(self.policies())
            .simulate(Execution::state_read_only())
            .await
            .map_err(|e| ContractError::Rpc(e.to_string()))?
            .value;
        Ok(RawMarketStats {
            yes_volume: stats.yes_volume,
            no_volume: stats.no_volume,
            yes_percentage: stats.yes_percentage,
            no_percentage: stats.no_percentage,
        })
    }

    async fn user_position(&self, account: Address) -> Result<RawPosition, ContractError> {
        let position = self
            .reader
            .methods()
            .get_user_position(Bits256(*account))
            .with_tx_policies(self.policies())
            .simulate(Execution::state_read_only())
            .await
            .map_err(|e| ContractError::Rpc(e.to_string()))?
            .value;
        Ok(RawPosition {
            yes_stake: position.yes_stake,
            no_stake: position.no_stake,
        })
    }

    async fn place_bet(
        &self,
        account: Address,
        side: Side,
        amount: u64,
    ) -> Result<TxOutcome, ContractError> {
        let instance = self.instance_for(&account)?;
        let call = CallParameters::new(amount, self.base_asset_id, self.gas_limit);
        let response = instance
            .methods()
            .place_bet(side.as_contract_flag())
            .call_params(call)
            .map_err(|e| ContractError::Reverted(format!("call parameters refused: {e}")))?
            .with_tx_policies(self.policies())
            .call()
            .await
            .map_err(classify_submit_error)?;
        Ok(TxOutcome {
            tx_id: response.tx_id.map(|id| format!("{id:#x}")),
        })
    }

    async fn claim_reward(&self, account: Address) -> Result<TxOutcome, ContractError> {
        let instance = self.instance_for(&account)?;
        let response = instance
            .methods()
            .claim_reward()
            .with_tx_policies(self.policies())
            .call()
            .await
            .map_err(classify_submit_error)?;
        Ok(TxOutcome {
            tx_id: response.tx_id.map(|id| format!("{id:#x}")),
        })
    }
}

/// Sorts a failed submission into the contract error taxonomy by its message.
fn classify_submit_error(err: impl Display) -> ContractError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("not enough coins")
        || lowered.contains("insufficient")
        || lowered.contains("not enough resources")
    {
        ContractError::InsufficientFunds(message)
    } else if lowered.contains("revert") || lowered.contains("panic") {
        ContractError::Reverted(message)
    } else {
        ContractError::Rpc(message)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn classify_submit_error__sorts_by_message() {
        assert!(matches!(
            classify_submit_error("Response errors; not enough coins to fit the target"),
            ContractError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_submit_error("transaction reverted: Revert(123)"),
            ContractError::Reverted(_)
        ));
        assert!(matches!(
            classify_submit_error("io error: connection reset"),
            ContractError::Rpc(_)
        ));
    }
}
