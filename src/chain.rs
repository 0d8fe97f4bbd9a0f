use crate::{
    backend::{
        ContractError,
        ExtensionError,
        MarketContract,
        RawMarketStats,
        RawPosition,
        WalletExtension,
    },
    config::MarketConfig,
    error::{
        ClientError,
        ClientResult,
        Precondition,
    },
    market::{
        Address,
        MarketStats,
        Side,
        TransactionReceipt,
        UserPosition,
    },
    units::{
        from_base_units,
        to_base_units,
    },
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{
    debug,
    info,
    warn,
};

/// Typed calls over one wallet extension and one market contract.
///
/// Holds no session state: every signing call asks the extension for the
/// active account again. A missing extension surfaces as
/// [`ClientError::WalletUnavailable`] on the calls that need one.
pub struct ChainClient<W, C> {
    extension: Option<Arc<W>>,
    contract: Arc<C>,
    chain_id: u64,
    decimals: u32,
}

impl<W, C> ChainClient<W, C>
where
    W: WalletExtension,
    C: MarketContract,
{
    pub fn new(extension: Option<Arc<W>>, contract: Arc<C>, market: &MarketConfig) -> Self {
        Self {
            extension,
            contract,
            chain_id: market.chain_id,
            decimals: market.decimals,
        }
    }

    pub fn extension(&self) -> Option<&Arc<W>> {
        self.extension.as_ref()
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    fn require_extension(&self) -> ClientResult<&W> {
        self.extension.as_deref().ok_or_else(|| {
            ClientError::WalletUnavailable("no wallet extension is configured".to_string())
        })
    }

    /// Requests account access, then moves the wallet to the configured chain.
    pub async fn connect(&self) -> ClientResult<Address> {
        let extension = self.require_extension()?;
        let accounts = extension
            .request_accounts()
            .await
            .map_err(access_error)?;
        let account = accounts.first().copied().ok_or_else(|| {
            ClientError::UserRejected("no account was authorized".to_string())
        })?;
        extension
            .switch_network(self.chain_id)
            .await
            .map_err(|err| switch_error(err, self.chain_id))?;
        info!(%account, chain_id = self.chain_id, "wallet connected");
        Ok(account)
    }

    /// Non-interactive probe for an account authorized in an earlier session.
    pub async fn current_account(&self) -> Option<Address> {
        let extension = self.extension.as_deref()?;
        match extension.authorized_accounts().await {
            Ok(accounts) => accounts.first().copied(),
            Err(err) => {
                debug!(%err, "authorized account probe failed");
                None
            }
        }
    }

    pub async fn read_market_stats(&self) -> ClientResult<MarketStats> {
        let raw = self
            .contract
            .market_stats()
            .await
            .map_err(|err| ClientError::ReadFailure(err.to_string()))?;
        normalize_stats(raw, self.decimals)
    }

    pub async fn read_user_position(&self, account: Address) -> ClientResult<UserPosition> {
        let RawPosition { yes_stake, no_stake } = self
            .contract
            .user_position(account)
            .await
            .map_err(|err| ClientError::ReadFailure(err.to_string()))?;
        Ok(UserPosition {
            account,
            yes_stake: display_amount(yes_stake, self.decimals)?,
            no_stake: display_amount(no_stake, self.decimals)?,
        })
    }

    /// Sends `stake` on `side` and waits for inclusion. The stake is converted
    /// to base units exactly; anything finer than one base unit is refused
    /// before a transaction is built.
    pub async fn submit_bet(&self, side: Side, stake: Decimal) -> ClientResult<TransactionReceipt> {
        if stake <= Decimal::ZERO {
            return Err(Precondition::NonPositiveStake.into());
        }
        let base_units = to_base_units(stake, self.decimals)?;
        let account = self.active_account().await?;
        info!(%account, %side, %stake, base_units, "submitting bet");
        let outcome = self
            .contract
            .place_bet(account, side, base_units)
            .await
            .map_err(submit_error)?;
        info!(tx_id = ?outcome.tx_id, "bet included");
        Ok(TransactionReceipt {
            tx_id: outcome.tx_id,
            side,
            stake,
            base_units,
        })
    }

    pub async fn claim_reward(&self) -> ClientResult<bool> {
        let account = self.active_account().await?;
        info!(%account, "claiming reward");
        let outcome = self
            .contract
            .claim_reward(account)
            .await
            .map_err(submit_error)?;
        info!(tx_id = ?outcome.tx_id, "reward claimed");
        Ok(true)
    }

    /// Asks the extension to forget its authorization.
    pub async fn revoke(&self) -> ClientResult<()> {
        self.require_extension()?
            .revoke_accounts()
            .await
            .map_err(access_error)
    }

    pub async fn switch_account(&self) -> ClientResult<Option<Address>> {
        self.require_extension()?
            .switch_account()
            .await
            .map_err(access_error)
    }

    async fn active_account(&self) -> ClientResult<Address> {
        let accounts = self
            .require_extension()?
            .authorized_accounts()
            .await
            .map_err(access_error)?;
        accounts.first().copied().ok_or_else(|| {
            ClientError::UserRejected("wallet has no authorized account".to_string())
        })
    }
}

/// Converts contract figures to display units. Percentages that do not form
/// a 100 split are re-derived from the volumes.
pub fn normalize_stats(raw: RawMarketStats, decimals: u32) -> ClientResult<MarketStats> {
    let (yes_percentage, no_percentage) = normalize_percentages(&raw);
    Ok(MarketStats {
        yes_volume: display_amount(raw.yes_volume, decimals)?,
        no_volume: display_amount(raw.no_volume, decimals)?,
        yes_percentage,
        no_percentage,
    })
}

fn display_amount(units: u64, decimals: u32) -> ClientResult<Decimal> {
    from_base_units(units, decimals).ok_or_else(|| {
        ClientError::ReadFailure(format!("cannot display amounts with {decimals} decimals"))
    })
}

fn normalize_percentages(raw: &RawMarketStats) -> (u8, u8) {
    if raw.yes_percentage <= 100
        && raw.no_percentage <= 100
        && raw.yes_percentage + raw.no_percentage == 100
    {
        return (raw.yes_percentage as u8, raw.no_percentage as u8);
    }
    let total = u128::from(raw.yes_volume) + u128::from(raw.no_volume);
    let yes = if total == 0 {
        50
    } else {
        ((u128::from(raw.yes_volume) * 100 + total / 2) / total) as u8
    };
    warn!(
        reported_yes = raw.yes_percentage,
        reported_no = raw.no_percentage,
        derived_yes = yes,
        "contract percentages do not sum to 100; using volume split"
    );
    (yes, 100 - yes)
}

fn access_error(err: ExtensionError) -> ClientError {
    match err {
        ExtensionError::Rejected(reason) => ClientError::UserRejected(reason),
        ExtensionError::Unavailable(reason)
        | ExtensionError::SwitchFailed(reason)
        | ExtensionError::Other(reason) => ClientError::WalletUnavailable(reason),
    }
}

fn switch_error(err: ExtensionError, expected: u64) -> ClientError {
    match err {
        ExtensionError::Rejected(reason) => ClientError::UserRejected(reason),
        ExtensionError::Unavailable(reason)
        | ExtensionError::SwitchFailed(reason)
        | ExtensionError::Other(reason) => {
            ClientError::NetworkMismatchUnresolvable { expected, reason }
        }
    }
}

fn submit_error(err: ContractError) -> ClientError {
    match err {
        ContractError::Rejected(reason) => ClientError::UserRejected(reason),
        ContractError::InsufficientFunds(reason) => ClientError::InsufficientFunds(reason),
        ContractError::Reverted(reason) => ClientError::TransactionReverted(reason),
        ContractError::Rpc(reason) => {
            ClientError::TransactionReverted(format!("transaction not included: {reason}"))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        backend::simulated::{
            SimulatedMarket,
            SimulatedWallet,
            SwitchBehaviour,
        },
        error::ErrorKind,
    };
    use std::str::FromStr;

    const UNIT: u64 = 1_000_000_000;

    fn account(n: u8) -> Address {
        Address::new([n; 32])
    }

    fn client(
        wallet: Option<SimulatedWallet>,
        market: SimulatedMarket,
    ) -> (
        ChainClient<SimulatedWallet, SimulatedMarket>,
        Option<Arc<SimulatedWallet>>,
        Arc<SimulatedMarket>,
    ) {
        let wallet = wallet.map(Arc::new);
        let market = Arc::new(market);
        let client = ChainClient::new(wallet.clone(), market.clone(), &MarketConfig::default());
        (client, wallet, market)
    }

    #[tokio::test]
    async fn connect__without_extension_is_wallet_unavailable() {
        // given
        let (client, _, _) = client(None, SimulatedMarket::new());

        // when
        let result = client.connect().await;

        // then
        assert_eq!(result.unwrap_err().kind(), ErrorKind::WalletUnavailable);
        assert_eq!(client.current_account().await, None);
    }

    #[tokio::test]
    async fn connect__maps_rejection_and_switch_failure() {
        // given
        let wallet = SimulatedWallet::new(vec![account(1)], 7);
        let (client, wallet, _) = client(Some(wallet), SimulatedMarket::new());
        let wallet = wallet.unwrap();

        // when
        wallet.set_reject_requests(true);
        let rejected = client.connect().await;
        wallet.set_reject_requests(false);
        wallet.set_switch_behaviour(SwitchBehaviour::Fail);
        let mismatch = client.connect().await;
        wallet.set_switch_behaviour(SwitchBehaviour::Reject);
        let switch_declined = client.connect().await;
        wallet.set_switch_behaviour(SwitchBehaviour::Accept);
        let connected = client.connect().await;

        // then
        assert_eq!(rejected.unwrap_err().kind(), ErrorKind::UserRejected);
        assert!(matches!(
            mismatch,
            Err(ClientError::NetworkMismatchUnresolvable { expected: 0, .. })
        ));
        assert_eq!(switch_declined.unwrap_err().kind(), ErrorKind::UserRejected);
        assert_eq!(connected, Ok(account(1)));
        assert_eq!(wallet.chain_id(), 0);
    }

    #[tokio::test]
    async fn read_market_stats__converts_base_units() {
        // given
        let (client, _, _) = client(None, SimulatedMarket::with_volumes(100 * UNIT, 50 * UNIT));

        // when
        let stats = client.read_market_stats().await.unwrap();

        // then
        assert_eq!(stats.yes_volume, Decimal::from(100));
        assert_eq!(stats.no_volume, Decimal::from(50));
        assert_eq!((stats.yes_percentage, stats.no_percentage), (67, 33));
    }

    #[tokio::test]
    async fn read_market_stats__failure_is_read_failure() {
        // given
        let market = SimulatedMarket::new();
        market.set_fail_stats(true);
        let (client, _, _) = client(None, market);

        // when
        let result = client.read_market_stats().await;

        // then
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadFailure);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn read_market_stats__unrepresentable_decimals_fail_instead_of_rescaling() {
        // given
        let market = Arc::new(SimulatedMarket::with_volumes(100 * UNIT, 50 * UNIT));
        let config = MarketConfig {
            decimals: 19,
            ..MarketConfig::default()
        };
        let client: ChainClient<SimulatedWallet, _> = ChainClient::new(None, market, &config);

        // when
        let stats = client.read_market_stats().await;
        let position = client.read_user_position(account(1)).await;

        // then
        assert_eq!(stats.unwrap_err().kind(), ErrorKind::ReadFailure);
        assert_eq!(position.unwrap_err().kind(), ErrorKind::ReadFailure);
    }

    #[test]
    fn normalize_stats__rederives_broken_percentages() {
        // given
        let raw = RawMarketStats {
            yes_volume: 3 * UNIT,
            no_volume: UNIT,
            yes_percentage: 80,
            no_percentage: 30,
        };

        // when
        let stats = normalize_stats(raw, 9).unwrap();

        // then
        assert_eq!((stats.yes_percentage, stats.no_percentage), (75, 25));
    }

    #[test]
    fn normalize_stats__empty_book_with_broken_percentages_is_even() {
        let raw = RawMarketStats {
            yes_percentage: 0,
            no_percentage: 0,
            ..RawMarketStats::default()
        };
        let stats = normalize_stats(raw, 9).unwrap();
        assert_eq!((stats.yes_percentage, stats.no_percentage), (50, 50));
    }

    #[tokio::test]
    async fn submit_bet__sends_exact_base_units() {
        // given
        let wallet = SimulatedWallet::new(vec![account(1)], 0).with_preauthorized();
        let market = SimulatedMarket::new();
        market.fund(account(1), UNIT);
        let (client, _, market) = client(Some(wallet), market);

        // when
        let receipt = client
            .submit_bet(Side::No, Decimal::from_str("0.02").unwrap())
            .await
            .unwrap();

        // then
        assert_eq!(receipt.base_units, 20_000_000);
        assert_eq!(receipt.side, Side::No);
        assert_eq!(market.balance(&account(1)), UNIT - 20_000_000);
    }

    #[tokio::test]
    async fn submit_bet__precision_and_sign_are_checked_before_sending() {
        // given
        let wallet = SimulatedWallet::new(vec![account(1)], 0).with_preauthorized();
        let (client, _, market) = client(Some(wallet), SimulatedMarket::new());

        // when
        let too_fine = client
            .submit_bet(Side::Yes, Decimal::from_str("0.0000000001").unwrap())
            .await;
        let zero = client.submit_bet(Side::Yes, Decimal::ZERO).await;

        // then
        assert!(matches!(
            too_fine,
            Err(ClientError::PreconditionFailed(Precondition::StakeTooPrecise { .. }))
        ));
        assert_eq!(
            zero,
            Err(ClientError::PreconditionFailed(Precondition::NonPositiveStake))
        );
        assert_eq!(market.counts().bets, 0);
    }

    #[tokio::test]
    async fn submit_bet__maps_contract_failures() {
        // given
        let wallet = SimulatedWallet::new(vec![account(1)], 0).with_preauthorized();
        let (client, _, market) = client(Some(wallet), SimulatedMarket::new());

        // when
        let broke = client.submit_bet(Side::Yes, Decimal::ONE).await;
        market.fund(account(1), 10 * UNIT);
        market.set_closed(true);
        let closed = client.submit_bet(Side::Yes, Decimal::ONE).await;

        // then
        assert_eq!(broke.unwrap_err().kind(), ErrorKind::InsufficientFunds);
        assert_eq!(closed.unwrap_err().kind(), ErrorKind::TransactionReverted);
    }

    #[tokio::test]
    async fn submit_bet__without_authorized_account_is_rejected() {
        // given
        let wallet = SimulatedWallet::new(vec![account(1)], 0);
        let (client, _, market) = client(Some(wallet), SimulatedMarket::new());

        // when
        let result = client.submit_bet(Side::Yes, Decimal::ONE).await;

        // then
        assert_eq!(result.unwrap_err().kind(), ErrorKind::UserRejected);
        assert_eq!(market.counts().bets, 0);
    }

    #[tokio::test]
    async fn claim_reward__second_claim_is_a_normal_revert() {
        // given
        let wallet = SimulatedWallet::new(vec![account(1)], 0).with_preauthorized();
        let market = SimulatedMarket::with_volumes(UNIT, UNIT);
        market.set_position(
            account(1),
            RawPosition {
                yes_stake: UNIT,
                no_stake: 0,
            },
        );
        market.resolve(Side::Yes);
        let (client, _, _) = client(Some(wallet), market);

        // when
        let first = client.claim_reward().await;
        let second = client.claim_reward().await;

        // then
        assert_eq!(first, Ok(true));
        assert_eq!(second.unwrap_err().kind(), ErrorKind::TransactionReverted);
    }
}
