use freight_market::{
    backend::simulated::{
        SimulatedMarket,
        SimulatedWallet,
    },
    chain::ChainClient,
    config::MarketConfig,
    market::Address,
    session::SessionStore,
    view::MarketView,
};
use rust_decimal::Decimal;
use std::{
    str::FromStr,
    sync::Arc,
};

pub type Store = SessionStore<SimulatedWallet, SimulatedMarket>;
pub type View = MarketView<SimulatedWallet, SimulatedMarket>;

/// One base unit is 10^-9 of a whole unit.
pub const UNIT: u64 = 1_000_000_000;

pub struct TestContext {
    wallet: Arc<SimulatedWallet>,
    market: Arc<SimulatedMarket>,
    store: Arc<Store>,
    view: Arc<View>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_market(SimulatedMarket::new())
    }

    pub fn with_market(market: SimulatedMarket) -> Self {
        let config = MarketConfig::default();
        let wallet = Arc::new(SimulatedWallet::new(
            vec![alice(), bob()],
            config.chain_id,
        ));
        let market = Arc::new(market);
        market.fund(alice(), 10 * UNIT);
        market.fund(bob(), 10 * UNIT);
        let client = ChainClient::new(Some(wallet.clone()), market.clone(), &config);
        let store = Arc::new(SessionStore::new(Arc::new(client)));
        let view = Arc::new(MarketView::new(store.clone()));
        Self {
            wallet,
            market,
            store,
            view,
        }
    }

    pub fn wallet(&self) -> Arc<SimulatedWallet> {
        self.wallet.clone()
    }

    pub fn market(&self) -> Arc<SimulatedMarket> {
        self.market.clone()
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn view(&self) -> Arc<View> {
        self.view.clone()
    }
}

pub fn alice() -> Address {
    Address::new([0xA1; 32])
}

pub fn bob() -> Address {
    Address::new([0xB2; 32])
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}
