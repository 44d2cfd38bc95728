//! Paper brokerage
//!
//! An in-process `BrokerClient` that keeps per-user cash and positions and
//! fills market orders at the current mark. Symbols without a fixed bar
//! series get a random-walk history generated on first use; `advance` adds
//! one bar to every generated series. Failures can be injected per symbol
//! or per call type to exercise the engine's error paths.

use crate::domain::entities::order::{OrderAck, OrderKind, OrderRequest, OrderSide, OrderStatus};
use crate::domain::entities::position::PositionSide;
use crate::domain::entities::price_bar::PriceBar;
use crate::domain::entities::user::UserId;
use crate::domain::errors::BrokerError;
use crate::domain::repositories::broker_client::{
    AccountSnapshot, BrokerClient, BrokerPosition, BrokerResult, Timeframe,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

const GENERATED_HISTORY: usize = 300;
const DAILY_VOLATILITY: f64 = 0.015;

#[derive(Debug, Clone)]
struct PaperPosition {
    quantity: f64,
    avg_entry_price: f64,
    side: PositionSide,
}

impl PaperPosition {
    /// Signed value at `price`; a short is a liability
    fn value_at(&self, price: f64) -> f64 {
        match self.side {
            PositionSide::Long => self.quantity * price,
            PositionSide::Short => -self.quantity * price,
        }
    }
}

#[derive(Debug, Clone)]
struct PaperAccount {
    cash: f64,
    last_equity: f64,
    positions: BTreeMap<String, PaperPosition>,
    orders: Vec<OrderRequest>,
    snapshot_override: Option<AccountSnapshot>,
}

impl PaperAccount {
    fn new(cash: f64) -> Self {
        Self {
            cash,
            last_equity: cash,
            positions: BTreeMap::new(),
            orders: Vec::new(),
            snapshot_override: None,
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    series: HashMap<String, Vec<PriceBar>>,
    marks: HashMap<String, f64>,
    accounts: HashMap<UserId, PaperAccount>,
    bar_failures: HashMap<String, BrokerError>,
    order_failures: HashMap<String, BrokerError>,
    account_failure: Option<BrokerError>,
    positions_failure: Option<BrokerError>,
}

impl PaperState {
    fn account(&mut self, user: &UserId, starting_cash: f64) -> &mut PaperAccount {
        self.accounts
            .entry(user.clone())
            .or_insert_with(|| PaperAccount::new(starting_cash))
    }

    fn series(&mut self, symbol: &str) -> &Vec<PriceBar> {
        self.series
            .entry(symbol.to_string())
            .or_insert_with(|| generate_series(symbol, GENERATED_HISTORY))
    }

    fn mark(&mut self, symbol: &str) -> f64 {
        if let Some(price) = self.marks.get(symbol) {
            return *price;
        }
        self.series(symbol).last().map(|b| b.close).unwrap_or(0.0)
    }
}

/// Starting price derived from the ticker so every run agrees
fn seed_price(symbol: &str) -> f64 {
    let hash: u32 = symbol.bytes().map(u32::from).sum();
    20.0 + (hash % 400) as f64
}

fn next_bar(previous_close: f64, timestamp: chrono::DateTime<Utc>) -> PriceBar {
    let mut rng = rand::thread_rng();
    let change = rng.gen_range(-DAILY_VOLATILITY..DAILY_VOLATILITY) + 0.0004;
    let close = (previous_close * (1.0 + change)).max(0.01);
    let open = previous_close;
    let high = open.max(close) * (1.0 + rng.gen_range(0.0..DAILY_VOLATILITY / 2.0));
    let low = open.min(close) * (1.0 - rng.gen_range(0.0..DAILY_VOLATILITY / 2.0));
    let volume = rng.gen_range(800_000.0..6_000_000.0);
    PriceBar::new(timestamp, open, high, low, close, volume)
}

fn generate_series(symbol: &str, length: usize) -> Vec<PriceBar> {
    let start = Utc::now() - Duration::days(length as i64);
    let mut close = seed_price(symbol);
    let mut bars = Vec::with_capacity(length);
    for i in 0..length {
        let bar = next_bar(close, start + Duration::days(i as i64));
        close = bar.close;
        bars.push(bar);
    }
    bars
}

pub struct PaperBroker {
    state: Mutex<PaperState>,
    starting_cash: f64,
    calls: AtomicUsize,
}

impl PaperBroker {
    pub fn new(starting_cash: f64) -> Self {
        info!("📝 Paper broker started with ${:.2} per account", starting_cash);
        Self {
            state: Mutex::new(PaperState::default()),
            starting_cash,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of brokerage calls served so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Replace the bar history of a symbol with a fixed series
    pub async fn set_bars(&self, symbol: &str, bars: Vec<PriceBar>) {
        let mut state = self.state.lock().await;
        state.series.insert(symbol.to_string(), bars);
    }

    /// Pin the mark price used for fills and position values
    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.state.lock().await.marks.insert(symbol.to_string(), price);
    }

    pub async fn set_account(&self, user: &UserId, snapshot: AccountSnapshot) {
        let mut state = self.state.lock().await;
        let starting_cash = self.starting_cash;
        state.account(user, starting_cash).snapshot_override = Some(snapshot);
    }

    /// Open a long position directly, paid from the account's cash
    pub async fn seed_position(&self, user: &UserId, symbol: &str, quantity: f64, entry_price: f64) {
        self.seed(user, symbol, quantity, entry_price, PositionSide::Long).await;
    }

    /// Open a short position directly; the sale proceeds are credited to cash
    pub async fn seed_short_position(&self, user: &UserId, symbol: &str, quantity: f64, entry_price: f64) {
        self.seed(user, symbol, quantity, entry_price, PositionSide::Short).await;
    }

    async fn seed(&self, user: &UserId, symbol: &str, quantity: f64, entry_price: f64, side: PositionSide) {
        let mut state = self.state.lock().await;
        let account = state.account(user, self.starting_cash);
        let position = PaperPosition {
            quantity,
            avg_entry_price: entry_price,
            side,
        };
        account.cash -= position.value_at(entry_price);
        account.positions.insert(symbol.to_string(), position);
    }

    pub async fn fail_bars_for(&self, symbol: &str, error: BrokerError) {
        self.state
            .lock()
            .await
            .bar_failures
            .insert(symbol.to_string(), error);
    }

    /// Orders and closes for `symbol` fail with `error`
    pub async fn fail_orders_for(&self, symbol: &str, error: BrokerError) {
        self.state
            .lock()
            .await
            .order_failures
            .insert(symbol.to_string(), error);
    }

    pub async fn fail_account(&self, error: Option<BrokerError>) {
        self.state.lock().await.account_failure = error;
    }

    pub async fn fail_positions(&self, error: Option<BrokerError>) {
        self.state.lock().await.positions_failure = error;
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.bar_failures.clear();
        state.order_failures.clear();
        state.account_failure = None;
        state.positions_failure = None;
    }

    /// Every order accepted for `user`, oldest first
    pub async fn submitted_orders(&self, user: &UserId) -> Vec<OrderRequest> {
        self.state
            .lock()
            .await
            .accounts
            .get(user)
            .map(|a| a.orders.clone())
            .unwrap_or_default()
    }

    /// Append one random-walk bar to every generated series
    pub async fn advance(&self) {
        let mut state = self.state.lock().await;
        let pinned: Vec<String> = state.marks.keys().cloned().collect();
        for (symbol, bars) in state.series.iter_mut() {
            if pinned.contains(symbol) {
                continue;
            }
            if let Some(last) = bars.last() {
                let bar = next_bar(last.close, last.timestamp + Duration::days(1));
                bars.push(bar);
            }
        }
    }

    fn fill(
        account: &mut PaperAccount,
        order: &OrderRequest,
        price: f64,
    ) -> BrokerResult<()> {
        let notional = order.quantity as f64 * price;
        match order.side {
            OrderSide::Buy => {
                if notional > account.cash {
                    return Err(BrokerError::InsufficientBuyingPower {
                        required: notional,
                        available: account.cash,
                    });
                }
                account.cash -= notional;
                let position = account
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert(PaperPosition {
                        quantity: 0.0,
                        avg_entry_price: price,
                        side: PositionSide::Long,
                    });
                let total = position.quantity + order.quantity as f64;
                position.avg_entry_price =
                    (position.avg_entry_price * position.quantity + notional) / total;
                position.quantity = total;
            }
            OrderSide::Sell => {
                let Some(position) = account.positions.get_mut(&order.symbol) else {
                    return Err(BrokerError::PositionNotFound(order.symbol.clone()));
                };
                let quantity = (order.quantity as f64).min(position.quantity);
                position.quantity -= quantity;
                account.cash += quantity * price;
                if position.quantity <= 0.0 {
                    account.positions.remove(&order.symbol);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    fn name(&self) -> &str {
        "Paper"
    }

    async fn get_account(&self, user: &UserId) -> BrokerResult<AccountSnapshot> {
        self.record_call();
        let mut state = self.state.lock().await;
        if let Some(e) = &state.account_failure {
            return Err(e.clone());
        }

        let starting_cash = self.starting_cash;
        let account = state.account(user, starting_cash).clone();
        if let Some(snapshot) = account.snapshot_override {
            return Ok(snapshot);
        }

        let mut equity = account.cash;
        for (symbol, position) in &account.positions {
            equity += position.value_at(state.mark(symbol));
        }
        Ok(AccountSnapshot {
            equity,
            cash: account.cash,
            buying_power: account.cash.max(0.0),
            last_equity: account.last_equity,
        })
    }

    async fn get_positions(&self, user: &UserId) -> BrokerResult<Vec<BrokerPosition>> {
        self.record_call();
        let mut state = self.state.lock().await;
        if let Some(e) = &state.positions_failure {
            return Err(e.clone());
        }

        let starting_cash = self.starting_cash;
        let positions = state.account(user, starting_cash).positions.clone();
        Ok(positions
            .into_iter()
            .map(|(symbol, p)| {
                let current_price = state.mark(&symbol);
                BrokerPosition {
                    symbol,
                    quantity: p.quantity,
                    avg_entry_price: p.avg_entry_price,
                    current_price,
                    side: p.side,
                }
            })
            .collect())
    }

    async fn get_bars(
        &self,
        _user: &UserId,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> BrokerResult<Vec<PriceBar>> {
        self.record_call();
        let mut state = self.state.lock().await;
        if let Some(e) = state.bar_failures.get(symbol) {
            return Err(e.clone());
        }

        let bars = state.series(symbol);
        let start = bars.len().saturating_sub(limit);
        debug!(
            "Serving {} {} bars for {}",
            bars.len() - start,
            timeframe.as_str(),
            symbol
        );
        Ok(bars[start..].to_vec())
    }

    async fn submit_order(&self, user: &UserId, order: &OrderRequest) -> BrokerResult<OrderAck> {
        self.record_call();
        let mut state = self.state.lock().await;
        if let Some(e) = state.order_failures.get(&order.symbol) {
            return Err(e.clone());
        }
        if order.quantity == 0 {
            return Err(BrokerError::OrderRejected("quantity must be positive".to_string()));
        }

        let price = state.mark(&order.symbol);
        if price <= 0.0 {
            return Err(BrokerError::SymbolNotTradable(order.symbol.clone()));
        }
        if let OrderKind::Bracket {
            stop_loss,
            take_profit,
        } = order.kind
        {
            if stop_loss >= price || take_profit <= price {
                return Err(BrokerError::OrderRejected(format!(
                    "bracket legs {:.2}/{:.2} do not straddle {:.2}",
                    stop_loss, take_profit, price
                )));
            }
        }

        let starting_cash = self.starting_cash;
        let account = state.account(user, starting_cash);
        Self::fill(account, order, price)?;
        account.orders.push(order.clone());

        info!(
            "📝 Paper fill: {} {} {} @ {:.2}",
            order.side, order.quantity, order.symbol, price
        );
        Ok(OrderAck {
            order_id: uuid::Uuid::new_v4().to_string(),
            client_order_id: order.client_order_id.clone(),
            status: OrderStatus::Filled,
            filled_price: Some(price),
        })
    }

    async fn cancel_order(&self, _user: &UserId, order_id: &str) -> BrokerResult<()> {
        self.record_call();
        // Paper orders fill immediately, nothing is ever left to cancel
        Err(BrokerError::OrderNotFound(order_id.to_string()))
    }

    async fn close_position(&self, user: &UserId, symbol: &str) -> BrokerResult<OrderAck> {
        self.record_call();
        let mut state = self.state.lock().await;
        if let Some(e) = state.order_failures.get(symbol) {
            return Err(e.clone());
        }

        let price = state.mark(symbol);
        let starting_cash = self.starting_cash;
        let account = state.account(user, starting_cash);
        let Some(position) = account.positions.remove(symbol) else {
            return Err(BrokerError::PositionNotFound(symbol.to_string()));
        };
        account.cash += position.value_at(price);

        let client_order_id = uuid::Uuid::new_v4().to_string();
        if let Ok(order) = OrderRequest::market(symbol, position.side.closing_side(), position.quantity.round() as u64) {
            account.orders.push(order);
        }

        info!("📝 Paper close: {} {} @ {:.2}", position.quantity, symbol, price);
        Ok(OrderAck {
            order_id: uuid::Uuid::new_v4().to_string(),
            client_order_id,
            status: OrderStatus::Filled,
            filled_price: Some(price),
        })
    }
}
