use crate::domain::entities::order::OrderSide;
use crate::domain::entities::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "long" => Some(PositionSide::Long),
            "short" => Some(PositionSide::Short),
            _ => None,
        }
    }

    /// Order side that flattens a position on this side
    pub fn closing_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(PositionStatus::Open),
            "closed" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

/// Derived money fields of a position at a given price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Valuation {
    pub market_value: f64,
    pub cost_basis: f64,
    pub unrealized_pl: f64,
    pub unrealized_pl_percent: f64,
}

/// Computes the derived fields of a position. Called before every write so
/// the stored values never drift from quantity and prices.
pub fn valuation(side: PositionSide, quantity: f64, entry_price: f64, current_price: f64) -> Valuation {
    let cost_basis = quantity * entry_price;
    let market_value = quantity * current_price;
    let unrealized_pl = match side {
        PositionSide::Long => market_value - cost_basis,
        PositionSide::Short => cost_basis - market_value,
    };
    let unrealized_pl_percent = if cost_basis.abs() > f64::EPSILON {
        unrealized_pl / cost_basis.abs() * 100.0
    } else {
        0.0
    };

    Valuation {
        market_value,
        cost_basis,
        unrealized_pl,
        unrealized_pl_percent,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    pub user_id: UserId,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub cost_basis: f64,
    pub unrealized_pl: f64,
    pub unrealized_pl_percent: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_price: Option<f64>,
    pub realized_pl: Option<f64>,
}

impl Position {
    pub fn open(
        user_id: UserId,
        symbol: impl Into<String>,
        side: PositionSide,
        quantity: f64,
        entry_price: f64,
        current_price: f64,
        opened_at: DateTime<Utc>,
    ) -> Self {
        let v = valuation(side, quantity, entry_price, current_price);
        Position {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            current_price,
            market_value: v.market_value,
            cost_basis: v.cost_basis,
            unrealized_pl: v.unrealized_pl,
            unrealized_pl_percent: v.unrealized_pl_percent,
            status: PositionStatus::Open,
            opened_at,
            closed_at: None,
            close_price: None,
            realized_pl: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Re-derive money fields for a new price and quantity
    pub fn refresh(&mut self, quantity: f64, entry_price: f64, current_price: f64) {
        let v = valuation(self.side, quantity, entry_price, current_price);
        self.quantity = quantity;
        self.entry_price = entry_price;
        self.current_price = current_price;
        self.market_value = v.market_value;
        self.cost_basis = v.cost_basis;
        self.unrealized_pl = v.unrealized_pl;
        self.unrealized_pl_percent = v.unrealized_pl_percent;
    }

    /// Close the position at `price`. Returns the realized P&L, or None when
    /// the position was already closed.
    pub fn close(&mut self, price: f64, at: DateTime<Utc>) -> Option<f64> {
        if !self.is_open() {
            return None;
        }
        self.refresh(self.quantity, self.entry_price, price);
        let realized = self.unrealized_pl;
        self.status = PositionStatus::Closed;
        self.closed_at = Some(at);
        self.close_price = Some(price);
        self.realized_pl = Some(realized);
        Some(realized)
    }

    /// Price move since entry in percent, signed in the position's favour
    pub fn price_change_percent(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        let change = (self.current_price - self.entry_price) / self.entry_price * 100.0;
        match self.side {
            PositionSide::Long => change,
            PositionSide::Short => -change,
        }
    }
}
