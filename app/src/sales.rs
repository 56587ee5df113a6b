use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use err_derive::Error;
use log::*;
use r2d2::Pool;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id, IdGen};
use infra::persistence::Storage;

use crate::diner::Diner;
use crate::menus::Menu;
use crate::services::{Commandable, Queryable, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentType {
    Cash,
    #[serde(rename = "UPI")]
    Upi,
    Card,
}

impl FromStr for PaymentType {
    type Err = anyhow::Error;
    fn from_str(src: &str) -> Result<Self, Self::Err> {
        match src.to_ascii_lowercase().as_str() {
            "cash" => Ok(PaymentType::Cash),
            "upi" => Ok(PaymentType::Upi),
            "card" => Ok(PaymentType::Card),
            _ => Err(anyhow::anyhow!("unknown payment type: {}", src)),
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PaymentType::Cash => write!(fmt, "Cash"),
            PaymentType::Upi => write!(fmt, "UPI"),
            PaymentType::Card => write!(fmt, "Card"),
        }
    }
}

/// One line of the unified ledger. Append-only: nothing updates or deletes
/// these, whatever else goes wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<SalesRecord>,
    pub meal_name: String,
    pub menu_id: Option<Id<Menu>>,
    pub diner_id: Option<Id<Diner>>,
    pub amount: Decimal,
    pub quantity: u32,
    pub payment_type: Option<PaymentType>,
    pub source: Source,
    pub sold_at: DateTime<Utc>,
}

impl SalesRecord {
    pub(crate) fn online(
        id: Id<SalesRecord>,
        meal_name: &str,
        menu_id: Id<Menu>,
        diner_id: Id<Diner>,
        amount: Decimal,
    ) -> Self {
        SalesRecord {
            meta: DocMeta::new_with_id(id),
            meal_name: meal_name.to_string(),
            menu_id: Some(menu_id),
            diner_id: Some(diner_id),
            amount,
            quantity: 1,
            payment_type: None,
            source: Source::Online,
            sold_at: Utc::now(),
        }
    }
}

impl Entity for SalesRecord {
    const PREFIX: &'static str = "sale";
}

impl HasMeta for SalesRecord {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

/// The till slip kept alongside the unified ledger for counter sales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineSale {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<OfflineSale>,
    pub meal_name: String,
    pub quantity: u32,
    pub amount: Decimal,
    pub payment_type: PaymentType,
    pub sold_at: DateTime<Utc>,
}

impl Entity for OfflineSale {
    const PREFIX: &'static str = "offline-sale";
}

impl HasMeta for OfflineSale {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

#[derive(Debug)]
pub struct SalesLedger<M: r2d2::ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OfflineSaleError {
    #[error(display = "meal name missing")]
    MissingMeal,
    #[error(display = "quantity must be at least one")]
    ZeroQuantity,
    #[error(display = "amount must not be negative")]
    NegativeAmount,
}

/// A sale rung up at the counter: one entry in the offline book, one in the
/// unified ledger. Touches no menu stock.
#[derive(Debug, Clone)]
pub struct RecordOfflineSale {
    pub meal_name: String,
    pub quantity: u32,
    pub amount: Decimal,
    pub payment_type: PaymentType,
}

/// Online ledger lines sold on the given day, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct TodaysOnline {
    pub date: NaiveDate,
}

/// Total servings per meal across the given day's online orders.
#[derive(Debug, Clone, Copy)]
pub struct ItemTotals {
    pub date: NaiveDate,
}

impl Request for RecordOfflineSale {
    type Resp = ();
}
impl Request for TodaysOnline {
    type Resp = Vec<SalesRecord>;
}
impl Request for ItemTotals {
    type Resp = HashMap<String, u32>;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> SalesLedger<M> {
    pub fn new(db: Pool<M>) -> Result<Self> {
        Ok(SalesLedger {
            db,
            idgen: IdGen::new(),
        })
    }

    fn online_on(&self, date: NaiveDate) -> Result<Vec<SalesRecord>> {
        let docs = self.db.get()?;
        let mut records: Vec<SalesRecord> = docs
            .load_all::<SalesRecord>()?
            .into_iter()
            .filter(|sale| sale.source == Source::Online && sale.sold_at.naive_utc().date() == date)
            .collect();
        records.sort_by_key(|sale| sale.sold_at);
        Ok(records)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<RecordOfflineSale> for SalesLedger<M>
{
    fn execute(&self, req: RecordOfflineSale) -> Result<()> {
        let RecordOfflineSale {
            meal_name,
            quantity,
            amount,
            payment_type,
        } = req;
        if meal_name.trim().is_empty() {
            return Err(OfflineSaleError::MissingMeal.into());
        }
        if quantity == 0 {
            return Err(OfflineSaleError::ZeroQuantity.into());
        }
        if amount < Decimal::ZERO {
            return Err(OfflineSaleError::NegativeAmount.into());
        }

        let docs = self.db.get()?;
        let sold_at = Utc::now();
        let mut slip = OfflineSale {
            meta: DocMeta::new_with_id(self.idgen.generate()),
            meal_name: meal_name.clone(),
            quantity,
            amount,
            payment_type,
            sold_at,
        };
        docs.save(&mut slip)?;

        let mut sale = SalesRecord {
            meta: DocMeta::new_with_id(self.idgen.generate()),
            meal_name: meal_name.clone(),
            menu_id: None,
            diner_id: None,
            amount,
            quantity,
            payment_type: Some(payment_type),
            source: Source::Offline,
            sold_at,
        };
        docs.save(&mut sale)?;

        info!(
            "Offline sale: {} x{} for {} ({})",
            meal_name, quantity, amount, payment_type
        );
        Ok(())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<TodaysOnline> for SalesLedger<M>
{
    fn query(&self, req: TodaysOnline) -> Result<Vec<SalesRecord>> {
        self.online_on(req.date)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ItemTotals>
    for SalesLedger<M>
{
    fn query(&self, req: ItemTotals) -> Result<HashMap<String, u32>> {
        let mut totals = HashMap::new();
        for sale in self.online_on(req.date)? {
            *totals.entry(sale.meal_name).or_insert(0) += sale.quantity;
        }
        Ok(totals)
    }
}

impl<M: r2d2::ManageConnection> Clone for SalesLedger<M> {
    fn clone(&self) -> Self {
        SalesLedger {
            db: self.db.clone(),
            idgen: IdGen::new(),
        }
    }
}
