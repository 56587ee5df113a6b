mod models;

pub use self::models::{IssuedToken, MealToken, TokenCounter};

use anyhow::Result;
use chrono::Utc;
use err_derive::Error;
use log::*;
use r2d2::Pool;
use rust_decimal::Decimal;

use infra::documents::DocMeta;
use infra::ids::{Id, IdGen};
use infra::persistence::{is_conflict, Storage};

use crate::diner::Diner;
use crate::menus::Menu;
use crate::sales::SalesRecord;
use crate::services::{Commandable, Queryable, Request};

/// Issues tokens against active menus. A successful booking is three
/// writes: the stock decrement, the token, and the ledger line. Only the
/// first two are guarded; the ledger line rides behind.
#[derive(Debug)]
pub struct Bookings<M: r2d2::ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

#[derive(Debug, Error, PartialEq)]
pub enum BookingError {
    #[error(display = "not permitted: no signed-in user")]
    NotPermitted,
    #[error(display = "{} is sold out", _0)]
    SoldOut(String),
    #[error(display = "no such menu: {}", _0)]
    UnknownMenu(Id<Menu>),
    #[error(display = "{} is not on this menu", _0)]
    UnknownMeal(String),
}

/// Book one serving of `meal_name` from menu `menu_id` for the given diner.
#[derive(Debug, Clone)]
pub struct BookMeal {
    pub menu_id: Id<Menu>,
    pub meal_name: String,
    pub diner_id: Option<Id<Diner>>,
}

/// Tokens issued so far for one (menu, meal) pair, in issue order.
#[derive(Debug, Clone)]
pub struct TokensFor {
    pub menu_id: Id<Menu>,
    pub meal_name: String,
}

impl Request for BookMeal {
    type Resp = IssuedToken;
}
impl Request for TokensFor {
    type Resp = Vec<MealToken>;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Bookings<M> {
    pub fn new(db: Pool<M>) -> Result<Self> {
        Ok(Bookings {
            db,
            idgen: IdGen::new(),
        })
    }

    /// Take one serving off the shelf, or nothing at all. Runs as a
    /// compare-and-swap loop: a loser of the race reloads and re-checks, so
    /// quantity can never go below zero however many bookers pile in.
    fn reserve_serving(docs: &D, menu_id: &Id<Menu>, meal_name: &str) -> Result<Decimal> {
        loop {
            let mut menu = docs
                .load::<Menu>(menu_id)?
                .ok_or_else(|| BookingError::UnknownMenu(*menu_id))?;
            let item = menu
                .items
                .iter_mut()
                .find(|item| item.name == meal_name)
                .ok_or_else(|| BookingError::UnknownMeal(meal_name.to_string()))?;
            if item.quantity == 0 {
                return Err(BookingError::SoldOut(meal_name.to_string()).into());
            }
            item.quantity -= 1;
            let price = item.price;
            match docs.save(&mut menu) {
                Ok(()) => return Ok(price),
                Err(e) if is_conflict(&e) => {
                    debug!("Stock contention on {}; retrying", menu_id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bump the pair's counter under the store's version check; the first
    /// booking for a pair creates it and gets 1.
    fn next_token_number(docs: &D, menu_id: &Id<Menu>, meal_name: &str) -> Result<u32> {
        let counter_id = TokenCounter::id_for(menu_id, meal_name);
        loop {
            let mut counter = docs
                .load::<TokenCounter>(&counter_id)?
                .unwrap_or_else(|| TokenCounter::fresh(*menu_id, meal_name));
            counter.last += 1;
            let number = counter.last;
            match docs.save(&mut counter) {
                Ok(()) => return Ok(number),
                Err(e) if is_conflict(&e) => {
                    debug!("Token contention on {}/{}; retrying", menu_id, meal_name);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<BookMeal>
    for Bookings<M>
{
    fn execute(&self, req: BookMeal) -> Result<IssuedToken> {
        let BookMeal {
            menu_id,
            meal_name,
            diner_id,
        } = req;
        let diner_id = diner_id.ok_or(BookingError::NotPermitted)?;
        let docs = self.db.get()?;

        // Stock before numbering: a booker who loses every race walks away
        // with SoldOut and no dangling token.
        let price = Self::reserve_serving(&*docs, &menu_id, &meal_name)?;
        let number = Self::next_token_number(&*docs, &menu_id, &meal_name)?;

        let token = format!("TOKEN-{}", number);
        let mut record = MealToken {
            meta: DocMeta::new_with_id(self.idgen.generate()),
            token: token.clone(),
            token_number: number,
            diner_id,
            meal_name: meal_name.clone(),
            menu_id,
            booked_at: Utc::now(),
        };
        docs.save(&mut record)?;

        let mut sale = SalesRecord::online(
            self.idgen.generate(),
            &meal_name,
            menu_id,
            diner_id,
            price,
        );
        docs.save(&mut sale)?;

        info!("Issued {} for {} on menu {}", token, meal_name, menu_id);
        Ok(IssuedToken {
            token,
            token_number: number,
            meal_name,
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<TokensFor>
    for Bookings<M>
{
    fn query(&self, req: TokensFor) -> Result<Vec<MealToken>> {
        let docs = self.db.get()?;
        let mut tokens: Vec<MealToken> = docs
            .load_all::<MealToken>()?
            .into_iter()
            .filter(|t| t.menu_id == req.menu_id && t.meal_name == req.meal_name)
            .collect();
        tokens.sort_by_key(|t| t.token_number);
        Ok(tokens)
    }
}

impl<M: r2d2::ManageConnection> Clone for Bookings<M> {
    fn clone(&self) -> Self {
        Bookings {
            db: self.db.clone(),
            idgen: IdGen::new(),
        }
    }
}
