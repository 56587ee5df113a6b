use anyhow::Result;
use err_derive::Error;
use log::*;
use r2d2::Pool;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id, IdGen};
use infra::persistence::{is_conflict, Storage};

use crate::services::{Commandable, Queryable, Request};

/// The admin-maintained catalogue of items worth putting on a menu,
/// independent of any particular day's stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<CatalogItem>,
    pub name: String,
    pub price: Decimal,
    pub description: Option<String>,
}

impl CatalogItem {
    pub fn id(&self) -> Id<CatalogItem> {
        self.meta.id
    }
}

impl Entity for CatalogItem {
    const PREFIX: &'static str = "catalog-item";
}

impl HasMeta for CatalogItem {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

/// Whether a form submission mints a new item or rewrites an existing one.
/// Both arms share one validation and submit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Creating,
    Editing(Id<CatalogItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemForm {
    pub mode: FormMode,
    pub name: String,
    pub price: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error(display = "item name missing")]
    MissingName,
    #[error(display = "price must not be negative")]
    NegativePrice,
    #[error(display = "no such item: {}", _0)]
    UnknownItem(Id<CatalogItem>),
}

impl ItemForm {
    fn validate(&self) -> Result<(), FormError> {
        if self.name.trim().is_empty() {
            return Err(FormError::MissingName);
        }
        if self.price < Decimal::ZERO {
            return Err(FormError::NegativePrice);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Catalog<M: r2d2::ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

#[derive(Debug, Clone)]
pub struct SubmitItem {
    pub form: ItemForm,
}

#[derive(Debug, Clone, Copy)]
pub struct ListItems;

impl Request for SubmitItem {
    type Resp = Id<CatalogItem>;
}
impl Request for ListItems {
    type Resp = Vec<CatalogItem>;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Catalog<M> {
    pub fn new(db: Pool<M>) -> Result<Self> {
        Ok(Catalog {
            db,
            idgen: IdGen::new(),
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<SubmitItem>
    for Catalog<M>
{
    fn execute(&self, req: SubmitItem) -> Result<Id<CatalogItem>> {
        let SubmitItem { form } = req;
        form.validate()?;

        let docs = self.db.get()?;
        match form.mode {
            FormMode::Creating => {
                let mut item = CatalogItem {
                    meta: DocMeta::new_with_id(self.idgen.generate()),
                    name: form.name,
                    price: form.price,
                    description: form.description,
                };
                docs.save(&mut item)?;
                debug!("Catalogued {}: {}", item.meta.id, item.name);
                Ok(item.meta.id)
            }
            FormMode::Editing(id) => loop {
                let mut item = docs
                    .load::<CatalogItem>(&id)?
                    .ok_or(FormError::UnknownItem(id))?;
                item.name = form.name.clone();
                item.price = form.price;
                item.description = form.description.clone();
                match docs.save(&mut item) {
                    Ok(()) => {
                        debug!("Rewrote {}: {}", id, item.name);
                        return Ok(id);
                    }
                    Err(e) if is_conflict(&e) => {
                        debug!("Contention editing {}; retrying", id);
                    }
                    Err(e) => return Err(e),
                }
            },
        }
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ListItems>
    for Catalog<M>
{
    fn query(&self, _req: ListItems) -> Result<Vec<CatalogItem>> {
        let docs = self.db.get()?;
        let mut items = docs.load_all::<CatalogItem>()?;
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}

impl<M: r2d2::ManageConnection> Clone for Catalog<M> {
    fn clone(&self) -> Self {
        Catalog {
            db: self.db.clone(),
            idgen: IdGen::new(),
        }
    }
}
