use anyhow::Result;
use log::*;
use r2d2::Pool;

use infra::ids::IdGen;
use infra::persistence::{DocumentConnectionManager, Storage};

pub mod admin;
pub mod catalog;
pub mod config;
pub mod diner;
pub mod menus;
pub mod orders;
pub mod sales;
pub mod services;

#[cfg(test)]
mod test;

/// The assembled system: one pool over the document store, services handed
/// out per concern.
pub struct Canteen {
    db: Pool<DocumentConnectionManager>,
    idgen: IdGen,
}

impl Canteen {
    pub fn new(config: &config::Config) -> Result<Self> {
        let db = config.db.build()?;
        Ok(Canteen {
            db,
            idgen: IdGen::new(),
        })
    }

    pub fn setup(&self) -> Result<()> {
        debug!("Init store");
        self.db.get()?.setup()
    }

    pub fn menus(&self) -> Result<menus::Menus<DocumentConnectionManager>> {
        menus::Menus::new(self.db.clone())
    }

    pub fn bookings(&self) -> Result<orders::Bookings<DocumentConnectionManager>> {
        orders::Bookings::new(self.db.clone())
    }

    pub fn sales(&self) -> Result<sales::SalesLedger<DocumentConnectionManager>> {
        sales::SalesLedger::new(self.db.clone())
    }

    pub fn catalog(&self) -> Result<catalog::Catalog<DocumentConnectionManager>> {
        catalog::Catalog::new(self.db.clone())
    }

    pub fn admins(&self) -> Result<admin::AdminDirectory<DocumentConnectionManager>> {
        admin::AdminDirectory::new(self.db.clone())
    }

    /// Mint and persist a fresh ordering identity.
    pub fn enroll_diner(&self) -> Result<diner::Diner> {
        let mut diner = diner::Diner::incarnate(&self.idgen);
        self.db.get()?.save(&mut diner)?;
        debug!("Enrolled diner {}", diner.id());
        Ok(diner)
    }
}

impl Clone for Canteen {
    fn clone(&self) -> Self {
        Canteen {
            db: self.db.clone(),
            idgen: IdGen::new(),
        }
    }
}
