mod models;

pub use self::models::{MealItem, Menu, MenuDraft, MenuStatus};

use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use err_derive::Error;
use log::*;
use r2d2::Pool;

use infra::documents::DocMeta;
use infra::ids::{Id, IdGen};
use infra::persistence::{is_conflict, Storage};

use crate::services::{Commandable, Queryable, Request};

/// The menu lifecycle: draft items are assembled into a `MenuDraft`,
/// scheduled as a `Menu`, and activated for ordering.
#[derive(Debug)]
pub struct Menus<M: r2d2::ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error(display = "menu has no items")]
    EmptyMenu,
    #[error(display = "launch date missing")]
    MissingDate,
    #[error(display = "launch time missing")]
    MissingTime,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error(display = "no such menu: {}", _0)]
pub struct UnknownMenu(pub Id<Menu>);

/// Persist a draft as a scheduled menu.
#[derive(Debug, Clone)]
pub struct ScheduleMenu {
    pub draft: MenuDraft,
}

/// Open one scheduled menu up for ordering. Deliberately does not touch any
/// other menu's status.
#[derive(Debug, Clone)]
pub struct ActivateMenu {
    pub menu_id: Id<Menu>,
}

/// Copy a previous menu's items and date into a fresh draft.
#[derive(Debug, Clone)]
pub struct ReuseMenu {
    pub menu_id: Id<Menu>,
}

/// Everything currently orderable: the items of every active menu, each
/// tagged with its owning menu.
#[derive(Debug, Clone, Copy)]
pub struct ShowMenu;

/// All menus, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct ListMenus;

/// The distinct items seen across all historical menus, for pre-filling the
/// scheduling form. First occurrence (earliest menu) wins a name collision.
#[derive(Debug, Clone, Copy)]
pub struct KnownItems;

/// The active menu intended for a given day, if any; feeds the offline
/// sales meal picker.
#[derive(Debug, Clone, Copy)]
pub struct ActiveMenuOn {
    pub date: NaiveDate,
}

impl Request for ScheduleMenu {
    type Resp = Id<Menu>;
}
impl Request for ActivateMenu {
    type Resp = ();
}
impl Request for ReuseMenu {
    type Resp = MenuDraft;
}
impl Request for ShowMenu {
    type Resp = Vec<(Id<Menu>, MealItem)>;
}
impl Request for ListMenus {
    type Resp = Vec<Menu>;
}
impl Request for KnownItems {
    type Resp = Vec<MealItem>;
}
impl Request for ActiveMenuOn {
    type Resp = Option<Menu>;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Menus<M> {
    pub fn new(db: Pool<M>) -> Result<Self> {
        Ok(Menus {
            db,
            idgen: IdGen::new(),
        })
    }

    fn menus_by_age(&self) -> Result<Vec<Menu>> {
        let docs = self.db.get()?;
        let mut menus = docs.load_all::<Menu>()?;
        menus.sort_by_key(|menu| menu.launch_time);
        Ok(menus)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<ScheduleMenu> for Menus<M>
{
    fn execute(&self, req: ScheduleMenu) -> Result<Id<Menu>> {
        let ScheduleMenu { draft } = req;
        if draft.items.is_empty() {
            return Err(ScheduleError::EmptyMenu.into());
        }
        let date = draft.date.ok_or(ScheduleError::MissingDate)?;
        let time = draft.launch_time.ok_or(ScheduleError::MissingTime)?;

        let id = self.idgen.generate();
        let mut menu = Menu {
            meta: DocMeta::new_with_id(id),
            date,
            launch_time: Utc.from_utc_datetime(&date.and_time(time)),
            items: draft.items,
            status: MenuStatus::Scheduled,
        };
        self.db.get()?.save(&mut menu)?;
        info!("Scheduled menu {} for {}", id, date);
        Ok(id)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<ActivateMenu> for Menus<M>
{
    fn execute(&self, req: ActivateMenu) -> Result<()> {
        let ActivateMenu { menu_id } = req;
        let docs = self.db.get()?;
        loop {
            let mut menu = docs.load::<Menu>(&menu_id)?.ok_or(UnknownMenu(menu_id))?;
            menu.status = MenuStatus::Active;
            match docs.save(&mut menu) {
                Ok(()) => {
                    info!("Menu {} activated", menu_id);
                    return Ok(());
                }
                Err(e) if is_conflict(&e) => {
                    debug!("Contention activating {}; retrying", menu_id);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ReuseMenu>
    for Menus<M>
{
    fn query(&self, req: ReuseMenu) -> Result<MenuDraft> {
        let ReuseMenu { menu_id } = req;
        let docs = self.db.get()?;
        let menu = docs.load::<Menu>(&menu_id)?.ok_or(UnknownMenu(menu_id))?;
        Ok(MenuDraft {
            items: menu.items,
            date: Some(menu.date),
            launch_time: None,
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ShowMenu>
    for Menus<M>
{
    fn query(&self, _req: ShowMenu) -> Result<Vec<(Id<Menu>, MealItem)>> {
        let result = self
            .menus_by_age()?
            .into_iter()
            .filter(|menu| menu.status == MenuStatus::Active)
            .flat_map(|menu| {
                let id = menu.id();
                menu.items.into_iter().map(move |item| (id, item))
            })
            .collect();
        Ok(result)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ListMenus>
    for Menus<M>
{
    fn query(&self, _req: ListMenus) -> Result<Vec<Menu>> {
        self.menus_by_age()
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<KnownItems>
    for Menus<M>
{
    fn query(&self, _req: KnownItems) -> Result<Vec<MealItem>> {
        let mut seen = Vec::<MealItem>::new();
        for menu in self.menus_by_age()? {
            for item in menu.items {
                if !seen.iter().any(|known| known.name == item.name) {
                    seen.push(item);
                }
            }
        }
        Ok(seen)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<ActiveMenuOn> for Menus<M>
{
    fn query(&self, req: ActiveMenuOn) -> Result<Option<Menu>> {
        Ok(self
            .menus_by_age()?
            .into_iter()
            .find(|menu| menu.status == MenuStatus::Active && menu.date == req.date))
    }
}

impl<M: r2d2::ManageConnection> Clone for Menus<M> {
    fn clone(&self) -> Self {
        Menus {
            db: self.db.clone(),
            idgen: IdGen::new(),
        }
    }
}
