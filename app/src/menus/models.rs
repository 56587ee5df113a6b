use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

/// One line of a menu. `quantity` is remaining stock and only ever counts
/// down once the menu is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealItem {
    pub name: String,
    pub price: Decimal,
    pub description: Option<String>,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuStatus {
    Scheduled,
    /// Terminal in practice: nothing transitions a menu back out, and
    /// several menus may be active at once. Ordering pools all of them.
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<Menu>,
    pub date: NaiveDate,
    pub launch_time: DateTime<Utc>,
    pub items: Vec<MealItem>,
    pub status: MenuStatus,
}

impl Menu {
    pub fn id(&self) -> Id<Menu> {
        self.meta.id
    }
}

impl Entity for Menu {
    const PREFIX: &'static str = "menu";
}

impl HasMeta for Menu {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

/// What an admin assembles before scheduling. Owned by the caller for the
/// session; nothing here is global.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MenuDraft {
    pub items: Vec<MealItem>,
    pub date: Option<NaiveDate>,
    pub launch_time: Option<NaiveTime>,
}

impl MenuDraft {
    pub fn new() -> Self {
        Default::default()
    }

    /// Validates and appends. Returns false, leaving the draft untouched,
    /// for a blank name, a negative price, or a name already on the draft;
    /// the caller re-prompts.
    pub fn add_item(&mut self, item: MealItem) -> bool {
        if item.name.trim().is_empty() || item.price < Decimal::ZERO {
            return false;
        }
        if self.items.iter().any(|existing| existing.name == item.name) {
            return false;
        }
        self.items.push(item);
        true
    }
}
