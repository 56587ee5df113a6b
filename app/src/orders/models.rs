use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::diner::Diner;
use crate::menus::Menu;

/// Proof of a successful booking: shown to the diner, read back at the
/// serving hatch. Never mutated after issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealToken {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<MealToken>,
    pub token: String,
    pub token_number: u32,
    pub diner_id: Id<Diner>,
    pub meal_name: String,
    pub menu_id: Id<Menu>,
    pub booked_at: DateTime<Utc>,
}

impl MealToken {
    pub fn id(&self) -> Id<MealToken> {
        self.meta.id
    }
}

impl Entity for MealToken {
    const PREFIX: &'static str = "token";
}

impl HasMeta for MealToken {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

/// Last issued token number for one (menu, meal) pair. The id is hashed
/// from the pair, so every booker converges on the same document; the
/// store's version check on save is what keeps the sequence gapless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCounter {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<TokenCounter>,
    pub(crate) menu_id: Id<Menu>,
    pub(crate) meal_name: String,
    pub(crate) last: u32,
}

impl TokenCounter {
    pub(super) fn id_for(menu_id: &Id<Menu>, meal_name: &str) -> Id<TokenCounter> {
        Id::hashed(&(menu_id.untyped(), meal_name))
    }

    pub(super) fn fresh(menu_id: Id<Menu>, meal_name: &str) -> Self {
        TokenCounter {
            meta: DocMeta::new_with_id(Self::id_for(&menu_id, meal_name)),
            menu_id,
            meal_name: meal_name.to_string(),
            last: 0,
        }
    }
}

impl Entity for TokenCounter {
    const PREFIX: &'static str = "counter";
}

impl HasMeta for TokenCounter {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

/// What a booking hands back for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub token_number: u32,
    pub meal_name: String,
}
