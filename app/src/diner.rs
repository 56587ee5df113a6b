use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id, IdGen};

/// An opaque ordering identity; everything the booking path needs to know
/// about a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Diner {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<Diner>,
}

impl Diner {
    pub fn incarnate(idgen: &IdGen) -> Self {
        let meta = DocMeta::new_with_id(idgen.generate());
        Diner { meta }
    }

    pub fn id(&self) -> Id<Diner> {
        self.meta.id
    }
}

impl Entity for Diner {
    const PREFIX: &'static str = "diner";
}

impl HasMeta for Diner {
    fn meta(&self) -> &DocMeta<Diner> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Diner> {
        &mut self.meta
    }
}
