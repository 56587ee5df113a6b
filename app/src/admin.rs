use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use log::*;
use r2d2::Pool;
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};
use infra::persistence::{is_conflict, Storage};

use crate::services::{Commandable, Queryable, Request};

/// An administrator, keyed by content-hash of the email so lookups need no
/// scan. Only the argon2 hash of the credential is ever stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admin {
    #[serde(flatten)]
    pub(crate) meta: DocMeta<Admin>,
    pub email: String,
    pub(crate) password_hash: String,
}

impl Admin {
    pub(crate) fn id_for(email: &str) -> Id<Admin> {
        Id::hashed(&email)
    }
}

impl Entity for Admin {
    const PREFIX: &'static str = "admin";
}

impl HasMeta for Admin {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

#[derive(Debug)]
pub struct AdminDirectory<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

/// Enrol (or re-key) an administrator.
#[derive(Debug, Clone)]
pub struct RegisterAdmin {
    pub email: String,
    pub password: String,
}

/// Check a credential. Unknown email and wrong password both come back
/// `false`; callers get no hint which.
#[derive(Debug, Clone)]
pub struct VerifyAdmin {
    pub email: String,
    pub password: String,
}

impl Request for RegisterAdmin {
    type Resp = ();
}
impl Request for VerifyAdmin {
    type Resp = bool;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> AdminDirectory<M> {
    pub fn new(db: Pool<M>) -> Result<Self> {
        Ok(AdminDirectory { db })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<RegisterAdmin> for AdminDirectory<M>
{
    fn execute(&self, req: RegisterAdmin) -> Result<()> {
        let RegisterAdmin { email, password } = req;
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("hash password: {}", e))?
            .to_string();

        let id = Admin::id_for(&email);
        let docs = self.db.get()?;
        loop {
            let mut admin = docs.load::<Admin>(&id)?.unwrap_or_else(|| Admin {
                meta: DocMeta::new_with_id(id),
                email: email.clone(),
                password_hash: String::new(),
            });
            admin.password_hash = hash.clone();
            match docs.save(&mut admin) {
                Ok(()) => {
                    info!("Enrolled admin {}", email);
                    return Ok(());
                }
                Err(e) if is_conflict(&e) => {
                    debug!("Contention enrolling {}; retrying", email);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<VerifyAdmin>
    for AdminDirectory<M>
{
    fn query(&self, req: VerifyAdmin) -> Result<bool> {
        let VerifyAdmin { email, password } = req;
        let docs = self.db.get()?;
        match docs.load::<Admin>(&Admin::id_for(&email))? {
            None => Ok(false),
            Some(admin) => {
                let parsed = PasswordHash::new(&admin.password_hash)
                    .map_err(|e| anyhow!("stored credential for {}: {}", email, e))?;
                Ok(Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok())
            }
        }
    }
}

impl<M: r2d2::ManageConnection> Clone for AdminDirectory<M> {
    fn clone(&self) -> Self {
        AdminDirectory {
            db: self.db.clone(),
        }
    }
}
