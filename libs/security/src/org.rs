use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organisation {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

impl Organisation {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            phone: None,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Placeholder contact for organisations registered without an email.
pub fn fallback_email(name: &str) -> String {
    let compact: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    format!("{compact}@example.com")
}

#[async_trait]
pub trait OrganisationStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Organisation>>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Organisation>>;
    /// Returns the organisation called `name`, registering it first if needed.
    async fn get_or_create(&self, name: &str, email: Option<&str>) -> Result<Organisation>;
    /// Returns false when the organisation is unknown.
    async fn set_active(&self, id: &str, active: bool) -> Result<bool>;
}

pub type SharedOrganisationStore = Arc<dyn OrganisationStore>;

#[derive(Default)]
pub struct MemoryOrganisationStore {
    by_id: DashMap<Uuid, Organisation>,
    by_name: DashMap<String, Uuid>,
}

impl MemoryOrganisationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganisationStore for MemoryOrganisationStore {
    async fn get(&self, id: &str) -> Result<Option<Organisation>> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|org| org.clone()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Organisation>> {
        let id = self.by_name.get(name).map(|id| *id);
        Ok(id.and_then(|id| self.by_id.get(&id).map(|org| org.clone())))
    }

    async fn get_or_create(&self, name: &str, email: Option<&str>) -> Result<Organisation> {
        let id = *self.by_name.entry(name.to_string()).or_insert_with(|| {
            let email = email
                .map(str::to_string)
                .unwrap_or_else(|| fallback_email(name));
            let org = Organisation::new(name, email);
            let id = org.id;
            self.by_id.insert(id, org);
            id
        });
        self.by_id
            .get(&id)
            .map(|org| org.clone())
            .ok_or_else(|| anyhow::anyhow!("organisation {id} vanished"))
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(false);
        };
        Ok(match self.by_id.get_mut(&id) {
            Some(mut org) => {
                org.is_active = active;
                true
            }
            None => false,
        })
    }
}
