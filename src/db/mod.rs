use async_trait::async_trait;

use crate::auth::repo_types::User;
use crate::traveler::query::SpotFilter;
use crate::traveler::repo_types::{Attribute, AttributeKind, Spot, SpotChanges, SpotDraft, SpotLookup};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Persistence for users, attributes and spots.
///
/// Every method that takes an `owner` only ever sees rows of that owner.
#[async_trait]
pub trait Store: Send + Sync {
    /// `None` when the email is already registered.
    async fn create_user(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_user(&self, id: i64) -> anyhow::Result<Option<User>>;

    async fn list_attributes(
        &self,
        kind: AttributeKind,
        owner: i64,
        assigned_only: bool,
    ) -> anyhow::Result<Vec<Attribute>>;
    async fn create_attribute(
        &self,
        kind: AttributeKind,
        owner: i64,
        name: &str,
    ) -> anyhow::Result<Attribute>;
    /// Attributes of `owner` among `ids`, ascending by id; unknown ids are skipped.
    async fn owned_attributes(
        &self,
        kind: AttributeKind,
        owner: i64,
        ids: &[i64],
    ) -> anyhow::Result<Vec<Attribute>>;

    async fn list_spots(&self, owner: i64, filter: &SpotFilter) -> anyhow::Result<Vec<Spot>>;
    async fn find_spot(&self, owner: i64, lookup: SpotLookup<'_>) -> anyhow::Result<Option<Spot>>;
    async fn insert_spot(&self, owner: i64, draft: &SpotDraft) -> anyhow::Result<Spot>;
    /// `None` when `owner` has no spot `id`.
    async fn update_spot(
        &self,
        owner: i64,
        id: i64,
        changes: &SpotChanges,
    ) -> anyhow::Result<Option<Spot>>;
    /// Stores `image` as the spot's asset key and returns the spot with the key it replaced.
    async fn set_spot_image(
        &self,
        owner: i64,
        id: i64,
        image: &str,
    ) -> anyhow::Result<Option<(Spot, Option<String>)>>;
}
