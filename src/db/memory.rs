use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::Store;
use crate::auth::repo_types::User;
use crate::traveler::query::{select_attributes, select_spots, SpotFilter};
use crate::traveler::repo_types::{
    normalize_ids, Attribute, AttributeKind, Spot, SpotChanges, SpotDraft, SpotLookup,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    attributes: HashMap<AttributeKind, Vec<Attribute>>,
    spots: BTreeMap<i64, Spot>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store with the same visible behaviour as [`super::PgStore`].
///
/// One lock guards all tables, so each call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut t = self.tables.write().await;
        if t.users.iter().any(|u| u.email == email) {
            return Ok(None);
        }
        let user = User {
            id: t.next_id(),
            email: email.to_string(),
            name: name.to_string(),
            password_hash: password_hash.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.push(user.clone());
        Ok(Some(user))
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_user(&self, id: i64) -> anyhow::Result<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn list_attributes(
        &self,
        kind: AttributeKind,
        owner: i64,
        assigned_only: bool,
    ) -> anyhow::Result<Vec<Attribute>> {
        let t = self.tables.read().await;
        let attrs = t.attributes.get(&kind).map(Vec::as_slice).unwrap_or_default();
        Ok(select_attributes(
            attrs,
            t.spots.values(),
            kind,
            owner,
            assigned_only,
        ))
    }

    async fn create_attribute(
        &self,
        kind: AttributeKind,
        owner: i64,
        name: &str,
    ) -> anyhow::Result<Attribute> {
        let mut t = self.tables.write().await;
        let attr = Attribute {
            id: t.next_id(),
            user_id: owner,
            name: name.to_string(),
        };
        t.attributes.entry(kind).or_default().push(attr.clone());
        Ok(attr)
    }

    async fn owned_attributes(
        &self,
        kind: AttributeKind,
        owner: i64,
        ids: &[i64],
    ) -> anyhow::Result<Vec<Attribute>> {
        let t = self.tables.read().await;
        let mut out: Vec<Attribute> = t
            .attributes
            .get(&kind)
            .into_iter()
            .flatten()
            .filter(|a| a.user_id == owner && ids.contains(&a.id))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.id);
        Ok(out)
    }

    async fn list_spots(&self, owner: i64, filter: &SpotFilter) -> anyhow::Result<Vec<Spot>> {
        let t = self.tables.read().await;
        Ok(select_spots(t.spots.values(), owner, filter))
    }

    async fn find_spot(&self, owner: i64, lookup: SpotLookup<'_>) -> anyhow::Result<Option<Spot>> {
        let t = self.tables.read().await;
        let found = match lookup {
            SpotLookup::Id(id) => t.spots.get(&id).filter(|s| s.user_id == owner),
            SpotLookup::Title(title) => t
                .spots
                .values()
                .rev()
                .find(|s| s.user_id == owner && s.title == title),
        };
        Ok(found.cloned())
    }

    async fn insert_spot(&self, owner: i64, draft: &SpotDraft) -> anyhow::Result<Spot> {
        let mut t = self.tables.write().await;
        let spot = Spot {
            id: t.next_id(),
            user_id: owner,
            title: draft.title.clone(),
            time_minutes: draft.time_minutes,
            price: draft.price,
            link: draft.link.clone(),
            image: None,
            tags: normalize_ids(&draft.tags),
            locations: normalize_ids(&draft.locations),
            ingredients: normalize_ids(&draft.ingredients),
        };
        t.spots.insert(spot.id, spot.clone());
        Ok(spot)
    }

    async fn update_spot(
        &self,
        owner: i64,
        id: i64,
        changes: &SpotChanges,
    ) -> anyhow::Result<Option<Spot>> {
        let mut t = self.tables.write().await;
        let Some(spot) = t.spots.get_mut(&id).filter(|s| s.user_id == owner) else {
            return Ok(None);
        };
        changes.apply(spot);
        Ok(Some(spot.clone()))
    }

    async fn set_spot_image(
        &self,
        owner: i64,
        id: i64,
        image: &str,
    ) -> anyhow::Result<Option<(Spot, Option<String>)>> {
        let mut t = self.tables.write().await;
        let Some(spot) = t.spots.get_mut(&id).filter(|s| s.user_id == owner) else {
            return Ok(None);
        };
        let previous = spot.image.replace(image.to_string());
        Ok(Some((spot.clone(), previous)))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn draft(title: &str, tags: Vec<i64>) -> SpotDraft {
        SpotDraft {
            title: title.into(),
            time_minutes: 10,
            price: Decimal::new(500, 2),
            link: None,
            tags,
            locations: vec![],
            ingredients: vec![],
        }
    }

    #[tokio::test]
    async fn spots_are_scoped_to_owner() {
        let store = MemoryStore::new();
        let a = store.create_user("a@example.com", "", "h").await.unwrap().unwrap();
        let b = store.create_user("b@example.com", "", "h").await.unwrap().unwrap();
        let spot_a = store.insert_spot(a.id, &draft("A", vec![])).await.unwrap();
        store.insert_spot(b.id, &draft("B", vec![])).await.unwrap();

        let listed = store.list_spots(a.id, &SpotFilter::default()).await.unwrap();
        assert_eq!(listed, vec![spot_a.clone()]);
        assert!(store
            .find_spot(b.id, SpotLookup::Id(spot_a.id))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .update_spot(b.id, spot_a.id, &SpotChanges::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn title_lookup_prefers_newest() {
        let store = MemoryStore::new();
        store.insert_spot(1, &draft("Same", vec![])).await.unwrap();
        let newer = store.insert_spot(1, &draft("Same", vec![])).await.unwrap();
        let found = store
            .find_spot(1, SpotLookup::Title("Same"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
    }

    #[tokio::test]
    async fn set_image_returns_previous_key() {
        let store = MemoryStore::new();
        let spot = store.insert_spot(1, &draft("S", vec![])).await.unwrap();
        let (_, prev) = store.set_spot_image(1, spot.id, "k1").await.unwrap().unwrap();
        assert_eq!(prev, None);
        let (s, prev) = store.set_spot_image(1, spot.id, "k2").await.unwrap().unwrap();
        assert_eq!(prev.as_deref(), Some("k1"));
        assert_eq!(s.image.as_deref(), Some("k2"));
        assert!(store.set_spot_image(2, spot.id, "k3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_user_email_rejected() {
        let store = MemoryStore::new();
        assert!(store
            .create_user("a@example.com", "", "h")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .create_user("a@example.com", "", "h")
            .await
            .unwrap()
            .is_none());
    }
}
