use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use super::dto::{
    check_name, AttributeResponse, SpotAction, SpotDetail, SpotForm, SpotImageResponse,
    SpotReference, SpotResponse,
};
use super::query::SpotFilter;
use super::repo_types::{Attribute, AttributeKind, Spot, SpotChanges, SpotDraft, SpotLookup};
use crate::db::Store;
use crate::error::{AppError, FieldErrors};
use crate::state::AppState;

/// Price band shown next to every spot; not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriceRating {
    Reasonable,
    Expensive,
}

impl PriceRating {
    pub fn of(price: Decimal) -> Self {
        if price < Decimal::from(20) {
            PriceRating::Reasonable
        } else {
            PriceRating::Expensive
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriceRating::Reasonable => "Reasonable",
            PriceRating::Expensive => "Expensive",
        }
    }
}

pub async fn list_owned_attributes(
    store: &dyn Store,
    caller: i64,
    kind: AttributeKind,
    assigned_only: bool,
) -> Result<Vec<Attribute>, AppError> {
    Ok(store.list_attributes(kind, caller, assigned_only).await?)
}

pub async fn create_attribute(
    store: &dyn Store,
    caller: i64,
    kind: AttributeKind,
    name: Option<&str>,
) -> Result<Attribute, AppError> {
    let mut errors = FieldErrors::new();
    let name = match name {
        Some(raw) => check_name("name", raw, &mut errors),
        None => {
            errors.add("name", "This field is required.");
            None
        }
    };
    let Some(name) = name else {
        warn!(?kind, caller, "attribute rejected");
        return Err(AppError::Validation(errors));
    };
    let attr = store.create_attribute(kind, caller, &name).await?;
    info!(?kind, caller, id = attr.id, "attribute created");
    Ok(attr)
}

pub async fn list_spots(
    store: &dyn Store,
    caller: i64,
    filter: &SpotFilter,
) -> Result<Vec<Spot>, AppError> {
    Ok(store.list_spots(caller, filter).await?)
}

pub async fn get_spot(store: &dyn Store, caller: i64, id: i64) -> Result<Spot, AppError> {
    store
        .find_spot(caller, SpotLookup::Id(id))
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn find_spot_by_title(
    store: &dyn Store,
    caller: i64,
    title: &str,
) -> Result<Option<Spot>, AppError> {
    Ok(store.find_spot(caller, SpotLookup::Title(title)).await?)
}

/// Rejects link ids that do not name an attribute of `caller`.
async fn check_links<'a, F>(store: &dyn Store, caller: i64, links: F) -> Result<(), AppError>
where
    F: Fn(AttributeKind) -> Option<&'a [i64]>,
{
    let mut errors = FieldErrors::new();
    for kind in AttributeKind::ALL {
        let Some(ids) = links(kind) else { continue };
        let owned = store.owned_attributes(kind, caller, ids).await?;
        for id in ids {
            if !owned.iter().any(|a| a.id == *id) {
                errors.add(
                    kind.field(),
                    format!("Invalid pk \"{id}\" - object does not exist."),
                );
            }
        }
    }
    errors.into_result()
}

pub async fn create_spot(
    store: &dyn Store,
    caller: i64,
    draft: SpotDraft,
) -> Result<Spot, AppError> {
    check_links(store, caller, |kind| Some(draft.links(kind))).await?;
    let spot = store.insert_spot(caller, &draft).await?;
    info!(caller, id = spot.id, "spot created");
    Ok(spot)
}

pub async fn update_spot(
    store: &dyn Store,
    caller: i64,
    id: i64,
    changes: SpotChanges,
) -> Result<Spot, AppError> {
    if store.find_spot(caller, SpotLookup::Id(id)).await?.is_none() {
        return Err(AppError::NotFound);
    }
    check_links(store, caller, |kind| changes.links(kind)).await?;
    let spot = store
        .update_spot(caller, id, &changes)
        .await?
        .ok_or(AppError::NotFound)?;
    info!(caller, id, "spot updated");
    Ok(spot)
}

async fn expand(
    store: &dyn Store,
    caller: i64,
    kind: AttributeKind,
    spot: &Spot,
) -> Result<Vec<AttributeResponse>, AppError> {
    let attrs = store
        .owned_attributes(kind, caller, spot.links(kind))
        .await?;
    Ok(attrs.into_iter().map(AttributeResponse::from).collect())
}

/// Resolvable URL for a stored image key.
pub async fn image_url(state: &AppState, key: Option<&str>) -> Result<Option<String>, AppError> {
    match key {
        Some(key) => Ok(Some(
            state
                .storage
                .presign_get(key, state.config.image_url_ttl_secs)
                .await?,
        )),
        None => Ok(None),
    }
}

/// Nested form of `spot`, with linked attributes resolved.
pub async fn spot_detail(state: &AppState, caller: i64, spot: Spot) -> Result<SpotDetail, AppError> {
    let store = state.store.as_ref();
    let tags = expand(store, caller, AttributeKind::Tag, &spot).await?;
    let locations = expand(store, caller, AttributeKind::Location, &spot).await?;
    let ingredients = expand(store, caller, AttributeKind::Ingredient, &spot).await?;
    let image = image_url(state, spot.image.as_deref()).await?;
    Ok(SpotDetail {
        id: spot.id,
        price_rating: PriceRating::of(spot.price),
        title: spot.title,
        time_minutes: spot.time_minutes,
        price: spot.price,
        link: spot.link,
        image,
        tags,
        locations,
        ingredients,
    })
}

/// Renders `spot` in the form bound to `action`.
pub async fn render_spot(
    state: &AppState,
    caller: i64,
    action: SpotAction,
    spot: Spot,
) -> Result<SpotResponse, AppError> {
    Ok(match action.form() {
        SpotForm::Reference => SpotResponse::Reference(SpotReference::from(spot)),
        SpotForm::Nested => SpotResponse::Detail(spot_detail(state, caller, spot).await?),
        SpotForm::Image => SpotResponse::Image(SpotImageResponse {
            id: spot.id,
            image: image_url(state, spot.image.as_deref()).await?,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn price(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn draft(title: &str) -> SpotDraft {
        SpotDraft {
            title: title.into(),
            time_minutes: 10,
            price: price("5.00"),
            link: None,
            tags: vec![],
            locations: vec![],
            ingredients: vec![],
        }
    }

    #[test]
    fn price_rating_boundary() {
        assert_eq!(PriceRating::of(price("19.99")), PriceRating::Reasonable);
        assert_eq!(PriceRating::of(price("20.00")), PriceRating::Expensive);
        assert_eq!(PriceRating::of(price("45.00")), PriceRating::Expensive);
        assert_eq!(PriceRating::Reasonable.as_str(), "Reasonable");
        assert_eq!(
            serde_json::to_value(PriceRating::Expensive).unwrap(),
            serde_json::json!("Expensive")
        );
    }

    #[tokio::test]
    async fn listing_never_leaks_other_owners() {
        let store = MemoryStore::new();
        for owner in [1, 2, 1, 2] {
            create_spot(&store, owner, draft("x")).await.unwrap();
        }
        for caller in [1, 2] {
            let spots = list_spots(&store, caller, &SpotFilter::default()).await.unwrap();
            assert_eq!(spots.len(), 2);
            assert!(spots.iter().all(|s| s.user_id == caller));
        }
    }

    #[tokio::test]
    async fn empty_attribute_name_is_rejected() {
        let store = MemoryStore::new();
        let err = create_attribute(&store, 1, AttributeKind::Tag, Some(""))
            .await
            .unwrap_err();
        let AppError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            fields.get("name").unwrap(),
            &["This field may not be blank.".to_string()]
        );
        assert!(create_attribute(&store, 1, AttributeKind::Tag, None)
            .await
            .is_err());

        let tag = create_attribute(&store, 1, AttributeKind::Tag, Some("Vegan"))
            .await
            .unwrap();
        let listed = list_owned_attributes(&store, 1, AttributeKind::Tag, false)
            .await
            .unwrap();
        assert_eq!(listed, vec![tag]);
    }

    #[tokio::test]
    async fn assigned_only_lists_each_attribute_once() {
        let store = MemoryStore::new();
        let california = create_attribute(&store, 1, AttributeKind::Location, Some("California"))
            .await
            .unwrap();
        create_attribute(&store, 1, AttributeKind::Location, Some("Los Angeles"))
            .await
            .unwrap();
        for title in ["Dance Club", "Weed Clinic"] {
            let mut d = draft(title);
            d.locations = vec![california.id];
            create_spot(&store, 1, d).await.unwrap();
        }

        let assigned = list_owned_attributes(&store, 1, AttributeKind::Location, true)
            .await
            .unwrap();
        assert_eq!(assigned, vec![california]);

        let all = list_owned_attributes(&store, 1, AttributeKind::Location, false)
            .await
            .unwrap();
        let names: Vec<&str> = all.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Los Angeles", "California"]);
    }

    #[tokio::test]
    async fn links_to_foreign_attributes_are_rejected() {
        let store = MemoryStore::new();
        let foreign = create_attribute(&store, 2, AttributeKind::Tag, Some("Theirs"))
            .await
            .unwrap();
        let mut d = draft("Mine");
        d.tags = vec![foreign.id, 999];
        let AppError::Validation(fields) = create_spot(&store, 1, d).await.unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(fields.get("tags").unwrap().len(), 2);
        assert!(list_spots(&store, 1, &SpotFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn full_update_clears_links_but_patch_keeps_them() {
        let store = MemoryStore::new();
        let tag = create_attribute(&store, 1, AttributeKind::Tag, Some("Social"))
            .await
            .unwrap();
        let mut d = draft("Sample spot");
        d.tags = vec![tag.id];
        let spot = create_spot(&store, 1, d).await.unwrap();

        let patched = update_spot(
            &store,
            1,
            spot.id,
            SpotChanges {
                title: Some("Concert Venue".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(patched.tags, vec![tag.id]);

        let mut replacement = draft("Spa");
        replacement.time_minutes = 60;
        let replaced = update_spot(&store, 1, spot.id, SpotChanges::replace_all(replacement))
            .await
            .unwrap();
        assert!(replaced.tags.is_empty());
        assert_eq!(replaced.title, "Spa");
        assert_eq!(replaced.time_minutes, 60);
    }

    #[tokio::test]
    async fn updating_someone_elses_spot_is_not_found() {
        let store = MemoryStore::new();
        let spot = create_spot(&store, 1, draft("A")).await.unwrap();
        let err = update_spot(&store, 2, spot.id, SpotChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
        assert!(matches!(
            get_spot(&store, 2, spot.id).await.unwrap_err(),
            AppError::NotFound
        ));
    }

    #[tokio::test]
    async fn detail_form_expands_links() {
        let state = AppState::fake();
        let store = state.store.as_ref();
        let tag = create_attribute(store, 1, AttributeKind::Tag, Some("Social"))
            .await
            .unwrap();
        let mut d = draft("Sample spot");
        d.tags = vec![tag.id];
        let spot = create_spot(store, 1, d).await.unwrap();

        let rendered = render_spot(&state, 1, SpotAction::Retrieve, spot).await.unwrap();
        let SpotResponse::Detail(detail) = rendered else {
            panic!("expected nested form");
        };
        assert_eq!(
            detail.tags,
            vec![AttributeResponse {
                id: tag.id,
                name: "Social".into()
            }]
        );
        assert_eq!(detail.image, None);
        assert_eq!(detail.price_rating, PriceRating::Reasonable);
    }
}
