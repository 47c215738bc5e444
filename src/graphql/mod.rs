//! Read-only GraphQL view of the caller's spots.

use async_graphql::{Context, EmptyMutation, EmptySubscription, Object, Schema, SimpleObject};
use axum::{extract::State, routing::post, Extension, Json, Router};
use tracing::{error, instrument};

use crate::auth::extractors::AuthUser;
use crate::error::AppError;
use crate::state::AppState;
use crate::traveler::dto::{AttributeResponse, SpotDetail};
use crate::traveler::query::SpotFilter;
use crate::traveler::repo_types::{Spot, SpotLookup};
use crate::traveler::services;

pub type TravelerSchema = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

/// Authenticated caller attached to each executed request.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, SimpleObject)]
pub struct AttributeNode {
    pub id: i64,
    pub name: String,
}

impl From<AttributeResponse> for AttributeNode {
    fn from(a: AttributeResponse) -> Self {
        Self {
            id: a.id,
            name: a.name,
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "Spot")]
pub struct SpotNode {
    pub id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: String,
    pub link: Option<String>,
    pub image: Option<String>,
    pub price_rating: String,
    pub tags: Vec<AttributeNode>,
    pub locations: Vec<AttributeNode>,
    pub ingredients: Vec<AttributeNode>,
}

impl From<SpotDetail> for SpotNode {
    fn from(d: SpotDetail) -> Self {
        Self {
            id: d.id,
            title: d.title,
            time_minutes: d.time_minutes,
            price: d.price.to_string(),
            link: d.link,
            image: d.image,
            price_rating: d.price_rating.as_str().to_string(),
            tags: d.tags.into_iter().map(Into::into).collect(),
            locations: d.locations.into_iter().map(Into::into).collect(),
            ingredients: d.ingredients.into_iter().map(Into::into).collect(),
        }
    }
}

pub struct QueryRoot;

fn caller_of<'a>(ctx: &Context<'a>) -> async_graphql::Result<(i64, &'a AppState)> {
    let Caller(id) = ctx
        .data_opt::<Caller>()
        .copied()
        .ok_or_else(|| async_graphql::Error::new("authentication required"))?;
    let state = ctx.data::<AppState>()?;
    Ok((id, state))
}

/// Internal failures reach the client as a generic message; details are logged.
fn resolver_error(err: AppError) -> async_graphql::Error {
    match err {
        AppError::Internal(e) => {
            error!(error = ?e, "graphql resolver failed");
            async_graphql::Error::new("Internal server error")
        }
        other => async_graphql::Error::new(other.to_string()),
    }
}

async fn node(state: &AppState, caller: i64, spot: Spot) -> async_graphql::Result<SpotNode> {
    let detail = services::spot_detail(state, caller, spot)
        .await
        .map_err(resolver_error)?;
    Ok(detail.into())
}

#[Object]
impl QueryRoot {
    /// Every spot of the caller, newest first.
    async fn all_spots(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<SpotNode>> {
        let (caller, state) = caller_of(ctx)?;
        let spots = services::list_spots(state.store.as_ref(), caller, &SpotFilter::default())
            .await
            .map_err(resolver_error)?;
        let mut out = Vec::with_capacity(spots.len());
        for spot in spots {
            out.push(node(state, caller, spot).await?);
        }
        Ok(out)
    }

    /// One spot by id, or else by title.
    async fn spot(
        &self,
        ctx: &Context<'_>,
        id: Option<i64>,
        title: Option<String>,
    ) -> async_graphql::Result<Option<SpotNode>> {
        let (caller, state) = caller_of(ctx)?;
        let store = state.store.as_ref();
        let found = match (id, title) {
            (Some(id), _) => store
                .find_spot(caller, SpotLookup::Id(id))
                .await
                .map_err(|e| resolver_error(e.into()))?,
            (None, Some(title)) => services::find_spot_by_title(store, caller, &title)
                .await
                .map_err(resolver_error)?,
            (None, None) => None,
        };
        match found {
            Some(spot) => Ok(Some(node(state, caller, spot).await?)),
            None => Ok(None),
        }
    }
}

pub fn schema() -> TravelerSchema {
    Schema::build(QueryRoot, EmptyMutation, EmptySubscription).finish()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/graphql", post(graphql_handler))
        .layer(Extension(schema()))
}

#[instrument(skip(state, schema, req))]
pub async fn graphql_handler(
    State(state): State<AppState>,
    Extension(schema): Extension<TravelerSchema>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<async_graphql::Request>,
) -> Json<async_graphql::Response> {
    let req = req.data(state).data(Caller(user_id));
    Json(schema.execute(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traveler::repo_types::SpotDraft;

    async fn seed(state: &AppState, owner: i64, title: &str, price: &str) -> Spot {
        state
            .store
            .insert_spot(
                owner,
                &SpotDraft {
                    title: title.into(),
                    time_minutes: 10,
                    price: price.parse().unwrap(),
                    link: None,
                    tags: vec![],
                    locations: vec![],
                    ingredients: vec![],
                },
            )
            .await
            .unwrap()
    }

    fn request(query: &str, state: &AppState, caller: i64) -> async_graphql::Request {
        async_graphql::Request::new(query)
            .data(state.clone())
            .data(Caller(caller))
    }

    #[tokio::test]
    async fn all_spots_lists_only_callers_spots() {
        let state = AppState::fake();
        seed(&state, 1, "Dance Club", "5.00").await;
        seed(&state, 2, "Not mine", "5.00").await;
        seed(&state, 1, "Spa", "45.00").await;

        let res = schema()
            .execute(request("{ allSpots { title priceRating price } }", &state, 1))
            .await;
        assert!(res.errors.is_empty(), "{:?}", res.errors);
        let json = res.data.into_json().unwrap();
        assert_eq!(
            json,
            serde_json::json!({"allSpots": [
                {"title": "Spa", "priceRating": "Expensive", "price": "45.00"},
                {"title": "Dance Club", "priceRating": "Reasonable", "price": "5.00"},
            ]})
        );
    }

    #[tokio::test]
    async fn spot_by_title_or_id() {
        let state = AppState::fake();
        let spot = seed(&state, 1, "Weed Clinic", "19.99").await;

        let res = schema()
            .execute(request(
                "{ spot(title: \"Weed Clinic\") { id timeMinutes } }",
                &state,
                1,
            ))
            .await;
        assert_eq!(
            res.data.into_json().unwrap(),
            serde_json::json!({"spot": {"id": spot.id, "timeMinutes": 10}})
        );

        let query = format!("{{ spot(id: {}) {{ title }} }}", spot.id);
        let res = schema().execute(request(&query, &state, 2)).await;
        assert!(res.errors.is_empty());
        assert_eq!(
            res.data.into_json().unwrap(),
            serde_json::json!({"spot": null})
        );
    }

    #[tokio::test]
    async fn missing_caller_is_an_error() {
        let state = AppState::fake();
        seed(&state, 1, "Dance Club", "5.00").await;
        let res = schema()
            .execute(async_graphql::Request::new("{ allSpots { title } }").data(state))
            .await;
        assert_eq!(res.errors.len(), 1);
        assert_eq!(res.errors[0].message, "authentication required");
    }

    #[tokio::test]
    async fn internal_failures_are_not_leaked() {
        let state = AppState::fake();
        let spot = seed(&state, 1, "Dance Club", "5.00").await;
        // key with no stored object: presigning it fails
        state
            .store
            .set_spot_image(1, spot.id, "uploads/spot/missing.png")
            .await
            .unwrap();

        let res = schema()
            .execute(request("{ allSpots { image } }", &state, 1))
            .await;
        assert_eq!(res.errors.len(), 1);
        assert_eq!(res.errors[0].message, "Internal server error");
    }

    #[test]
    fn client_errors_keep_their_message() {
        let err = resolver_error(AppError::NotFound);
        assert_eq!(err.message, "Not found");
        let err = resolver_error(AppError::Internal(anyhow::anyhow!("list spots")));
        assert_eq!(err.message, "Internal server error");
    }
}
