use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use tracing::{instrument, warn};

use super::dto::{
    AttributeListParams, AttributeResponse, CreateAttributeRequest, SpotAction, SpotListParams,
    SpotPayload, SpotResponse,
};
use super::query::{parse_assigned_only, SpotFilter};
use super::repo_types::{AttributeKind, SpotChanges};
use super::services;
use crate::{auth::extractors::AuthUser, error::AppError, images, state::AppState};

const UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

pub fn attribute_routes() -> Router<AppState> {
    let mut router = Router::new();
    for kind in AttributeKind::ALL {
        router = router.nest(
            &format!("/traveler/{}", kind.field()),
            Router::new()
                .route("/", get(list_attributes).post(create_attribute))
                .layer(Extension(kind)),
        );
    }
    router
}

pub fn spot_routes() -> Router<AppState> {
    Router::new()
        .route("/traveler/spots", get(list_spots).post(create_spot))
        .route(
            "/traveler/spots/:id",
            get(get_spot).put(replace_spot).patch(patch_spot),
        )
        .route(
            "/traveler/spots/:id/upload-image",
            post(upload_image).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
}

#[instrument(skip(state))]
pub async fn list_attributes(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Extension(kind): Extension<AttributeKind>,
    Query(params): Query<AttributeListParams>,
) -> Result<Json<Vec<AttributeResponse>>, AppError> {
    let assigned_only =
        parse_assigned_only(params.assigned_only.as_deref()).map_err(AppError::Validation)?;
    let attrs =
        services::list_owned_attributes(state.store.as_ref(), user_id, kind, assigned_only).await?;
    Ok(Json(attrs.into_iter().map(AttributeResponse::from).collect()))
}

#[instrument(skip(state, payload))]
pub async fn create_attribute(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Extension(kind): Extension<AttributeKind>,
    payload: Result<Json<CreateAttributeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AttributeResponse>), AppError> {
    let Json(payload) = payload?;
    let attr =
        services::create_attribute(state.store.as_ref(), user_id, kind, payload.name.as_deref())
            .await?;
    Ok((StatusCode::CREATED, Json(attr.into())))
}

#[instrument(skip(state))]
pub async fn list_spots(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<SpotListParams>,
) -> Result<Json<Vec<SpotResponse>>, AppError> {
    let filter = SpotFilter::parse(
        params.tags.as_deref(),
        params.locations.as_deref(),
        params.ingredients.as_deref(),
    )
    .map_err(AppError::Validation)?;
    let spots = services::list_spots(state.store.as_ref(), user_id, &filter).await?;

    let mut out = Vec::with_capacity(spots.len());
    for spot in spots {
        out.push(services::render_spot(&state, user_id, SpotAction::List, spot).await?);
    }
    Ok(Json(out))
}

#[instrument(skip(state))]
pub async fn get_spot(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<SpotResponse>, AppError> {
    let Path(id) = path?;
    let spot = services::get_spot(state.store.as_ref(), user_id, id).await?;
    Ok(Json(
        services::render_spot(&state, user_id, SpotAction::Retrieve, spot).await?,
    ))
}

#[instrument(skip(state, payload))]
pub async fn create_spot(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<SpotPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<SpotResponse>), AppError> {
    let Json(payload) = payload?;
    let draft = payload.into_draft().map_err(AppError::Validation)?;
    let spot = services::create_spot(state.store.as_ref(), user_id, draft).await?;
    let body = services::render_spot(&state, user_id, SpotAction::Create, spot).await?;
    Ok((StatusCode::CREATED, Json(body)))
}

/// PUT: omitted link and association lists are cleared.
#[instrument(skip(state, payload))]
pub async fn replace_spot(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<SpotPayload>, JsonRejection>,
) -> Result<Json<SpotResponse>, AppError> {
    let Path(id) = path?;
    let Json(payload) = payload?;
    let draft = payload.into_draft().map_err(AppError::Validation)?;
    let spot = services::update_spot(
        state.store.as_ref(),
        user_id,
        id,
        SpotChanges::replace_all(draft),
    )
    .await?;
    Ok(Json(
        services::render_spot(&state, user_id, SpotAction::Update, spot).await?,
    ))
}

/// PATCH: only supplied fields change.
#[instrument(skip(state, payload))]
pub async fn patch_spot(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<SpotPayload>, JsonRejection>,
) -> Result<Json<SpotResponse>, AppError> {
    let Path(id) = path?;
    let Json(payload) = payload?;
    let changes = payload.into_patch().map_err(AppError::Validation)?;
    let spot = services::update_spot(state.store.as_ref(), user_id, id, changes).await?;
    Ok(Json(
        services::render_spot(&state, user_id, SpotAction::PartialUpdate, spot).await?,
    ))
}

/// POST /traveler/spots/:id/upload-image (multipart, field `image`)
#[instrument(skip(state, mp))]
pub async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    path: Result<Path<i64>, PathRejection>,
    mut mp: Multipart,
) -> Result<Json<SpotResponse>, AppError> {
    let Path(id) = path?;
    let mut image: Option<Bytes> = None;
    loop {
        let field = match mp.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "malformed multipart body");
                return Err(AppError::invalid("image", e.body_text()));
            }
        };
        if field.name() == Some("image") {
            let data = field.bytes().await.map_err(|e| {
                warn!(error = %e, "failed to read upload");
                AppError::invalid("image", e.body_text())
            })?;
            image = Some(data);
        }
    }
    let body = image
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AppError::invalid("image", "No file was submitted."))?;

    let spot = images::services::attach_image(&state, user_id, id, body).await?;
    Ok(Json(
        services::render_spot(&state, user_id, SpotAction::UploadImage, spot).await?,
    ))
}
