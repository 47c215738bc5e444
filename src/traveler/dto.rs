use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::repo_types::{Attribute, Spot, SpotChanges, SpotDraft};
use super::services::PriceRating;
use crate::error::FieldErrors;

const MAX_CHARS: usize = 255;
const PRICE_DECIMAL_PLACES: u32 = 2;
const PRICE_MAX_DIGITS: u32 = 5;

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";

#[derive(Debug, Deserialize)]
pub struct AttributeListParams {
    pub assigned_only: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAttributeRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeResponse {
    pub id: i64,
    pub name: String,
}

impl From<Attribute> for AttributeResponse {
    fn from(a: Attribute) -> Self {
        Self {
            id: a.id,
            name: a.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SpotListParams {
    pub tags: Option<String>,
    pub locations: Option<String>,
    pub ingredients: Option<String>,
}

/// Body of create, full update and partial update.
///
/// Every field is optional here; which ones are required depends on the action.
#[derive(Debug, Default, Deserialize)]
pub struct SpotPayload {
    #[serde(default, alias = "name")]
    pub title: Option<String>,
    #[serde(default)]
    pub time_minutes: Option<i32>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<i64>>,
    #[serde(default)]
    pub locations: Option<Vec<i64>>,
    #[serde(default)]
    pub ingredients: Option<Vec<i64>>,
}

impl SpotPayload {
    /// Payload of a create or a full update; omitted link and lists become empty.
    pub fn into_draft(self) -> Result<SpotDraft, FieldErrors> {
        let mut errors = FieldErrors::new();
        let title = match self.title {
            Some(t) => check_title(&t, &mut errors),
            None => {
                errors.add("title", REQUIRED);
                None
            }
        };
        let time_minutes = self.time_minutes;
        if time_minutes.is_none() {
            errors.add("time_minutes", REQUIRED);
        }
        let price = match self.price {
            Some(p) => check_price(p, &mut errors),
            None => {
                errors.add("price", REQUIRED);
                None
            }
        };
        let link = self.link.and_then(|l| check_link(l, &mut errors));

        match (title, time_minutes, price) {
            (Some(title), Some(time_minutes), Some(price)) if errors.is_empty() => Ok(SpotDraft {
                title,
                time_minutes,
                price,
                link,
                tags: self.tags.unwrap_or_default(),
                locations: self.locations.unwrap_or_default(),
                ingredients: self.ingredients.unwrap_or_default(),
            }),
            _ => Err(errors),
        }
    }

    /// Payload of a partial update; only supplied fields are replaced.
    pub fn into_patch(self) -> Result<SpotChanges, FieldErrors> {
        let mut errors = FieldErrors::new();
        let changes = SpotChanges {
            title: self.title.and_then(|t| check_title(&t, &mut errors)),
            time_minutes: self.time_minutes,
            price: self.price.and_then(|p| check_price(p, &mut errors)),
            link: self.link.map(|l| check_link(l, &mut errors)),
            tags: self.tags,
            locations: self.locations,
            ingredients: self.ingredients,
        };
        if errors.is_empty() {
            Ok(changes)
        } else {
            Err(errors)
        }
    }
}

/// Trimmed, non-blank name of at most 255 characters.
pub fn check_name(field: &str, raw: &str, errors: &mut FieldErrors) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() {
        errors.add(field, BLANK);
        None
    } else if name.chars().count() > MAX_CHARS {
        errors.add(
            field,
            format!("Ensure this field has no more than {MAX_CHARS} characters."),
        );
        None
    } else {
        Some(name.to_string())
    }
}

fn check_title(raw: &str, errors: &mut FieldErrors) -> Option<String> {
    check_name("title", raw, errors)
}

/// Empty means no link.
fn check_link(raw: String, errors: &mut FieldErrors) -> Option<String> {
    let link = raw.trim();
    if link.is_empty() {
        return None;
    }
    if link.chars().count() > MAX_CHARS {
        errors.add(
            "link",
            format!("Ensure this field has no more than {MAX_CHARS} characters."),
        );
        return None;
    }
    Some(link.to_string())
}

/// At most 5 digits with at most 2 decimal places, rescaled to exactly 2.
fn check_price(price: Decimal, errors: &mut FieldErrors) -> Option<Decimal> {
    let normalized = price.normalize();
    if normalized.scale() > PRICE_DECIMAL_PLACES {
        errors.add(
            "price",
            format!("Ensure that there are no more than {PRICE_DECIMAL_PLACES} decimal places."),
        );
        return None;
    }
    let limit = Decimal::from(10i64.pow(PRICE_MAX_DIGITS - PRICE_DECIMAL_PLACES));
    if normalized.abs() >= limit {
        errors.add(
            "price",
            format!("Ensure that there are no more than {PRICE_MAX_DIGITS} digits in total."),
        );
        return None;
    }
    let mut out = normalized;
    out.rescale(PRICE_DECIMAL_PLACES);
    Some(out)
}

/// The spot actions, each bound to the wire form it answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotAction {
    List,
    Retrieve,
    Create,
    Update,
    PartialUpdate,
    UploadImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotForm {
    /// Links as bare ids.
    Reference,
    /// Links as `{id, name}` objects plus the image reference.
    Nested,
    /// Only `{id, image}`.
    Image,
}

impl SpotAction {
    pub fn form(self) -> SpotForm {
        match self {
            SpotAction::List
            | SpotAction::Create
            | SpotAction::Update
            | SpotAction::PartialUpdate => SpotForm::Reference,
            SpotAction::Retrieve => SpotForm::Nested,
            SpotAction::UploadImage => SpotForm::Image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotReference {
    pub id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub price_rating: PriceRating,
    pub tags: Vec<i64>,
    pub locations: Vec<i64>,
    pub ingredients: Vec<i64>,
}

impl From<Spot> for SpotReference {
    fn from(s: Spot) -> Self {
        Self {
            id: s.id,
            price_rating: PriceRating::of(s.price),
            title: s.title,
            time_minutes: s.time_minutes,
            price: s.price,
            link: s.link,
            tags: s.tags,
            locations: s.locations,
            ingredients: s.ingredients,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotDetail {
    pub id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub price_rating: PriceRating,
    pub image: Option<String>,
    pub tags: Vec<AttributeResponse>,
    pub locations: Vec<AttributeResponse>,
    pub ingredients: Vec<AttributeResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotImageResponse {
    pub id: i64,
    pub image: Option<String>,
}

/// One rendered spot in whichever form the action asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SpotResponse {
    Reference(SpotReference),
    Detail(SpotDetail),
    Image(SpotImageResponse),
}
