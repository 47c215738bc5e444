use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The three user-owned classifiers a spot can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Tag,
    Location,
    Ingredient,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 3] = [
        AttributeKind::Tag,
        AttributeKind::Location,
        AttributeKind::Ingredient,
    ];

    pub fn table(self) -> &'static str {
        match self {
            AttributeKind::Tag => "tags",
            AttributeKind::Location => "locations",
            AttributeKind::Ingredient => "ingredients",
        }
    }

    pub fn link_table(self) -> &'static str {
        match self {
            AttributeKind::Tag => "spot_tags",
            AttributeKind::Location => "spot_locations",
            AttributeKind::Ingredient => "spot_ingredients",
        }
    }

    pub fn link_column(self) -> &'static str {
        match self {
            AttributeKind::Tag => "tag_id",
            AttributeKind::Location => "location_id",
            AttributeKind::Ingredient => "ingredient_id",
        }
    }

    /// Name of the spot field and list-filter parameter.
    pub fn field(self) -> &'static str {
        self.table()
    }
}

/// Tag, location or ingredient row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Attribute {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

/// Scalar columns of a spot.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SpotRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub image: Option<String>,
}

/// A spot together with the ids of everything linked to it, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spot {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub image: Option<String>,
    pub tags: Vec<i64>,
    pub locations: Vec<i64>,
    pub ingredients: Vec<i64>,
}

impl Spot {
    pub fn from_row(row: SpotRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            time_minutes: row.time_minutes,
            price: row.price,
            link: row.link,
            image: row.image,
            tags: Vec::new(),
            locations: Vec::new(),
            ingredients: Vec::new(),
        }
    }

    pub fn links(&self, kind: AttributeKind) -> &[i64] {
        match kind {
            AttributeKind::Tag => &self.tags,
            AttributeKind::Location => &self.locations,
            AttributeKind::Ingredient => &self.ingredients,
        }
    }

    pub fn links_mut(&mut self, kind: AttributeKind) -> &mut Vec<i64> {
        match kind {
            AttributeKind::Tag => &mut self.tags,
            AttributeKind::Location => &mut self.locations,
            AttributeKind::Ingredient => &mut self.ingredients,
        }
    }
}

/// Validated input for a new spot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotDraft {
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub tags: Vec<i64>,
    pub locations: Vec<i64>,
    pub ingredients: Vec<i64>,
}

impl SpotDraft {
    pub fn links(&self, kind: AttributeKind) -> &[i64] {
        match kind {
            AttributeKind::Tag => &self.tags,
            AttributeKind::Location => &self.locations,
            AttributeKind::Ingredient => &self.ingredients,
        }
    }
}

/// Replacements for an existing spot; `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpotChanges {
    pub title: Option<String>,
    pub time_minutes: Option<i32>,
    pub price: Option<Decimal>,
    pub link: Option<Option<String>>,
    pub tags: Option<Vec<i64>>,
    pub locations: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

impl SpotChanges {
    /// Every field replaced, as a full update does.
    pub fn replace_all(draft: SpotDraft) -> Self {
        Self {
            title: Some(draft.title),
            time_minutes: Some(draft.time_minutes),
            price: Some(draft.price),
            link: Some(draft.link),
            tags: Some(draft.tags),
            locations: Some(draft.locations),
            ingredients: Some(draft.ingredients),
        }
    }

    pub fn links(&self, kind: AttributeKind) -> Option<&[i64]> {
        match kind {
            AttributeKind::Tag => self.tags.as_deref(),
            AttributeKind::Location => self.locations.as_deref(),
            AttributeKind::Ingredient => self.ingredients.as_deref(),
        }
    }

    /// Applies scalar and link replacements to `spot` in place.
    pub fn apply(&self, spot: &mut Spot) {
        if let Some(title) = &self.title {
            spot.title = title.clone();
        }
        if let Some(time_minutes) = self.time_minutes {
            spot.time_minutes = time_minutes;
        }
        if let Some(price) = self.price {
            spot.price = price;
        }
        if let Some(link) = &self.link {
            spot.link = link.clone();
        }
        for kind in AttributeKind::ALL {
            if let Some(ids) = self.links(kind) {
                *spot.links_mut(kind) = normalize_ids(ids);
            }
        }
    }
}

/// Sorted, duplicate-free copy of `ids`.
pub fn normalize_ids(ids: &[i64]) -> Vec<i64> {
    let mut out = ids.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

/// How a single spot is looked up.
#[derive(Debug, Clone, Copy)]
pub enum SpotLookup<'a> {
    Id(i64),
    Title(&'a str),
}
