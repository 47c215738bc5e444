//! Ownership-scoped selection and ordering of attributes and spots.
//!
//! `PgStore` expresses these rules in SQL; `MemoryStore` calls the
//! functions below directly. Both must agree.

use std::collections::HashSet;

use super::repo_types::{Attribute, AttributeKind, Spot};
use crate::error::FieldErrors;

/// Optional id sets, one per attribute dimension.
///
/// Ids inside one dimension are OR-ed; supplied dimensions are AND-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpotFilter {
    pub tags: Option<Vec<i64>>,
    pub locations: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

impl SpotFilter {
    /// Parses the comma separated query parameters of the spot list.
    pub fn parse(
        tags: Option<&str>,
        locations: Option<&str>,
        ingredients: Option<&str>,
    ) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();
        let mut parse_one = |kind: AttributeKind, raw: Option<&str>| match parse_ids(raw) {
            Ok(ids) => ids,
            Err(bad) => {
                errors.add(
                    kind.field(),
                    format!("\"{}\" is not a valid integer id.", bad),
                );
                None
            }
        };
        let filter = SpotFilter {
            tags: parse_one(AttributeKind::Tag, tags),
            locations: parse_one(AttributeKind::Location, locations),
            ingredients: parse_one(AttributeKind::Ingredient, ingredients),
        };
        if errors.is_empty() {
            Ok(filter)
        } else {
            Err(errors)
        }
    }

    pub fn ids(&self, kind: AttributeKind) -> Option<&[i64]> {
        match kind {
            AttributeKind::Tag => self.tags.as_deref(),
            AttributeKind::Location => self.locations.as_deref(),
            AttributeKind::Ingredient => self.ingredients.as_deref(),
        }
    }

    /// Supplied dimensions only.
    pub fn dimensions(&self) -> impl Iterator<Item = (AttributeKind, &[i64])> {
        AttributeKind::ALL
            .into_iter()
            .filter_map(move |kind| self.ids(kind).map(|ids| (kind, ids)))
    }

    pub fn matches(&self, spot: &Spot) -> bool {
        self.dimensions()
            .all(|(kind, ids)| spot.links(kind).iter().any(|id| ids.contains(id)))
    }
}

/// `None` for an absent or empty parameter, `Err` with the offending piece.
fn parse_ids(raw: Option<&str>) -> Result<Option<Vec<i64>>, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    raw.split(',')
        .map(|piece| {
            let piece = piece.trim();
            piece.parse::<i64>().map_err(|_| piece.to_string())
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Parses `assigned_only`: any non-zero integer turns the filter on.
pub fn parse_assigned_only(raw: Option<&str>) -> Result<bool, FieldErrors> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(false),
        Some(v) => v.parse::<i64>().map(|n| n != 0).map_err(|_| {
            FieldErrors::single("assigned_only", format!("\"{}\" is not a valid integer.", v))
        }),
    }
}

/// Spots owned by `owner` that pass `filter`, newest (highest id) first.
pub fn select_spots<'a, I>(spots: I, owner: i64, filter: &SpotFilter) -> Vec<Spot>
where
    I: IntoIterator<Item = &'a Spot>,
{
    let mut out: Vec<Spot> = spots
        .into_iter()
        .filter(|s| s.user_id == owner && filter.matches(s))
        .cloned()
        .collect();
    out.sort_by(|a, b| b.id.cmp(&a.id));
    out
}

/// Attributes owned by `owner`, name descending then id descending, unique.
///
/// Names compare byte-wise, so `"apple"` sorts above `"Banana"`; `PgStore`
/// orders with `COLLATE "C"` to match.
///
/// With `assigned_only`, only attributes linked to at least one spot of any
/// owner are kept.
pub fn select_attributes<'a, I, S>(
    attributes: I,
    spots: S,
    kind: AttributeKind,
    owner: i64,
    assigned_only: bool,
) -> Vec<Attribute>
where
    I: IntoIterator<Item = &'a Attribute>,
    S: IntoIterator<Item = &'a Spot>,
{
    let linked: Option<HashSet<i64>> = assigned_only.then(|| {
        spots
            .into_iter()
            .flat_map(|s| s.links(kind).iter().copied())
            .collect()
    });
    let mut seen = HashSet::new();
    let mut out: Vec<Attribute> = attributes
        .into_iter()
        .filter(|a| a.user_id == owner)
        .filter(|a| linked.as_ref().map_or(true, |ids| ids.contains(&a.id)))
        .filter(|a| seen.insert(a.id))
        .cloned()
        .collect();
    out.sort_by(|a, b| b.name.cmp(&a.name).then(b.id.cmp(&a.id)));
    out
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn spot(id: i64, user_id: i64, tags: &[i64], locations: &[i64]) -> Spot {
        Spot {
            id,
            user_id,
            title: format!("spot {id}"),
            time_minutes: 10,
            price: Decimal::new(500, 2),
            link: None,
            image: None,
            tags: tags.to_vec(),
            locations: locations.to_vec(),
            ingredients: vec![],
        }
    }

    fn attr(id: i64, user_id: i64, name: &str) -> Attribute {
        Attribute {
            id,
            user_id,
            name: name.into(),
        }
    }

    #[test]
    fn parse_reads_comma_separated_ids() {
        let f = SpotFilter::parse(Some("1,2, 3"), None, Some("")).unwrap();
        assert_eq!(f.tags, Some(vec![1, 2, 3]));
        assert_eq!(f.locations, None);
        assert_eq!(f.ingredients, None);
    }

    #[test]
    fn parse_reports_bad_ids_per_field() {
        let err = SpotFilter::parse(Some("1,x"), Some("2"), Some("y")).unwrap_err();
        assert_eq!(
            err.get("tags").unwrap(),
            &["\"x\" is not a valid integer id.".to_string()]
        );
        assert!(err.get("ingredients").is_some());
        assert!(err.get("locations").is_none());
    }

    #[test]
    fn assigned_only_parsing() {
        assert!(!parse_assigned_only(None).unwrap());
        assert!(!parse_assigned_only(Some("0")).unwrap());
        assert!(parse_assigned_only(Some("1")).unwrap());
        assert!(parse_assigned_only(Some("true")).is_err());
    }

    #[test]
    fn filter_is_or_within_and_across_dimensions() {
        let spots = [
            spot(1, 1, &[10], &[20]),
            spot(2, 1, &[11], &[]),
            spot(3, 1, &[], &[20]),
            spot(4, 1, &[], &[]),
        ];
        let by_tags = SpotFilter {
            tags: Some(vec![10, 11]),
            ..Default::default()
        };
        let ids: Vec<i64> = select_spots(&spots, 1, &by_tags).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 1]);

        let both = SpotFilter {
            tags: Some(vec![10, 11]),
            locations: Some(vec![20]),
            ..Default::default()
        };
        let ids: Vec<i64> = select_spots(&spots, 1, &both).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn spots_of_other_owners_never_selected() {
        let spots = [spot(1, 1, &[], &[]), spot(2, 2, &[], &[]), spot(3, 1, &[], &[])];
        let ids: Vec<i64> = select_spots(&spots, 1, &SpotFilter::default())
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn attributes_ordered_by_name_desc_and_unique() {
        let attrs = [
            attr(1, 1, "Hawaii"),
            attr(2, 1, "Rome"),
            attr(3, 2, "Paris"),
            attr(4, 1, "Hawaii"),
        ];
        let spots = [spot(1, 1, &[], &[1]), spot(2, 1, &[], &[1])];

        let all = select_attributes(&attrs, &spots, AttributeKind::Location, 1, false);
        let ids: Vec<i64> = all.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 4, 1]);

        let assigned = select_attributes(&attrs, &spots, AttributeKind::Location, 1, true);
        assert_eq!(assigned, vec![attr(1, 1, "Hawaii")]);
    }

    #[test]
    fn attribute_names_compare_byte_wise() {
        let attrs = [
            attr(1, 1, "apple"),
            attr(2, 1, "Banana"),
            attr(3, 1, "cherry"),
        ];
        let no_spots: Vec<Spot> = Vec::new();
        let names: Vec<String> = select_attributes(&attrs, &no_spots, AttributeKind::Tag, 1, false)
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["cherry", "apple", "Banana"]);
    }
}
