//! Category remapping.
//!
//! Turns the single `category_id` of a legacy product into join rows. A
//! null reference becomes zero rows, anything else exactly one. Version 2
//! snapshots already carry a list and go through the same join-row builder,
//! with duplicate ids collapsed.

use std::collections::BTreeSet;

use flor_core::{CategoryId, ProductCategory, ProductId};

use crate::snapshot::SnapshotProduct;

/// Join rows for a version 1 product entry.
#[must_use]
pub fn remap_product_category(entry: &SnapshotProduct) -> Vec<ProductCategory> {
    entry
        .category_id
        .map(|category_id| ProductCategory {
            product_id: entry.product.id,
            category_id,
        })
        .into_iter()
        .collect()
}

/// Join rows for a product with any number of categories.
///
/// The result is ordered by category id and holds each pair once.
#[must_use]
pub fn remap_product_categories(
    product_id: ProductId,
    category_ids: &[CategoryId],
) -> Vec<ProductCategory> {
    category_ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|category_id| ProductCategory {
            product_id,
            category_id,
        })
        .collect()
}

/// Join rows for a snapshot entry of either version.
#[must_use]
pub fn associations(entry: &SnapshotProduct) -> Vec<ProductCategory> {
    match &entry.category_ids {
        Some(ids) => remap_product_categories(entry.product.id, ids),
        None => remap_product_category(entry),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use flor_core::{Price, Product};

    use super::*;

    fn product(id: i32) -> Product {
        let at = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        Product {
            id: ProductId::new(id),
            name: "Orquídea".to_owned(),
            description: None,
            price: Price::parse("49.90").unwrap(),
            image_url: None,
            active: true,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_legacy_reference_becomes_one_row() {
        let entry = SnapshotProduct::legacy(product(1), Some(CategoryId::new(5)));
        assert_eq!(
            remap_product_category(&entry),
            vec![ProductCategory {
                product_id: ProductId::new(1),
                category_id: CategoryId::new(5),
            }]
        );
    }

    #[test]
    fn test_null_reference_becomes_no_rows() {
        let entry = SnapshotProduct::legacy(product(2), None);
        assert!(remap_product_category(&entry).is_empty());
        assert!(associations(&entry).is_empty());
    }

    #[test]
    fn test_duplicate_category_ids_collapse() {
        let rows = remap_product_categories(
            ProductId::new(3),
            &[CategoryId::new(7), CategoryId::new(5), CategoryId::new(7)],
        );
        let ids: Vec<_> = rows.iter().map(|r| r.category_id).collect();
        assert_eq!(ids, vec![CategoryId::new(5), CategoryId::new(7)]);
    }

    #[test]
    fn test_associations_dispatch_on_shape() {
        let entry = SnapshotProduct::multi(product(4), vec![CategoryId::new(1), CategoryId::new(2)]);
        assert_eq!(associations(&entry).len(), 2);
    }
}
