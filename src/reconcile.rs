use std::collections::{BTreeSet, HashSet};

use crate::domain::{Record, normalize_ingredient};

/// Normalized ingredient names present in the authoritative store.
#[derive(Debug, Clone, Default)]
pub struct KnownIngredients {
    names: HashSet<String>,
}

impl KnownIngredients {
    pub fn from_records(records: &[Record]) -> Self {
        Self {
            names: records.iter().flat_map(Record::ingredient_names).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&normalize_ingredient(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Requested names still missing, in request order and original casing.
    pub to_fetch: Vec<String>,
    /// Normalized forms of the requested names that were already stored.
    pub already_known: BTreeSet<String>,
}

impl Reconciliation {
    pub fn is_complete(&self) -> bool {
        self.to_fetch.is_empty()
    }
}

pub fn reconcile(requested: &[String], known: &KnownIngredients) -> Reconciliation {
    let mut result = Reconciliation::default();
    for name in requested {
        if known.contains(name) {
            result.already_known.insert(normalize_ingredient(name));
        } else {
            result.to_fetch.push(name.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn record(ingredient: &str) -> Record {
        Record::from_row(&["F-1", "P", "d", "c", ingredient, ""]).unwrap()
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn known_name_matches_regardless_of_case_and_padding() {
        let known = KnownIngredients::from_records(&[record("alpelisib")]);
        let result = reconcile(&names(&["  Alpelisib ", "Fulvestrant"]), &known);
        assert_eq!(result.to_fetch, names(&["Fulvestrant"]));
        assert!(result.already_known.contains("alpelisib"));
    }

    #[test]
    fn empty_request_is_complete() {
        let known = KnownIngredients::from_records(&[record("alpelisib")]);
        let result = reconcile(&[], &known);
        assert!(result.is_complete());
        assert!(result.already_known.is_empty());
    }

    #[test]
    fn combination_product_marks_each_part_known() {
        let known = KnownIngredients::from_records(&[record("Ribociclib//Letrozol")]);
        let result = reconcile(&names(&["LETROZOL", "Anastrozol"]), &known);
        assert_eq!(result.to_fetch, names(&["Anastrozol"]));
        assert_eq!(known.len(), 2);
    }

    fn ingredient() -> impl Strategy<Value = String> {
        "[a-zA-Z]{1,12}"
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn empty_store_fetches_everything_verbatim(requested in prop::collection::vec(ingredient(), 0..8)) {
            let result = reconcile(&requested, &KnownIngredients::default());
            prop_assert_eq!(result.to_fetch, requested);
            prop_assert!(result.already_known.is_empty());
        }

        #[test]
        fn stored_names_never_refetched(
            stored in prop::collection::vec(ingredient(), 1..6),
            pad_left in " {0,3}",
            pad_right in " {0,3}",
            upper in any::<bool>(),
        ) {
            let records: Vec<Record> = stored.iter().map(|name| record(name)).collect();
            let known = KnownIngredients::from_records(&records);
            let requested: Vec<String> = stored
                .iter()
                .map(|name| {
                    let cased = if upper { name.to_uppercase() } else { name.to_lowercase() };
                    format!("{pad_left}{cased}{pad_right}")
                })
                .collect();
            let result = reconcile(&requested, &known);
            prop_assert!(result.to_fetch.is_empty());
        }

        #[test]
        fn to_fetch_preserves_request_order(
            stored in prop::collection::vec(ingredient(), 0..6),
            requested in prop::collection::vec(ingredient(), 0..10),
        ) {
            let records: Vec<Record> = stored.iter().map(|name| record(name)).collect();
            let known = KnownIngredients::from_records(&records);
            let result = reconcile(&requested, &known);
            let expected: Vec<String> = requested
                .iter()
                .filter(|name| !known.contains(name))
                .cloned()
                .collect();
            prop_assert_eq!(result.to_fetch, expected);
        }
    }
}
