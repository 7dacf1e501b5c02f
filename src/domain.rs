use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

pub const RECORD_WIDTH: usize = 6;

/// Separator used by the registry when a product combines several substances.
pub const INGREDIENT_SEPARATOR: &str = "//";

/// One row of the sanitary registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub registration_id: String,
    pub product_name: String,
    pub registration_date: String,
    pub company: String,
    pub active_ingredient: String,
    pub legal_control: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Registration(String),
    Row([String; RECORD_WIDTH]),
}

impl Record {
    /// Builds a record from raw cells. The legal-control cell may be missing;
    /// the active ingredient may not. Cells past the sixth are ignored.
    pub fn from_row<S: AsRef<str>>(cells: &[S]) -> Result<Self, RegistryError> {
        if cells.len() < RECORD_WIDTH - 1 {
            return Err(RegistryError::MalformedRecord(format!(
                "expected at least {} fields, found {}",
                RECORD_WIDTH - 1,
                cells.len()
            )));
        }
        if cells.len() > RECORD_WIDTH {
            tracing::debug!(
                "ignoring {} trailing cell(s) past column {RECORD_WIDTH}",
                cells.len() - RECORD_WIDTH
            );
        }

        let cell = |idx: usize| {
            cells
                .get(idx)
                .map(|value| value.as_ref().trim().to_string())
                .unwrap_or_default()
        };

        let record = Self {
            registration_id: cell(0),
            product_name: cell(1),
            registration_date: cell(2),
            company: cell(3),
            active_ingredient: cell(4),
            legal_control: cell(5),
        };

        if record.active_ingredient.is_empty() {
            return Err(RegistryError::MalformedRecord(
                "active ingredient is empty".to_string(),
            ));
        }
        Ok(record)
    }

    pub fn to_row(&self) -> [String; RECORD_WIDTH] {
        [
            self.registration_id.clone(),
            self.product_name.clone(),
            self.registration_date.clone(),
            self.company.clone(),
            self.active_ingredient.clone(),
            self.legal_control.clone(),
        ]
    }

    pub fn key(&self) -> RecordKey {
        if self.registration_id.trim().is_empty() {
            RecordKey::Row(self.to_row())
        } else {
            RecordKey::Registration(self.registration_id.trim().to_string())
        }
    }

    /// Normalized substance names listed in the active-ingredient cell.
    pub fn ingredient_names(&self) -> Vec<String> {
        self.active_ingredient
            .split(INGREDIENT_SEPARATOR)
            .map(normalize_ingredient)
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// Single comparison policy for ingredient names: trimmed and lowercased.
pub fn normalize_ingredient(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parse_full_row() {
        let record = Record::from_row(&cells(&[
            "F-1234/20",
            "PIQRAY 150 MG",
            "01/02/2020",
            "NOVARTIS CHILE S.A.",
            " Alpelisib ",
            "Receta Médica Retenida",
        ]))
        .unwrap();
        assert_eq!(record.active_ingredient, "Alpelisib");
        assert_eq!(record.legal_control, "Receta Médica Retenida");
    }

    #[test]
    fn parse_row_without_legal_control() {
        let record = Record::from_row(&cells(&["F-1", "X", "d", "c", "fulvestrant"])).unwrap();
        assert_eq!(record.legal_control, "");
    }

    #[test]
    fn reject_short_rows() {
        let err = Record::from_row(&cells(&["F-1", "X", "d"])).unwrap_err();
        assert_matches!(err, RegistryError::MalformedRecord(_));
    }

    #[test]
    fn wide_rows_keep_first_six_cells() {
        let record =
            Record::from_row(&cells(&["F-10", "IBRANCE", "2019", "PFIZER", "palbociclib", "RM", "note"]))
                .unwrap();
        assert_eq!(record.active_ingredient, "palbociclib");
        assert_eq!(record.legal_control, "RM");
        assert_eq!(record.to_row().len(), RECORD_WIDTH);
    }

    #[test]
    fn reject_blank_ingredient() {
        let err = Record::from_row(&cells(&["F-1", "X", "d", "c", "  ", "l"])).unwrap_err();
        assert_matches!(err, RegistryError::MalformedRecord(_));
    }

    #[test]
    fn key_prefers_registration_id() {
        let with_id = Record::from_row(&cells(&["F-1", "X", "d", "c", "a", "l"])).unwrap();
        assert_eq!(with_id.key(), RecordKey::Registration("F-1".to_string()));

        let without_id = Record::from_row(&cells(&["", "X", "d", "c", "a", "l"])).unwrap();
        assert_matches!(without_id.key(), RecordKey::Row(_));
    }

    #[test]
    fn combination_products_list_every_ingredient() {
        let record = Record::from_row(&cells(&[
            "F-9",
            "KISQALI CO-PACK",
            "d",
            "c",
            "Ribociclib // LETROZOL",
            "l",
        ]))
        .unwrap();
        assert_eq!(record.ingredient_names(), vec!["ribociclib", "letrozol"]);
    }
}
