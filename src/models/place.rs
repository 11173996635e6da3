use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Immutable request descriptor for one target place. Built once by the CSV
/// loader and shared read-only across workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub place_id: String,
    pub name: String,
    pub place_url: Option<String>,
    pub group_id: Option<String>,
    pub category: Option<String>,
    pub categories: Option<Vec<String>>,
}

impl Place {
    pub fn new(place_id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let place_id = place_id.into();
        let name = name.into();
        if place_id.is_empty() {
            return Err(AppError::InvalidInput("place_id is required".into()));
        }
        if name.is_empty() {
            return Err(AppError::InvalidInput("place name is required".into()));
        }
        Ok(Self {
            place_id,
            name,
            place_url: None,
            group_id: None,
            category: None,
            categories: None,
        })
    }

    /// Canonical URL when the input supplied one, otherwise the place-id
    /// lookup form.
    pub fn resolve_url(&self) -> String {
        self.place_url.clone().unwrap_or_else(|| {
            format!(
                "https://www.google.com/maps/place/?q=place_id:{}",
                self.place_id
            )
        })
    }

    pub fn input_url(&self) -> String {
        format!(
            "https://www.google.com/maps/place/?q=place_id:{}",
            self.place_id
        )
    }
}
