use serde::{Deserialize, Serialize};

/// Results requested per page once the crawl is paginating
pub const PAGE_SIZE: u32 = 100;

/// Search parameters for a vehicle crawl. Serialized as-is into the run ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Manufacturer, e.g. "Tesla"
    pub make: String,
    /// Model name, e.g. "Model Y"
    pub model: String,
    /// Restrict to a single model year
    pub year: Option<i32>,
}

impl SearchParams {
    pub fn new(make: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            make: make.into(),
            model: model.into(),
            year: None,
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Query parameters for the given 1-based page.
    ///
    /// The first request is the plain search page, which is also what sets up
    /// the catalog's session, and it takes no page index. Every later page
    /// carries an explicit `Page` on top. All pages share the same page size
    /// and sort so page N always covers rows `(N-1) * PAGE_SIZE + 1` onward.
    /// Keep the two shapes apart.
    pub fn query_pairs(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("Makes", self.make.clone()),
            ("Models", self.model.clone()),
            ("VehicleType", "bil".to_string()),
        ];

        if let Some(year) = self.year {
            pairs.push(("YearFrom", year.to_string()));
            pairs.push(("YearTo", year.to_string()));
        }

        pairs.push(("PageSize", PAGE_SIZE.to_string()));
        pairs.push(("SortField", "publishedDate".to_string()));
        pairs.push(("IsAscending", "false".to_string()));

        if page > 1 {
            pairs.push(("Page", page.to_string()));
        }

        pairs
    }
}
