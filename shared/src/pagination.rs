use serde::{Deserialize, Serialize};

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    const MAX_PER_PAGE: u32 = 100;

    pub fn limit(&self) -> i64 {
        self.per_page.clamp(1, Self::MAX_PER_PAGE) as i64
    }

    pub fn offset(&self) -> i64 {
        ((self.page.max(1) - 1) as i64) * self.limit()
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, params: &PaginationParams, total: i64) -> Self {
        let per_page = params.limit() as u32;
        let total_pages = if total == 0 {
            0
        } else {
            ((total as u32) + per_page - 1) / per_page
        };
        Self {
            items,
            page: params.page.max(1),
            per_page,
            total,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_accounts_for_page_number() {
        let params = PaginationParams { page: 3, per_page: 10 };
        assert_eq!(params.offset(), 20);
    }

    #[test]
    fn per_page_is_clamped() {
        let params = PaginationParams { page: 1, per_page: 9999 };
        assert_eq!(params.limit(), 100);
    }

    #[test]
    fn total_pages_rounds_up() {
        let response = PaginatedResponse::new(vec![1, 2, 3], &PaginationParams { page: 1, per_page: 2 }, 5);
        assert_eq!(response.total_pages, 3);
    }
}
