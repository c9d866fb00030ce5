//! Response envelope shared by every JSON endpoint.

use serde::Serialize;

use super::token::PageParam;

/// `{success, message, code, result, timestamp}`.
#[derive(Debug, Serialize)]
pub struct DataResult<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub code: u16,
    pub result: T,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl<T: Serialize> DataResult<T> {
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            message: String::new(),
            code: 200,
            result,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl DataResult<&'static str> {
    pub fn error(code: u16, message: String) -> Self {
        Self {
            success: false,
            message,
            code,
            result: "",
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T: Serialize> {
    pub records: Vec<T>,
    pub total: i64,
    pub size: i64,
    pub current: i64,
    pub search_count: bool,
    pub pages: i64,
    pub offset: i64,
}

impl<T: Serialize> Page<T> {
    pub fn new(records: Vec<T>, total: i64, page: PageParam) -> Self {
        let pages = if page.page_size > 0 {
            total.saturating_add(page.page_size - 1) / page.page_size
        } else if page.page_size == -1 && total > 0 {
            1
        } else {
            0
        };
        Self {
            records,
            total,
            size: page.page_size,
            current: page.page_num,
            search_count: true,
            pages,
            offset: page.window().0,
        }
    }
}
