//! Page parameters and list payloads shared by the query endpoints.

use serde::{Deserialize, Serialize};

use crate::cache_key::{CanonicalParams, ParamValue};
use crate::envelope::null_as_default;
use crate::tolerant;

/// `pageNo` / `pageSize` request parameters. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page_no: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn first(page_size: u32) -> Self {
        Self {
            page_no: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn next(self) -> Self {
        Self {
            page_no: self.page_no.saturating_add(1),
            ..self
        }
    }

    /// A page shorter than the requested size is the last one. A full page
    /// never is, so a total that is an exact multiple ends on an empty page.
    pub fn is_last_page(&self, returned: usize) -> bool {
        returned < self.page_size as usize
    }
}

impl CanonicalParams for PageRequest {
    fn to_param(&self) -> ParamValue {
        ParamValue::record([
            ("pageNo", self.page_no.to_param()),
            ("pageSize", self.page_size.to_param()),
        ])
    }
}

/// List payload carried in `datas` by paged endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct PagedData<T> {
    #[serde(default = "Vec::new", deserialize_with = "null_as_default")]
    pub array: Vec<T>,
    #[serde(default, deserialize_with = "tolerant::deserialize")]
    pub page_no: u32,
    #[serde(default, deserialize_with = "tolerant::deserialize")]
    pub page_size: u32,
}

impl<T> PagedData<T> {
    pub fn is_last_page(&self, requested: &PageRequest) -> bool {
        requested.is_last_page(self.array.len())
    }
}
