//! Field mappings for the REST API resources.
//!
//! Each resource maps onto one table through a fixed list of candidate JSON
//! paths per column. Paths may be dotted to reach into nested objects
//! (`address.zipcode`). The first path present wins.

use super::RawRecord;
use crate::models::{RawRow, RawValue, Rejection};
use serde_json::Value as Json;

/// Candidate JSON paths for one column.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub column: &'static str,
    pub paths: &'static [&'static str],
}

/// Mapping of one API resource onto a table.
#[derive(Debug, Clone, Copy)]
pub struct ResourceMapping {
    pub resource: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldMapping],
}

const fn field(column: &'static str, paths: &'static [&'static str]) -> FieldMapping {
    FieldMapping { column, paths }
}

static MAPPINGS: &[ResourceMapping] = &[
    ResourceMapping {
        resource: "customers",
        table: "customers",
        fields: &[
            field("customer_id", &["customer_id", "id"]),
            field("first_name", &["first_name", "firstName"]),
            field("last_name", &["last_name", "lastName"]),
            field("email", &["email"]),
            field("phone", &["phone"]),
            field("street", &["street", "address.street"]),
            field("city", &["city", "address.city"]),
            field("state", &["state", "address.state"]),
            field(
                "zip_code",
                &["zip_code", "zipcode", "address.zip_code", "address.zipcode"],
            ),
        ],
    },
    ResourceMapping {
        resource: "orders",
        table: "orders",
        fields: &[
            field("order_id", &["order_id", "id"]),
            field("customer_id", &["customer_id", "customer.id"]),
            field("order_status", &["order_status", "status"]),
            field("order_status_name", &["order_status_name", "status_name"]),
            field("order_date", &["order_date"]),
            field("required_date", &["required_date"]),
            field("shipped_date", &["shipped_date"]),
            field("staff_name", &["staff_name", "staff.name"]),
            field("store", &["store", "store_name", "store.name"]),
        ],
    },
    ResourceMapping {
        resource: "order_items",
        table: "order_items",
        fields: &[
            field("item_id", &["item_id", "id"]),
            field("order_id", &["order_id"]),
            field("product_id", &["product_id"]),
            field("quantity", &["quantity"]),
            field("list_price", &["list_price", "price"]),
            field("discount", &["discount"]),
        ],
    },
];

/// Mapping for `resource`, if it is one the API serves.
pub fn mapping_for(resource: &str) -> Option<&'static ResourceMapping> {
    MAPPINGS.iter().find(|m| m.resource == resource)
}

/// All mapped resources, in the order the API is read.
pub fn resources() -> impl Iterator<Item = &'static ResourceMapping> {
    MAPPINGS.iter()
}

/// Display name for an order status code.
pub fn status_name(code: i64) -> Option<&'static str> {
    match code {
        1 => Some("Pending"),
        2 => Some("Processing"),
        3 => Some("Rejected"),
        4 => Some("Completed"),
        _ => None,
    }
}

fn lookup<'v>(value: &'v Json, path: &str) -> Option<&'v Json> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

impl ResourceMapping {
    /// Maps one JSON object to a raw row.
    pub fn map_object(&self, ordinal: u64, object: &Json) -> RawRecord {
        if !object.is_object() {
            return Err(Rejection::malformed(
                ordinal,
                format!("expected a JSON object in '{}'", self.resource),
            ));
        }

        let mut raw = RawRow::new(ordinal);
        for mapping in self.fields {
            if let Some(value) = mapping.paths.iter().find_map(|path| lookup(object, path)) {
                raw.insert(mapping.column, RawValue::from(value));
            }
        }

        if self.table == "orders" {
            derive_status_name(&mut raw);
        }
        Ok(raw)
    }

    /// Maps a payload lazily: an array of objects, or a single object as one
    /// row. Each item is mapped only when the iterator reaches it.
    pub fn records(&self, payload: Json) -> ApiRecords<'_> {
        let (items, invalid) = match payload {
            Json::Array(items) => (items, None),
            object @ Json::Object(_) => (vec![object], None),
            Json::Null => (Vec::new(), None),
            _ => (
                Vec::new(),
                Some(Rejection::malformed(
                    1,
                    format!("'{}' payload is neither an array nor an object", self.resource),
                )),
            ),
        };
        ApiRecords {
            mapping: self,
            items: items.into_iter(),
            ordinal: 0,
            invalid,
        }
    }
}

/// Iterator over the mapped records of one payload.
#[derive(Debug)]
pub struct ApiRecords<'m> {
    mapping: &'m ResourceMapping,
    items: std::vec::IntoIter<Json>,
    ordinal: u64,
    invalid: Option<Rejection>,
}

impl Iterator for ApiRecords<'_> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(rejection) = self.invalid.take() {
            return Some(Err(rejection));
        }
        let item = self.items.next()?;
        self.ordinal += 1;
        Some(self.mapping.map_object(self.ordinal, &item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.items.len() + usize::from(self.invalid.is_some());
        (len, Some(len))
    }
}

impl ExactSizeIterator for ApiRecords<'_> {}

fn derive_status_name(raw: &mut RawRow) {
    let has_name = raw
        .get("order_status_name")
        .is_some_and(|v| !matches!(v, RawValue::Missing));
    if has_name {
        return;
    }
    let code = match raw.get("order_status") {
        Some(RawValue::Integer(code)) => Some(*code),
        Some(RawValue::Float(code)) if code.fract() == 0.0 => Some(*code as i64),
        Some(RawValue::Text(code)) => code.trim().parse().ok(),
        _ => None,
    };
    if let Some(name) = code.and_then(status_name) {
        raw.insert("order_status_name", RawValue::Text(name.to_string()));
    }
}
