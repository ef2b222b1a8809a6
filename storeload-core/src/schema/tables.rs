//! The nine tables of the store schema.

use super::{ColumnDescriptor as Col, TableDescriptor};
use crate::models::SemanticType::{Boolean, Date, Decimal, Integer, String as Text};

/// Store schema descriptors in declaration order.
pub fn store_tables() -> Vec<TableDescriptor> {
    vec![
        brands(),
        categories(),
        stores(),
        staffs(),
        products(),
        stocks(),
        orders(),
        order_items(),
        customers(),
    ]
}

fn brands() -> TableDescriptor {
    TableDescriptor::new("brands")
        .column(Col::required("brand_id", Integer))
        .column(Col::required("brand_name", Text).max_length(255))
        .primary_key(&["brand_id"])
        .alias("name", "brand_name")
}

fn categories() -> TableDescriptor {
    TableDescriptor::new("categories")
        .column(Col::required("category_id", Integer))
        .column(Col::required("category_name", Text).max_length(255))
        .primary_key(&["category_id"])
        .alias("name", "category_name")
}

// `name` is unique because stocks reference stores by name rather than by
// store_id. The natural-key relationship is the application's data contract
// and must stay as it is.
fn stores() -> TableDescriptor {
    TableDescriptor::new("stores")
        .column(Col::required("store_id", Integer).auto_increment())
        .column(Col::required("name", Text).max_length(255).unique())
        .column(Col::optional("phone", Text).max_length(20))
        .column(Col::optional("email", Text).max_length(255))
        .column(Col::optional("street", Text).max_length(255))
        .column(Col::optional("city", Text).max_length(100))
        .column(Col::optional("state", Text).max_length(50))
        .column(Col::optional("zip_code", Text).max_length(20))
        .primary_key(&["store_id"])
        .alias("store_name", "name")
        .alias("zipcode", "zip_code")
}

fn staffs() -> TableDescriptor {
    TableDescriptor::new("staffs")
        .column(Col::required("staff_id", Integer).auto_increment())
        .column(Col::required("name", Text).max_length(100))
        .column(Col::required("last_name", Text).max_length(100))
        .column(Col::optional("email", Text).max_length(255))
        .column(Col::optional("phone", Text).max_length(20))
        .column(Col::optional("active", Boolean).default_value(true))
        .column(Col::optional("store_name", Text).max_length(255))
        .column(Col::optional("street", Text).max_length(255))
        .column(Col::optional("manager_id", Integer))
        .primary_key(&["staff_id"])
        .foreign_key("manager_id", "staffs", "staff_id")
        .alias("first_name", "name")
        .alias("store", "store_name")
}

fn products() -> TableDescriptor {
    TableDescriptor::new("products")
        .column(Col::required("product_id", Integer))
        .column(Col::required("product_name", Text).max_length(255))
        .column(Col::optional("brand_id", Integer))
        .column(Col::optional("category_id", Integer))
        .column(Col::optional("model_year", Integer))
        .column(Col::optional("list_price", Decimal).decimal(10, 2))
        .primary_key(&["product_id"])
        .foreign_key("brand_id", "brands", "brand_id")
        .foreign_key("category_id", "categories", "category_id")
}

fn stocks() -> TableDescriptor {
    TableDescriptor::new("stocks")
        .column(Col::required("store_name", Text).max_length(255))
        .column(Col::required("product_id", Integer))
        .column(Col::optional("quantity", Integer).default_value(0_i64))
        .primary_key(&["product_id", "store_name"])
        .foreign_key("product_id", "products", "product_id")
        .foreign_key("store_name", "stores", "name")
        .alias("store", "store_name")
}

fn orders() -> TableDescriptor {
    TableDescriptor::new("orders")
        .column(Col::required("order_id", Integer))
        .column(Col::required("customer_id", Integer))
        .column(Col::required("order_status", Integer))
        .column(Col::optional("order_status_name", Text).max_length(50))
        .column(Col::optional("order_date", Date))
        .column(Col::optional("required_date", Date))
        .column(Col::optional("shipped_date", Date))
        .column(Col::optional("staff_name", Text).max_length(255))
        .column(Col::optional("store", Text).max_length(255))
        .primary_key(&["order_id"])
        .alias("status", "order_status")
        .alias("store_name", "store")
        .index("idx_customer_id", &["customer_id"])
        .index("idx_order_date", &["order_date"])
        .index("idx_order_status", &["order_status"])
        .index("idx_store", &["store"])
}

fn order_items() -> TableDescriptor {
    TableDescriptor::new("order_items")
        .column(Col::required("item_id", Integer))
        .column(Col::required("order_id", Integer))
        .column(Col::required("product_id", Integer))
        .column(Col::required("quantity", Integer).default_value(1_i64))
        .column(Col::required("list_price", Decimal).decimal(10, 2))
        .column(Col::optional("discount", Decimal).decimal(4, 2).default_value(
            rust_decimal::Decimal::ZERO,
        ))
        .primary_key(&["item_id"])
        .alias("price", "list_price")
        .index("idx_order_id", &["order_id"])
        .index("idx_product_id", &["product_id"])
}

fn customers() -> TableDescriptor {
    TableDescriptor::new("customers")
        .column(Col::required("customer_id", Integer))
        .column(Col::required("first_name", Text).max_length(100))
        .column(Col::required("last_name", Text).max_length(100))
        .column(Col::optional("email", Text).max_length(255).unique())
        .column(Col::optional("phone", Text).max_length(20))
        .column(Col::optional("street", Text).max_length(255))
        .column(Col::optional("city", Text).max_length(100))
        .column(Col::optional("state", Text).max_length(50))
        .column(Col::optional("zip_code", Text).max_length(20))
        .primary_key(&["customer_id"])
        .alias("zipcode", "zip_code")
        .index("idx_email", &["email"])
        .index("idx_state", &["state"])
        .index("idx_city", &["city"])
}
