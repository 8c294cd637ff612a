use crate::catalog::TableCatalog;
use crate::store::SqliteStore;
use conductor_core::ConductorResult;
use std::fmt::Write as _;
use tracing::info;

const REGIONS: [(&str, &str, &str); 4] = [
    ("Northeast", "NY", "Albany"),
    ("Southeast", "GA", "Atlanta"),
    ("Midwest", "IL", "Chicago"),
    ("West", "CA", "Sacramento"),
];

const PRODUCTS: [(&str, &str, &str, f64, f64); 10] = [
    ("Trail Tent", "Outdoor", "Camping", 249.0, 140.0),
    ("Hiking Boots", "Outdoor", "Footwear", 129.0, 70.0),
    ("Camp Stove", "Outdoor", "Camping", 79.0, 41.0),
    ("Wireless Earbuds", "Electronics", "Audio", 99.0, 55.0),
    ("Smart Speaker", "Electronics", "Audio", 59.0, 30.0),
    ("Rain Jacket", "Apparel", "Outerwear", 89.0, 38.0),
    ("Wool Sweater", "Apparel", "Knitwear", 69.0, 25.0),
    ("Cast Iron Pan", "Home", "Kitchen", 45.0, 18.0),
    ("Throw Blanket", "Home", "Decor", 39.0, 14.0),
    ("Trail Mix", "Food", "Snacks", 6.0, 2.5),
];

const PAYMENT_METHODS: [&str; 4] = ["Credit", "Debit", "Cash", "Mobile"];
const CONDITIONS: [&str; 5] = ["Sunny", "Cloudy", "Rainy", "Snowy", "Windy"];

/// Create every catalog table in `store` and fill the core ones with a small
/// deterministic retail dataset: two stores per region, ten products, 28 days
/// of sales and weather.
pub fn seed_sample_data(store: &SqliteStore, catalog: &TableCatalog) -> ConductorResult<()> {
    let mut sql = String::from("BEGIN;\n");
    for table in &catalog.tables {
        let _ = writeln!(sql, "{};", table.ddl());
    }

    let mut store_id = 0;
    for (region, state, city) in REGIONS {
        for (idx, store_type) in ["Standard", "Outlet"].into_iter().enumerate() {
            store_id += 1;
            let _ = writeln!(
                sql,
                "INSERT OR REPLACE INTO stores_locations VALUES ({store_id}, '{city} {store_type}', '{region}', '{state}', '{city}', '{} Main St', '{store_type}', {}, '2019-0{}-01', 'Manager {store_id}');",
                100 + store_id,
                12_000 + idx * 8_000,
                idx + 1,
            );
        }
    }

    for (idx, (name, line, category, price, cost)) in PRODUCTS.iter().enumerate() {
        let tier = match *price {
            p if p >= 120.0 => "Premium",
            p if p >= 50.0 => "Standard",
            _ => "Budget",
        };
        let _ = writeln!(
            sql,
            "INSERT OR REPLACE INTO products_catalog VALUES ({}, '{name}', '{line}', '{category}', '{category}', '{tier}', {price}, {cost}, 'Conductor', {}, 1);",
            idx + 1,
            (idx % 3) + 1,
        );
    }

    let mut transaction_id = 0;
    for day in 0..28_u32 {
        for store in 1..=store_id {
            // Outdoor sales fade in the Northeast over the month.
            let product = ((day as usize) * 7 + store * 3) % PRODUCTS.len();
            let (_, line, _, price, _) = PRODUCTS[product];
            let northeast = store <= 2;
            let mut quantity = 1 + ((day as usize + store) % 5);
            if northeast && line == "Outdoor" && day >= 14 {
                quantity = 1;
            }
            let discount = if day % 7 == 5 { price * 0.1 } else { 0.0 };
            let revenue = quantity as f64 * (price - discount);
            transaction_id += 1;
            let _ = writeln!(
                sql,
                "INSERT OR REPLACE INTO sales_transactions VALUES ({transaction_id}, date('2024-06-01', '+{day} days'), '12:00:00', {store}, NULL, {}, {quantity}, {price}, {discount:.2}, {revenue:.2}, '{}');",
                product + 1,
                PAYMENT_METHODS[transaction_id % PAYMENT_METHODS.len()],
            );
        }
    }

    let mut weather_id = 0;
    for day in 0..28_u32 {
        for (ridx, (region, _, _)) in REGIONS.iter().enumerate() {
            weather_id += 1;
            let condition = CONDITIONS[(day as usize + ridx * 2) % CONDITIONS.len()];
            let precipitation = if condition == "Rainy" { 0.8 } else { 0.0 };
            let _ = writeln!(
                sql,
                "INSERT OR REPLACE INTO weather_data VALUES ({weather_id}, date('2024-06-01', '+{day} days'), '{region}', {}, {precipitation}, '{condition}', {});",
                60 + ridx * 5 + (day as usize % 10),
                u8::from(condition == "Snowy"),
            );
        }
    }

    sql.push_str("COMMIT;\n");
    store.execute_batch(&sql)?;
    info!(
        stores = store_id,
        transactions = transaction_id,
        weather_rows = weather_id,
        "Sample retail data seeded"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::DataStore;

    #[tokio::test]
    async fn test_seed_creates_all_tables_and_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let catalog = TableCatalog::retail().unwrap();
        seed_sample_data(&store, &catalog).unwrap();

        let tables = store
            .execute("SELECT name FROM sqlite_master WHERE type = 'table'")
            .await
            .unwrap();
        assert_eq!(tables.len(), 8);

        let sales = store
            .execute("SELECT COUNT(*) AS n FROM sales_transactions")
            .await
            .unwrap();
        assert_eq!(sales[0]["n"], serde_json::json!(28 * 8));
    }

    #[tokio::test]
    async fn test_seed_is_repeatable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let catalog = TableCatalog::retail().unwrap();
        seed_sample_data(&store, &catalog).unwrap();
        seed_sample_data(&store, &catalog).unwrap();

        let stores = store
            .execute("SELECT COUNT(*) AS n FROM stores_locations")
            .await
            .unwrap();
        assert_eq!(stores[0]["n"], serde_json::json!(8));
    }
}
