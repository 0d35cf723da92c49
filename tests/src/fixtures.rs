//! Test fixtures: datasets, storage notifications, lookup responses.

use serde_json::json;

pub const HEADER: &str = "id,latitude,longitude";

/// Scenario A dataset: one resolvable row, one out-of-range row.
pub fn scenario_a_csv() -> String {
    dataset_csv(&[("1", "51.5", "-0.1"), ("2", "200", "200")])
}

/// Build a dataset with the canonical header.
pub fn dataset_csv(rows: &[(&str, &str, &str)]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for (id, lat, lon) in rows {
        out.push_str(&format!("{},{},{}\n", id, lat, lon));
    }
    out
}

/// `n` resolvable rows with ids `prefix-0 .. prefix-(n-1)`.
pub fn bulk_csv(prefix: &str, n: usize) -> String {
    let rows: Vec<(String, String, String)> = (0..n)
        .map(|i| {
            (
                format!("{}-{}", prefix, i),
                format!("{:.4}", 51.0 + i as f64 * 0.001),
                "-0.1".to_string(),
            )
        })
        .collect();
    let borrowed: Vec<(&str, &str, &str)> = rows
        .iter()
        .map(|(a, b, c)| (a.as_str(), b.as_str(), c.as_str()))
        .collect();
    dataset_csv(&borrowed)
}

/// Object-created notification naming `(bucket, key)` pairs.
pub fn storage_event(objects: &[(&str, &str)]) -> serde_json::Value {
    let records: Vec<_> = objects
        .iter()
        .map(|(bucket, key)| {
            json!({
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": bucket },
                    "object": { "key": key, "size": 128 }
                }
            })
        })
        .collect();
    json!({ "Records": records })
}

/// Successful reverse-geocoding body.
pub fn postcode_body(postcode: &str) -> serde_json::Value {
    json!({
        "status": 200,
        "result": [
            { "postcode": postcode, "distance": 12.5, "country": "England" }
        ]
    })
}

/// Rejection the lookup service sends for out-of-range coordinates.
pub fn invalid_coordinate_body() -> serde_json::Value {
    json!({
        "status": 400,
        "error": "Invalid longitude/latitude submitted"
    })
}
