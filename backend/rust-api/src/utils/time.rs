use chrono::{DateTime, Utc};
use mongodb::bson::Bson;

/// Serialize a timestamp through the same serde path the document models
/// use, so range filters compare against the stored representation.
pub fn bson_datetime(dt: DateTime<Utc>) -> Bson {
    mongodb::bson::to_bson(&dt).unwrap_or_else(|_| Bson::String(dt.to_rfc3339()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filter_value_matches_model_serialization() {
        let dt = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let filter = bson_datetime(dt);

        #[derive(serde::Serialize)]
        struct Doc {
            at: DateTime<Utc>,
        }
        let doc = mongodb::bson::to_document(&Doc { at: dt }).unwrap();
        assert_eq!(doc.get("at").unwrap(), &filter);
    }
}
