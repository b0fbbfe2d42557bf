use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Serializes Duration as whole milliseconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    (duration.as_millis() as u64).serialize(serializer)
}

/// Deserializes Duration from whole milliseconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Test {
        #[serde(serialize_with = "serialize_duration")]
        #[serde(deserialize_with = "deserialize_duration")]
        interval: Duration,
    }

    #[test]
    fn test_duration_serialization() {
        let original = Test {
            interval: Duration::from_millis(10),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(serialized, r#"{"interval":10}"#);

        let deserialized: Test = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.interval, original.interval);
    }

    #[test]
    fn test_sub_millisecond_truncates() {
        let original = Test {
            interval: Duration::from_micros(2500),
        };
        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(serialized, r#"{"interval":2}"#);
    }
}
