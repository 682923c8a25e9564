//! Participant identity resolution.

use serde_json::Value;
use url::form_urlencoded;

use crate::db::KeyValueStore;

/// Durable key holding the participant record written by the consent flow.
pub const PARTICIPANT_RECORD_KEY: &str = "participantData";
pub const UNKNOWN_PARTICIPANT: &str = "unknown";
const QUERY_PARAM: &str = "participantId";

/// Where a participant id may come from, besides the durable participant record.
#[derive(Debug, Clone, Default)]
pub struct IdentitySources {
    /// Raw query string of the page, with or without the leading `?`.
    pub query: Option<String>,
    /// Id supplied by the host environment.
    pub ambient: Option<String>,
}

impl IdentitySources {
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ambient: None,
        }
    }

    pub fn with_ambient(mut self, ambient: impl Into<String>) -> Self {
        self.ambient = Some(ambient.into());
        self
    }
}

/// Precedence: query parameter, then the stored participant record, then the
/// ambient id, then `"unknown"`. Empty values are treated as absent.
pub fn resolve_participant_id(sources: &IdentitySources, durable: &dyn KeyValueStore) -> String {
    sources
        .query
        .as_deref()
        .and_then(participant_from_query)
        .or_else(|| participant_from_record(durable))
        .or_else(|| non_empty(sources.ambient.as_deref()))
        .unwrap_or_else(|| UNKNOWN_PARTICIPANT.to_string())
}

fn participant_from_query(query: &str) -> Option<String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == QUERY_PARAM)
        .and_then(|(_, value)| non_empty(Some(&*value)))
}

fn participant_from_record(durable: &dyn KeyValueStore) -> Option<String> {
    let raw = match durable.get(PARTICIPANT_RECORD_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            log::warn!("Failed to read participant record: {err:?}");
            return None;
        }
    };

    let record: Value = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(err) => {
            log::warn!("Ignoring unparsable participant record: {err}");
            return None;
        }
    };

    non_empty(record.get("id").and_then(Value::as_str))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn store_with_record(id: &str) -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .set(PARTICIPANT_RECORD_KEY, &format!(r#"{{"id":"{id}","age":"21"}}"#))
            .unwrap();
        store
    }

    #[test]
    fn query_parameter_wins() {
        let store = store_with_record("P-stored");
        let sources = IdentitySources::from_query("?lang=en&participantId=P%2007").with_ambient("P-global");
        assert_eq!(resolve_participant_id(&sources, &store), "P 07");
    }

    #[test]
    fn query_values_are_form_decoded() {
        let store = MemoryStore::new();
        let sources = IdentitySources::from_query("participantId=P+08&participantId=later");
        assert_eq!(resolve_participant_id(&sources, &store), "P 08");
    }

    #[test]
    fn stored_record_beats_ambient() {
        let store = store_with_record("P-stored");
        let sources = IdentitySources::from_query("lang=en").with_ambient("P-global");
        assert_eq!(resolve_participant_id(&sources, &store), "P-stored");
    }

    #[test]
    fn ambient_used_when_nothing_else() {
        let store = MemoryStore::new();
        let sources = IdentitySources::default().with_ambient("P-global");
        assert_eq!(resolve_participant_id(&sources, &store), "P-global");
    }

    #[test]
    fn falls_back_to_unknown() {
        let mut store = MemoryStore::new();
        store.set(PARTICIPANT_RECORD_KEY, "not json").unwrap();
        let sources = IdentitySources::from_query("participantId=");
        assert_eq!(resolve_participant_id(&sources, &store), UNKNOWN_PARTICIPANT);
    }
}
