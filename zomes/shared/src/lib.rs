//! Mealflow Shared Utilities
//!
//! Common functionality for the Mealflow zomes:
//! - Anchor management for "all X" indexes and id lookups
//! - Link traversal, including following update links to the newest version
//! - Conversion between Holochain timestamps and chrono
//! - Id minting from host randomness

use hdk::prelude::*;

pub use anchors::*;
pub use batch::*;
pub use ids::*;
pub use time::*;

/// Anchor utilities for consistent indexing
pub mod anchors {
    use super::*;

    /// Anchor entry for deterministic link bases. Never committed, only hashed.
    #[hdk_entry_helper]
    #[derive(Clone, PartialEq)]
    pub struct Anchor(pub String);

    pub fn anchor_hash(anchor_text: &str) -> ExternResult<EntryHash> {
        hash_entry(&Anchor(anchor_text.to_string()))
    }

    /// Anchor under which a record with a domain id is looked up, e.g. `tray:<uuid>`
    pub fn id_anchor(kind: &str, id: &str) -> ExternResult<EntryHash> {
        anchor_hash(&id_anchor_text(kind, id))
    }

    pub fn id_anchor_text(kind: &str, id: &str) -> String {
        format!("{kind}:{id}")
    }
}

/// Link traversal helpers
pub mod batch {
    use super::*;

    /// Action hashes the links point at, skipping non-action targets
    pub fn link_targets(links: Vec<Link>) -> Vec<ActionHash> {
        links
            .into_iter()
            .filter_map(|link| link.target.into_action_hash())
            .collect()
    }

    /// Get records from links, silently dropping targets that cannot be fetched
    pub fn links_to_records(links: Vec<Link>) -> ExternResult<Vec<Record>> {
        let mut records = Vec::new();
        for hash in link_targets(links) {
            if let Some(record) = get(hash, GetOptions::default())? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// The first action hash linked from `base`, if any
    pub fn first_target(
        base: impl Into<AnyLinkableHash>,
        link_type: impl LinkTypeFilterExt + TryInto<LinkTypeFilter, Error = WasmError>,
    ) -> ExternResult<Option<ActionHash>> {
        let links = get_links(LinkQuery::try_new(base, link_type)?, GetStrategy::default())?;
        Ok(link_targets(links).into_iter().next())
    }

    /// Newest version of a mutable entry.
    ///
    /// Every update is linked from the original create action; the update
    /// link with the latest timestamp wins. Without updates the original is
    /// the newest version.
    pub fn latest_version(
        original: ActionHash,
        updates: impl LinkTypeFilterExt + TryInto<LinkTypeFilter, Error = WasmError>,
    ) -> ExternResult<ActionHash> {
        let links = get_links(
            LinkQuery::try_new(original.clone(), updates)?,
            GetStrategy::default(),
        )?;
        let candidates = links.into_iter().filter_map(|link| {
            let timestamp = link.timestamp;
            link.target.into_action_hash().map(|hash| (timestamp, hash))
        });
        Ok(newest_target(candidates).unwrap_or(original))
    }

    /// The target of the latest link; a later link wins a timestamp tie
    pub fn newest_target(
        candidates: impl IntoIterator<Item = (Timestamp, ActionHash)>,
    ) -> Option<ActionHash> {
        candidates
            .into_iter()
            .max_by_key(|(timestamp, _)| *timestamp)
            .map(|(_, hash)| hash)
    }

    pub fn latest_record(
        original: ActionHash,
        updates: impl LinkTypeFilterExt + TryInto<LinkTypeFilter, Error = WasmError>,
    ) -> ExternResult<Option<Record>> {
        let latest = latest_version(original, updates)?;
        get(latest, GetOptions::default())
    }
}

/// Conversion between Holochain and chrono time
pub mod time {
    use super::*;
    use chrono::{DateTime, Utc};

    pub fn to_datetime(timestamp: Timestamp) -> ExternResult<DateTime<Utc>> {
        DateTime::from_timestamp_micros(timestamp.as_micros()).ok_or(wasm_error!(
            WasmErrorInner::Guest(format!("Timestamp out of range: {timestamp:?}"))
        ))
    }

    pub fn to_timestamp(at: DateTime<Utc>) -> Timestamp {
        Timestamp::from_micros(at.timestamp_micros())
    }

    /// Host time for the current zome call
    pub fn call_time() -> ExternResult<DateTime<Utc>> {
        to_datetime(sys_time()?)
    }
}

/// Domain id minting
pub mod ids {
    use super::*;
    use uuid::Builder;

    /// Fresh random (version 4) UUID text from host randomness
    pub fn mint_id() -> ExternResult<String> {
        let bytes = random_bytes(16)?.to_vec();
        let random = <[u8; 16]>::try_from(bytes.as_slice()).map_err(|_| {
            wasm_error!(WasmErrorInner::Guest("Host returned a short random buffer".into()))
        })?;
        Ok(uuid_text(random))
    }

    pub fn uuid_text(random: [u8; 16]) -> String {
        Builder::from_random_bytes(random).into_uuid().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_id_anchor_text() {
        assert_eq!(id_anchor_text("tray", "abc"), "tray:abc");
    }

    #[test]
    fn test_uuid_text_sets_version_and_variant() {
        let id = uuid_text([0xff; 16]);
        assert_eq!(id.len(), 36);
        // version nibble forced to 4, variant bits to 10xx
        assert_eq!(&id[14..15], "4");
        assert_eq!(&id[19..20], "b");
    }

    fn action(byte: u8) -> ActionHash {
        ActionHash::from_raw_36(vec![byte; 36])
    }

    #[test]
    fn test_newest_update_link_wins() {
        let links = vec![
            (Timestamp::from_micros(20), action(2)),
            (Timestamp::from_micros(30), action(3)),
            (Timestamp::from_micros(10), action(1)),
        ];
        assert_eq!(newest_target(links), Some(action(3)));
        assert_eq!(newest_target(Vec::new()), None);
    }

    #[test]
    fn test_newest_target_tie_goes_to_later_link() {
        let links = vec![
            (Timestamp::from_micros(50), action(1)),
            (Timestamp::from_micros(50), action(2)),
        ];
        assert_eq!(newest_target(links), Some(action(2)));
    }

    #[test]
    fn test_timestamp_conversion_keeps_microseconds() {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()
            + chrono::Duration::microseconds(123_456);
        let timestamp = to_timestamp(at);
        assert_eq!(timestamp.as_micros(), at.timestamp_micros());
        assert_eq!(to_datetime(timestamp).unwrap(), at);
    }
}
