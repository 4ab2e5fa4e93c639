//! CoT event model, wire serialization, and mission-change translation.
//!
//! Serialization is hand-written against `quick_xml::Writer` so the
//! output always carries an explicit `</event>` end tag — the framing
//! marker peers split the stream on. Parsing goes through the serde
//! deserializer with `@`-prefixed attribute names.

use chrono::{Duration, SecondsFormat, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use tacfed_types::MissionChange;

use crate::error::CotError;

/// Event type of a mission-change document.
pub const COT_TYPE_MISSION_CHANGE: &str = "t-x-m-c";

/// Event type of the keep-alive ping document.
pub const COT_TYPE_PING: &str = "t-x-c-t";

/// A parsed CoT event document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CotEvent {
    #[serde(rename = "@version", default = "default_version")]
    pub version: String,
    #[serde(rename = "@uid")]
    pub uid: String,
    #[serde(rename = "@type")]
    pub event_type: String,
    #[serde(rename = "@time")]
    pub time: String,
    #[serde(rename = "@start")]
    pub start: String,
    #[serde(rename = "@stale")]
    pub stale: String,
    #[serde(rename = "@how", default = "default_how")]
    pub how: String,
    pub point: CotPoint,
    #[serde(default)]
    pub detail: Option<CotDetail>,
}

fn default_version() -> String {
    "2.0".to_string()
}

fn default_how() -> String {
    "h-g-i-g-o".to_string()
}

/// The mandatory point element. Mission and control traffic carries a
/// zeroed point with unbounded error values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CotPoint {
    #[serde(rename = "@lat")]
    pub lat: f64,
    #[serde(rename = "@lon")]
    pub lon: f64,
    #[serde(rename = "@hae")]
    pub hae: f64,
    #[serde(rename = "@ce")]
    pub ce: f64,
    #[serde(rename = "@le")]
    pub le: f64,
}

impl CotPoint {
    /// The conventional "no position" point.
    pub fn zero() -> Self {
        Self {
            lat: 0.0,
            lon: 0.0,
            hae: 0.0,
            ce: 9_999_999.0,
            le: 9_999_999.0,
        }
    }
}

/// The optional detail element. Only the mission subtree is modeled;
/// anything else a peer sends is ignored by the deserializer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CotDetail {
    #[serde(default)]
    pub mission: Option<MissionDetail>,
}

/// The `<mission>` element of a mission-change document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionDetail {
    #[serde(rename = "@type")]
    pub mission_type: String,
    #[serde(rename = "@tool", default = "default_tool")]
    pub tool: String,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@authorUid")]
    pub author_uid: String,
    #[serde(rename = "MissionChanges", default)]
    pub mission_changes: Option<MissionChanges>,
}

fn default_tool() -> String {
    "public".to_string()
}

/// Container for the individual change entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionChanges {
    #[serde(rename = "MissionChange", default)]
    pub changes: Vec<MissionChangeDetail>,
}

/// One change entry inside `<MissionChanges>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionChangeDetail {
    #[serde(rename = "creatorUid")]
    pub creator_uid: String,
    #[serde(rename = "missionName")]
    pub mission_name: String,
    #[serde(rename = "type")]
    pub change_type: String,
    #[serde(rename = "contentUid", default)]
    pub content_uid: Option<String>,
    #[serde(rename = "content", default)]
    pub content: Option<String>,
    #[serde(rename = "timestamp", default)]
    pub timestamp: Option<String>,
}

impl CotEvent {
    /// Serializes the event to wire bytes.
    ///
    /// The output always ends with the literal `</event>` marker, never a
    /// self-closing form, so receivers can frame on it.
    pub fn to_wire(&self) -> Result<Vec<u8>, CotError> {
        let mut writer = Writer::new(Vec::new());

        let mut event = BytesStart::new("event");
        event.push_attribute(("version", self.version.as_str()));
        event.push_attribute(("uid", self.uid.as_str()));
        event.push_attribute(("type", self.event_type.as_str()));
        event.push_attribute(("time", self.time.as_str()));
        event.push_attribute(("start", self.start.as_str()));
        event.push_attribute(("stale", self.stale.as_str()));
        event.push_attribute(("how", self.how.as_str()));
        writer.write_event(Event::Start(event))?;

        let mut point = BytesStart::new("point");
        point.push_attribute(("lat", format_coord(self.point.lat).as_str()));
        point.push_attribute(("lon", format_coord(self.point.lon).as_str()));
        point.push_attribute(("hae", format_coord(self.point.hae).as_str()));
        point.push_attribute(("ce", format_coord(self.point.ce).as_str()));
        point.push_attribute(("le", format_coord(self.point.le).as_str()));
        writer.write_event(Event::Empty(point))?;

        if let Some(detail) = &self.detail {
            write_detail(&mut writer, detail)?;
        }

        writer.write_event(Event::End(BytesEnd::new("event")))?;
        Ok(writer.into_inner())
    }
}

fn format_coord(value: f64) -> String {
    // Integral values print without a fractional part, matching the
    // conventional 9999999 error markers.
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn write_detail(writer: &mut Writer<Vec<u8>>, detail: &CotDetail) -> Result<(), CotError> {
    writer.write_event(Event::Start(BytesStart::new("detail")))?;

    if let Some(mission) = &detail.mission {
        let mut elem = BytesStart::new("mission");
        elem.push_attribute(("type", mission.mission_type.as_str()));
        elem.push_attribute(("tool", mission.tool.as_str()));
        elem.push_attribute(("name", mission.name.as_str()));
        elem.push_attribute(("authorUid", mission.author_uid.as_str()));
        writer.write_event(Event::Start(elem))?;

        if let Some(mission_changes) = &mission.mission_changes {
            writer.write_event(Event::Start(BytesStart::new("MissionChanges")))?;
            for change in &mission_changes.changes {
                write_mission_change(writer, change)?;
            }
            writer.write_event(Event::End(BytesEnd::new("MissionChanges")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("mission")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("detail")))?;
    Ok(())
}

fn write_mission_change(
    writer: &mut Writer<Vec<u8>>,
    change: &MissionChangeDetail,
) -> Result<(), CotError> {
    writer.write_event(Event::Start(BytesStart::new("MissionChange")))?;

    write_text_element(writer, "creatorUid", &change.creator_uid)?;
    write_text_element(writer, "missionName", &change.mission_name)?;
    write_text_element(writer, "type", &change.change_type)?;
    if let Some(content_uid) = &change.content_uid {
        write_text_element(writer, "contentUid", content_uid)?;
    }
    if let Some(content) = &change.content {
        write_text_element(writer, "content", content)?;
    }
    if let Some(timestamp) = &change.timestamp {
        write_text_element(writer, "timestamp", timestamp)?;
    }

    writer.write_event(Event::End(BytesEnd::new("MissionChange")))?;
    Ok(())
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> Result<(), CotError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Parses one framed document into a [`CotEvent`].
pub fn parse_event(document: &[u8]) -> Result<CotEvent, CotError> {
    let text = std::str::from_utf8(document)?;
    Ok(quick_xml::de::from_str(text)?)
}

/// Builds the mission-change document for a committed change.
pub fn mission_change_event(change: &MissionChange) -> CotEvent {
    let now = Utc::now();
    CotEvent {
        version: default_version(),
        uid: change.uid.clone(),
        event_type: COT_TYPE_MISSION_CHANGE.to_string(),
        time: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        start: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        stale: (now + Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Millis, true),
        how: default_how(),
        point: CotPoint::zero(),
        detail: Some(CotDetail {
            mission: Some(MissionDetail {
                mission_type: "CHANGE".to_string(),
                tool: default_tool(),
                name: change.mission_name.clone(),
                author_uid: change.creator_uid.clone(),
                mission_changes: Some(MissionChanges {
                    changes: vec![MissionChangeDetail {
                        creator_uid: change.creator_uid.clone(),
                        mission_name: change.mission_name.clone(),
                        change_type: change.change_type.clone(),
                        content_uid: change.content_uid.clone(),
                        content: change.content.clone(),
                        timestamp: Some(change.created_at.clone()),
                    }],
                }),
            }),
        }),
    }
}

/// Builds the keep-alive ping document.
///
/// The uid carries the local node identifier so the remote side can tell
/// which deployment is pinging it.
pub fn ping_event(node_id: &str) -> CotEvent {
    let now = Utc::now();
    CotEvent {
        version: default_version(),
        uid: format!("{node_id}-ping"),
        event_type: COT_TYPE_PING.to_string(),
        time: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        start: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        stale: (now + Duration::seconds(75)).to_rfc3339_opts(SecondsFormat::Millis, true),
        how: default_how(),
        point: CotPoint::zero(),
        detail: None,
    }
}

/// A mission change received from a peer, tagged as federation-sourced.
///
/// Federated changes are ingested into the local change log but are never
/// re-queued for outbound federation — this is the loop-prevention
/// invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedChange {
    pub uid: String,
    pub mission_name: String,
    pub creator_uid: String,
    pub change_type: String,
    pub content: Option<String>,
    pub content_uid: Option<String>,
    pub source_peer_id: i64,
}

impl FederatedChange {
    /// Translates a parsed document into a federated change.
    ///
    /// Returns `Ok(None)` for documents that are not mission changes
    /// (pings, position reports) — those are valid traffic, just nothing
    /// to ingest.
    ///
    /// # Errors
    ///
    /// Returns [`CotError::MissingField`] when a mission-change document
    /// lacks its mission detail.
    pub fn from_event(event: &CotEvent, source_peer_id: i64) -> Result<Option<Self>, CotError> {
        if event.event_type != COT_TYPE_MISSION_CHANGE {
            return Ok(None);
        }

        let mission = event
            .detail
            .as_ref()
            .and_then(|d| d.mission.as_ref())
            .ok_or(CotError::MissingField("detail.mission"))?;

        let entry = mission
            .mission_changes
            .as_ref()
            .and_then(|c| c.changes.first());

        Ok(Some(Self {
            uid: event.uid.clone(),
            mission_name: entry
                .map(|e| e.mission_name.clone())
                .unwrap_or_else(|| mission.name.clone()),
            creator_uid: entry
                .map(|e| e.creator_uid.clone())
                .unwrap_or_else(|| mission.author_uid.clone()),
            change_type: entry
                .map(|e| e.change_type.clone())
                .unwrap_or_else(|| "CHANGE".to_string()),
            content: entry.and_then(|e| e.content.clone()),
            content_uid: entry.and_then(|e| e.content_uid.clone()),
            source_peer_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::EVENT_CLOSE_MARKER;

    fn change() -> MissionChange {
        MissionChange {
            id: 42,
            uid: "change-42".to_string(),
            mission_name: "op-alpha".to_string(),
            creator_uid: "user-1".to_string(),
            change_type: "ADD_CONTENT".to_string(),
            content: Some("route overlay".to_string()),
            content_uid: Some("content-9".to_string()),
            federated: false,
            source_peer_id: None,
            created_at: "2026-08-01 12:00:00".to_string(),
        }
    }

    #[test]
    fn mission_change_round_trips_through_the_wire_form() {
        let event = mission_change_event(&change());
        let wire = event.to_wire().unwrap();

        assert!(wire.ends_with(EVENT_CLOSE_MARKER));

        let parsed = parse_event(&wire).unwrap();
        assert_eq!(parsed.uid, "change-42");
        assert_eq!(parsed.event_type, COT_TYPE_MISSION_CHANGE);

        let mission = parsed.detail.unwrap().mission.unwrap();
        assert_eq!(mission.name, "op-alpha");
        assert_eq!(mission.author_uid, "user-1");

        let entry = &mission.mission_changes.unwrap().changes[0];
        assert_eq!(entry.change_type, "ADD_CONTENT");
        assert_eq!(entry.content_uid.as_deref(), Some("content-9"));
        assert_eq!(entry.content.as_deref(), Some("route overlay"));
    }

    #[test]
    fn content_with_xml_metacharacters_survives_the_round_trip() {
        let mut c = change();
        c.content = Some("<overlay name=\"a&b\">".to_string());

        let wire = mission_change_event(&c).to_wire().unwrap();
        let parsed = parse_event(&wire).unwrap();
        let mission = parsed.detail.unwrap().mission.unwrap();
        let entry = &mission.mission_changes.unwrap().changes[0];
        assert_eq!(entry.content.as_deref(), Some("<overlay name=\"a&b\">"));
    }

    #[test]
    fn ping_is_a_well_formed_cot_event_with_a_close_marker() {
        let wire = ping_event("node-7").to_wire().unwrap();
        assert!(wire.ends_with(EVENT_CLOSE_MARKER));

        let parsed = parse_event(&wire).unwrap();
        assert_eq!(parsed.event_type, COT_TYPE_PING);
        assert_eq!(parsed.uid, "node-7-ping");
        assert!(parsed.detail.is_none());
    }

    #[test]
    fn federated_change_is_extracted_from_a_mission_change_document() {
        let wire = mission_change_event(&change()).to_wire().unwrap();
        let parsed = parse_event(&wire).unwrap();

        let federated = FederatedChange::from_event(&parsed, 3)
            .unwrap()
            .expect("mission change should translate");
        assert_eq!(federated.uid, "change-42");
        assert_eq!(federated.mission_name, "op-alpha");
        assert_eq!(federated.creator_uid, "user-1");
        assert_eq!(federated.source_peer_id, 3);
    }

    #[test]
    fn ping_documents_translate_to_nothing() {
        let wire = ping_event("node-7").to_wire().unwrap();
        let parsed = parse_event(&wire).unwrap();
        assert!(FederatedChange::from_event(&parsed, 1).unwrap().is_none());
    }

    #[test]
    fn mission_change_without_detail_is_an_error() {
        let mut event = ping_event("node-7");
        event.event_type = COT_TYPE_MISSION_CHANGE.to_string();

        let err = FederatedChange::from_event(&event, 1).unwrap_err();
        assert!(matches!(err, CotError::MissingField("detail.mission")));
    }

    #[test]
    fn malformed_documents_fail_to_parse() {
        assert!(parse_event(b"<event uid='x'").is_err());
        assert!(parse_event(b"not xml at all").is_err());
        assert!(parse_event(&[0xff, 0xfe, 0x00]).is_err());
    }
}
