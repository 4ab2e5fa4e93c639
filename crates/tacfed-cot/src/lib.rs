//! Cursor-on-Target (CoT) wire codec for the tacfed federation bridge.
//!
//! The federation wire protocol is a stream of CoT XML event documents
//! concatenated with no length prefix; each document ends with the fixed
//! `</event>` closing marker. This crate provides:
//!
//! - [`CotFramer`] — splits an incoming byte stream into discrete
//!   documents across arbitrary read boundaries;
//! - [`CotEvent`] — the parsed document model, with serialization back to
//!   wire bytes;
//! - [`mission_change_event`] / [`ping_event`] — builders for the two
//!   document kinds the bridge emits;
//! - [`FederatedChange`] — a received mission change, tagged as
//!   federation-sourced so it is never re-federated.

mod error;
mod event;
mod framer;

pub use error::CotError;
pub use event::{
    mission_change_event, parse_event, ping_event, CotDetail, CotEvent, CotPoint, FederatedChange,
    MissionChangeDetail, MissionChanges, MissionDetail, COT_TYPE_MISSION_CHANGE, COT_TYPE_PING,
};
pub use framer::{CotFramer, EVENT_CLOSE_MARKER};
