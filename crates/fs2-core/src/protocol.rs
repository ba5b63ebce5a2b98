//! Wire protocol definitions: HTTP header names, `/hello` and `/ping`
//! payloads, and the UDP advert formats. One module defining every
//! message both sides agree on.

use serde::{Deserialize, Serialize};

use crate::types::ShareKind;

/// `fs2-version` request header name.
pub const HEADER_VERSION: &str = "fs2-version";
/// `fs2-port` request header name.
pub const HEADER_PORT: &str = "fs2-port";
/// `fs2-cltoken` request header name.
pub const HEADER_CLTOKEN: &str = "fs2-cltoken";
/// `fs2-alias` request header name.
pub const HEADER_ALIAS: &str = "fs2-alias";
/// `fs2-avatarhash` request/response header name.
pub const HEADER_AVATARHASH: &str = "fs2-avatarhash";

/// A single share entry as reported in a peer's `/ping` manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShareManifestEntry {
    pub name: String,
    pub revision: u64,
    pub kind: ShareKind,
}

/// Body of a peer's `/ping` response: a liveness ack plus its current
/// share manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingSnapshot {
    pub alias: String,
    pub shares: Vec<ShareManifestEntry>,
}

/// Render a [`PingSnapshot`] as the XML body the `/ping` endpoint returns.
pub fn encode_ping_xml(snapshot: &PingSnapshot) -> Result<String, crate::error::Fs2Error> {
    Ok(quick_xml::se::to_string(snapshot)?)
}

pub fn decode_ping_xml(xml: &str) -> Result<PingSnapshot, crate::error::Fs2Error> {
    Ok(quick_xml::de::from_str(xml)?)
}

/// Parsed `/hello` request fields, after header validation.
#[derive(Clone, Debug)]
pub struct HelloRequest {
    pub port: u16,
    pub cltoken: u64,
    pub alias: Option<String>,
    pub avatar_hash: Option<String>,
}

/// Active-indexnode UDP advert: `<protoVer>:<port>:<advertUID>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveAdvert {
    pub proto_version: String,
    pub port: u16,
    pub uid: crate::types::AdvertUid,
}

impl ActiveAdvert {
    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.proto_version, self.port, self.uid)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let proto_version = parts.next()?.to_string();
        let port: u16 = parts.next()?.parse().ok()?;
        let uid_hex = parts.next()?;
        let uid = u64::from_str_radix(uid_hex, 16).ok()?;
        Some(ActiveAdvert {
            proto_version,
            port,
            uid: crate::types::AdvertUid(uid),
        })
    }
}

/// Prospective-indexnode UDP advert:
/// `<protoVer>:autoindexnode:<capability>:<advertUID>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProspectiveAdvert {
    pub proto_version: String,
    pub capability: crate::types::Capability,
    pub uid: crate::types::AdvertUid,
}

const PROSPECTIVE_MARKER: &str = "autoindexnode";

impl ProspectiveAdvert {
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.proto_version, PROSPECTIVE_MARKER, self.capability.0, self.uid
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(4, ':');
        let proto_version = parts.next()?.to_string();
        if parts.next()? != PROSPECTIVE_MARKER {
            return None;
        }
        let capability: u64 = parts.next()?.parse().ok()?;
        let uid_hex = parts.next()?;
        let uid = u64::from_str_radix(uid_hex, 16).ok()?;
        Some(ProspectiveAdvert {
            proto_version,
            capability: crate::types::Capability(capability),
            uid: crate::types::AdvertUid(uid),
        })
    }
}

/// Either advert flavour, as received off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advert {
    Active(ActiveAdvert),
    Prospective(ProspectiveAdvert),
}

impl Advert {
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(p) = ProspectiveAdvert::parse(s) {
            return Some(Advert::Prospective(p));
        }
        ActiveAdvert::parse(s).map(Advert::Active)
    }

    pub fn uid(&self) -> crate::types::AdvertUid {
        match self {
            Advert::Active(a) => a.uid,
            Advert::Prospective(p) => p.uid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AdvertUid, Capability};

    #[test]
    fn active_advert_round_trips() {
        let a = ActiveAdvert {
            proto_version: "fs2/2".into(),
            port: 8080,
            uid: AdvertUid(0xdead_beef),
        };
        let encoded = a.encode();
        assert_eq!(ActiveAdvert::parse(&encoded), Some(a));
    }

    #[test]
    fn prospective_advert_round_trips() {
        let p = ProspectiveAdvert {
            proto_version: "fs2/2".into(),
            capability: Capability(1_200_000),
            uid: AdvertUid(7),
        };
        let encoded = p.encode();
        assert_eq!(ProspectiveAdvert::parse(&encoded), Some(p));
    }

    #[test]
    fn advert_dispatches_to_correct_variant() {
        let active = ActiveAdvert {
            proto_version: "fs2/2".into(),
            port: 1,
            uid: AdvertUid(1),
        }
        .encode();
        assert!(matches!(Advert::parse(&active), Some(Advert::Active(_))));

        let prospective = ProspectiveAdvert {
            proto_version: "fs2/2".into(),
            capability: Capability(1),
            uid: AdvertUid(1),
        }
        .encode();
        assert!(matches!(
            Advert::parse(&prospective),
            Some(Advert::Prospective(_))
        ));
    }

    #[test]
    fn garbage_does_not_parse() {
        assert!(Advert::parse("not an advert").is_none());
    }

    #[test]
    fn ping_snapshot_round_trips_through_xml() {
        let snapshot = PingSnapshot {
            alias: "bob".into(),
            shares: vec![ShareManifestEntry {
                name: "music".into(),
                revision: 3,
                kind: crate::types::ShareKind::FileList,
            }],
        };
        let xml = encode_ping_xml(&snapshot).unwrap();
        let decoded = decode_ping_xml(&xml).unwrap();
        assert_eq!(decoded.alias, snapshot.alias);
        assert_eq!(decoded.shares.len(), 1);
        assert_eq!(decoded.shares[0].revision, 3);
    }
}
