//! Minimal SDP offer/answer for a single audio stream.

use crate::{Error, Result};
use std::{
    net::IpAddr,
    sync::atomic::{AtomicU64, Ordering},
};

pub const PAYLOAD_PCMU: u8 = 0;
pub const PAYLOAD_PCMA: u8 = 8;
pub const PAYLOAD_TELEPHONE_EVENT: u8 = 101;

const SUPPORTED: &[(u8, &str)] = &[
    (PAYLOAD_PCMU, "PCMU/8000"),
    (PAYLOAD_PCMA, "PCMA/8000"),
    (PAYLOAD_TELEPHONE_EVENT, "telephone-event/8000"),
];

/// Remote audio endpoint described by an SDP body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub address: IpAddr,
    pub port: u16,
    pub payload_types: Vec<u8>,
}

pub struct SdpManager {
    address: IpAddr,
    rtp_port: u16,
    session_id: u64,
    version: AtomicU64,
}

impl SdpManager {
    pub fn new(address: IpAddr, rtp_port: u16) -> Self {
        let session_id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        SdpManager {
            address,
            rtp_port,
            session_id,
            version: AtomicU64::new(session_id),
        }
    }

    pub fn rtp_port(&self) -> u16 {
        self.rtp_port
    }

    fn render(&self, payload_types: &[u8]) -> String {
        let version = self.version.fetch_add(1, Ordering::Relaxed);
        let ip_kind = if self.address.is_ipv6() { "IP6" } else { "IP4" };
        let mut sdp = format!(
            "v=0\r\no=- {} {} IN {} {}\r\ns=-\r\nc=IN {} {}\r\nt=0 0\r\nm=audio {} RTP/AVP {}\r\n",
            self.session_id,
            version,
            ip_kind,
            self.address,
            ip_kind,
            self.address,
            self.rtp_port,
            payload_types
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
        for pt in payload_types {
            if let Some((_, name)) = SUPPORTED.iter().find(|(p, _)| p == pt) {
                sdp.push_str(&format!("a=rtpmap:{} {}\r\n", pt, name));
            }
        }
        sdp.push_str("a=sendrecv\r\n");
        sdp
    }

    /// Offer every supported codec.
    pub fn create_offer(&self) -> String {
        let all = SUPPORTED.iter().map(|(p, _)| *p).collect::<Vec<_>>();
        self.render(&all)
    }

    /// Answer `offer` with the codecs both sides support, in the offer's order.
    pub fn create_answer(&self, offer: &[u8]) -> Result<String> {
        let remote = parse_media(offer)?;
        let common = remote
            .payload_types
            .iter()
            .copied()
            .filter(|p| SUPPORTED.iter().any(|(s, _)| s == p))
            .collect::<Vec<_>>();
        if !common.iter().any(|p| *p != PAYLOAD_TELEPHONE_EVENT) {
            return Err(Error::Error("no common audio codec".to_string()));
        }
        Ok(self.render(&common))
    }
}

/// Extract the connection address, audio port and payload types.
pub fn parse_media(body: &[u8]) -> Result<MediaDescription> {
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::SipMessageError(format!("invalid SDP body: {}", e)))?;
    let mut address = None;
    let mut audio = None;
    for line in text.lines().map(str::trim) {
        if let Some(c) = line.strip_prefix("c=") {
            // c=IN IP4 192.0.2.1; a media-level line overrides the session one
            if let Some(addr) = c.split_whitespace().nth(2) {
                address = addr.parse::<IpAddr>().ok().or(address);
            }
        } else if let Some(m) = line.strip_prefix("m=audio ") {
            let mut parts = m.split_whitespace();
            let port = parts.next().and_then(|p| p.parse::<u16>().ok());
            let payload_types = parts
                .skip(1)
                .filter_map(|p| p.parse::<u8>().ok())
                .collect::<Vec<_>>();
            audio = port.map(|port| (port, payload_types));
        }
    }
    match (address, audio) {
        (Some(address), Some((port, payload_types))) => Ok(MediaDescription {
            address,
            port,
            payload_types,
        }),
        _ => Err(Error::SipMessageError(
            "SDP without audio connection".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_answer() -> crate::Result<()> {
        let alice = SdpManager::new("192.0.2.10".parse()?, 8000);
        let bob = SdpManager::new("192.0.2.20".parse()?, 8002);

        let offer = alice.create_offer();
        assert!(offer.contains("m=audio 8000 RTP/AVP 0 8 101"));
        let remote = parse_media(offer.as_bytes())?;
        assert_eq!(remote.address, "192.0.2.10".parse::<IpAddr>()?);
        assert_eq!(remote.payload_types, vec![0, 8, 101]);

        let answer = bob.create_answer(offer.as_bytes())?;
        let media = parse_media(answer.as_bytes())?;
        assert_eq!(media.port, 8002);
        assert_eq!(media.payload_types, vec![0, 8, 101]);
        Ok(())
    }

    #[test]
    fn test_answer_filters_codecs() -> crate::Result<()> {
        let bob = SdpManager::new("192.0.2.20".parse()?, 8000);
        let offer = "v=0\r\no=- 1 1 IN IP4 192.0.2.1\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 4000 RTP/AVP 18 8\r\n";
        let answer = bob.create_answer(offer.as_bytes())?;
        assert!(answer.contains("m=audio 8000 RTP/AVP 8\r\n"));

        let g729_only = "v=0\r\nc=IN IP4 192.0.2.1\r\nm=audio 4000 RTP/AVP 18 101\r\n";
        assert!(bob.create_answer(g729_only.as_bytes()).is_err());
        assert!(parse_media(b"v=0\r\n").is_err());
        Ok(())
    }
}
