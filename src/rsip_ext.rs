use crate::Result;
use rsip::prelude::{HeadersExt, ToTypedHeader, UntypedHeader};

/// Accessors shared by requests and responses.
pub trait RsipMessageExt {
    fn call_id(&self) -> Result<String>;
    fn cseq_seq(&self) -> Result<u32>;
    fn cseq_method(&self) -> Result<rsip::Method>;
    fn from_tag(&self) -> Result<Option<String>>;
    fn to_tag(&self) -> Result<Option<String>>;
    /// Branch parameter of the topmost Via.
    fn top_branch(&self) -> Option<String>;
    /// URI carried by the Contact header, if any.
    fn contact_uri(&self) -> Option<rsip::Uri>;
    /// Record-Route values in header order.
    fn record_routes(&self) -> Vec<String>;
}

macro_rules! impl_message_ext {
    ($t:ty) => {
        impl RsipMessageExt for $t {
            fn call_id(&self) -> Result<String> {
                Ok(self.call_id_header()?.value().to_string())
            }

            fn cseq_seq(&self) -> Result<u32> {
                Ok(self.cseq_header()?.seq()?)
            }

            fn cseq_method(&self) -> Result<rsip::Method> {
                Ok(self.cseq_header()?.method()?)
            }

            fn from_tag(&self) -> Result<Option<String>> {
                Ok(self.from_header()?.tag()?.map(|t| t.to_string()))
            }

            fn to_tag(&self) -> Result<Option<String>> {
                Ok(self.to_header()?.tag()?.map(|t| t.to_string()))
            }

            fn top_branch(&self) -> Option<String> {
                let via = self.via_header().ok()?.typed().ok()?;
                via.branch().map(|b| b.to_string())
            }

            fn contact_uri(&self) -> Option<rsip::Uri> {
                self.contact_header().ok()?.typed().ok().map(|c| c.uri)
            }

            fn record_routes(&self) -> Vec<String> {
                self.headers
                    .iter()
                    .filter_map(|h| match h {
                        rsip::Header::RecordRoute(rr) => Some(rr.value().to_string()),
                        _ => None,
                    })
                    .collect()
            }
        }
    };
}

impl_message_ext!(rsip::Request);
impl_message_ext!(rsip::Response);

/// Remove the `tag` parameter from a From/To header value.
///
/// Parameters inside `<...>` belong to the URI and are left untouched.
pub fn strip_tag(value: &str) -> String {
    let (head, tail) = match value.rfind('>') {
        Some(pos) => value.split_at(pos + 1),
        None => match value.find(';') {
            Some(pos) => value.split_at(pos),
            None => (value, ""),
        },
    };
    let params: String = tail
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.to_ascii_lowercase().starts_with("tag="))
        .map(|p| format!(";{}", p))
        .collect();
    format!("{}{}", head.trim(), params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsip::headers::*;

    #[test]
    fn test_strip_tag() {
        assert_eq!(
            strip_tag("Bob <sip:bob@example.com;transport=udp>;tag=a6c85cf"),
            "Bob <sip:bob@example.com;transport=udp>"
        );
        assert_eq!(
            strip_tag("<sip:bob@example.com>;foo=bar;tag=1;x"),
            "<sip:bob@example.com>;foo=bar;x"
        );
        assert_eq!(strip_tag("sip:bob@example.com;tag=1"), "sip:bob@example.com");
        assert_eq!(strip_tag("sip:bob@example.com"), "sip:bob@example.com");
    }

    #[test]
    fn test_message_ext() -> crate::Result<()> {
        let req = rsip::Request {
            method: rsip::Method::Invite,
            uri: rsip::Uri::try_from("sip:bob@example.com")?,
            headers: vec![
                Via::new("SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds").into(),
                From::new("Alice <sip:alice@atlanta.com>;tag=1928301774").into(),
                To::new("Bob <sip:bob@biloxi.com>").into(),
                CallId::new("a84b4c76e66710@pc33.atlanta.com").into(),
                CSeq::new("314159 INVITE").into(),
                RecordRoute::new("<sip:p1.example.com;lr>").into(),
                RecordRoute::new("<sip:p2.example.com;lr>").into(),
            ]
            .into(),
            version: rsip::Version::V2,
            body: vec![],
        };
        assert_eq!(req.call_id()?, "a84b4c76e66710@pc33.atlanta.com");
        assert_eq!(req.cseq_seq()?, 314159);
        assert_eq!(req.cseq_method()?, rsip::Method::Invite);
        assert_eq!(req.from_tag()?, Some("1928301774".to_string()));
        assert_eq!(req.to_tag()?, None);
        assert_eq!(req.top_branch(), Some("z9hG4bK776asdhds".to_string()));
        assert_eq!(req.record_routes().len(), 2);
        Ok(())
    }
}
