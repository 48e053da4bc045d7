use super::options_request;
use crate::{
    transport::{ChannelTransport, SipTransport, TransportEvent},
    Result,
};

#[tokio::test]
async fn test_channel_records_outgoing() -> Result<()> {
    let (transport, mut peer) = ChannelTransport::new("127.0.0.1:5060".parse()?);
    let target = "127.0.0.1:5070".parse()?;
    transport
        .send_request(&options_request("z9hG4bK1"), target)
        .await?;
    let (msg, to) = peer.outgoing.recv().await.expect("outgoing");
    assert!(msg.is_request());
    assert_eq!(to, target);

    let mut incoming = transport.take_incoming().expect("incoming");
    peer.inject(options_request("z9hG4bK2"), target)?;
    match incoming.recv().await {
        Some(TransportEvent::Incoming(msg, from)) => {
            assert!(msg.is_request());
            assert_eq!(from, target);
        }
        None => panic!("no event"),
    }
    Ok(())
}

#[tokio::test]
async fn test_channel_fail_and_close() -> Result<()> {
    let (transport, _peer) = ChannelTransport::new("127.0.0.1:5060".parse()?);
    let target = "127.0.0.1:5070".parse()?;
    transport.set_fail_sends(true);
    assert!(matches!(
        transport.send_request(&options_request("z9hG4bK3"), target).await,
        Err(crate::Error::TransportError(_))
    ));
    transport.set_fail_sends(false);

    transport.close_transports().await?;
    transport.close_transports().await?;
    assert_eq!(transport.close_count(), 1);
    assert!(transport
        .send_request(&options_request("z9hG4bK4"), target)
        .await
        .is_err());
    Ok(())
}
