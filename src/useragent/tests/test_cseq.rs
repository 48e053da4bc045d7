use super::{create_test_agent, test_config};
use std::collections::HashSet;

#[tokio::test]
async fn test_generate_cseq_sequence() -> crate::Result<()> {
    let agent = create_test_agent(test_config())?;
    assert_eq!(agent.ua.generate_cseq(rsip::Method::Invite), "1 INVITE");
    assert_eq!(agent.ua.generate_cseq(rsip::Method::Bye), "2 BYE");
    assert_eq!(agent.ua.generate_cseq(rsip::Method::Register), "3 REGISTER");
    Ok(())
}

#[tokio::test]
async fn test_generate_cseq_concurrent() -> crate::Result<()> {
    let agent = create_test_agent(test_config())?;
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let ua = agent.ua.clone();
        tasks.push(tokio::spawn(async move {
            (0..50)
                .map(|_| ua.generate_cseq(rsip::Method::Options))
                .collect::<Vec<_>>()
        }));
    }
    let mut seen = HashSet::new();
    for task in futures::future::join_all(tasks).await {
        for cseq in task.expect("task") {
            let (seq, method) = cseq.split_once(' ').expect("cseq format");
            assert_eq!(method, "OPTIONS");
            assert!(seen.insert(seq.parse::<u32>().expect("number")));
        }
    }
    assert_eq!(seen.len(), 400);
    assert_eq!(seen.iter().min(), Some(&1));
    assert_eq!(seen.iter().max(), Some(&400));
    Ok(())
}

#[tokio::test]
async fn test_requests_consume_cseq() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    agent.ua.generate_cseq(rsip::Method::Invite);
    let register = agent.ua.register().await?;
    let sent = super::expect_request(&mut agent.peer, rsip::Method::Register).await;
    use rsip::prelude::HeadersExt;
    assert_eq!(sent.cseq_header()?.seq()?, 2);
    assert_eq!(register.cseq_header()?.seq()?, 2);
    assert_eq!(agent.ua.generate_cseq(rsip::Method::Bye), "3 BYE");
    Ok(())
}
