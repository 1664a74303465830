use peerlink_lib::peer::{SdpType, SignalingState};
use peerlink_lib::signaling::{decode_envelope, encode_envelope, DescriptionEnvelope};
use peerlink_lib::peer::ChannelRole;
use peerlink_lib::{
    Endpoint, MediaSelection, RtcEngineFactory, Session, SessionConfig, SessionPhase,
    SyntheticDevices,
};
use std::time::Duration;

fn session() -> Session<SyntheticDevices, RtcEngineFactory> {
    session_with(SessionConfig::default())
}

fn session_with(config: SessionConfig) -> Session<SyntheticDevices, RtcEngineFactory> {
    let factory = RtcEngineFactory::new(&config).unwrap();
    let devices = SyntheticDevices::new(config.devices.clone());
    Session::new(config, devices, factory)
}

#[tokio::test]
async fn negotiates_two_webrtc_peers_in_process() {
    let mut session = session();
    session.start(MediaSelection::default()).await.unwrap();
    session.negotiate().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Negotiated);

    let local = session.link(Endpoint::Local).unwrap();
    let remote = session.link(Endpoint::Remote).unwrap();
    assert_eq!(local.state(), SignalingState::Stable);
    assert_eq!(remote.state(), SignalingState::Stable);
    assert_eq!(local.local_description(), remote.remote_description());
    assert_eq!(local.remote_description(), remote.local_description());

    let offer = local.local_description().unwrap();
    assert_eq!(offer.kind, SdpType::Offer);
    for section in ["m=audio", "m=video", "m=application"] {
        assert!(offer.sdp.contains(section), "offer lacks {section}");
    }

    session.hangup().await;
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(session.link(Endpoint::Local).is_none());
}

#[tokio::test]
async fn manual_negotiation_through_envelopes() {
    let mut session = session();
    session
        .start(MediaSelection {
            audio: None,
            video: None,
        })
        .await
        .unwrap();

    let offer = session.create_offer().await.unwrap();
    let wire = encode_envelope(&DescriptionEnvelope::new(offer.clone())).unwrap();
    let carried = decode_envelope(&wire).unwrap().sdp;
    assert_eq!(carried, offer);
    session.apply_offer(carried).await.unwrap();

    let answer = session.create_answer().await.unwrap();
    assert_eq!(answer.kind, SdpType::Answer);
    session.apply_answer(answer).await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Negotiated);
    assert_eq!(
        session.link(Endpoint::Local).unwrap().state(),
        SignalingState::Stable
    );

    session.hangup().await;
    session.hangup().await;
    assert_eq!(session.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn offer_asks_for_media_it_does_not_send() {
    let mut session = session_with(SessionConfig {
        video_constraints: "false".into(),
        ..SessionConfig::default()
    });
    session.start(MediaSelection::default()).await.unwrap();
    assert_eq!(session.local_stream().unwrap().video_tracks().count(), 0);
    session.negotiate().await.unwrap();

    let local = session.link(Endpoint::Local).unwrap();
    let offer = &local.local_description().unwrap().sdp;
    assert!(offer.contains("m=audio"));
    assert!(offer.contains("m=video"), "offer has no video section:\n{offer}");
    assert!(offer.contains("a=recvonly"));
    let answer = &local.remote_description().unwrap().sdp;
    assert!(answer.contains("m=video"));

    session.hangup().await;
}

#[tokio::test]
async fn counters_flow_over_the_webrtc_data_channel() {
    let mut session = session_with(SessionConfig {
        send_interval_ms: 100,
        ..SessionConfig::default()
    });
    session.start(MediaSelection::default()).await.unwrap();
    session.negotiate().await.unwrap();

    let done = session
        .run_until(Duration::from_secs(30), |s| {
            s.received().len() >= 2 && s.phase() == SessionPhase::Connected
        })
        .await;
    assert!(done, "received {:?} in {:?}", session.received(), session.phase());
    assert_eq!(&session.received()[..2], [0, 1]);
    assert_eq!(session.phase(), SessionPhase::Connected);
    assert!(session.channel(Endpoint::Remote, ChannelRole::Receiver).is_some());
    assert!(session.is_sending());

    session.hangup().await;
    assert!(!session.is_sending());
}
