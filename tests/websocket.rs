use futures_util::{SinkExt, StreamExt};
use huddle_lib::signaling::websocket::{decode_frame, WebSocketChannel};
use huddle_lib::signaling::{ChatSignal, SignalKind, SignalMessage, SignalingChannel, UserJoined};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Minimal relay: every text frame goes to every other connection
async fn spawn_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (fanout, _) = broadcast::channel::<(usize, String)>(64);

    tokio::spawn(async move {
        let mut next_id = 0;
        while let Ok((stream, _)) = listener.accept().await {
            next_id += 1;
            let me = next_id;
            let fanout = fanout.clone();
            tokio::spawn(async move {
                let ws = accept_async(stream).await.unwrap();
                let (mut write, mut read) = ws.split();
                let mut inbox = fanout.subscribe();
                loop {
                    tokio::select! {
                        frame = read.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let _ = fanout.send((me, text));
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        relayed = inbox.recv() => match relayed {
                            Ok((from, text)) if from != me => {
                                if write.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(_) => break,
                        },
                    }
                }
            });
        }
    });

    format!("ws://{addr}")
}

async fn recv(sub: &mut huddle_lib::signaling::Subscription) -> SignalMessage {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("subscription closed")
}

#[tokio::test]
async fn frames_cross_the_relay_within_a_room() {
    let url = spawn_relay().await;
    let alice = WebSocketChannel::connect(&url, "room-1").await.unwrap();
    let bob = WebSocketChannel::connect(&url, "room-1").await.unwrap();
    let eve = WebSocketChannel::connect(&url, "room-2").await.unwrap();

    let mut bob_all = bob.subscribe();
    let mut bob_chat = bob.subscribe_to(&[SignalKind::ChatMessage]);
    let mut eve_all = eve.subscribe();
    // give the relay time to register every connection
    tokio::time::sleep(Duration::from_millis(100)).await;

    let joined = SignalMessage::UserJoined(UserJoined {
        user_id: "alice".into(),
        username: "Alice".into(),
    });
    let chat = SignalMessage::ChatMessage(ChatSignal {
        sender: "alice".into(),
        message: "hi bob".into(),
    });
    alice.send(joined.clone()).await.unwrap();
    alice.send(chat.clone()).await.unwrap();

    assert_eq!(recv(&mut bob_all).await, joined);
    assert_eq!(recv(&mut bob_all).await, chat);
    assert_eq!(recv(&mut bob_chat).await, chat);

    // other rooms never see the frames
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(eve_all.try_recv().is_err());
}

#[test]
fn wire_frames_are_readable_by_other_clients() {
    let raw = r#"{"room":"room-1","signal":{"event":"user-left","data":{"userId":"bob"}}}"#;
    let signal = decode_frame("room-1", raw).unwrap().unwrap();
    assert_eq!(signal.kind(), SignalKind::UserLeft);
    assert_eq!(signal.sender().as_str(), "bob");
}
