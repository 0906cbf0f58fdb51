use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec};

use tally_lights::protocol::{Brightness, LightMessage};
use tally_lights::server::LightServer;
use tally_lights::tally::{TallyEntry, TallyState, TallyVector};
use tally_lights::{Hub, HubHandle};

type Lines = FramedRead<TcpStream, LinesCodec>;

async fn start() -> (HubHandle, String) {
    let brightness = Brightness {
        program: 90,
        preview: 40,
    };
    let (hub, _task) = Hub::new(brightness).spawn();
    let server = LightServer::bind("127.0.0.1:0".parse().unwrap(), hub.clone(), 8)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.run());
    (hub, addr)
}

async fn connect(addr: &str) -> Lines {
    let stream = TcpStream::connect(addr).await.unwrap();
    FramedRead::new(stream, LinesCodec::new())
}

async fn next_message(lines: &mut Lines) -> LightMessage {
    let line = tokio::time::timeout(Duration::from_secs(2), lines.next())
        .await
        .expect("timed out waiting for a line")
        .expect("connection closed")
        .unwrap();
    LightMessage::decode(&line).unwrap()
}

fn vector(states: &[TallyState]) -> TallyVector {
    states
        .iter()
        .enumerate()
        .map(|(channel, state)| TallyEntry {
            channel: channel as u16,
            state: *state,
        })
        .collect()
}

#[tokio::test]
async fn test_light_receives_brightness_then_tally() {
    let (hub, addr) = start().await;
    let mut light = connect(&addr).await;

    assert_eq!(
        next_message(&mut light).await,
        LightMessage::SetBrightness(Brightness {
            program: 90,
            preview: 40
        })
    );

    let published = vector(&[TallyState::Program, TallyState::None, TallyState::Preview]);
    hub.publish(published.clone()).await;
    assert_eq!(next_message(&mut light).await, LightMessage::tally(&published));
}

#[tokio::test]
async fn test_late_joiner_gets_last_vector() {
    let (hub, addr) = start().await;
    let published = vector(&[TallyState::Preview, TallyState::Program]);
    hub.publish(published.clone()).await;

    let mut late = connect(&addr).await;
    assert!(matches!(
        next_message(&mut late).await,
        LightMessage::SetBrightness(_)
    ));
    assert_eq!(next_message(&mut late).await, LightMessage::tally(&published));
}

#[tokio::test]
async fn test_identical_vector_not_resent() {
    let (hub, addr) = start().await;
    let mut light = connect(&addr).await;
    next_message(&mut light).await;

    let first = vector(&[TallyState::Program, TallyState::Preview]);
    hub.publish(first.clone()).await;
    assert_eq!(next_message(&mut light).await, LightMessage::tally(&first));

    hub.publish(first).await;
    let second = vector(&[TallyState::Preview, TallyState::Program]);
    hub.publish(second.clone()).await;

    // The repeat is skipped, so the next line is the changed vector
    assert_eq!(next_message(&mut light).await, LightMessage::tally(&second));
}

#[tokio::test]
async fn test_wire_format_is_json_lines() {
    let (hub, addr) = start().await;
    let stream = TcpStream::connect(&addr).await.unwrap();
    let mut lines = FramedRead::new(stream, LinesCodec::new());

    let first = lines.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(value["event"], "setBrightness");
    assert_eq!(value["data"]["program"], 90);

    hub.publish(vector(&[TallyState::Program])).await;
    let second = lines.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&second).unwrap();
    assert_eq!(value["event"], "setTally");
    assert_eq!(value["data"][0]["channel"], 0);
    assert_eq!(value["data"][0]["state"], "program");
}
