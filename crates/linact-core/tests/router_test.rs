//! Router behaviour as seen by a bus subscriber.

use linact_core::{
    EventBus, FaultKind, InboundEvent, InboundEventRouter, InboundFrame, LinkEvent, ReadingKind,
};

fn text(line: &str) -> InboundFrame {
    InboundFrame::Text(line.to_string())
}

#[tokio::test]
async fn test_parse_error_reported_and_distance_kept() {
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let router = InboundEventRouter::new(bus);

    router.route(text("Distancia actual: 12.50 cm"));
    router.route(text("Distancia actual: abc cm"));

    let (first, _) = events.recv().await.unwrap();
    assert_eq!(first, LinkEvent::Inbound(InboundEvent::Distance { value_cm: 12.5 }));

    let (second, meta) = events.recv().await.unwrap();
    assert_eq!(second.fault_kind(), Some(FaultKind::ParseError));
    assert!(matches!(
        second,
        LinkEvent::Inbound(InboundEvent::ParseError {
            reading: ReadingKind::Distance,
            ..
        })
    ));
    assert_eq!(meta.source, "router");
    assert_eq!(meta.sequence, 1);

    assert_eq!(router.last_readings().distance_cm, Some(12.5));
}

#[tokio::test]
async fn test_speed_parse_error_keeps_speed() {
    let router = InboundEventRouter::new(EventBus::new());

    router.route(text("Velocidad actual: 800 μs"));
    router.route(text("Velocidad actual: -5 μs"));
    router.route(text("Velocidad actual: μs"));

    assert_eq!(router.last_readings().speed_us, Some(800));
    assert_eq!(router.last_readings().distance_cm, None);
}

#[tokio::test]
async fn test_mixed_firmware_revisions() {
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let router = InboundEventRouter::new(bus);

    for line in [
        "Auto mode activated.",
        "Current distance: 30.10 cm",
        "Stopping manual motion.",
        "Desactivando modo automático",
    ] {
        router.route(text(line));
    }

    let kinds: Vec<String> = events
        .drain()
        .into_iter()
        .map(|event| match event {
            LinkEvent::Inbound(InboundEvent::ModeChanged(mode)) => format!("{:?}", mode),
            LinkEvent::Inbound(InboundEvent::Distance { value_cm }) => format!("{}", value_cm),
            other => format!("{:?}", other),
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["AutoEnabled", "30.1", "MotorStopped", "AutoDisabled"]
    );
}
