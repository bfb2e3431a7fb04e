use extbridge_core::{EventChannel, EventKind, InboundEvent};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn concurrent_pushers_each_land_exactly_once() {
    let channel = Arc::new(EventChannel::new(4096, Duration::from_millis(50)));
    let producers = 8;
    let per_producer = 200;

    let handles = (0..producers)
        .map(|producer| {
            let channel = channel.clone();
            std::thread::spawn(move || {
                for index in 0..per_producer {
                    channel
                        .push(InboundEvent::unsolicited(
                            format!("p{producer}"),
                            index.to_string(),
                        ))
                        .expect("push");
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("producer thread");
    }

    let drained = channel.drain_all();
    assert_eq!(drained.len(), producers * per_producer);

    let mut seen = HashSet::new();
    for event in &drained {
        let EventKind::Unsolicited(name) = &event.kind else {
            panic!("only unsolicited events were pushed");
        };
        assert!(seen.insert((name.clone(), event.payload.clone())));
    }
    assert!(drained.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    assert!(channel.drain_all().is_empty());
}

#[test]
fn per_producer_order_is_preserved_while_draining_concurrently() {
    let channel = Arc::new(EventChannel::new(64, Duration::from_secs(1)));
    let total = 500;

    let producer = {
        let channel = channel.clone();
        std::thread::spawn(move || {
            for index in 0..total {
                channel
                    .push(InboundEvent::unsolicited("tick", index.to_string()))
                    .expect("push");
            }
        })
    };

    let mut payloads = Vec::with_capacity(total);
    while payloads.len() < total {
        for event in channel.drain_all() {
            payloads.push(event.payload.parse::<usize>().expect("numeric payload"));
        }
        std::thread::yield_now();
    }
    producer.join().expect("producer thread");

    assert_eq!(payloads, (0..total).collect::<Vec<_>>());
}
