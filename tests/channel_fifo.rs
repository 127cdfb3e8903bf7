use ipcsync::{ChannelKind, TimelineKind, open_channel};
use std::thread;
mod common;
use common::on_event_engine;

const MESSAGES: u64 = 50;

#[test]
fn test_every_variant_delivers_in_send_order() {
    for kind in ChannelKind::ALL {
        let engine = on_event_engine(2);
        let channel = open_channel(kind, &engine, 4);
        assert_eq!(channel.kind(), kind);

        let sender = {
            let channel = channel.clone();
            thread::spawn(move || {
                for i in 1..=MESSAGES {
                    channel.send(format!("m{i}").into_bytes(), 0).unwrap();
                }
            })
        };

        for i in 1..=MESSAGES {
            let msg = channel.recv(1).unwrap();
            assert_eq!(msg.seq(), i, "{kind}");
            assert_eq!(msg.text(), format!("m{i}"), "{kind}");
            assert_eq!(msg.sender(), 0);
        }
        sender.join().unwrap();

        assert!(channel.is_empty());
        assert_eq!(engine.telemetry().completed(), MESSAGES);
        assert_eq!(
            engine.timeline().count(TimelineKind::Send),
            MESSAGES as usize
        );
        assert_eq!(
            engine.timeline().count(TimelineKind::Recv),
            MESSAGES as usize
        );
        assert!(engine.evaluate().is_empty(), "{kind}");
    }
}

#[test]
fn test_each_producer_keeps_its_order_under_interleaving() {
    for kind in [ChannelKind::Queue, ChannelKind::SharedBuffer] {
        let engine = on_event_engine(4);
        let channel = open_channel(kind, &engine, 3);

        let producers: Vec<_> = (0..3)
            .map(|p| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for i in 0..20u32 {
                        channel.send(i.to_le_bytes().to_vec(), p).unwrap();
                    }
                })
            })
            .collect();

        let mut last = [None::<u32>; 3];
        let mut last_seq = 0;
        for _ in 0..60 {
            let msg = channel.recv(3).unwrap();
            assert!(msg.seq() > last_seq, "{kind}: sequence went backwards");
            last_seq = msg.seq();

            let mut raw = [0u8; 4];
            raw.copy_from_slice(msg.payload());
            let value = u32::from_le_bytes(raw);
            if let Some(prev) = last[msg.sender()] {
                assert!(value > prev, "{kind}: P{} reordered", msg.sender());
            }
            last[msg.sender()] = Some(value);
        }
        for h in producers {
            h.join().unwrap();
        }
        assert_eq!(last, [Some(19); 3]);
    }
}
